//! Attempt budget and linear backoff.

use snowline_core::{DeploymentFailure, FailureKind, OperationContext};
use snowline_store::StoreError;
use std::future::Future;
use std::time::Duration;

/// How many primary attempts an artifact gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    /// Whether another attempt may follow attempt `attempt`.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run a store call, failing with [`StoreError::Timeout`] once the context's
/// deadline passes.
pub(crate) async fn within<T>(
    ctx: &OperationContext,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match ctx.remaining() {
        None => call.await,
        Some(remaining) => tokio::time::timeout(remaining, call)
            .await
            .map_err(|_| StoreError::Timeout(remaining))?,
    }
}

/// Sleep for `delay`, or until the deadline if that comes first.
///
/// Returns `false` when the deadline cut the sleep short.
pub(crate) async fn sleep_within(ctx: &OperationContext, delay: Duration) -> bool {
    match ctx.remaining() {
        Some(remaining) if remaining <= delay => {
            tokio::time::sleep(remaining).await;
            false
        }
        _ => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

/// Classify a store error for the artifact outcome.
pub(crate) fn failure_of(error: &StoreError) -> DeploymentFailure {
    let kind = match error {
        StoreError::Validation(_) => FailureKind::Validation,
        StoreError::Timeout(_) => FailureKind::Timeout,
        _ => FailureKind::Remote,
    };
    DeploymentFailure::new(kind, error.to_string())
}
