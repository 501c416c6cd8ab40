//! Per-request operation context.
//!
//! Everything that would otherwise be ambient session state (the active
//! update set, the target scope, the caller's deadline) travels in an
//! [`OperationContext`] owned by the caller and passed into each operation.

use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Correlates log lines and audit events of one request.
    pub request_id: String,
    /// Update set that deployments in this request belong to.
    pub update_set_id: Option<String>,
    /// Application scope deployments target.
    pub scope: Option<String>,
    /// Who issued the request.
    pub principal: Option<String>,
    deadline: Option<Instant>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            update_set_id: None,
            scope: None,
            principal: None,
            deadline: None,
        }
    }

    pub fn with_update_set(mut self, update_set_id: impl Into<String>) -> Self {
        self.update_set_id = Some(update_set_id.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Tighten the deadline to `timeout` from now unless an earlier one is already set.
    pub fn bounded_by(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Time left before the deadline. `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}
