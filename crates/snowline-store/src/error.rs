//! Error types for record store access.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`RecordStore`](crate::RecordStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected the request as invalid (missing or bad field).
    #[error("rejected by store: {0}")]
    Validation(String),

    /// The record does not exist.
    #[error("record {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    /// Transport or server-side failure.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The call did not complete in time.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// Local fixture data could not be loaded.
    #[error("fixture error in {path}: {reason}")]
    Fixture { path: String, reason: String },
}

impl StoreError {
    /// Whether repeating the same call may succeed.
    ///
    /// Validation failures and missing records fail identically every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::NotFound { .. } | Self::Fixture { .. })
    }
}
