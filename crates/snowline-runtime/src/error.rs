use snowline_index::IndexError;
use thiserror::Error;

/// A batch that cannot be executed at all.
///
/// Per-artifact failures are not errors; they are reported in the
/// [`BatchResult`](snowline_core::BatchResult).
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid deployment batch: {0}")]
    InvalidBatch(String),

    #[error("artifact {index}: entity type '{entity_type}' has no known collection")]
    UnknownEntityType { index: usize, entity_type: String },

    #[error("deployment journal unavailable: {0}")]
    Journal(#[from] IndexError),
}

impl DeployError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidBatch(_) => "invalid_request",
            Self::UnknownEntityType { .. } => "unknown_entity_type",
            Self::Journal(_) => "journal",
        }
    }
}

/// A rollback request that cannot be processed.
///
/// Failed undo steps are not errors; they are reported in the
/// [`RollbackReport`](snowline_core::RollbackReport).
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("invalid rollback request: {0}")]
    InvalidRequest(String),

    #[error("deployment journal unavailable: {0}")]
    Journal(#[from] IndexError),
}

impl RollbackError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Journal(_) => "journal",
        }
    }
}
