//! Error types for the resolver crate.

use snowline_index::IndexError;
use snowline_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors from classification, resolution and indexing.
///
/// "Nothing found" is never an error; it is an empty result.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The request names a type with no collection mapping.
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    /// A record addressed by id does not exist.
    #[error("record {id} not found in {collection}")]
    RecordNotFound { collection: String, id: String },

    /// The request is structurally invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Resolution did not finish before the deadline.
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl ResolveError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownEntityType(_) => "unknown_entity_type",
            Self::RecordNotFound { .. } => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "remote_failure",
            Self::Index(_) => "index",
        }
    }
}
