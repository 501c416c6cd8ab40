//! The record store capability.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snowline_core::{QueryFilter, Record};
use std::fmt;

/// Structured, collection-scoped access to the remote record store.
///
/// Implementations must be safe to call concurrently. Records returned are
/// snapshots; changes go back through [`update`](RecordStore::update) as patch
/// documents.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records of `collection` matching `filter`, at most `limit` of them.
    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// A single record by id. `Ok(None)` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError>;

    /// Create a record. Returns it as stored, including its new id.
    async fn create(&self, collection: &str, fields: Map<String, Value>)
    -> Result<Record, StoreError>;

    /// Patch a record. Returns it as stored after the change.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Record, StoreError>;

    /// Delete a record.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// The five store operations, for call logs and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOperation {
    Query,
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Query => "query",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}
