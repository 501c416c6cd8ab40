//! Concurrency-limited store wrapper.

use crate::error::StoreError;
use crate::store::RecordStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use snowline_core::{QueryFilter, Record};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Wraps a store so that at most `max_concurrent` calls are in flight.
///
/// Callers waiting for a permit do not hold any other resource, so backoff
/// sleeps and queued calls never block unrelated work.
#[derive(Clone)]
pub struct LimitedStore {
    inner: Arc<dyn RecordStore>,
    permits: Arc<Semaphore>,
}

impl LimitedStore {
    pub fn new(inner: Arc<dyn RecordStore>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, StoreError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| StoreError::Remote("store concurrency limiter closed".to_string()))
    }
}

#[async_trait]
impl RecordStore for LimitedStore {
    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let _permit = self.permit().await?;
        self.inner.query(collection, filter, limit).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let _permit = self.permit().await?;
        self.inner.get(collection, id).await
    }

    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let _permit = self.permit().await?;
        self.inner.create(collection, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let _permit = self.permit().await?;
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let _permit = self.permit().await?;
        self.inner.delete(collection, id).await
    }
}
