//! In-process record store.
//!
//! Used by the CLI and MCP server when running against fixture data, and by
//! tests that need to count remote calls or script failures.

use crate::error::StoreError;
use crate::store::{RecordStore, StoreOperation};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use snowline_core::record::{ID_FIELD, UPDATED_FIELD};
use snowline_core::{QueryFilter, Record};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// One call made against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: StoreOperation,
    pub collection: String,
    /// Encoded filter for queries, record id for single-record calls.
    pub detail: Option<String>,
}

/// A scripted failure, matched against incoming calls in insertion order.
#[derive(Debug, Clone)]
pub struct InjectedFailure {
    operation: StoreOperation,
    collection: Option<String>,
    field_match: Option<(String, Value)>,
    remaining: Option<u32>,
    error: StoreError,
}

impl InjectedFailure {
    /// Fail matching calls with a retryable remote error.
    pub fn remote(operation: StoreOperation) -> Self {
        Self {
            operation,
            collection: None,
            field_match: None,
            remaining: None,
            error: StoreError::Remote(format!("injected {} failure", operation)),
        }
    }

    /// Reject matching calls as invalid.
    pub fn validation(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self {
            error: StoreError::Validation(message.into()),
            ..Self::remote(operation)
        }
    }

    /// Only match calls on this collection.
    pub fn on_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Only match create/update calls whose submitted fields contain `field == value`.
    pub fn when_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field_match = Some((field.into(), value.into()));
        self
    }

    /// Stop matching after `n` failures. Unlimited by default.
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn applies(
        &self,
        operation: StoreOperation,
        collection: &str,
        fields: Option<&Map<String, Value>>,
    ) -> bool {
        if self.operation != operation || self.remaining == Some(0) {
            return false;
        }
        if self.collection.as_deref().is_some_and(|c| c != collection) {
            return false;
        }
        match (&self.field_match, fields) {
            (None, _) => true,
            (Some((field, value)), Some(fields)) => fields.get(field) == Some(value),
            (Some(_), None) => false,
        }
    }
}

/// Records held in memory, keyed by collection.
#[derive(Default)]
pub struct MemoryRecordStore {
    collections: Mutex<BTreeMap<String, Vec<Record>>>,
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<Vec<InjectedFailure>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed a collection.
    pub fn with_records(self, collection: &str, records: impl IntoIterator<Item = Record>) -> Self {
        for record in records {
            self.insert(collection, record);
        }
        self
    }

    /// Load every `<collection>.json` file (a JSON array of objects) in `dir`.
    pub fn from_fixture_dir(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let fixture_error = |path: &Path, reason: String| StoreError::Fixture {
            path: path.display().to_string(),
            reason,
        };

        let mut paths = fs::read_dir(dir)
            .map_err(|e| fixture_error(dir, e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect::<Vec<_>>();
        paths.sort();

        let store = Self::new();
        for path in paths {
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = fs::read_to_string(&path).map_err(|e| fixture_error(&path, e.to_string()))?;
            let values: Vec<Value> =
                serde_json::from_str(&raw).map_err(|e| fixture_error(&path, e.to_string()))?;

            let mut loaded = 0;
            for value in values {
                let record = Record::from_value(value).ok_or_else(|| {
                    fixture_error(&path, "every entry must be a JSON object".to_string())
                })?;
                store.insert(collection, record);
                loaded += 1;
            }
            tracing::debug!(collection, records = loaded, "Loaded fixture collection");
        }
        Ok(store)
    }

    /// Insert a record directly, bypassing call recording. Assigns an id if missing.
    pub fn insert(&self, collection: &str, record: Record) -> Record {
        let record = if record.id().is_some() {
            record
        } else {
            record.with_field(ID_FIELD, new_record_id())
        };
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    /// Snapshot of a collection.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of one record.
    pub fn record(&self, collection: &str, id: &str) -> Option<Record> {
        lock(&self.collections)
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.id() == Some(id)).cloned())
    }

    /// Script a failure.
    pub fn inject_failure(&self, failure: InjectedFailure) {
        lock(&self.failures).push(failure);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of one operation.
    pub fn call_count(&self, operation: StoreOperation) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Number of query calls.
    pub fn query_count(&self) -> usize {
        self.call_count(StoreOperation::Query)
    }

    /// Total number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn begin(
        &self,
        operation: StoreOperation,
        collection: &str,
        detail: Option<String>,
        fields: Option<&Map<String, Value>>,
    ) -> Result<InFlight<'_>, StoreError> {
        lock(&self.calls).push(StoreCall {
            operation,
            collection: collection.to_string(),
            detail,
        });

        let guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut failures = lock(&self.failures);
        if let Some(failure) = failures
            .iter_mut()
            .find(|f| f.applies(operation, collection, fields))
        {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            tracing::debug!(%operation, collection, error = %failure.error, "Injected store failure");
            return Err(failure.error.clone());
        }
        Ok(guard)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn query(
        &self,
        collection: &str,
        filter: &QueryFilter,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let _guard = self
            .begin(StoreOperation::Query, collection, Some(filter.encode()), None)
            .await?;

        let mut matches: Vec<Record> = lock(&self.collections)
            .get(collection)
            .map(|records| records.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(field) = filter.sort_field() {
            matches.sort_by_key(|r| r.get_str(field).map(str::to_lowercase));
        }
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let _guard = self
            .begin(StoreOperation::Get, collection, Some(id.to_string()), None)
            .await?;
        Ok(self.record(collection, id))
    }

    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let _guard = self
            .begin(StoreOperation::Create, collection, None, Some(&fields))
            .await?;

        let record = Record::new(fields)
            .with_field(ID_FIELD, new_record_id())
            .with_field(UPDATED_FIELD, timestamp());
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        let _guard = self
            .begin(StoreOperation::Update, collection, Some(id.to_string()), Some(&patch))
            .await?;

        let mut collections = lock(&self.collections);
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| r.id() == Some(id)))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let mut fields = std::mem::take(record).into_fields();
        fields.extend(patch);
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        fields.insert(UPDATED_FIELD.to_string(), Value::String(timestamp()));
        *record = Record::new(fields);
        Ok(record.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let _guard = self
            .begin(StoreOperation::Delete, collection, Some(id.to_string()), None)
            .await?;

        let mut collections = lock(&self.collections);
        let records = collections.get_mut(collection);
        let position = records
            .as_ref()
            .and_then(|records| records.iter().position(|r| r.id() == Some(id)));
        match (records, position) {
            (Some(records), Some(position)) => {
                records.remove(position);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }
}

/// Tracks concurrent calls for [`MemoryRecordStore::max_in_flight`].
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
