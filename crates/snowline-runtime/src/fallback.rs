//! Fallback strategies tried after an artifact's retries are exhausted.

use serde_json::{Map, Value};
use snowline_core::{FallbackStrategy, Record};
use snowline_store::{RecordStore, StoreError};

/// Field holding the application scope of a record.
pub const SCOPE_FIELD: &str = "sys_scope";
/// Scope used by [`FallbackStrategy::AlternateScope`].
pub const GLOBAL_SCOPE: &str = "global";
/// Field deactivated by [`FallbackStrategy::ManualApproval`].
pub const ACTIVE_FIELD: &str = "active";

/// Where an artifact's fields are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    Create { collection: String },
    Update { collection: String, record_id: String },
}

impl WriteTarget {
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection } | Self::Update { collection, .. } => collection,
        }
    }

    /// Submit `fields` as a create or a patch.
    pub async fn write(
        &self,
        store: &dyn RecordStore,
        fields: Map<String, Value>,
    ) -> Result<Record, StoreError> {
        match self {
            Self::Create { collection } => store.create(collection, fields).await,
            Self::Update {
                collection,
                record_id,
            } => store.update(collection, record_id, fields).await,
        }
    }
}

/// The field document a single-write strategy submits.
///
/// Staged deployment submits the fields unchanged, split over two writes.
pub fn fallback_fields(strategy: FallbackStrategy, fields: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = fields.clone();
    match strategy {
        FallbackStrategy::AlternateScope => {
            fields.insert(SCOPE_FIELD.to_string(), Value::String(GLOBAL_SCOPE.to_string()));
        }
        FallbackStrategy::ManualApproval => {
            fields.insert(ACTIVE_FIELD.to_string(), Value::Bool(false));
        }
        FallbackStrategy::StagedDeployment => {}
    }
    fields
}

/// Try one fallback strategy.
pub async fn apply_fallback(
    store: &dyn RecordStore,
    strategy: FallbackStrategy,
    target: &WriteTarget,
    fields: &Map<String, Value>,
    required_fields: &[String],
) -> Result<Record, StoreError> {
    match strategy {
        FallbackStrategy::AlternateScope | FallbackStrategy::ManualApproval => {
            target.write(store, fallback_fields(strategy, fields)).await
        }
        FallbackStrategy::StagedDeployment => {
            staged(store, target, fields, required_fields).await
        }
    }
}

/// Write the required fields first, then patch in the rest.
///
/// A record created by the first stage is deleted again if the second fails.
async fn staged(
    store: &dyn RecordStore,
    target: &WriteTarget,
    fields: &Map<String, Value>,
    required_fields: &[String],
) -> Result<Record, StoreError> {
    let (first, rest): (Map<String, Value>, Map<String, Value>) = fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .partition(|(k, _)| required_fields.iter().any(|r| r == k));

    if first.is_empty() || rest.is_empty() {
        return target.write(store, fields.clone()).await;
    }

    let created = target.write(store, first).await?;
    let Some(id) = created.id().map(str::to_string) else {
        return Err(StoreError::Remote(
            "staged create returned a record without an id".to_string(),
        ));
    };

    let collection = target.collection();
    match store.update(collection, &id, rest).await {
        Ok(record) => Ok(record),
        Err(e) => {
            if matches!(target, WriteTarget::Create { .. }) {
                if let Err(cleanup) = store.delete(collection, &id).await {
                    tracing::warn!(
                        collection,
                        record_id = %id,
                        error = %cleanup,
                        "Failed to remove partially staged record"
                    );
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use snowline_store::{InjectedFailure, MemoryRecordStore, StoreOperation};

    fn fields() -> Map<String, Value> {
        json!({"name": "Cart", "id": "cart", "template": "<div/>"})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn create_target() -> WriteTarget {
        WriteTarget::Create {
            collection: "sp_widget".to_string(),
        }
    }

    #[test]
    fn test_single_write_strategies() {
        let scoped = fallback_fields(FallbackStrategy::AlternateScope, &fields());
        assert_eq!(scoped[SCOPE_FIELD], json!("global"));

        let inactive = fallback_fields(FallbackStrategy::ManualApproval, &fields());
        assert_eq!(inactive[ACTIVE_FIELD], json!(false));
        assert_eq!(inactive["template"], json!("<div/>"));
    }

    #[tokio::test]
    async fn test_staged_creates_then_patches() {
        let store = MemoryRecordStore::new();
        let required = vec!["name".to_string(), "id".to_string()];

        let record = apply_fallback(
            &store,
            FallbackStrategy::StagedDeployment,
            &create_target(),
            &fields(),
            &required,
        )
        .await
        .unwrap();

        assert_eq!(record.get_str("template"), Some("<div/>"));
        assert_eq!(store.call_count(StoreOperation::Create), 1);
        assert_eq!(store.call_count(StoreOperation::Update), 1);
        assert_eq!(store.records("sp_widget").len(), 1);
    }

    #[tokio::test]
    async fn test_staged_removes_record_when_patch_fails() {
        let store = MemoryRecordStore::new();
        store.inject_failure(InjectedFailure::remote(StoreOperation::Update));
        let required = vec!["name".to_string(), "id".to_string()];

        let result = apply_fallback(
            &store,
            FallbackStrategy::StagedDeployment,
            &create_target(),
            &fields(),
            &required,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(store.call_count(StoreOperation::Delete), 1);
        assert!(store.records("sp_widget").is_empty());
    }
}
