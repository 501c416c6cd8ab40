//! Explicit update-set rollback.

use chrono::Utc;
use serde_json::{Map, Value, json};
use snowline_audit::{AuditEventType, AuditLogger};
use snowline_core::record::{ID_FIELD, UPDATED_FIELD};
use snowline_core::{
    OperationContext, PriorRecord, RollbackAction, RollbackKind, RollbackReport, RollbackStatus,
};
use snowline_index::DeploymentJournal;
use snowline_store::{RecordStore, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RollbackError;

const AUDIT_ACTION: &str = "rollback";

/// Delete a record a batch created. A record that is already gone counts as deleted.
pub(crate) async fn delete_created(
    store: &dyn RecordStore,
    collection: &str,
    record_id: &str,
) -> RollbackAction {
    let result = match store.delete(collection, record_id).await {
        Err(StoreError::NotFound { .. }) => {
            tracing::debug!(collection, record_id, "Record already absent");
            Ok(())
        }
        other => other,
    };
    action(RollbackKind::Delete, collection, record_id, result)
}

fn action(
    kind: RollbackKind,
    collection: &str,
    record_id: &str,
    result: Result<(), StoreError>,
) -> RollbackAction {
    if let Err(ref e) = result {
        tracing::warn!(
            kind = ?kind,
            collection,
            record_id,
            error = %e,
            "Rollback step failed"
        );
    }
    RollbackAction {
        kind,
        collection: collection.to_string(),
        record_id: record_id.to_string(),
        succeeded: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
    }
}

/// Undoes everything journaled for an update set.
///
/// Records created by its batches are deleted (newest batch first) and
/// update targets captured by its checkpoints get their prior field values
/// back. Steps already undone by an earlier rollback are skipped, so a
/// repeated request only retries what failed before.
pub struct RollbackService {
    store: Arc<dyn RecordStore>,
    journal: Arc<DeploymentJournal>,
    audit: Arc<AuditLogger>,
}

impl RollbackService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        journal: Arc<DeploymentJournal>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            journal,
            audit,
        }
    }

    pub async fn rollback(
        &self,
        ctx: &OperationContext,
        update_set_id: &str,
        reason: &str,
    ) -> Result<RollbackReport, RollbackError> {
        let update_set_id = update_set_id.trim();
        if update_set_id.is_empty() {
            return Err(RollbackError::InvalidRequest(
                "update_set_id must not be empty".to_string(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(RollbackError::InvalidRequest(
                "a rollback reason is required".to_string(),
            ));
        }

        let ctx = ctx.clone().with_update_set(update_set_id);
        let requested_at = Utc::now();
        let batches = self.journal.batches_for(update_set_id)?;
        let checkpoints = self.journal.checkpoints_for(update_set_id)?;
        let restored: BTreeSet<(String, String)> = self
            .journal
            .rollbacks_for(update_set_id)?
            .into_iter()
            .flat_map(|report| report.actions)
            .filter(|a| a.kind == RollbackKind::Restore && a.succeeded)
            .map(|a| (a.collection, a.record_id))
            .collect();

        tracing::info!(
            request_id = %ctx.request_id,
            update_set = update_set_id,
            batches = batches.len(),
            checkpoints = checkpoints.len(),
            reason,
            "Rollback requested"
        );
        self.audit
            .record(
                AuditLogger::event(&ctx, AuditEventType::RollbackRequested, AUDIT_ACTION)
                    .meta(json!({ "reason": reason }))
                    .build(),
            )
            .await;

        let mut actions = Vec::new();
        let mut touched_batches = Vec::new();

        for mut batch in batches.into_iter().rev() {
            let mut touched = false;
            for outcome in batch.artifacts.iter_mut().rev() {
                let already_undone = outcome.rollback.as_ref().is_some_and(|a| a.succeeded);
                let (Some(collection), Some(id)) =
                    (outcome.collection.clone(), outcome.created_record())
                else {
                    continue;
                };
                if already_undone {
                    continue;
                }
                let id = id.to_string();
                let step = delete_created(self.store.as_ref(), &collection, &id).await;
                outcome.rollback = Some(step.clone());
                actions.push(step);
                touched = true;
            }

            if touched {
                batch.rolled_back = true;
                if let Err(e) = self.journal.save_batch(&batch) {
                    tracing::warn!(
                        batch_id = %batch.batch_id,
                        run_id = %batch.run_id,
                        error = %e,
                        "Failed to update journaled batch"
                    );
                }
                if !touched_batches.contains(&batch.batch_id) {
                    touched_batches.push(batch.batch_id);
                }
            }
        }

        for checkpoint in checkpoints.iter().rev() {
            let mut touched = false;
            for prior in &checkpoint.captured_state.prior_records {
                if restored.contains(&(prior.collection.clone(), prior.record_id.clone())) {
                    continue;
                }
                actions.push(self.restore(&ctx, prior).await);
                touched = true;
            }
            if touched && !touched_batches.contains(&checkpoint.batch_id) {
                touched_batches.push(checkpoint.batch_id.clone());
            }
        }

        let status = if actions.is_empty() {
            RollbackStatus::NothingToUndo
        } else if actions.iter().all(|a| a.succeeded) {
            RollbackStatus::Completed
        } else {
            RollbackStatus::Partial
        };

        let report = RollbackReport {
            rollback_id: format!("rb_{}", Uuid::new_v4().simple()),
            update_set_id: update_set_id.to_string(),
            reason: reason.to_string(),
            requested_at,
            completed_at: Utc::now(),
            batches: touched_batches,
            actions,
            status,
        };

        if let Err(e) = self.journal.save_rollback(&report) {
            tracing::warn!(rollback_id = %report.rollback_id, error = %e, "Failed to journal rollback report");
        }

        let failed = report.actions.iter().filter(|a| !a.succeeded).count();
        let mut event = AuditLogger::event(&ctx, AuditEventType::RollbackCompleted, AUDIT_ACTION)
            .meta(json!({
                "rollback_id": report.rollback_id,
                "status": report.status,
                "actions": report.actions.len(),
                "batches": report.batches,
            }));
        if failed > 0 {
            event = event.error(format!("{} rollback step(s) failed", failed));
        }
        self.audit.record(event.build()).await;

        tracing::info!(
            request_id = %ctx.request_id,
            update_set = update_set_id,
            status = ?report.status,
            actions = report.actions.len(),
            failed,
            "Rollback finished"
        );
        Ok(report)
    }

    /// Write a captured record's prior field values back.
    async fn restore(&self, ctx: &OperationContext, prior: &PriorRecord) -> RollbackAction {
        let collection = prior.collection.as_str();
        let record_id = prior.record_id.as_str();

        let current = match self.store.get(collection, record_id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                return action(
                    RollbackKind::Restore,
                    collection,
                    record_id,
                    Err(StoreError::NotFound {
                        collection: collection.to_string(),
                        id: record_id.to_string(),
                    }),
                );
            }
            Err(e) => return action(RollbackKind::Restore, collection, record_id, Err(e)),
        };

        let patch: Map<String, Value> = prior
            .fields
            .fields()
            .iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD && k.as_str() != UPDATED_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let before = Value::Object(current.into_fields());
        let after = Value::Object(patch.clone());

        let result = self
            .store
            .update(collection, record_id, patch)
            .await
            .map(|_| ());
        if result.is_ok() {
            self.audit
                .record(
                    AuditLogger::event(ctx, AuditEventType::RecordRestored, AUDIT_ACTION)
                        .collection(collection)
                        .record_id(record_id)
                        .diff(&without_system_fields(before), &after)
                        .build(),
                )
                .await;
        }
        action(RollbackKind::Restore, collection, record_id, result)
    }
}

fn without_system_fields(value: Value) -> Value {
    match value {
        Value::Object(mut fields) => {
            fields.remove(ID_FIELD);
            fields.remove(UPDATED_FIELD);
            Value::Object(fields)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowline_store::{InjectedFailure, MemoryRecordStore, StoreOperation};

    #[tokio::test]
    async fn test_delete_of_missing_record_succeeds() {
        let store = MemoryRecordStore::new();
        let step = delete_created(&store, "sp_widget", "gone").await;
        assert!(step.succeeded);
        assert_eq!(step.kind, RollbackKind::Delete);
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported() {
        let store = MemoryRecordStore::new();
        store.inject_failure(InjectedFailure::remote(StoreOperation::Delete));
        let step = delete_created(&store, "sp_widget", "r1").await;
        assert!(!step.succeeded);
        assert!(step.error.unwrap().contains("injected delete failure"));
    }

    #[tokio::test]
    async fn test_empty_reason_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = RollbackService::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(DeploymentJournal::open(dir.path()).unwrap()),
            Arc::new(AuditLogger::disabled()),
        );
        let err = service
            .rollback(&OperationContext::new(), "us_1", " ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
