//! Checkpoint capture.

use chrono::Utc;
use snowline_core::{
    CapturedState, Checkpoint, DeploymentBatch, ExistingPolicy, OperationContext,
    PlannedArtifact, PriorRecord, Record,
};
use snowline_resolver::CascadingResolver;
use uuid::Uuid;

use crate::retry::within;

/// Snapshot the batch plan and the current field values of every record the
/// batch is going to update.
///
/// A prior record that cannot be read is logged and left out; rollback then
/// has nothing to restore for it.
pub async fn capture_checkpoint(
    ctx: &OperationContext,
    resolver: &CascadingResolver,
    batch: &DeploymentBatch,
    update_set_id: &str,
) -> Checkpoint {
    let map = resolver.entity_map();
    let mut captured = CapturedState::default();

    for (index, spec) in batch.artifacts.iter().enumerate() {
        let collection = spec.resolve_collection(map).map(str::to_string);
        let name = spec.display_name(map);
        captured.planned.push(PlannedArtifact {
            index,
            entity_type: spec.entity_type.clone(),
            collection: collection.clone(),
            name: name.clone(),
            target_id: spec.target_id.clone(),
        });

        let Some(collection) = collection else {
            continue;
        };
        let prior = match (&spec.target_id, &name, spec.if_exists) {
            (Some(id), _, _) => within(ctx, resolver.store().get(&collection, id)).await,
            (None, Some(name), ExistingPolicy::UpdateExisting) => within(
                ctx,
                resolver.find_exact(&collection, spec.name_field(map), name),
            )
            .await
            .map(|records| records.into_iter().next()),
            _ => continue,
        };

        match prior {
            Ok(Some(record)) => {
                if let Some(prior) = prior_record(&collection, record) {
                    captured.prior_records.push(prior);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                request_id = %ctx.request_id,
                artifact = index,
                collection = %collection,
                error = %e,
                "Could not capture prior state"
            ),
        }
    }

    Checkpoint {
        checkpoint_id: format!("ckpt_{}", Uuid::new_v4().simple()),
        batch_id: batch.batch_id.clone(),
        update_set_id: update_set_id.to_string(),
        created_at: Utc::now(),
        captured_state: captured,
    }
}

fn prior_record(collection: &str, record: Record) -> Option<PriorRecord> {
    let record_id = record.id()?.to_string();
    Some(PriorRecord {
        collection: collection.to_string(),
        record_id,
        fields: record,
    })
}
