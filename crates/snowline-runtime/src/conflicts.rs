//! Pre-flight conflict detection.
//!
//! Every finding is advisory: it is reported with the batch result and
//! logged, but never stops an artifact from being deployed.

use futures::future::join_all;
use snowline_core::{
    ConflictKind, ConflictWarning, DeploymentBatch, EntityTypeMap, ExistingPolicy,
    OperationContext,
};
use snowline_resolver::CascadingResolver;
use std::collections::{BTreeMap, BTreeSet};

use crate::retry::within;

/// Conflicts visible from the batch alone: duplicate target names and
/// expected relations that name nothing in the batch.
pub fn detect_conflicts(batch: &DeploymentBatch, map: &EntityTypeMap) -> Vec<ConflictWarning> {
    let mut conflicts = Vec::new();

    let mut by_target: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    let mut names = BTreeSet::new();
    for (index, spec) in batch.artifacts.iter().enumerate() {
        let Some(name) = spec.display_name(map) else {
            continue;
        };
        let collection = spec.resolve_collection(map).unwrap_or_default().to_string();
        names.insert(name.to_lowercase());
        by_target
            .entry((collection, name.to_lowercase()))
            .or_default()
            .push(index);
    }

    for ((collection, _), indices) in by_target {
        if indices.len() < 2 {
            continue;
        }
        let name = batch.artifacts[indices[0]]
            .display_name(map)
            .unwrap_or_default();
        conflicts.push(ConflictWarning {
            kind: ConflictKind::DuplicateName,
            message: format!(
                "artifacts {} all deploy '{}' into {}",
                join_indices(&indices),
                name,
                collection
            ),
            artifacts: indices,
        });
    }

    for (index, spec) in batch.artifacts.iter().enumerate() {
        for relation in &spec.expected_relations {
            if !names.contains(&relation.to_lowercase()) {
                conflicts.push(ConflictWarning {
                    kind: ConflictKind::UnresolvedRelation,
                    message: format!(
                        "artifact {} expects '{}', which is not part of the batch",
                        index, relation
                    ),
                    artifacts: vec![index],
                });
            }
        }
    }

    conflicts
}

/// Artifacts about to be created under a name that already exists remotely.
///
/// Lookups run concurrently; a failed lookup is logged and skipped.
pub async fn remote_conflicts(
    ctx: &OperationContext,
    resolver: &CascadingResolver,
    batch: &DeploymentBatch,
) -> Vec<ConflictWarning> {
    let map = resolver.entity_map();
    let lookups = batch
        .artifacts
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.target_id.is_none() && spec.if_exists == ExistingPolicy::CreateNew)
        .filter_map(|(index, spec)| {
            let name = spec.display_name(map)?;
            let collection = spec.resolve_collection(map)?.to_string();
            let name_field = spec.name_field(map);
            Some(async move {
                let found =
                    within(ctx, resolver.find_exact(&collection, name_field, &name)).await;
                (index, collection, name, found)
            })
        });

    let mut conflicts = Vec::new();
    for (index, collection, name, found) in join_all(lookups).await {
        match found {
            Ok(records) if !records.is_empty() => {
                let ids: Vec<&str> = records.iter().filter_map(|r| r.id()).collect();
                conflicts.push(ConflictWarning {
                    kind: ConflictKind::ExistingRecord,
                    message: format!(
                        "'{}' already exists in {} ({})",
                        name,
                        collection,
                        ids.join(", ")
                    ),
                    artifacts: vec![index],
                });
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                request_id = %ctx.request_id,
                artifact = index,
                collection = %collection,
                error = %e,
                "Remote conflict check failed"
            ),
        }
    }
    conflicts
}

fn join_indices(indices: &[usize]) -> String {
    let parts: Vec<String> = indices.iter().map(ToString::to_string).collect();
    parts.join(", ")
}
