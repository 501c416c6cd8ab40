//! Deployment orchestrator.

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use snowline_audit::{AuditEventType, AuditLogger};
use snowline_core::{
    ArtifactOutcome, ArtifactSpec, BatchResult, BatchStatus, DeployOperation, DeploymentBatch,
    DeploymentConfig, DeploymentFailure, DeploymentState, ExistingPolicy, FailureKind,
    FallbackStrategy, OperationContext,
};
use snowline_index::{DeploymentJournal, is_valid_id};
use snowline_resolver::CascadingResolver;
use snowline_store::RecordStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::checkpoint::capture_checkpoint;
use crate::conflicts::{detect_conflicts, remote_conflicts};
use crate::error::DeployError;
use crate::fallback::{SCOPE_FIELD, WriteTarget, apply_fallback};
use crate::retry::{RetryPolicy, failure_of, sleep_within, within};
use crate::rollback::delete_created;

const AUDIT_ACTION: &str = "deploy_batch";
/// Leaves room for the run suffix within the journal id limit.
const MAX_BATCH_ID_LEN: usize = 64;

/// Executes deployment batches.
pub struct DeploymentOrchestrator {
    resolver: Arc<CascadingResolver>,
    journal: Arc<DeploymentJournal>,
    audit: Arc<AuditLogger>,
    config: DeploymentConfig,
}

/// Retry and fallback settings for one batch.
struct BatchSettings {
    retry: RetryPolicy,
    fallbacks: Vec<FallbackStrategy>,
}

/// Bookkeeping for one artifact while its state machine runs.
struct ArtifactRun<'a> {
    index: usize,
    spec: &'a ArtifactSpec,
    name: Option<String>,
    required_fields: Vec<String>,
    fields: Map<String, Value>,
    target: WriteTarget,
    operation: DeployOperation,
    attempts: u32,
    fallback_used: Option<FallbackStrategy>,
    last_error: Option<DeploymentFailure>,
    record_id: Option<String>,
}

impl<'a> ArtifactRun<'a> {
    fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> DeploymentState {
        self.last_error = Some(DeploymentFailure::new(kind, message));
        DeploymentState::Failed
    }

    fn timed_out(&mut self) -> DeploymentState {
        let message = format!(
            "operation deadline passed after {} attempt(s)",
            self.attempts
        );
        self.fail(FailureKind::Timeout, message)
    }

    fn into_outcome(self, state: DeploymentState) -> ArtifactOutcome {
        ArtifactOutcome {
            index: self.index,
            name: self.name,
            entity_type: self.spec.entity_type.clone(),
            collection: Some(self.target.collection().to_string()),
            operation: self.operation,
            state,
            attempts: self.attempts,
            fallback_used: self.fallback_used,
            last_error: self.last_error,
            record_id: self.record_id,
            rollback: None,
        }
    }
}

impl DeploymentOrchestrator {
    pub fn new(
        resolver: Arc<CascadingResolver>,
        journal: Arc<DeploymentJournal>,
        audit: Arc<AuditLogger>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            resolver,
            journal,
            audit,
            config,
        }
    }

    pub fn journal(&self) -> &Arc<DeploymentJournal> {
        &self.journal
    }

    fn store(&self) -> &dyn RecordStore {
        &**self.resolver.store()
    }

    /// Deploy a batch.
    ///
    /// Fails only for a structurally invalid batch or an unwritable
    /// checkpoint; every per-artifact outcome is reported in the result.
    pub async fn deploy(
        &self,
        ctx: &OperationContext,
        batch: DeploymentBatch,
    ) -> Result<BatchResult, DeployError> {
        let collections = self.validate(&batch)?;

        let update_set_id = batch
            .update_set_id
            .clone()
            .or_else(|| ctx.update_set_id.clone())
            .unwrap_or_else(|| format!("us_{}", Uuid::new_v4().simple()));
        let ctx = ctx
            .clone()
            .with_update_set(update_set_id.clone())
            .bounded_by(Duration::from_millis(self.config.timeout_ms));
        let settings = self.settings_for(&batch);
        let started_at = Utc::now();
        let timer = Instant::now();

        tracing::info!(
            request_id = %ctx.request_id,
            batch_id = %batch.batch_id,
            update_set = %update_set_id,
            artifacts = batch.artifacts.len(),
            transaction_mode = batch.transaction_mode,
            parallel = batch.parallel,
            "Starting deployment"
        );

        let mut conflicts = detect_conflicts(&batch, self.resolver.entity_map());
        if batch.check_remote_conflicts {
            conflicts.extend(remote_conflicts(&ctx, &self.resolver, &batch).await);
        }
        for conflict in &conflicts {
            tracing::warn!(
                batch_id = %batch.batch_id,
                kind = ?conflict.kind,
                "{}",
                conflict.message
            );
        }

        let checkpoint_id = if batch.checkpoint {
            let checkpoint =
                capture_checkpoint(&ctx, &self.resolver, &batch, &update_set_id).await;
            self.journal.save_checkpoint(&checkpoint)?;
            self.audit
                .record(
                    AuditLogger::event(&ctx, AuditEventType::CheckpointCreated, AUDIT_ACTION)
                        .batch(&batch.batch_id)
                        .meta(json!({
                            "checkpoint_id": checkpoint.checkpoint_id,
                            "prior_records": checkpoint.captured_state.prior_records.len(),
                        }))
                        .build(),
                )
                .await;
            Some(checkpoint.checkpoint_id)
        } else {
            None
        };

        self.audit
            .record(
                AuditLogger::event(&ctx, AuditEventType::DeploymentStarted, AUDIT_ACTION)
                    .batch(&batch.batch_id)
                    .meta(json!({
                        "artifacts": batch.artifacts.len(),
                        "transaction_mode": batch.transaction_mode,
                        "parallel": batch.parallel,
                    }))
                    .build(),
            )
            .await;

        let (artifacts, rolled_back) = if batch.transaction_mode {
            self.run_transaction(&ctx, &batch, &collections, &settings)
                .await
        } else if batch.parallel {
            let runs = batch.artifacts.iter().enumerate().map(|(index, spec)| {
                self.deploy_artifact(&ctx, index, spec, &collections[index], &settings)
            });
            (join_all(runs).await, false)
        } else {
            let mut outcomes = Vec::with_capacity(batch.artifacts.len());
            for (index, spec) in batch.artifacts.iter().enumerate() {
                outcomes.push(
                    self.deploy_artifact(&ctx, index, spec, &collections[index], &settings)
                        .await,
                );
            }
            (outcomes, false)
        };

        let succeeded = artifacts.iter().filter(|a| a.state.is_success()).count();
        let status = if rolled_back {
            BatchStatus::Failed
        } else {
            BatchStatus::from_counts(succeeded, artifacts.len())
        };

        let mut result = BatchResult {
            batch_id: batch.batch_id.clone(),
            run_id: BatchResult::new_run_id(&batch.batch_id),
            update_set_id,
            status,
            transaction_mode: batch.transaction_mode,
            parallel: batch.parallel && !batch.transaction_mode,
            started_at,
            finished_at: Utc::now(),
            artifacts,
            conflicts,
            checkpoint_id,
            rolled_back,
            summary: String::new(),
        };
        result.summary = summarize(&result);

        if let Err(e) = self.journal.save_batch(&result) {
            tracing::warn!(
                batch_id = %result.batch_id,
                run_id = %result.run_id,
                error = %e,
                "Failed to journal batch result; rollback will not see it"
            );
        }
        self.audit_outcomes(&ctx, &result, timer.elapsed()).await;

        tracing::info!(
            request_id = %ctx.request_id,
            batch_id = %result.batch_id,
            status = ?result.status,
            succeeded = result.succeeded(),
            failed = result.failed(),
            rolled_back = result.rolled_back,
            "{}",
            result.summary
        );
        Ok(result)
    }

    /// Reject batches that cannot run at all. Returns each artifact's collection.
    fn validate(&self, batch: &DeploymentBatch) -> Result<Vec<String>, DeployError> {
        if batch.artifacts.is_empty() {
            return Err(DeployError::InvalidBatch(
                "batch contains no artifacts".to_string(),
            ));
        }
        if !is_valid_id(&batch.batch_id) {
            return Err(DeployError::InvalidBatch(format!(
                "batch id '{}' must be alphanumeric with '-', '_' or '.'",
                batch.batch_id
            )));
        }
        if batch.batch_id.len() > MAX_BATCH_ID_LEN {
            return Err(DeployError::InvalidBatch(format!(
                "batch id is longer than {} characters",
                MAX_BATCH_ID_LEN
            )));
        }
        if batch.max_retries == Some(0) {
            return Err(DeployError::InvalidBatch(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let map = self.resolver.entity_map();
        batch
            .artifacts
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                spec.resolve_collection(map)
                    .map(str::to_string)
                    .ok_or_else(|| DeployError::UnknownEntityType {
                        index,
                        entity_type: spec.entity_type.to_string(),
                    })
            })
            .collect()
    }

    fn settings_for(&self, batch: &DeploymentBatch) -> BatchSettings {
        BatchSettings {
            retry: RetryPolicy::new(
                batch.max_retries.unwrap_or(self.config.max_retries),
                Duration::from_millis(self.config.backoff_base_ms),
            ),
            fallbacks: batch
                .fallback_strategies
                .clone()
                .unwrap_or_else(|| self.config.fallback_strategies.clone()),
        }
    }

    /// Sequential all-or-nothing execution.
    ///
    /// After the first failure the remaining artifacts are not attempted and
    /// every record created so far is deleted, newest first.
    async fn run_transaction(
        &self,
        ctx: &OperationContext,
        batch: &DeploymentBatch,
        collections: &[String],
        settings: &BatchSettings,
    ) -> (Vec<ArtifactOutcome>, bool) {
        let mut outcomes: Vec<ArtifactOutcome> = Vec::with_capacity(batch.artifacts.len());
        let mut failed_at = None;

        for (index, spec) in batch.artifacts.iter().enumerate() {
            if let Some(failed) = failed_at {
                outcomes.push(self.aborted(index, spec, &collections[index], failed));
                continue;
            }
            let outcome = self
                .deploy_artifact(ctx, index, spec, &collections[index], settings)
                .await;
            if !outcome.state.is_success() {
                failed_at = Some(index);
            }
            outcomes.push(outcome);
        }

        if failed_at.is_none() {
            return (outcomes, false);
        }

        for outcome in outcomes.iter_mut().rev() {
            let (Some(collection), Some(id)) = (outcome.collection.clone(), outcome.created_record())
            else {
                continue;
            };
            let id = id.to_string();
            outcome.rollback = Some(delete_created(self.store(), &collection, &id).await);
        }
        (outcomes, true)
    }

    fn aborted(
        &self,
        index: usize,
        spec: &ArtifactSpec,
        collection: &str,
        failed: usize,
    ) -> ArtifactOutcome {
        ArtifactOutcome {
            index,
            name: spec.display_name(self.resolver.entity_map()),
            entity_type: spec.entity_type.clone(),
            collection: Some(collection.to_string()),
            operation: if spec.target_id.is_some() {
                DeployOperation::Update
            } else {
                DeployOperation::Create
            },
            state: DeploymentState::Failed,
            attempts: 0,
            fallback_used: None,
            last_error: Some(DeploymentFailure::new(
                FailureKind::Aborted,
                format!("not attempted: artifact {} failed earlier in the transaction", failed),
            )),
            record_id: None,
            rollback: None,
        }
    }

    /// Drive one artifact's state machine to a terminal state.
    async fn deploy_artifact(
        &self,
        ctx: &OperationContext,
        index: usize,
        spec: &ArtifactSpec,
        collection: &str,
        settings: &BatchSettings,
    ) -> ArtifactOutcome {
        let map = self.resolver.entity_map();
        let mut run = ArtifactRun {
            index,
            spec,
            name: spec.display_name(map),
            required_fields: map
                .get(&spec.entity_type)
                .map(|m| m.required_fields.clone())
                .unwrap_or_default(),
            fields: spec.fields.clone(),
            target: WriteTarget::Create {
                collection: collection.to_string(),
            },
            operation: DeployOperation::Create,
            attempts: 0,
            fallback_used: None,
            last_error: None,
            record_id: None,
        };

        let mut state = DeploymentState::Pending;
        while !state.is_terminal() {
            state = match state {
                DeploymentState::Pending => self.prepare(ctx, &mut run).await,
                DeploymentState::Retrying { attempt } => {
                    self.attempt(ctx, &mut run, attempt, settings).await
                }
                DeploymentState::FallingBack { index } => {
                    self.fall_back(ctx, &mut run, index, settings).await
                }
                terminal => terminal,
            };
            tracing::trace!(artifact = run.index, state = ?state, "Artifact state");
        }

        run.into_outcome(state)
    }

    /// Pick the write target and validate before any write is attempted.
    async fn prepare(&self, ctx: &OperationContext, run: &mut ArtifactRun<'_>) -> DeploymentState {
        let collection = run.target.collection().to_string();

        if let Some(ref id) = run.spec.target_id {
            run.target = WriteTarget::Update {
                collection,
                record_id: id.clone(),
            };
            run.operation = DeployOperation::Update;
            return DeploymentState::Retrying { attempt: 1 };
        }

        let missing: Vec<&str> = run
            .required_fields
            .iter()
            .filter(|f| !has_value(&run.fields, f))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let message = format!("missing required field(s): {}", missing.join(", "));
            return run.fail(FailureKind::Validation, message);
        }

        if run.spec.if_exists != ExistingPolicy::CreateNew {
            if let Some(name) = run.name.clone() {
                let name_field = run.spec.name_field(self.resolver.entity_map());
                let found =
                    within(ctx, self.resolver.find_exact(&collection, name_field, &name)).await;
                let existing = match found {
                    Ok(records) => records.into_iter().find_map(|r| r.id().map(str::to_string)),
                    Err(e) => {
                        run.last_error = Some(failure_of(&e));
                        return DeploymentState::Failed;
                    }
                };
                if let Some(id) = existing {
                    if run.spec.if_exists == ExistingPolicy::ReuseExisting {
                        tracing::info!(artifact = run.index, record_id = %id, "Reusing existing record");
                        run.operation = DeployOperation::Reuse;
                        run.record_id = Some(id);
                        return DeploymentState::Deployed;
                    }
                    run.target = WriteTarget::Update {
                        collection,
                        record_id: id,
                    };
                    run.operation = DeployOperation::Update;
                    return DeploymentState::Retrying { attempt: 1 };
                }
            }
        }

        if let Some(ref scope) = ctx.scope {
            run.fields
                .entry(SCOPE_FIELD.to_string())
                .or_insert_with(|| Value::String(scope.clone()));
        }
        DeploymentState::Retrying { attempt: 1 }
    }

    async fn attempt(
        &self,
        ctx: &OperationContext,
        run: &mut ArtifactRun<'_>,
        attempt: u32,
        settings: &BatchSettings,
    ) -> DeploymentState {
        if ctx.is_expired() {
            return run.timed_out();
        }
        run.attempts = attempt;

        let error = match within(ctx, run.target.write(self.store(), run.fields.clone())).await {
            Ok(record) => {
                run.record_id = record.id().map(str::to_string);
                run.last_error = None;
                return DeploymentState::Deployed;
            }
            Err(e) => e,
        };

        run.last_error = Some(failure_of(&error));
        if !error.is_retryable() {
            return DeploymentState::Failed;
        }
        if ctx.is_expired() {
            return run.timed_out();
        }

        if settings.retry.allows_another(attempt) {
            let delay = settings.retry.delay_after(attempt);
            tracing::warn!(
                request_id = %ctx.request_id,
                artifact = run.index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Deployment attempt failed, retrying"
            );
            if !sleep_within(ctx, delay).await {
                return run.timed_out();
            }
            DeploymentState::Retrying {
                attempt: attempt + 1,
            }
        } else if settings.fallbacks.is_empty() {
            DeploymentState::Failed
        } else {
            DeploymentState::FallingBack { index: 0 }
        }
    }

    async fn fall_back(
        &self,
        ctx: &OperationContext,
        run: &mut ArtifactRun<'_>,
        index: usize,
        settings: &BatchSettings,
    ) -> DeploymentState {
        let Some(&strategy) = settings.fallbacks.get(index) else {
            return DeploymentState::Failed;
        };
        if ctx.is_expired() {
            return run.timed_out();
        }

        let result = within(
            ctx,
            apply_fallback(
                self.store(),
                strategy,
                &run.target,
                &run.fields,
                &run.required_fields,
            ),
        )
        .await;

        match result {
            Ok(record) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    artifact = run.index,
                    strategy = %strategy,
                    "Deployed with fallback"
                );
                run.fallback_used = Some(strategy);
                run.record_id = record.id().map(str::to_string);
                run.last_error = None;
                DeploymentState::DeployedWithFallback
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    artifact = run.index,
                    strategy = %strategy,
                    error = %e,
                    "Fallback failed"
                );
                run.last_error = Some(DeploymentFailure::new(
                    failure_of(&e).kind,
                    format!("{} fallback: {}", strategy, e),
                ));
                if index + 1 < settings.fallbacks.len() {
                    DeploymentState::FallingBack { index: index + 1 }
                } else {
                    DeploymentState::Failed
                }
            }
        }
    }

    async fn audit_outcomes(&self, ctx: &OperationContext, result: &BatchResult, elapsed: Duration) {
        for outcome in &result.artifacts {
            let event_type = if outcome.state.is_success() {
                AuditEventType::ArtifactDeployed
            } else {
                AuditEventType::ArtifactFailed
            };
            let mut event = AuditLogger::event(ctx, event_type, AUDIT_ACTION)
                .batch(&result.batch_id)
                .entity_type(outcome.entity_type.as_str())
                .attempts(outcome.attempts);
            if let Some(ref collection) = outcome.collection {
                event = event.collection(collection);
            }
            if let Some(ref id) = outcome.record_id {
                event = event.record_id(id);
            }
            if let Some(strategy) = outcome.fallback_used {
                event = event.fallback(strategy.as_str());
            }
            if let Some(ref error) = outcome.last_error {
                event = event.error(error.to_string());
            }
            self.audit.record(event.build()).await;
        }

        if result.rolled_back {
            let actions: Vec<_> = result
                .artifacts
                .iter()
                .filter_map(|a| a.rollback.as_ref())
                .collect();
            self.audit
                .record(
                    AuditLogger::event(ctx, AuditEventType::TransactionRolledBack, AUDIT_ACTION)
                        .batch(&result.batch_id)
                        .meta(json!({
                            "deleted": actions.iter().filter(|a| a.succeeded).count(),
                            "failed": actions.iter().filter(|a| !a.succeeded).count(),
                        }))
                        .build(),
                )
                .await;
        }

        self.audit
            .record(
                AuditLogger::event(ctx, AuditEventType::DeploymentFinished, AUDIT_ACTION)
                    .batch(&result.batch_id)
                    .duration_ms(elapsed.as_millis() as u64)
                    .meta(json!({
                        "status": result.status,
                        "succeeded": result.succeeded(),
                        "failed": result.failed(),
                        "conflicts": result.conflicts.len(),
                    }))
                    .build(),
            )
            .await;
    }
}

/// Present and non-empty.
fn has_value(fields: &Map<String, Value>, field: &str) -> bool {
    match fields.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn summarize(result: &BatchResult) -> String {
    let total = result.artifacts.len();
    let succeeded = result.succeeded();
    let fallbacks = result
        .artifacts
        .iter()
        .filter(|a| a.state == DeploymentState::DeployedWithFallback)
        .count();

    let mut summary = format!(
        "Deployed {} of {} artifact(s) in update set {}",
        succeeded, total, result.update_set_id
    );
    if fallbacks > 0 {
        summary.push_str(&format!(", {} via fallback", fallbacks));
    }
    if result.failed() > 0 {
        summary.push_str(&format!("; {} failed", result.failed()));
    }
    if result.rolled_back {
        let undone = result
            .artifacts
            .iter()
            .filter(|a| a.rollback.as_ref().is_some_and(|r| r.succeeded))
            .count();
        summary.push_str(&format!("; transaction rolled back ({} record(s) deleted)", undone));
    }
    if !result.conflicts.is_empty() {
        summary.push_str(&format!("; {} conflict warning(s)", result.conflicts.len()));
    }
    summary
}
