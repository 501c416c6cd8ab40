//! End-to-end deployment and rollback against an in-memory record store.

use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use snowline_audit::{AuditEventType, AuditFilter, AuditLogger};
use snowline_core::{
    ArtifactSpec, AuditConfig, BatchStatus, ConflictKind, DeployOperation, DeploymentBatch,
    DeploymentConfig, DeploymentState, EntityType, EntityTypeMap, ExistingPolicy, FailureKind,
    FallbackStrategy, OperationContext, Record, ResolverConfig, RollbackKind, RollbackStatus,
};
use snowline_index::DeploymentJournal;
use snowline_resolver::CascadingResolver;
use snowline_runtime::{DeployError, DeploymentOrchestrator, RollbackService};
use snowline_store::{InjectedFailure, MemoryRecordStore, StoreOperation};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    store: Arc<MemoryRecordStore>,
    orchestrator: DeploymentOrchestrator,
    rollback: RollbackService,
    audit: Arc<AuditLogger>,
    _dir: TempDir,
}

fn harness(store: MemoryRecordStore) -> Harness {
    harness_with(store, DeploymentConfig {
        backoff_base_ms: 1,
        ..DeploymentConfig::default()
    })
}

fn harness_with(store: MemoryRecordStore, config: DeploymentConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store);
    let resolver = Arc::new(CascadingResolver::new(
        store.clone(),
        EntityTypeMap::builtin(),
        ResolverConfig::default(),
    ));
    let journal = Arc::new(DeploymentJournal::open(dir.path().join("journal")).unwrap());
    let audit = Arc::new(
        AuditLogger::new(AuditConfig {
            enabled: true,
            stdout: false,
            directory: dir.path().join("audit"),
        })
        .unwrap(),
    );

    Harness {
        orchestrator: DeploymentOrchestrator::new(resolver, journal.clone(), audit.clone(), config),
        rollback: RollbackService::new(store.clone(), journal, audit.clone()),
        store,
        audit,
        _dir: dir,
    }
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn widget(name: &str) -> ArtifactSpec {
    ArtifactSpec::new(
        EntityType::new("widget"),
        fields(json!({"name": name, "id": name.to_lowercase(), "template": "<div/>"})),
    )
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::remote(StoreOperation::Create).times(2));
    let h = harness(store);

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), DeploymentBatch::new(vec![widget("Cart")]))
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::Deployed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.fallback_used, None);
    assert!(outcome.last_error.is_none());
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(h.store.call_count(StoreOperation::Create), 3);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_alternate_scope() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::remote(StoreOperation::Create).times(3));
    let h = harness(store);
    let ctx = OperationContext::new().with_scope("x_acme_cart");

    let result = h
        .orchestrator
        .deploy(&ctx, DeploymentBatch::new(vec![widget("Cart")]))
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::DeployedWithFallback);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.fallback_used, Some(FallbackStrategy::AlternateScope));

    let record = h
        .store
        .record("sp_widget", outcome.record_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(record.get_str("sys_scope"), Some("global"));
    assert_eq!(result.status, BatchStatus::Completed);
}

#[tokio::test]
async fn fallbacks_run_in_caller_order() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::remote(StoreOperation::Create).times(4));
    let h = harness(store);
    let batch = DeploymentBatch::new(vec![widget("Cart")]).with_fallbacks(vec![
        FallbackStrategy::AlternateScope,
        FallbackStrategy::ManualApproval,
    ]);

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.fallback_used, Some(FallbackStrategy::ManualApproval));
    let record = h
        .store
        .record("sp_widget", outcome.record_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(record.get("active"), Some(&json!(false)));
}

#[tokio::test]
async fn artifact_fails_when_every_fallback_fails() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::remote(StoreOperation::Create));
    let h = harness(store);
    let batch = DeploymentBatch::new(vec![widget("Cart")]).with_fallbacks(vec![
        FallbackStrategy::AlternateScope,
        FallbackStrategy::ManualApproval,
    ]);

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::Failed);
    assert_eq!(outcome.attempts, 3);
    let error = outcome.last_error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Remote);
    assert!(error.message.starts_with("manual_approval fallback"));
    assert_eq!(result.status, BatchStatus::Failed);
    assert_eq!(h.store.call_count(StoreOperation::Create), 5);
}

#[tokio::test]
async fn missing_required_field_fails_without_remote_calls() {
    let h = harness(MemoryRecordStore::new());
    let spec = ArtifactSpec::new(EntityType::new("widget"), fields(json!({"name": "Cart"})));

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), DeploymentBatch::new(vec![spec]))
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::Failed);
    assert_eq!(outcome.attempts, 0);
    let error = outcome.last_error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Validation);
    assert!(error.message.contains("id"));
    assert_eq!(h.store.total_calls(), 0);
}

#[tokio::test]
async fn store_validation_rejection_is_not_retried() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::validation(
        StoreOperation::Create,
        "invalid template",
    ));
    let h = harness(store);

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), DeploymentBatch::new(vec![widget("Cart")]))
        .await
        .unwrap();

    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.last_error.as_ref().unwrap().kind, FailureKind::Validation);
    assert_eq!(h.store.call_count(StoreOperation::Create), 1);
}

#[tokio::test]
async fn transaction_failure_deletes_created_records() {
    let store = MemoryRecordStore::new();
    store.inject_failure(
        InjectedFailure::validation(StoreOperation::Create, "rejected").when_field("name", "Beta"),
    );
    let h = harness(store);
    let batch =
        DeploymentBatch::new(vec![widget("Alpha"), widget("Beta"), widget("Gamma")]).transactional();

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::Failed);
    assert!(result.rolled_back);

    let alpha = &result.artifacts[0];
    assert_eq!(alpha.state, DeploymentState::Deployed);
    let undo = alpha.rollback.as_ref().unwrap();
    assert_eq!(undo.kind, RollbackKind::Delete);
    assert!(undo.succeeded);

    assert_eq!(result.artifacts[1].state, DeploymentState::Failed);
    let gamma = &result.artifacts[2];
    assert_eq!(gamma.state, DeploymentState::Failed);
    assert_eq!(gamma.attempts, 0);
    assert_eq!(gamma.last_error.as_ref().unwrap().kind, FailureKind::Aborted);

    assert!(h.store.records("sp_widget").is_empty());
    assert!(result.summary.contains("rolled back"));
}

#[tokio::test]
async fn non_transactional_failure_reports_partial_completion() {
    let store = MemoryRecordStore::new();
    store.inject_failure(
        InjectedFailure::validation(StoreOperation::Create, "rejected").when_field("name", "Beta"),
    );
    let h = harness(store);
    let batch = DeploymentBatch::new(vec![widget("Alpha"), widget("Beta"), widget("Gamma")]);

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::PartiallyCompleted);
    assert!(!result.rolled_back);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.failed(), 1);
    assert_eq!(h.store.records("sp_widget").len(), 2);
    assert_eq!(h.store.call_count(StoreOperation::Delete), 0);
}

#[tokio::test]
async fn parallel_batch_deploys_concurrently() {
    let store = MemoryRecordStore::new().with_latency(Duration::from_millis(20));
    let h = harness(store);
    let batch = DeploymentBatch::new(vec![
        widget("Alpha"),
        widget("Beta"),
        widget("Gamma"),
        widget("Delta"),
    ])
    .parallel();

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::Completed);
    assert!(result.parallel);
    assert!(h.store.max_in_flight() > 1);
    let indices: Vec<usize> = result.artifacts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn deadline_during_backoff_fails_with_timeout() {
    let store = MemoryRecordStore::new();
    store.inject_failure(InjectedFailure::remote(StoreOperation::Create));
    let h = harness_with(store, DeploymentConfig {
        backoff_base_ms: 10_000,
        ..DeploymentConfig::default()
    });
    let ctx = OperationContext::new().with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let result = h
        .orchestrator
        .deploy(&ctx, DeploymentBatch::new(vec![widget("Cart")]))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    let outcome = &result.artifacts[0];
    assert_eq!(outcome.state, DeploymentState::Failed);
    assert_eq!(outcome.last_error.as_ref().unwrap().kind, FailureKind::Timeout);
}

#[tokio::test]
async fn existing_records_are_reused_or_updated() {
    let store = MemoryRecordStore::new();
    let cart = store.insert(
        "sp_widget",
        Record::from_value(json!({"name": "Cart", "id": "cart", "template": "old"})).unwrap(),
    );
    let cart_id = cart.id().unwrap().to_string();
    let h = harness(store);

    let reuse = widget("Cart").with_policy(ExistingPolicy::ReuseExisting);
    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), DeploymentBatch::new(vec![reuse]))
        .await
        .unwrap();
    let outcome = &result.artifacts[0];
    assert_eq!(outcome.operation, DeployOperation::Reuse);
    assert_eq!(outcome.state, DeploymentState::Deployed);
    assert_eq!(outcome.attempts, 0);
    assert_eq!(outcome.record_id.as_deref(), Some(cart_id.as_str()));
    assert_eq!(outcome.created_record(), None);

    let update = widget("Cart").with_policy(ExistingPolicy::UpdateExisting);
    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), DeploymentBatch::new(vec![update]))
        .await
        .unwrap();
    assert_eq!(result.artifacts[0].operation, DeployOperation::Update);

    assert_eq!(h.store.call_count(StoreOperation::Create), 0);
    let records = h.store.records("sp_widget");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_str("template"), Some("<div/>"));
}

#[tokio::test]
async fn conflicts_are_advisory() {
    let store = MemoryRecordStore::new();
    store.insert(
        "sp_widget",
        Record::from_value(json!({"name": "Checkout", "id": "checkout"})).unwrap(),
    );
    let h = harness(store);
    let mut batch = DeploymentBatch::new(vec![widget("Cart"), widget("Cart"), widget("Checkout")]);
    batch.check_remote_conflicts = true;

    let result = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap();

    let kinds: Vec<ConflictKind> = result.conflicts.iter().map(|c| c.kind).collect();
    assert!(kinds.contains(&ConflictKind::DuplicateName));
    assert!(kinds.contains(&ConflictKind::ExistingRecord));
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(h.store.records("sp_widget").len(), 4);
}

#[tokio::test]
async fn structurally_invalid_batches_are_errors() {
    let h = harness(MemoryRecordStore::new());
    let ctx = OperationContext::new();

    let err = h
        .orchestrator
        .deploy(&ctx, DeploymentBatch::new(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidBatch(_)));

    let unknown = ArtifactSpec::new(EntityType::new("hologram"), fields(json!({"name": "x"})));
    let err = h
        .orchestrator
        .deploy(&ctx, DeploymentBatch::new(vec![widget("Cart"), unknown]))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::UnknownEntityType { index: 1, .. }));
    assert_eq!(h.store.total_calls(), 0);
}

#[tokio::test]
async fn checkpointed_batch_is_rolled_back_by_update_set() {
    let store = MemoryRecordStore::new();
    let cart = store.insert(
        "sp_widget",
        Record::from_value(json!({"name": "Cart", "id": "cart", "css": "a{}"})).unwrap(),
    );
    let cart_id = cart.id().unwrap().to_string();
    let h = harness(store);
    let ctx = OperationContext::new().with_principal("release-bot");

    let edit = ArtifactSpec::new(EntityType::new("widget"), fields(json!({"css": "b{}"})))
        .with_target(&cart_id);
    let batch = DeploymentBatch::new(vec![edit, widget("Checkout")])
        .with_checkpoint()
        .with_update_set("us_release_7");
    let batch_id = batch.batch_id.clone();

    let result = h.orchestrator.deploy(&ctx, batch).await.unwrap();
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(result.update_set_id, "us_release_7");
    assert!(result.checkpoint_id.is_some());
    assert_eq!(h.store.record("sp_widget", &cart_id).unwrap().get_str("css"), Some("b{}"));

    let report = h
        .rollback
        .rollback(&ctx, "us_release_7", "release cancelled")
        .await
        .unwrap();
    assert_eq!(report.status, RollbackStatus::Completed);
    assert_eq!(report.batches, vec![batch_id.clone()]);
    let kinds: Vec<RollbackKind> = report.actions.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![RollbackKind::Delete, RollbackKind::Restore]);

    let remaining = h.store.records("sp_widget");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get_str("css"), Some("a{}"));

    let journaled = h.orchestrator.journal().run(&result.run_id).unwrap().unwrap();
    assert!(journaled.rolled_back);

    let again = h
        .rollback
        .rollback(&ctx, "us_release_7", "release cancelled")
        .await
        .unwrap();
    assert_eq!(again.status, RollbackStatus::NothingToUndo);
    assert!(again.actions.is_empty());
}

#[tokio::test]
async fn failed_rollback_steps_are_retried_by_the_next_request() {
    let h = harness(MemoryRecordStore::new());
    let ctx = OperationContext::new().with_update_set("us_9");

    h.orchestrator
        .deploy(&ctx, DeploymentBatch::new(vec![widget("Alpha"), widget("Beta")]))
        .await
        .unwrap();
    h.store
        .inject_failure(InjectedFailure::remote(StoreOperation::Delete).times(1));

    let first = h.rollback.rollback(&ctx, "us_9", "bad deploy").await.unwrap();
    assert_eq!(first.status, RollbackStatus::Partial);
    assert_eq!(first.actions.iter().filter(|a| a.succeeded).count(), 1);

    let second = h.rollback.rollback(&ctx, "us_9", "bad deploy").await.unwrap();
    assert_eq!(second.status, RollbackStatus::Completed);
    assert_eq!(second.actions.len(), 1);
    assert!(h.store.records("sp_widget").is_empty());
}

#[tokio::test]
async fn reused_batch_id_rolls_back_every_run() {
    let h = harness(MemoryRecordStore::new());
    let ctx = OperationContext::new().with_update_set("us_p");

    let mut run_ids = Vec::new();
    for name in ["Alpha", "Beta"] {
        let mut batch = DeploymentBatch::new(vec![widget(name)]);
        batch.batch_id = "b1".to_string();
        let result = h.orchestrator.deploy(&ctx, batch).await.unwrap();
        assert_eq!(result.status, BatchStatus::Completed);
        run_ids.push(result.run_id);
    }
    assert_ne!(run_ids[0], run_ids[1]);
    assert_eq!(h.orchestrator.journal().batches_for("us_p").unwrap().len(), 2);

    let report = h.rollback.rollback(&ctx, "us_p", "redo").await.unwrap();
    assert_eq!(report.status, RollbackStatus::Completed);
    assert_eq!(report.actions.len(), 2);
    assert_eq!(report.batches, vec!["b1".to_string()]);
    assert!(h.store.records("sp_widget").is_empty());
}

#[tokio::test]
async fn overlong_batch_id_is_rejected() {
    let h = harness(MemoryRecordStore::new());
    let mut batch = DeploymentBatch::new(vec![widget("Alpha")]);
    batch.batch_id = "b".repeat(65);
    let err = h
        .orchestrator
        .deploy(&OperationContext::new(), batch)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::InvalidBatch(_)));
}

#[tokio::test]
async fn unknown_update_set_has_nothing_to_undo() {
    let h = harness(MemoryRecordStore::new());
    let report = h
        .rollback
        .rollback(&OperationContext::new(), "us_never_used", "cleanup")
        .await
        .unwrap();
    assert_eq!(report.status, RollbackStatus::NothingToUndo);
    assert!(report.batches.is_empty());
}

#[tokio::test]
async fn deployment_and_rollback_are_audited() {
    let h = harness(MemoryRecordStore::new());
    let ctx = OperationContext::new().with_update_set("us_audit");

    let batch = DeploymentBatch::new(vec![widget("Cart")]).with_checkpoint();
    let batch_id = batch.batch_id.clone();
    h.orchestrator.deploy(&ctx, batch).await.unwrap();
    h.rollback.rollback(&ctx, "us_audit", "audit test").await.unwrap();

    let events = h
        .audit
        .query(AuditFilter::for_update_set("us_audit"))
        .await
        .unwrap();
    let types: Vec<AuditEventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            AuditEventType::CheckpointCreated,
            AuditEventType::DeploymentStarted,
            AuditEventType::ArtifactDeployed,
            AuditEventType::DeploymentFinished,
            AuditEventType::RollbackRequested,
            AuditEventType::RollbackCompleted,
        ]
    );
    assert!(
        events[..4]
            .iter()
            .all(|e| e.batch_id.as_deref() == Some(batch_id.as_str()))
    );
}
