//! End-to-end resolution against an in-memory record store.

use serde_json::json;
use snowline_core::{EntityType, EntityTypeMap, Intent, OperationContext, Record, ResolverConfig};
use snowline_index::ArtifactIndex;
use snowline_resolver::{
    CascadingResolver, DiscoveryService, DiscoverySource, LookupMode, MatchStrategy, ResolveError,
};
use snowline_store::{InjectedFailure, MemoryRecordStore, StoreOperation};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ORDER_HELPER_ID: &str = "0123456789abcdef0123456789abcdef";

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

fn seeded_store() -> MemoryRecordStore {
    MemoryRecordStore::new()
        .with_records(
            "sys_script_include",
            [
                record(json!({
                    "sys_id": ORDER_HELPER_ID,
                    "name": "OrderHelper",
                    "script": "var OrderHelper = Class.create();"
                })),
                record(json!({"name": "CartHelper", "script": "var gr = new GlideRecord('sc_cart');"})),
                record(json!({"name": "UserUtils", "description": "Recently edited helper"})),
            ],
        )
        .with_records(
            "sp_widget",
            [
                record(json!({"name": "Cart Summary", "id": "cart-summary"})),
                record(json!({"name": "Checkout Panel", "id": "checkout"})),
            ],
        )
}

fn service(store: Arc<MemoryRecordStore>, dir: &TempDir) -> DiscoveryService {
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());
    DiscoveryService::new(resolver, ArtifactIndex::open(dir.path()).unwrap())
}

#[tokio::test]
async fn second_identical_request_is_served_from_index() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(seeded_store());
    let discovery = service(store.clone(), &dir);
    let ctx = OperationContext::new();

    let first = discovery
        .discover(&ctx, "find the OrderHelper script include")
        .await
        .unwrap();
    assert_eq!(first.source, DiscoverySource::Remote);
    assert_eq!(first.strategy, Some(MatchStrategy::ExactName));
    assert_eq!(first.artifacts.len(), 1);
    assert_eq!(first.artifacts[0].id, ORDER_HELPER_ID);
    let calls_after_first = store.total_calls();

    let second = discovery
        .discover(&ctx, "find the OrderHelper script include")
        .await
        .unwrap();
    assert_eq!(second.source, DiscoverySource::Index);
    assert_eq!(second.queries_issued, 0);
    assert_eq!(second.artifacts, first.artifacts);
    assert_eq!(store.total_calls(), calls_after_first);
}

#[tokio::test]
async fn refresh_bypasses_index() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(seeded_store());
    let discovery = service(store.clone(), &dir);
    let ctx = OperationContext::new();
    let intent = discovery.classify("OrderHelper script include");

    discovery
        .resolve(&ctx, intent.clone(), LookupMode::CacheFirst)
        .await
        .unwrap();
    let refreshed = discovery.resolve(&ctx, intent, LookupMode::Refresh).await.unwrap();
    assert_eq!(refreshed.source, DiscoverySource::Remote);
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn nothing_found_is_empty_never_sample_records() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(seeded_store());
    let discovery = service(store.clone(), &dir);

    let found = discovery
        .discover(&OperationContext::new(), "find the Nonexistent script include")
        .await
        .unwrap();

    assert!(found.is_empty());
    assert_eq!(found.strategy, None);
    // exact, contains, description, first term
    assert_eq!(found.queries_issued, 4);
    assert!(discovery.search_index("", None).unwrap().is_empty());
}

#[tokio::test]
async fn description_strategy_runs_after_name_strategies() {
    let store = Arc::new(seeded_store());
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = Intent::new(EntityType::new("script_include"), "recently edited");
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    assert_eq!(resolution.strategy, Some(MatchStrategy::Description));
    assert_eq!(resolution.records.len(), 1);
    assert_eq!(resolution.records[0].record.get_str("name"), Some("UserUtils"));
    assert_eq!(resolution.queries_issued, 3);
}

#[tokio::test]
async fn untyped_request_accumulates_across_types() {
    let store = Arc::new(seeded_store());
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = snowline_resolver::classify("cart");
    assert!(intent.entity_type.is_any());
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    let mut found: Vec<_> = resolution
        .records
        .iter()
        .map(|r| (r.entity_type.to_string(), r.record.get_str("name").unwrap().to_string()))
        .collect();
    found.sort();
    assert_eq!(
        found,
        vec![
            ("script_include".to_string(), "CartHelper".to_string()),
            ("widget".to_string(), "Cart Summary".to_string()),
        ]
    );
    assert_eq!(resolution.strategy, Some(MatchStrategy::NameContains));
    // exact + contains for each of the nine fan-out types
    assert_eq!(resolution.queries_issued, 18);
}

#[tokio::test]
async fn untyped_request_falls_back_to_broad_first_term_pass() {
    let store = Arc::new(seeded_store());
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = snowline_resolver::classify("show me checkout summary");
    assert_eq!(intent.identifier, "checkout summary");
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    assert_eq!(resolution.records.len(), 1);
    assert_eq!(resolution.records[0].record.get_str("name"), Some("Checkout Panel"));
    assert_eq!(resolution.strategy, Some(MatchStrategy::FirstTerm));
    assert_eq!(resolution.queries_issued, 27);
}

#[tokio::test]
async fn broad_first_term_pass_searches_descriptions() {
    let store = Arc::new(seeded_store());
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = snowline_resolver::classify("show me recently touched");
    assert_eq!(intent.entity_type, EntityType::any());
    assert_eq!(intent.identifier, "recently touched");
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    assert_eq!(resolution.records.len(), 1);
    assert_eq!(resolution.records[0].record.get_str("name"), Some("UserUtils"));
    assert_eq!(resolution.strategy, Some(MatchStrategy::FirstTerm));
}

#[tokio::test]
async fn unregistered_type_is_an_error() {
    let store = Arc::new(seeded_store());
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = Intent::new(EntityType::new("hologram"), "anything");
    let err = resolver
        .resolve(&OperationContext::new(), &intent)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::UnknownEntityType(t) if t == "hologram"));
}

#[tokio::test]
async fn listing_issues_one_ordered_page_fetch() {
    let store = Arc::new(seeded_store());
    let resolver =
        CascadingResolver::new(store.clone(), EntityTypeMap::builtin(), ResolverConfig::default());

    let resolution = resolver
        .resolve(&OperationContext::new(), &Intent::list(EntityType::new("widget")))
        .await
        .unwrap();

    let names: Vec<_> = resolution
        .records
        .iter()
        .filter_map(|r| r.record.get_str("name"))
        .collect();
    assert_eq!(names, vec!["Cart Summary", "Checkout Panel"]);
    assert_eq!(resolution.strategy, Some(MatchStrategy::Listing));
    assert_eq!(store.query_count(), 1);
    assert_eq!(store.calls()[0].detail.as_deref(), Some("ORDERBYname"));
}

#[tokio::test]
async fn id_token_is_fetched_directly() {
    let store = Arc::new(seeded_store());
    let resolver =
        CascadingResolver::new(store.clone(), EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = snowline_resolver::classify(&format!("script include {}", ORDER_HELPER_ID));
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    assert_eq!(resolution.strategy, Some(MatchStrategy::RecordId));
    assert_eq!(resolution.records[0].record.get_str("name"), Some("OrderHelper"));
    assert_eq!(store.call_count(StoreOperation::Get), 1);
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn failing_type_is_skipped_on_untyped_path() {
    let store = Arc::new(seeded_store());
    store.inject_failure(InjectedFailure::remote(StoreOperation::Query).on_collection("sp_widget"));
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = snowline_resolver::classify("cart");
    let resolution = resolver.resolve(&OperationContext::new(), &intent).await.unwrap();

    assert_eq!(resolution.skipped_types, vec!["widget".to_string()]);
    assert_eq!(resolution.records.len(), 1);
    assert_eq!(resolution.records[0].record.get_str("name"), Some("CartHelper"));
}

#[tokio::test]
async fn remote_failure_on_single_type_propagates() {
    let store = Arc::new(seeded_store());
    store.inject_failure(InjectedFailure::remote(StoreOperation::Query));
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let intent = Intent::new(EntityType::new("widget"), "cart");
    let err = resolver
        .resolve(&OperationContext::new(), &intent)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Store(_)));
}

#[tokio::test]
async fn deadline_bounds_resolution() {
    let store = Arc::new(seeded_store().with_latency(Duration::from_millis(200)));
    let resolver = CascadingResolver::new(store, EntityTypeMap::builtin(), ResolverConfig::default());

    let ctx = OperationContext::new().with_timeout(Duration::from_millis(20));
    let intent = Intent::new(EntityType::new("widget"), "cart");
    let err = resolver.resolve(&ctx, &intent).await.unwrap_err();
    assert!(matches!(err, ResolveError::Timeout(_)));
}

#[tokio::test]
async fn analyze_indexes_a_record_by_id() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(seeded_store());
    let discovery = service(store, &dir);

    let artifact = discovery
        .analyze(&OperationContext::new(), &EntityType::new("script_include"), ORDER_HELPER_ID)
        .await
        .unwrap();
    assert_eq!(artifact.name, "OrderHelper");
    assert_eq!(discovery.index().get(ORDER_HELPER_ID).unwrap(), Some(artifact));

    let err = discovery
        .analyze(&OperationContext::new(), &EntityType::new("script_include"), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::RecordNotFound { .. }));
}
