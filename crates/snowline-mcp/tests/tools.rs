//! Tool calls end to end through the JSON-RPC handler.

use serde_json::{Value, json};
use snowline_audit::{AuditEventType, AuditFilter, AuditLogger};
use snowline_core::{
    AuditConfig, DeploymentConfig, EntityTypeMap, McpConfig, Record, ResolverConfig,
};
use snowline_index::{ArtifactIndex, DeploymentJournal};
use snowline_mcp::{JsonRpcRequest, McpServer, RequestContext, ToolExecutor};
use snowline_resolver::{CascadingResolver, DiscoveryService};
use snowline_runtime::{DeploymentOrchestrator, RollbackService};
use snowline_store::MemoryRecordStore;
use std::sync::Arc;
use tempfile::TempDir;

const ORDER_HELPER_ID: &str = "0123456789abcdef0123456789abcdef";

struct Fixture {
    server: McpServer,
    store: Arc<MemoryRecordStore>,
    audit: Arc<AuditLogger>,
    _dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryRecordStore::new().with_records(
        "sys_script_include",
        [
            Record::from_value(json!({
                "sys_id": ORDER_HELPER_ID,
                "name": "OrderHelper",
                "script": "var OrderHelper = Class.create();"
            }))
            .unwrap(),
        ],
    ));
    let resolver =
        CascadingResolver::new(store.clone(), EntityTypeMap::builtin(), ResolverConfig::default());
    let journal = Arc::new(DeploymentJournal::open(dir.path().join("journal")).unwrap());
    let audit = Arc::new(
        AuditLogger::new(AuditConfig {
            enabled: true,
            stdout: false,
            directory: dir.path().join("audit"),
        })
        .unwrap(),
    );

    let executor = ToolExecutor::new(
        Arc::new(DiscoveryService::new(
            resolver.clone(),
            ArtifactIndex::open(dir.path().join("index")).unwrap(),
        )),
        Arc::new(DeploymentOrchestrator::new(
            Arc::new(resolver),
            journal.clone(),
            audit.clone(),
            DeploymentConfig {
                backoff_base_ms: 1,
                ..DeploymentConfig::default()
            },
        )),
        Arc::new(RollbackService::new(store.clone(), journal, audit.clone())),
        audit.clone(),
    );

    Fixture {
        server: McpServer::new(McpConfig::default(), Arc::new(executor)),
        store,
        audit,
        _dir: dir,
    }
}

async fn call(server: &McpServer, name: &str, arguments: Value) -> (bool, Value) {
    call_as(server, name, arguments, RequestContext::default()).await
}

async fn call_as(
    server: &McpServer,
    name: &str,
    arguments: Value,
    context: RequestContext,
) -> (bool, Value) {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(1)),
        method: "tools/call".to_string(),
        params: Some(json!({ "name": name, "arguments": arguments })),
    };
    let response = server.handle_request(request, &context).await;
    assert!(response.error.is_none(), "protocol error: {:?}", response.error);
    let result = response.result.unwrap();
    let is_error = result["isError"].as_bool().unwrap();
    (is_error, result["content"][0]["json"].clone())
}

#[tokio::test]
async fn classify_returns_intent() {
    let f = fixture();
    let (is_error, intent) = call(
        &f.server,
        "classify",
        json!({"query": "find the OrderHelper script include"}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(intent["entity_type"], "script_include");
    assert_eq!(intent["identifier"], "OrderHelper");
    assert_eq!(f.store.total_calls(), 0);
}

#[tokio::test]
async fn resolve_is_cache_first_and_search_reads_the_index() {
    let f = fixture();
    let args = json!({"query": "find the OrderHelper script include"});

    let (is_error, first) = call(&f.server, "resolve", args.clone()).await;
    assert!(!is_error);
    assert_eq!(first["source"], "remote");
    assert_eq!(first["count"], 1);
    assert_eq!(first["artifacts"][0]["id"], ORDER_HELPER_ID);

    let calls = f.store.total_calls();
    let (_, second) = call(&f.server, "resolve", args).await;
    assert_eq!(second["source"], "index");
    assert_eq!(f.store.total_calls(), calls);

    let (is_error, hits) = call(&f.server, "search_index", json!({"term": "orderhelper"})).await;
    assert!(!is_error);
    assert_eq!(hits["count"], 1);
    assert_eq!(f.store.total_calls(), calls);
}

#[tokio::test]
async fn resolve_by_type_and_refresh() {
    let f = fixture();
    let (is_error, found) = call(
        &f.server,
        "resolve",
        json!({"entity_type": "script_include", "identifier": "OrderHelper", "refresh": true}),
    )
    .await;
    assert!(!is_error);
    assert_eq!(found["source"], "remote");

    let (is_error, failure) = call(
        &f.server,
        "resolve",
        json!({"entity_type": "script_include"}),
    )
    .await;
    assert!(is_error);
    assert_eq!(failure["error"]["kind"], "invalid_arguments");
}

#[tokio::test]
async fn typed_failures() {
    let f = fixture();

    let (is_error, failure) = call(
        &f.server,
        "resolve",
        json!({"entity_type": "spaceship", "identifier": "Enterprise"}),
    )
    .await;
    assert!(is_error);
    assert_eq!(failure["error"]["kind"], "unknown_entity_type");

    let (is_error, failure) = call(
        &f.server,
        "index",
        json!({"entity_type": "script_include", "record_id": "missing"}),
    )
    .await;
    assert!(is_error);
    assert_eq!(failure["error"]["kind"], "not_found");

    let (is_error, failure) = call(&f.server, "deploy_batch", json!({"artifacts": []})).await;
    assert!(is_error);
    assert_eq!(failure["error"]["kind"], "invalid_arguments");
}

#[tokio::test]
async fn index_tool_reindexes_one_record() {
    let f = fixture();
    let (is_error, artifact) = call(
        &f.server,
        "index",
        json!({"entity_type": "script_include", "record_id": ORDER_HELPER_ID}),
    )
    .await;

    assert!(!is_error);
    assert_eq!(artifact["id"], ORDER_HELPER_ID);
    assert_eq!(artifact["name"], "OrderHelper");
    assert_eq!(artifact["collection"], "sys_script_include");
}

#[tokio::test]
async fn deploy_then_rollback() {
    let f = fixture();
    let (is_error, result) = call_as(
        &f.server,
        "deploy_batch",
        json!({
            "update_set_id": "us_tools",
            "scope": "x_cart",
            "artifacts": [
                {"entity_type": "widget", "fields": {"name": "Cart", "id": "cart"}},
                {"entity_type": "widget", "fields": {"name": "Checkout", "id": "checkout"}}
            ]
        }),
        RequestContext {
            principal: Some("deployer".to_string()),
        },
    )
    .await;

    assert!(!is_error, "{}", result);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["update_set_id"], "us_tools");
    let widgets = f.store.records("sp_widget");
    assert_eq!(widgets.len(), 2);
    assert!(
        widgets
            .iter()
            .all(|w| w.fields().get("sys_scope") == Some(&json!("x_cart")))
    );

    let (is_error, report) = call(
        &f.server,
        "rollback",
        json!({"update_set_id": "us_tools", "reason": "wrong widgets"}),
    )
    .await;
    assert!(!is_error);
    assert_eq!(report["status"], "completed");
    assert!(f.store.records("sp_widget").is_empty());

    let calls = f
        .audit
        .query(AuditFilter::default().with_event_type(AuditEventType::ToolCalled))
        .await
        .unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].principal.as_deref(), Some("deployer"));
    assert_eq!(calls[1].action, "rollback");
}

#[test]
fn every_builtin_schema_compiles() {
    for tool in snowline_mcp::tools::builtin_tools() {
        let validator = jsonschema::draft202012::options()
            .build(&tool.input_schema)
            .unwrap_or_else(|e| panic!("{}: {}", tool.name, e));
        assert!(!validator.is_valid(&json!("not an object")), "{}", tool.name);
    }
}
