//! Tool execution engine.
//!
//! Arguments are validated against the tool's input schema, then dispatched
//! to the discovery service, the deployment orchestrator or the rollback
//! service. Every failure becomes a typed [`ToolFailure`] payload.

use crate::protocol::{ToolContent, ToolDefinition, ToolFailure};
use crate::tools;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use snowline_audit::AuditLogger;
use snowline_core::{DeploymentBatch, EntityType, Intent, OperationContext};
use snowline_resolver::{DiscoveryService, LookupMode, ResolveError};
use snowline_runtime::{DeployError, DeploymentOrchestrator, RollbackError, RollbackService};
use std::sync::Arc;
use std::time::Instant;

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub content: Vec<ToolContent>,
    pub error: Option<ToolFailure>,
}

impl ExecutionResult {
    /// Create a successful result with JSON content.
    pub fn success_json(value: Value) -> Self {
        Self {
            success: true,
            content: vec![ToolContent::Json { json: value }],
            error: None,
        }
    }

    /// Create an error result carrying the failure as `{"error": {kind, message}}`.
    pub fn failure(failure: ToolFailure) -> Self {
        Self {
            success: false,
            content: vec![ToolContent::Json {
                json: json!({ "error": failure }),
            }],
            error: Some(failure),
        }
    }
}

impl From<ResolveError> for ToolFailure {
    fn from(e: ResolveError) -> Self {
        ToolFailure::new(e.kind(), e.to_string())
    }
}

impl From<DeployError> for ToolFailure {
    fn from(e: DeployError) -> Self {
        ToolFailure::new(e.kind(), e.to_string())
    }
}

impl From<RollbackError> for ToolFailure {
    fn from(e: RollbackError) -> Self {
        ToolFailure::new(e.kind(), e.to_string())
    }
}

fn invalid_arguments(message: impl Into<String>) -> ToolFailure {
    ToolFailure::new("invalid_arguments", message)
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value, ToolFailure> {
    serde_json::to_value(value).map_err(|e| ToolFailure::new("serialization", e.to_string()))
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolFailure> {
    serde_json::from_value(arguments).map_err(|e| invalid_arguments(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ClassifyArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct ResolveArgs {
    query: Option<String>,
    entity_type: Option<String>,
    identifier: Option<String>,
    #[serde(default)]
    list_all: bool,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct IndexArgs {
    entity_type: String,
    record_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    term: String,
    entity_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RollbackArgs {
    update_set_id: String,
    reason: String,
}

/// Executes the built-in tools.
pub struct ToolExecutor {
    discovery: Arc<DiscoveryService>,
    orchestrator: Arc<DeploymentOrchestrator>,
    rollback: Arc<RollbackService>,
    audit: Arc<AuditLogger>,
}

impl ToolExecutor {
    pub fn new(
        discovery: Arc<DiscoveryService>,
        orchestrator: Arc<DeploymentOrchestrator>,
        rollback: Arc<RollbackService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            discovery,
            orchestrator,
            rollback,
            audit,
        }
    }

    /// Validate the arguments and run the tool.
    pub async fn execute(
        &self,
        tool: &ToolDefinition,
        arguments: Value,
        ctx: &OperationContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let outcome = match validate_arguments(tool, &arguments) {
            Ok(()) => self.dispatch(&tool.name, arguments, ctx).await,
            Err(failure) => Err(failure),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = outcome.as_ref().err().map(|f| format!("{}: {}", f.kind, f.message));
        if let Some(ref error) = error {
            tracing::warn!(request_id = %ctx.request_id, tool = %tool.name, error = %error, "Tool call failed");
        } else {
            tracing::info!(request_id = %ctx.request_id, tool = %tool.name, duration_ms, "Tool call finished");
        }
        if let Err(e) = self
            .audit
            .log_tool_call(ctx, &tool.name, duration_ms, error.as_deref())
            .await
        {
            tracing::warn!(tool = %tool.name, error = %e, "Failed to audit tool call");
        }

        match outcome {
            Ok(value) => ExecutionResult::success_json(value),
            Err(failure) => ExecutionResult::failure(failure),
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
        ctx: &OperationContext,
    ) -> Result<Value, ToolFailure> {
        match name {
            tools::CLASSIFY => {
                let args: ClassifyArgs = parse_args(arguments)?;
                to_payload(&self.discovery.classify(&args.query))
            }
            tools::RESOLVE => self.resolve(parse_args(arguments)?, ctx).await,
            tools::INDEX => {
                let args: IndexArgs = parse_args(arguments)?;
                let artifact = self
                    .discovery
                    .analyze(ctx, &EntityType::new(&args.entity_type), &args.record_id)
                    .await?;
                to_payload(&artifact)
            }
            tools::SEARCH_INDEX => {
                let args: SearchArgs = parse_args(arguments)?;
                let entity_type = args.entity_type.as_deref().map(EntityType::new);
                let hits = self.discovery.search_index(&args.term, entity_type.as_ref())?;
                Ok(json!({ "count": hits.len(), "artifacts": to_payload(&hits)? }))
            }
            tools::DEPLOY_BATCH => self.deploy(arguments, ctx).await,
            tools::ROLLBACK => {
                let args: RollbackArgs = parse_args(arguments)?;
                let report = self
                    .rollback
                    .rollback(ctx, &args.update_set_id, &args.reason)
                    .await?;
                to_payload(&report)
            }
            other => Err(ToolFailure::new(
                "tool_not_found",
                format!("no executor for tool '{}'", other),
            )),
        }
    }

    async fn resolve(&self, args: ResolveArgs, ctx: &OperationContext) -> Result<Value, ToolFailure> {
        let mode = if args.refresh {
            LookupMode::Refresh
        } else {
            LookupMode::CacheFirst
        };

        let intent = match (args.entity_type, args.query) {
            (Some(entity_type), _) => {
                let entity_type = EntityType::new(&entity_type);
                match args.identifier.filter(|i| !i.trim().is_empty()) {
                    Some(identifier) => {
                        let mut intent = Intent::new(entity_type, identifier);
                        intent.list_all = args.list_all;
                        intent
                    }
                    None if args.list_all => Intent::list(entity_type),
                    None => {
                        return Err(invalid_arguments(
                            "identifier is required unless list_all is set",
                        ));
                    }
                }
            }
            (None, Some(query)) => {
                let mut intent = self.discovery.classify(&query);
                intent.list_all |= args.list_all;
                intent
            }
            (None, None) => return Err(invalid_arguments("either query or entity_type is required")),
        };

        let discovery = self.discovery.resolve(ctx, intent, mode).await?;
        let mut payload = to_payload(&discovery)?;
        if let Value::Object(ref mut fields) = payload {
            fields.insert("count".to_string(), json!(discovery.artifacts.len()));
        }
        Ok(payload)
    }

    async fn deploy(&self, mut arguments: Value, ctx: &OperationContext) -> Result<Value, ToolFailure> {
        let scope = arguments
            .as_object_mut()
            .and_then(|fields| fields.remove("scope"))
            .and_then(|scope| scope.as_str().map(str::to_string));
        let batch: DeploymentBatch = parse_args(arguments)?;

        let ctx = match scope {
            Some(scope) => ctx.clone().with_scope(scope),
            None => ctx.clone(),
        };
        let result = self.orchestrator.deploy(&ctx, batch).await?;
        to_payload(&result)
    }
}

/// Check `arguments` against the tool's input schema.
pub fn validate_arguments(tool: &ToolDefinition, arguments: &Value) -> Result<(), ToolFailure> {
    let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
        ToolFailure::new(
            "internal",
            format!("input schema of {} is invalid: {}", tool.name, e),
        )
    })?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| {
            let path = e.instance_path().to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(invalid_arguments(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn test_validate_arguments() {
        let registry = ToolRegistry::builtin();
        let rollback = registry.get(tools::ROLLBACK).unwrap();

        assert!(validate_arguments(rollback, &json!({"update_set_id": "us_1", "reason": "bad"})).is_ok());

        let failure = validate_arguments(rollback, &json!({"update_set_id": "us_1"})).unwrap_err();
        assert_eq!(failure.kind, "invalid_arguments");
        assert!(failure.message.contains("reason"));

        let failure =
            validate_arguments(rollback, &json!({"update_set_id": 7, "reason": "x"})).unwrap_err();
        assert!(failure.message.contains("/update_set_id"));
    }

    #[test]
    fn test_resolve_requires_query_or_type() {
        let registry = ToolRegistry::builtin();
        let resolve = registry.get(tools::RESOLVE).unwrap();
        assert!(validate_arguments(resolve, &json!({"query": "find the cart widget"})).is_ok());
        assert!(validate_arguments(resolve, &json!({"entity_type": "widget", "list_all": true})).is_ok());
        assert!(validate_arguments(resolve, &json!({"list_all": true})).is_err());
    }

    #[test]
    fn test_failure_payload_shape() {
        let result = ExecutionResult::failure(ToolFailure::new("not_found", "missing"));
        assert!(!result.success);
        assert_eq!(
            result.content,
            vec![ToolContent::Json {
                json: json!({"error": {"kind": "not_found", "message": "missing"}})
            }]
        );
    }
}
