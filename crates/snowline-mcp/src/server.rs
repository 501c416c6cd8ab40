//! MCP server implementation.
//!
//! Handles the JSON-RPC lifecycle (`initialize`, `tools/list`, `tools/call`,
//! `shutdown`) over stdio or HTTP.

use crate::error::McpError;
use crate::executor::{ExecutionResult, ToolExecutor};
use crate::http_transport::{HttpServer, RequestEnvelope};
use crate::protocol::*;
use crate::tools::ToolRegistry;
use serde_json::{Value, json};
use snowline_core::{McpConfig, OperationContext, Transport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// The MCP server.
#[derive(Clone)]
pub struct McpServer {
    config: McpConfig,
    tools: ToolRegistry,
    executor: Arc<ToolExecutor>,
    principal: Option<String>,
}

impl McpServer {
    /// Create a server exposing the built-in tools.
    pub fn new(config: McpConfig, executor: Arc<ToolExecutor>) -> Self {
        Self {
            config,
            tools: ToolRegistry::builtin(),
            executor,
            principal: None,
        }
    }

    /// Principal attributed to stdio requests.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start the MCP server.
    pub async fn run(&self) -> Result<(), McpError> {
        match self.config.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http => self.run_http().await,
        }
    }

    /// Run the server with stdio transport.
    async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!("Starting MCP server with stdio transport");

        let context = RequestContext {
            principal: self.principal.clone(),
        };
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => {
                    if is_notification(&request) {
                        tracing::debug!(method = %request.method, "Notification received");
                        continue;
                    }
                    self.handle_request(request, &context).await
                }
                Err(e) => JsonRpcResponse::error(
                    None,
                    codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ),
            };

            let mut response_json = serde_json::to_string(&response)?;
            response_json.push('\n');
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.flush().await?;
        }

        tracing::info!("stdin closed, MCP server stopping");
        Ok(())
    }

    /// Run the server with HTTP transport.
    pub async fn run_http(&self) -> Result<(), McpError> {
        let addr = self.config.bind_addr();
        tracing::info!(addr = %addr, "Starting MCP server with HTTP transport");

        let (request_tx, mut request_rx) = mpsc::channel::<RequestEnvelope>(100);

        let server = self.clone();
        tokio::spawn(async move {
            while let Some((request, context, response_tx)) = request_rx.recv().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let response = server.handle_request(request, &context).await;
                    let _ = response_tx.send(response).await;
                });
            }
        });

        HttpServer::new(addr, request_tx).run().await
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        context: &RequestContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" | "notifications/initialized" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params, context).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "snowline",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        match serde_json::to_value(self.tools.list()) {
            Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
            Err(e) => JsonRpcResponse::error(id, codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn handle_call_tool(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        context: &RequestContext,
    ) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        codes::INVALID_PARAMS,
                        format!("Invalid params: {}", e),
                    );
                }
            },
            None => return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing params"),
        };

        let Some(tool) = self.tools.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                codes::INVALID_PARAMS,
                McpError::ToolNotFound { name: params.name }.to_string(),
            );
        };

        let mut ctx = OperationContext::new();
        if let Some(ref principal) = context.principal {
            ctx = ctx.with_principal(principal);
        }
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        let result = self.executor.execute(tool, arguments, &ctx).await;
        execution_result_to_response(id, result)
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}

fn is_notification(request: &JsonRpcRequest) -> bool {
    request.id.is_none() && request.method.starts_with("notifications/")
}

fn execution_result_to_response(id: Option<Value>, result: ExecutionResult) -> JsonRpcResponse {
    let response = CallToolResponse {
        content: result.content,
        is_error: !result.success,
    };
    match serde_json::to_value(response) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, codes::INTERNAL_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowline_audit::AuditLogger;
    use snowline_core::{DeploymentConfig, EntityTypeMap, ResolverConfig};
    use snowline_index::{ArtifactIndex, DeploymentJournal};
    use snowline_resolver::{CascadingResolver, DiscoveryService};
    use snowline_runtime::{DeploymentOrchestrator, RollbackService};
    use snowline_store::MemoryRecordStore;
    use tempfile::TempDir;

    fn test_server(dir: &TempDir) -> McpServer {
        let store = Arc::new(MemoryRecordStore::new());
        let resolver =
            CascadingResolver::new(store.clone(), EntityTypeMap::builtin(), ResolverConfig::default());
        let index = ArtifactIndex::open(dir.path().join("index")).unwrap();
        let journal = Arc::new(DeploymentJournal::open(dir.path().join("journal")).unwrap());
        let audit = Arc::new(AuditLogger::disabled());

        let executor = ToolExecutor::new(
            Arc::new(DiscoveryService::new(resolver.clone(), index)),
            Arc::new(DeploymentOrchestrator::new(
                Arc::new(resolver),
                journal.clone(),
                audit.clone(),
                DeploymentConfig::default(),
            )),
            Arc::new(RollbackService::new(store, journal, audit.clone())),
            audit,
        );
        McpServer::new(McpConfig::default(), Arc::new(executor))
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_initialize() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        let response = server
            .handle_request(request("initialize", None), &RequestContext::default())
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_list_tools() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        let response = server
            .handle_request(request("tools/list", None), &RequestContext::default())
            .await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 6);
        assert!(tools.iter().all(|t| t.get("inputSchema").is_some()));
    }

    #[tokio::test]
    async fn test_call_nonexistent_tool() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        let response = server
            .handle_request(
                request("tools/call", Some(json!({"name": "nonexistent", "arguments": {}}))),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(response.error.unwrap().code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        let response = server
            .handle_request(request("resources/list", None), &RequestContext::default())
            .await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_a_tool_error() {
        let dir = TempDir::new().unwrap();
        let server = test_server(&dir);

        let response = server
            .handle_request(
                request("tools/call", Some(json!({"name": "rollback", "arguments": {"reason": "x"}}))),
                &RequestContext::default(),
            )
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["json"]["error"]["kind"], "invalid_arguments");
    }
}
