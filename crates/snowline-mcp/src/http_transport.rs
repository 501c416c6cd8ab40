//! HTTP transport for MCP server.
//!
//! `POST /mcp` carries one JSON-RPC request per call; `GET /health` reports
//! liveness. The caller's principal is read from the `X-Snowline-Principal`
//! header.

use crate::error::McpError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestContext, codes};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Header naming the caller.
pub const PRINCIPAL_HEADER: &str = "x-snowline-principal";

/// A request handed to the server task, with the channel for its response.
pub type RequestEnvelope = (JsonRpcRequest, RequestContext, mpsc::Sender<JsonRpcResponse>);

/// HTTP transport handler state.
pub struct HttpTransportState {
    request_tx: mpsc::Sender<RequestEnvelope>,
}

impl HttpTransportState {
    pub fn new(request_tx: mpsc::Sender<RequestEnvelope>) -> Self {
        Self { request_tx }
    }
}

/// Create the HTTP router for MCP.
pub fn create_router(state: Arc<HttpTransportState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let principal = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    RequestContext { principal }
}

/// Handle POST requests to /mcp (JSON-RPC over HTTP).
async fn handle_mcp_post(
    State(state): State<Arc<HttpTransportState>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let (response_tx, mut response_rx) = mpsc::channel(1);
    let context = request_context(&headers);

    if state
        .request_tx
        .send((request, context, response_tx))
        .await
        .is_err()
    {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(JsonRpcResponse::error(
                None,
                codes::INTERNAL_ERROR,
                "MCP server unavailable",
            )),
        );
    }

    match response_rx.recv().await {
        Some(response) => (StatusCode::OK, Json(response)),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonRpcResponse::error(
                None,
                codes::INTERNAL_ERROR,
                "No response from MCP server",
            )),
        ),
    }
}

/// Handle health check requests.
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "snowline-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// HTTP server for MCP transport.
pub struct HttpServer {
    addr: String,
    state: Arc<HttpTransportState>,
}

impl HttpServer {
    pub fn new(addr: impl Into<String>, request_tx: mpsc::Sender<RequestEnvelope>) -> Self {
        Self {
            addr: addr.into(),
            state: Arc::new(HttpTransportState::new(request_tx)),
        }
    }

    /// Run the HTTP server until the listener fails.
    pub async fn run(self) -> Result<(), McpError> {
        let app = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| McpError::StartupFailed(format!("failed to bind {}: {}", self.addr, e)))?;

        tracing::info!(addr = %self.addr, "MCP HTTP server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| McpError::TransportError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (tx, _rx) = mpsc::channel(1);
        let app = create_router(Arc::new(HttpTransportState::new(tx)));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_forwards_principal() {
        let (tx, mut rx) = mpsc::channel::<RequestEnvelope>(1);
        let app = create_router(Arc::new(HttpTransportState::new(tx)));

        tokio::spawn(async move {
            if let Some((request, context, response_tx)) = rx.recv().await {
                let _ = response_tx
                    .send(JsonRpcResponse::success(
                        request.id,
                        json!({ "principal": context.principal }),
                    ))
                    .await;
            }
        });

        let body = json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .header("X-Snowline-Principal", "deployer@example.com")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["result"]["principal"], "deployer@example.com");
    }

    #[tokio::test]
    async fn test_post_without_server_is_unavailable() {
        let (tx, rx) = mpsc::channel::<RequestEnvelope>(1);
        drop(rx);
        let app = create_router(Arc::new(HttpTransportState::new(tx)));

        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
