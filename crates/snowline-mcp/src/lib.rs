//! # snowline-mcp
//!
//! MCP (Model Context Protocol) server exposing Snowline as typed tools.
//!
//! | Tool | Description |
//! |------|-------------|
//! | `classify` | Free text to entity type, identifier and action |
//! | `resolve` | Find artifacts, index first, record store on a miss |
//! | `index` | Fetch one record by id and (re-)index it |
//! | `search_index` | Substring search over the local index |
//! | `deploy_batch` | Deploy a batch with retries, fallbacks and optional transaction |
//! | `rollback` | Undo everything journaled for an update set |
//!
//! Arguments are validated against each tool's input schema before the tool
//! runs. Failures come back as `isError: true` with a JSON `error.kind`.
//!
//! ## Transports
//!
//! - **stdio**: one JSON-RPC message per line on stdin/stdout
//! - **HTTP**: `POST /mcp` with a JSON-RPC body, `GET /health`

pub mod error;
pub mod executor;
pub mod http_transport;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::McpError;
pub use executor::{ExecutionResult, ToolExecutor};
pub use protocol::{
    CallToolParams, JsonRpcRequest, JsonRpcResponse, RequestContext, ToolAnnotations,
    ToolContent, ToolDefinition, ToolFailure,
};
pub use server::McpServer;
pub use tools::ToolRegistry;
