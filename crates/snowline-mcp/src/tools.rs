//! Tool registry and the built-in Snowline tool definitions.

use crate::protocol::{ToolAnnotations, ToolDefinition};
use serde_json::{Value, json};
use snowline_core::FallbackStrategy;
use std::collections::BTreeMap;

pub const CLASSIFY: &str = "classify";
pub const RESOLVE: &str = "resolve";
pub const INDEX: &str = "index";
pub const SEARCH_INDEX: &str = "search_index";
pub const DEPLOY_BATCH: &str = "deploy_batch";
pub const ROLLBACK: &str = "rollback";

/// Registry of available MCP tools, listed in name order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in tool.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

fn read_only() -> Option<ToolAnnotations> {
    Some(ToolAnnotations {
        read_only: Some(true),
        destructive: Some(false),
        idempotent: Some(true),
    })
}

fn tool(name: &str, description: &str, input_schema: Value, annotations: Option<ToolAnnotations>) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
        annotations,
    }
}

/// Definitions of the six built-in tools.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    let strategies: Vec<&str> = FallbackStrategy::ALL.iter().map(|s| s.as_str()).collect();

    vec![
        tool(
            CLASSIFY,
            "Reduce a free-text request to an entity type, identifier and action",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1 }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            read_only(),
        ),
        tool(
            RESOLVE,
            "Find artifacts by free text or by entity type and identifier. \
             Answers from the local index when possible and indexes whatever the record store returns.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1 },
                    "entity_type": { "type": "string", "minLength": 1 },
                    "identifier": { "type": "string" },
                    "list_all": { "type": "boolean", "default": false },
                    "refresh": {
                        "type": "boolean",
                        "default": false,
                        "description": "Skip the index and always query the record store"
                    }
                },
                "anyOf": [
                    { "required": ["query"] },
                    { "required": ["entity_type"] }
                ],
                "additionalProperties": false
            }),
            Some(ToolAnnotations {
                read_only: Some(false),
                destructive: Some(false),
                idempotent: Some(true),
            }),
        ),
        tool(
            INDEX,
            "Fetch one record by id and (re-)index it",
            json!({
                "type": "object",
                "properties": {
                    "entity_type": { "type": "string", "minLength": 1 },
                    "record_id": { "type": "string", "minLength": 1 }
                },
                "required": ["entity_type", "record_id"],
                "additionalProperties": false
            }),
            Some(ToolAnnotations {
                read_only: Some(false),
                destructive: Some(false),
                idempotent: Some(true),
            }),
        ),
        tool(
            SEARCH_INDEX,
            "Substring search over the local index without contacting the record store",
            json!({
                "type": "object",
                "properties": {
                    "term": { "type": "string", "minLength": 1 },
                    "entity_type": { "type": "string", "minLength": 1 }
                },
                "required": ["term"],
                "additionalProperties": false
            }),
            read_only(),
        ),
        tool(
            DEPLOY_BATCH,
            "Deploy a batch of artifacts with retries, fallback strategies, \
             optional all-or-nothing transaction mode and an optional checkpoint",
            json!({
                "type": "object",
                "properties": {
                    "batch_id": { "type": "string", "minLength": 1 },
                    "artifacts": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "entity_type": { "type": "string", "minLength": 1 },
                                "collection": { "type": "string", "minLength": 1 },
                                "fields": { "type": "object" },
                                "expected_relations": {
                                    "type": "array",
                                    "items": { "type": "string" }
                                },
                                "target_id": { "type": "string", "minLength": 1 },
                                "if_exists": {
                                    "type": "string",
                                    "enum": ["create_new", "update_existing", "reuse_existing"]
                                }
                            },
                            "required": ["entity_type", "fields"]
                        }
                    },
                    "transaction_mode": { "type": "boolean", "default": false },
                    "parallel": { "type": "boolean", "default": false },
                    "checkpoint": { "type": "boolean", "default": false },
                    "update_set_id": { "type": "string", "minLength": 1 },
                    "max_retries": { "type": "integer", "minimum": 1 },
                    "fallback_strategies": {
                        "type": "array",
                        "items": { "type": "string", "enum": strategies }
                    },
                    "check_remote_conflicts": { "type": "boolean", "default": false },
                    "scope": {
                        "type": "string",
                        "minLength": 1,
                        "description": "Application scope applied to created records"
                    }
                },
                "required": ["artifacts"]
            }),
            Some(ToolAnnotations {
                read_only: Some(false),
                destructive: Some(false),
                idempotent: Some(false),
            }),
        ),
        tool(
            ROLLBACK,
            "Undo everything deployed under an update set: delete created records \
             and restore checkpointed prior values",
            json!({
                "type": "object",
                "properties": {
                    "update_set_id": { "type": "string", "minLength": 1 },
                    "reason": { "type": "string", "minLength": 1 }
                },
                "required": ["update_set_id", "reason"],
                "additionalProperties": false
            }),
            Some(ToolAnnotations {
                read_only: Some(false),
                destructive: Some(true),
                idempotent: Some(true),
            }),
        ),
    ]
}
