//! Cascading resolver configuration.

use crate::entity::EntityMapping;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity types searched, in order, when a request names no type.
pub const DEFAULT_ANY_TYPE_FANOUT: &[&str] = &[
    "widget",
    "business_rule",
    "client_script",
    "script_include",
    "flow",
    "workflow",
    "ui_action",
    "table",
    "application",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Entity types scanned for `any` requests. Kept short to bound remote calls.
    #[serde(default = "default_any_type_fanout")]
    pub any_type_fanout: Vec<String>,

    /// Per-type record limit on the `any` path.
    #[serde(default = "default_per_type_limit")]
    pub per_type_limit: usize,

    /// Record limit for a single-type search.
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,

    /// Page size for enumeration requests.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Overall timeout for one resolution, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Collection additions/overrides keyed by entity type tag.
    #[serde(default)]
    pub collections: BTreeMap<String, EntityMapping>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            any_type_fanout: default_any_type_fanout(),
            per_type_limit: default_per_type_limit(),
            result_limit: default_result_limit(),
            list_page_size: default_list_page_size(),
            timeout_ms: default_timeout_ms(),
            collections: BTreeMap::new(),
        }
    }
}

fn default_any_type_fanout() -> Vec<String> {
    DEFAULT_ANY_TYPE_FANOUT.iter().map(|t| t.to_string()).collect()
}

fn default_per_type_limit() -> usize {
    5
}

fn default_result_limit() -> usize {
    10
}

fn default_list_page_size() -> usize {
    50
}

fn default_timeout_ms() -> u64 {
    60_000
}
