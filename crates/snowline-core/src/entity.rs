//! Entity type tags and the collections they live in.
//!
//! Every entity type maps to exactly one remote collection. The built-in table
//! covers the types the classifier knows about; configuration can add entries
//! or override existing ones. Tags that are not in the map never produce an
//! error at the edges: [`EntityTypeMap::normalize`] routes them to `any`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A logical artifact category (e.g. `widget`, `flow`), or `any`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Tag for "type unknown, search the common types".
    pub const ANY: &'static str = "any";

    /// Create a tag, normalising case and separators (`Script Include` -> `script_include`).
    pub fn new(tag: impl AsRef<str>) -> Self {
        let normalized = tag
            .as_ref()
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        if normalized.is_empty() {
            Self::any()
        } else {
            Self(normalized)
        }
    }

    /// The `any` tag.
    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    /// Whether this is the `any` tag.
    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }

    /// Tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Where an entity type lives and how its records are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Remote collection name.
    pub collection: String,

    /// Field holding the record's display name.
    #[serde(default = "default_name_field")]
    pub name_field: String,

    /// Fields that must be present before a create is attempted.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl EntityMapping {
    /// Create a mapping with the default name field and no extra required fields.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name_field: default_name_field(),
            required_fields: Vec::new(),
        }
    }
}

fn default_name_field() -> String {
    "name".to_string()
}

/// Built-in entity types: (tag, collection, name field, required fields).
const BUILTIN_ENTITY_TYPES: &[(&str, &str, &str, &[&str])] = &[
    // Service portal
    ("widget", "sp_widget", "name", &["name", "id"]),
    ("portal", "sp_portal", "title", &["title", "url_suffix"]),
    ("portal_page", "sp_page", "id", &["id"]),
    ("portal_theme", "sp_theme", "name", &["name"]),
    ("header_footer", "sp_header_footer", "name", &["name"]),
    ("angular_provider", "sp_angular_provider", "name", &["name"]),
    ("ng_template", "sp_ng_template", "id", &["id"]),
    ("portal_css", "sp_css", "name", &["name"]),
    ("widget_dependency", "sp_dependency", "name", &["name"]),
    // Process automation
    ("flow", "sys_hub_flow", "name", &["name"]),
    ("subflow", "sys_hub_flow", "name", &["name"]),
    ("flow_action", "sys_hub_action_type_definition", "name", &["name"]),
    ("workflow", "wf_workflow", "name", &["name"]),
    ("decision_table", "sys_decision", "name", &["name"]),
    ("playbook", "sys_pd_process_definition", "label", &["label"]),
    // Server and client logic
    ("business_rule", "sys_script", "name", &["name", "collection"]),
    ("client_script", "sys_script_client", "name", &["name", "table"]),
    ("script_include", "sys_script_include", "name", &["name", "script"]),
    ("ui_action", "sys_ui_action", "name", &["name", "table"]),
    ("ui_policy", "sys_ui_policy", "short_description", &["short_description", "table"]),
    ("ui_policy_action", "sys_ui_policy_action", "field", &["field"]),
    ("ui_page", "sys_ui_page", "name", &["name"]),
    ("ui_script", "sys_ui_script", "name", &["name", "script"]),
    ("ui_macro", "sys_ui_macro", "name", &["name"]),
    ("fix_script", "sys_script_fix", "name", &["name", "script"]),
    ("scheduled_job", "sysauto_script", "name", &["name", "script"]),
    ("script_action", "sysevent_script_action", "name", &["name", "event_name"]),
    ("processor", "sys_processor", "name", &["name"]),
    ("acl", "sys_security_acl", "name", &["name", "operation"]),
    // Data model
    ("table", "sys_db_object", "name", &["name", "label"]),
    ("dictionary", "sys_dictionary", "element", &["name", "element"]),
    ("choice", "sys_choice", "label", &["name", "element", "value"]),
    ("system_property", "sys_properties", "name", &["name"]),
    ("list_layout", "sys_ui_list", "name", &["name"]),
    ("form_section", "sys_ui_section", "name", &["name"]),
    ("relationship", "sys_relationship", "name", &["name"]),
    // Applications and navigation
    ("application", "sys_app", "name", &["name"]),
    ("scope", "sys_scope", "name", &["name", "scope"]),
    ("application_menu", "sys_app_application", "title", &["title"]),
    ("module", "sys_app_module", "title", &["title"]),
    ("update_set", "sys_update_set", "name", &["name"]),
    // Integration
    ("rest_message", "sys_rest_message", "name", &["name", "rest_endpoint"]),
    ("scripted_rest_api", "sys_ws_definition", "name", &["name"]),
    ("scripted_rest_resource", "sys_ws_operation", "name", &["name", "http_method"]),
    ("soap_message", "sys_soap_message", "name", &["name"]),
    ("transform_map", "sys_transform_map", "name", &["name", "source_table", "target_table"]),
    ("data_source", "sys_data_source", "name", &["name"]),
    ("import_set", "sys_import_set", "number", &[]),
    ("mid_server", "ecc_agent", "name", &["name"]),
    // Notifications and events
    ("notification", "sysevent_email_action", "name", &["name", "collection"]),
    ("email_template", "sysevent_email_template", "name", &["name"]),
    ("event", "sysevent_register", "event_name", &["event_name"]),
    ("inbound_email_action", "sysevent_in_email_action", "name", &["name"]),
    // Service catalog
    ("catalog_item", "sc_cat_item", "name", &["name"]),
    ("record_producer", "sc_cat_item_producer", "name", &["name", "table_name"]),
    ("catalog_variable", "item_option_new", "name", &["name"]),
    ("variable_set", "item_option_new_set", "title", &["title"]),
    ("catalog_client_script", "catalog_script_client", "name", &["name"]),
    ("catalog_ui_policy", "catalog_ui_policy", "short_description", &["short_description"]),
    ("catalog_category", "sc_category", "title", &["title"]),
    // Reporting
    ("report", "sys_report", "title", &["title", "table"]),
    ("dashboard", "pa_dashboards", "name", &["name"]),
    ("pa_indicator", "pa_indicators", "name", &["name"]),
    // Security and users
    ("role", "sys_user_role", "name", &["name"]),
    ("user", "sys_user", "user_name", &["user_name"]),
    ("group", "sys_user_group", "name", &["name"]),
    // Knowledge and service management
    ("knowledge_article", "kb_knowledge", "short_description", &["short_description"]),
    ("knowledge_base", "kb_knowledge_base", "title", &["title"]),
    ("sla", "contract_sla", "name", &["name", "collection"]),
    ("assignment_rule", "sysrule_assignment", "name", &["name", "table"]),
    ("incident", "incident", "number", &["short_description"]),
    ("problem", "problem", "number", &["short_description"]),
    ("change_request", "change_request", "number", &["short_description"]),
    ("configuration_item", "cmdb_ci", "name", &["name"]),
    // Conversational and test automation
    ("virtual_agent_topic", "sys_cs_topic", "name", &["name"]),
    ("atf_test", "sys_atf_test", "name", &["name"]),
    ("atf_suite", "sys_atf_test_suite", "name", &["name"]),
];

/// Mapping from entity type tag to collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeMap {
    entries: BTreeMap<EntityType, EntityMapping>,
}

impl Default for EntityTypeMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EntityTypeMap {
    /// The built-in table.
    pub fn builtin() -> Self {
        let entries = BUILTIN_ENTITY_TYPES
            .iter()
            .map(|(tag, collection, name_field, required)| {
                (
                    EntityType::new(tag),
                    EntityMapping {
                        collection: (*collection).to_string(),
                        name_field: (*name_field).to_string(),
                        required_fields: required.iter().map(|f| (*f).to_string()).collect(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// The built-in table with configured additions/overrides applied.
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a String, &'a EntityMapping)>,
    ) -> Self {
        let mut map = Self::builtin();
        for (tag, mapping) in overrides {
            map.insert(EntityType::new(tag), mapping.clone());
        }
        map
    }

    /// Add or replace an entry. `any` is reserved and ignored.
    pub fn insert(&mut self, entity_type: EntityType, mapping: EntityMapping) {
        if entity_type.is_any() {
            return;
        }
        self.entries.insert(entity_type, mapping);
    }

    /// Mapping for a type.
    pub fn get(&self, entity_type: &EntityType) -> Option<&EntityMapping> {
        self.entries.get(entity_type)
    }

    /// Collection for a type.
    pub fn collection(&self, entity_type: &EntityType) -> Option<&str> {
        self.get(entity_type).map(|m| m.collection.as_str())
    }

    /// Whether the type is registered.
    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.entries.contains_key(entity_type)
    }

    /// Parse a tag, failing closed to `any` when it is not registered.
    pub fn normalize(&self, tag: &str) -> EntityType {
        let entity_type = EntityType::new(tag);
        if entity_type.is_any() || self.contains(&entity_type) {
            entity_type
        } else {
            EntityType::any()
        }
    }

    /// First registered type stored in the given collection.
    pub fn type_for_collection(&self, collection: &str) -> Option<&EntityType> {
        self.entries
            .iter()
            .find(|(_, m)| m.collection == collection)
            .map(|(t, _)| t)
    }

    /// Iterate over all entries in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityType, &EntityMapping)> {
        self.entries.iter()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
