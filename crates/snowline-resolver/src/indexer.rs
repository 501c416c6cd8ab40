//! Artifact decomposition.
//!
//! Each supported entity type has a rule describing which fields make up
//! the artifact, where it can be edited and what it refers to. Types without
//! a rule get a generic summary.

use crate::cascade::ResolvedRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use snowline_core::{
    EntityType, EntityTypeMap, IndexedArtifact, ModificationKind, ModificationPoint, Record,
    RelationKind, Relationship,
};
use std::sync::LazyLock;

/// `new OrderHelper(` style instantiations.
static INSTANTIATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bnew\s+([A-Z][A-Za-z0-9_]*)\s*\(").expect("instantiation pattern is valid")
});

/// `new GlideRecord('incident')` style table access.
static TABLE_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bGlide(?:RecordSecure|Record|Aggregate)\s*\(\s*['"]([A-Za-z0-9_]+)['"]\s*\)"#)
        .expect("table access pattern is valid")
});

/// `new GlideAjax('CartAjax')` style client-to-server calls.
static AJAX_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bGlideAjax\s*\(\s*['"]([A-Za-z0-9_.]+)['"]\s*\)"#)
        .expect("ajax pattern is valid")
});

/// Classes provided by the platform or the language, never script includes.
const BUILTIN_CLASSES: &[&str] = &["Array", "Date", "Error", "Object", "Promise", "RegExp", "Map", "Set"];

/// Longest description excerpt carried into a summary.
const SUMMARY_EXCERPT_LEN: usize = 200;

/// Per-type decomposition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionRule {
    Widget,
    Flow,
    Workflow,
    BusinessRule,
    ClientScript,
    ScriptInclude,
    UiAction,
    UiPage,
    Table,
    Application,
    Generic,
}

impl DecompositionRule {
    pub fn for_type(entity_type: &EntityType) -> Self {
        match entity_type.as_str() {
            "widget" => Self::Widget,
            "flow" | "subflow" => Self::Flow,
            "workflow" => Self::Workflow,
            "business_rule" => Self::BusinessRule,
            "client_script" | "catalog_client_script" => Self::ClientScript,
            "script_include" => Self::ScriptInclude,
            "ui_action" => Self::UiAction,
            "ui_page" => Self::UiPage,
            "table" => Self::Table,
            "application" | "scope" => Self::Application,
            _ => Self::Generic,
        }
    }

    fn label(&self, entity_type: &EntityType) -> String {
        let fixed = match self {
            Self::Widget => "Widget",
            Self::Flow if entity_type.as_str() == "subflow" => "Subflow",
            Self::Flow => "Flow",
            Self::Workflow => "Workflow",
            Self::BusinessRule => "Business rule",
            Self::ClientScript => "Client script",
            Self::ScriptInclude => "Script include",
            Self::UiAction => "UI action",
            Self::UiPage => "UI page",
            Self::Table => "Table",
            Self::Application => "Application",
            Self::Generic => return humanize(entity_type.as_str()),
        };
        fixed.to_string()
    }

    fn apply(&self, facts: &mut Facts<'_>) {
        match self {
            Self::Widget => {
                facts.attr("id");
                facts.part("template", "HTML template", ModificationKind::Template);
                facts.part("css", "CSS", ModificationKind::Style);
                facts.script("client_script", "client controller");
                facts.script("script", "server script");
                facts.script("link", "link function");
                facts.part("option_schema", "option schema", ModificationKind::Configuration);
                if !facts.record.has_text("script") {
                    facts.note("Client-only widget: no server script");
                }
            }
            Self::Flow => {
                for field in ["type", "status", "active", "run_as"] {
                    facts.attr(field);
                }
                facts.runs_on("table");
                facts.part("trigger_type", "trigger", ModificationKind::Configuration);
                facts.point("status", ModificationKind::Configuration, "Activation status");
                facts.note("Flow steps are executed by the platform and are not decomposed");
            }
            Self::Workflow => {
                facts.attr("published");
                facts.attr("active");
                facts.runs_on("table");
                facts.part("condition", "start condition", ModificationKind::Condition);
            }
            Self::BusinessRule => {
                facts.attr("when");
                facts.attr("order");
                facts.runs_on("collection");
                facts.part("condition", "condition", ModificationKind::Condition);
                facts.part("filter_condition", "filter condition", ModificationKind::Condition);
                facts.script("script", "script");
                if let Some(when) = facts.record.text("when") {
                    facts.note(format!("Runs {} the database operation", when));
                }
            }
            Self::ClientScript => {
                facts.attr("type");
                facts.attr("field_name");
                facts.runs_on("table");
                facts.script("script", "script");
                if let Some(field) = facts.record.text("field_name") {
                    facts.note(format!("Reacts to changes of field '{}'", field));
                }
            }
            Self::ScriptInclude => {
                facts.attr("api_name");
                facts.attr("client_callable");
                facts.attr("access");
                facts.script("script", "script");
                if facts.record.text("client_callable") == Some("true")
                    || facts.record.get("client_callable") == Some(&Value::Bool(true))
                {
                    facts.note("Callable from the client via GlideAjax");
                }
            }
            Self::UiAction => {
                facts.attr("action_name");
                facts.attr("form_button");
                facts.attr("list_button");
                facts.runs_on("table");
                facts.part("condition", "condition", ModificationKind::Condition);
                facts.script("script", "script");
            }
            Self::UiPage => {
                facts.part("html", "HTML", ModificationKind::Template);
                facts.script("client_script", "client script");
                facts.script("processing_script", "processing script");
            }
            Self::Table => {
                facts.attr("label");
                facts.attr("is_extendable");
                if let Some(parent) = facts.record.text("super_class") {
                    facts.relate(RelationKind::Extends, parent, Some("table"));
                    facts.structure.insert("extends".to_string(), Value::String(parent.to_string()));
                }
                facts.point("label", ModificationKind::Configuration, "Display label");
                facts.point(
                    "columns",
                    ModificationKind::Configuration,
                    "Columns are dictionary entries of this table",
                );
            }
            Self::Application => {
                for field in ["scope", "version", "vendor"] {
                    facts.attr(field);
                }
                facts.point("version", ModificationKind::Configuration, "Application version");
                facts.note("Artifacts of this application carry its scope");
            }
            Self::Generic => {
                let populated = facts
                    .record
                    .fields()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Null) && v.as_str() != Some(""))
                    .count();
                facts
                    .structure
                    .insert("populated_fields".to_string(), Value::from(populated));
                facts.runs_on("table");
                facts.part("condition", "condition", ModificationKind::Condition);
                facts.script("script", "script");
            }
        }
    }
}

/// Builds [`IndexedArtifact`]s from remote records.
#[derive(Debug, Clone, Default)]
pub struct ArtifactIndexer {
    entity_map: EntityTypeMap,
}

impl ArtifactIndexer {
    pub fn new(entity_map: EntityTypeMap) -> Self {
        Self { entity_map }
    }

    pub fn index_resolved(&self, resolved: &ResolvedRecord) -> IndexedArtifact {
        self.index(&resolved.entity_type, &resolved.collection, &resolved.record)
    }

    /// Decompose a record, stamped with the current time.
    pub fn index(&self, entity_type: &EntityType, collection: &str, record: &Record) -> IndexedArtifact {
        self.index_at(entity_type, collection, record, Utc::now())
    }

    /// Decompose a record. Deterministic apart from `indexed_at`.
    pub fn index_at(
        &self,
        entity_type: &EntityType,
        collection: &str,
        record: &Record,
        indexed_at: DateTime<Utc>,
    ) -> IndexedArtifact {
        let rule = DecompositionRule::for_type(entity_type);
        let label = rule.label(entity_type);
        let name_field = self
            .entity_map
            .get(entity_type)
            .map(|m| m.name_field.as_str())
            .unwrap_or("name");
        let name = record
            .display_name(name_field)
            .or_else(|| record.id())
            .unwrap_or("(unnamed)")
            .to_string();

        let mut facts = Facts::new(record);
        facts.point(
            "record",
            ModificationKind::Configuration,
            format!("Main configuration of the {}", label.to_lowercase()),
        );
        rule.apply(&mut facts);
        if rule != DecompositionRule::Application {
            if let Some(scope) = record.text("sys_scope") {
                facts.relate(RelationKind::BelongsTo, scope, Some("application"));
            }
        }

        let summary = summarize(&label, &name, record, &facts);
        IndexedArtifact {
            id: artifact_id(record, collection, &name),
            name,
            title: record
                .text("title")
                .or_else(|| record.text("label"))
                .map(str::to_string),
            entity_type: entity_type.clone(),
            collection: collection.to_string(),
            last_updated: record.updated_at().map(str::to_string),
            structure: Value::Object(facts.structure),
            context_notes: facts.notes,
            relationships: facts.relationships,
            summary,
            modification_points: facts.points,
            indexed_at,
        }
    }
}

/// What a rule found in a record.
struct Facts<'a> {
    record: &'a Record,
    structure: Map<String, Value>,
    /// Human labels of the parts present, in rule order.
    parts: Vec<String>,
    table: Option<String>,
    notes: Vec<String>,
    relationships: Vec<Relationship>,
    points: Vec<ModificationPoint>,
}

impl<'a> Facts<'a> {
    fn new(record: &'a Record) -> Self {
        Self {
            record,
            structure: Map::new(),
            parts: Vec::new(),
            table: None,
            notes: Vec::new(),
            relationships: Vec::new(),
            points: Vec::new(),
        }
    }

    /// Copy a scalar attribute into the structure summary.
    fn attr(&mut self, field: &str) {
        let value = match self.record.get(field) {
            Some(Value::Bool(b)) => Value::Bool(*b),
            Some(Value::Number(n)) => Value::Number(n.clone()),
            _ => match self.record.text(field) {
                Some(text) => Value::String(text.to_string()),
                None => return,
            },
        };
        self.structure.insert(field.to_string(), value);
    }

    /// Record an editable part if the field has content.
    fn part(&mut self, field: &str, label: &str, kind: ModificationKind) -> bool {
        let present = self.record.has_text(field);
        self.structure
            .insert(format!("has_{}", field), Value::Bool(present));
        if present {
            self.parts.push(label.to_string());
            self.point(field, kind, capitalize(label));
        }
        present
    }

    /// A script part, plus the references found in it.
    fn script(&mut self, field: &str, label: &str) {
        if self.part(field, label, ModificationKind::Script) {
            if let Some(source) = self.record.text(field) {
                for relationship in script_relationships(source) {
                    self.push_relationship(relationship);
                }
            }
        }
    }

    /// The table this artifact runs against.
    fn runs_on(&mut self, field: &str) {
        if let Some(table) = self.record.text(field) {
            let table = table.to_string();
            self.structure
                .insert("table".to_string(), Value::String(table.clone()));
            self.relate(RelationKind::RunsOn, &table, Some("table"));
            self.table = Some(table);
        }
    }

    fn point(&mut self, location: &str, kind: ModificationKind, description: impl Into<String>) {
        self.points.push(ModificationPoint::new(location, kind, description));
    }

    fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    fn relate(&mut self, kind: RelationKind, target: &str, target_type: Option<&str>) {
        self.push_relationship(Relationship::new(kind, target, target_type.map(EntityType::new)));
    }

    fn push_relationship(&mut self, relationship: Relationship) {
        if !self.relationships.contains(&relationship) {
            self.relationships.push(relationship);
        }
    }
}

/// References a script makes to script includes and tables.
pub fn script_relationships(source: &str) -> Vec<Relationship> {
    let mut found: Vec<Relationship> = Vec::new();
    let mut push = |relationship: Relationship| {
        if !found.contains(&relationship) {
            found.push(relationship);
        }
    };

    for capture in INSTANTIATION.captures_iter(source) {
        let class = &capture[1];
        if class.starts_with("Glide") || BUILTIN_CLASSES.contains(&class) {
            continue;
        }
        push(Relationship::new(
            RelationKind::Uses,
            class,
            Some(EntityType::new("script_include")),
        ));
    }
    for capture in AJAX_CALL.captures_iter(source) {
        push(Relationship::new(
            RelationKind::Uses,
            &capture[1],
            Some(EntityType::new("script_include")),
        ));
    }
    for capture in TABLE_ACCESS.captures_iter(source) {
        push(Relationship::new(
            RelationKind::Queries,
            &capture[1],
            Some(EntityType::new("table")),
        ));
    }
    found
}

fn summarize(label: &str, name: &str, record: &Record, facts: &Facts<'_>) -> String {
    let mut summary = format!("{} '{}'", label, name);
    if let Some(table) = &facts.table {
        summary.push_str(&format!(" on table {}", table));
    }
    if !facts.parts.is_empty() {
        summary.push_str(" with ");
        summary.push_str(&join_labels(&facts.parts));
    }
    summary.push('.');

    if let Some(description) = record
        .text("short_description")
        .or_else(|| record.text("description"))
    {
        let excerpt: String = description.chars().take(SUMMARY_EXCERPT_LEN).collect();
        summary.push(' ');
        summary.push_str(&excerpt);
        if description.chars().count() > SUMMARY_EXCERPT_LEN {
            summary.push_str("...");
        }
    }
    summary
}

fn join_labels(labels: &[String]) -> String {
    match labels {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Record id, or a stable file-safe id derived from collection and name.
fn artifact_id(record: &Record, collection: &str, name: &str) -> String {
    if let Some(id) = record.id() {
        return id.to_string();
    }
    let slug: String = format!("{}_{}", collection, name)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    slug.chars().take(128).collect()
}

fn humanize(tag: &str) -> String {
    capitalize(&tag.replace('_', " "))
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
