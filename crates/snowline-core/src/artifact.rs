//! Indexed artifacts.

use crate::entity::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of change a modification point admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    Configuration,
    Script,
    Template,
    Style,
    Condition,
}

/// A place in an artifact where an edit can be made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationPoint {
    /// Field or section name.
    pub location: String,
    pub kind: ModificationKind,
    pub description: String,
}

impl ModificationPoint {
    pub fn new(
        location: impl Into<String>,
        kind: ModificationKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            kind,
            description: description.into(),
        }
    }
}

/// How an artifact relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Instantiates or calls the target (e.g. a script include).
    Uses,
    /// Queries records of the target table.
    Queries,
    /// Runs against the target table.
    RunsOn,
    /// Belongs to the target application scope.
    BelongsTo,
    /// Extends the target table.
    Extends,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationKind,
    /// Name of the related artifact.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<EntityType>,
}

impl Relationship {
    pub fn new(kind: RelationKind, target: impl Into<String>, target_type: Option<EntityType>) -> Self {
        Self {
            kind,
            target: target.into(),
            target_type,
        }
    }
}

/// The locally indexed, decomposed view of a remote record.
///
/// Written whenever a record is freshly resolved or re-analyzed; a re-index
/// replaces the previous document for the same id in full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedArtifact {
    /// Remote record id.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub entity_type: EntityType,
    pub collection: String,
    /// Last-modified timestamp reported by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    /// Per-type structure summary (which parts the artifact has).
    #[serde(default)]
    pub structure: serde_json::Value,
    #[serde(default)]
    pub context_notes: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// One-paragraph human-readable description.
    pub summary: String,
    #[serde(default)]
    pub modification_points: Vec<ModificationPoint>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexedArtifact {
    /// Case-insensitive substring match against name, title or summary.
    pub fn matches_term(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.name.to_lowercase().contains(&needle)
            || self
                .title
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains(&needle))
            || self.summary.to_lowercase().contains(&needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> IndexedArtifact {
        IndexedArtifact {
            id: "a1".to_string(),
            name: "cart_summary".to_string(),
            title: Some("Cart Summary".to_string()),
            entity_type: EntityType::new("widget"),
            collection: "sp_widget".to_string(),
            last_updated: None,
            structure: serde_json::Value::Null,
            context_notes: Vec::new(),
            relationships: Vec::new(),
            summary: "Widget showing checkout totals".to_string(),
            modification_points: Vec::new(),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_matches_name_title_or_summary() {
        let a = artifact();
        assert!(a.matches_term("CART"));
        assert!(a.matches_term("cart summary"));
        assert!(a.matches_term("checkout"));
        assert!(!a.matches_term("invoice"));
        assert!(!a.matches_term("  "));
    }
}
