//! Classified requests.

use crate::entity::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the caller wants to do with the target artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentAction {
    #[default]
    Find,
    Edit,
    Create,
    Clone,
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Find => write!(f, "find"),
            Self::Edit => write!(f, "edit"),
            Self::Create => write!(f, "create"),
            Self::Clone => write!(f, "clone"),
        }
    }
}

/// A free-text request reduced to an entity type and an identifier.
///
/// Produced once per request and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    /// Entity type tag, or `any`.
    pub entity_type: EntityType,

    /// Cleaned name, or an exact id token.
    pub identifier: String,

    #[serde(default)]
    pub action: IntentAction,

    /// Classifier confidence in `[0, 1]`.
    #[serde(default = "default_confidence")]
    pub confidence: f32,

    /// Whether the request asks for an enumeration ("list all widgets").
    #[serde(default)]
    pub list_all: bool,
}

impl Intent {
    /// A `find` intent with full confidence.
    pub fn new(entity_type: EntityType, identifier: impl Into<String>) -> Self {
        Self {
            entity_type,
            identifier: identifier.into(),
            action: IntentAction::Find,
            confidence: 1.0,
            list_all: false,
        }
    }

    /// An enumeration intent for a type.
    pub fn list(entity_type: EntityType) -> Self {
        Self {
            list_all: true,
            ..Self::new(entity_type, "")
        }
    }

    pub fn with_action(mut self, action: IntentAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Whether resolution should enumerate instead of search.
    pub fn wants_listing(&self) -> bool {
        self.list_all || self.identifier.trim().is_empty()
    }

    /// Whitespace-separated terms of the identifier.
    pub fn search_terms(&self) -> Vec<&str> {
        self.identifier.split_whitespace().collect()
    }

    /// The first search term, if any.
    pub fn first_term(&self) -> Option<&str> {
        self.identifier.split_whitespace().next()
    }
}

fn default_confidence() -> f32 {
    1.0
}
