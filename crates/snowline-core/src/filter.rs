//! Collection-agnostic query filters.
//!
//! The resolver builds a [`QueryFilter`]; the record store decides how to
//! interpret it. Stores speaking the encoded-query dialect use
//! [`QueryFilter::encode`] (`nameLIKEfoo^ORname=bar^ORDERBYname`); in-process
//! stores evaluate it directly with [`QueryFilter::matches`].

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field condition. Comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { field: String, value: String },
    Contains { field: String, value: String },
    StartsWith { field: String, value: String },
    EndsWith { field: String, value: String },
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StartsWith {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::EndsWith {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Field the condition applies to.
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. }
            | Self::Contains { field, .. }
            | Self::StartsWith { field, .. }
            | Self::EndsWith { field, .. } => field,
        }
    }

    /// Value compared against.
    pub fn value(&self) -> &str {
        match self {
            Self::Equals { value, .. }
            | Self::Contains { value, .. }
            | Self::StartsWith { value, .. }
            | Self::EndsWith { value, .. } => value,
        }
    }

    /// Evaluate against a record. Missing fields never match.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get_str(self.field()) else {
            return false;
        };
        let actual = actual.to_lowercase();
        let expected = self.value().to_lowercase();
        match self {
            Self::Equals { .. } => actual == expected,
            Self::Contains { .. } => actual.contains(&expected),
            Self::StartsWith { .. } => actual.starts_with(&expected),
            Self::EndsWith { .. } => actual.ends_with(&expected),
        }
    }

    fn encode(&self) -> String {
        let op = match self {
            Self::Equals { .. } => "=",
            Self::Contains { .. } => "LIKE",
            Self::StartsWith { .. } => "STARTSWITH",
            Self::EndsWith { .. } => "ENDSWITH",
        };
        format!("{}{}{}", self.field(), op, escape(self.value()))
    }
}

/// A disjunction of conditions with an optional sort field.
///
/// An empty condition list matches every record (used for enumeration).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default)]
    any_of: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    order_by: Option<String>,
}

impl QueryFilter {
    /// Filter matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter with a single condition.
    pub fn condition(condition: Condition) -> Self {
        Self {
            any_of: vec![condition],
            order_by: None,
        }
    }

    /// Filter matching any of the given conditions.
    pub fn any_of(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut filter = Self::default();
        for condition in conditions {
            filter = filter.or(condition);
        }
        filter
    }

    /// Add an alternative condition. Duplicates are ignored.
    pub fn or(mut self, condition: Condition) -> Self {
        if !self.any_of.contains(&condition) {
            self.any_of.push(condition);
        }
        self
    }

    /// Sort results ascending by a field.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// The alternatives.
    pub fn conditions(&self) -> &[Condition] {
        &self.any_of
    }

    /// Sort field, if any.
    pub fn sort_field(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    /// Whether the filter places no restriction on records.
    pub fn is_unconditional(&self) -> bool {
        self.any_of.is_empty()
    }

    /// Evaluate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        self.any_of.is_empty() || self.any_of.iter().any(|c| c.matches(record))
    }

    /// Render in the encoded-query dialect.
    pub fn encode(&self) -> String {
        let mut encoded = self
            .any_of
            .iter()
            .map(Condition::encode)
            .collect::<Vec<_>>()
            .join("^OR");
        if let Some(field) = &self.order_by {
            if !encoded.is_empty() {
                encoded.push('^');
            }
            encoded.push_str("ORDERBY");
            encoded.push_str(field);
        }
        encoded
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// `^` separates clauses in the encoded dialect and is doubled inside values.
fn escape(value: &str) -> String {
    value.replace('^', "^^")
}
