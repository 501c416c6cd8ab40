//! Remote records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the record's unique id.
pub const ID_FIELD: &str = "sys_id";

/// Field holding the record's last-modified timestamp.
pub const UPDATED_FIELD: &str = "sys_updated_on";

/// Fields tried, in order, when a record has no value in its type's name field.
const DISPLAY_FALLBACK_FIELDS: &[&str] = &["name", "title", "short_description", "number"];

/// An opaque key/value document owned by the remote record store.
///
/// The core never mutates a record it fetched; changes are submitted to the
/// store as separate patch documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Wrap a field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value. Returns `None` for non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Add a field, consuming and returning the record.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Raw field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field value as a string.
    ///
    /// Reference fields arrive as `{"value": .., "display_value": ..}` objects;
    /// the display value is preferred for those.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj
                .get("display_value")
                .or_else(|| obj.get("value"))
                .and_then(Value::as_str),
            _ => None,
        }
    }

    /// Non-empty string value of a field.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get_str(field).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Whether the field is present with a non-empty value.
    pub fn has_text(&self, field: &str) -> bool {
        self.text(field).is_some()
    }

    /// The record's id.
    pub fn id(&self) -> Option<&str> {
        self.text(ID_FIELD)
    }

    /// Display name: the type's name field, then the common fallbacks.
    pub fn display_name(&self, name_field: &str) -> Option<&str> {
        self.text(name_field)
            .or_else(|| DISPLAY_FALLBACK_FIELDS.iter().find_map(|f| self.text(f)))
    }

    /// Last-modified timestamp as reported by the store.
    pub fn updated_at(&self) -> Option<&str> {
        self.text(UPDATED_FIELD)
    }

    /// Borrow all fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Take the field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reference_fields_prefer_display_value() {
        let record = Record::from_value(json!({
            "sys_id": "abc",
            "collection": {"value": "8d5f", "display_value": "incident"}
        }))
        .unwrap();

        assert_eq!(record.get_str("collection"), Some("incident"));
        assert_eq!(record.id(), Some("abc"));
    }

    #[test]
    fn test_display_name_falls_back() {
        let record = Record::default().with_field("title", "Order Portal");
        assert_eq!(record.display_name("name"), Some("Order Portal"));

        let record = Record::default()
            .with_field("name", "   ")
            .with_field("short_description", "Fallback");
        assert_eq!(record.display_name("name"), Some("Fallback"));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Record::from_value(json!([1, 2])).is_none());
    }
}
