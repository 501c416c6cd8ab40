//! Audit event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // ===== Tool surface =====
    /// A tool was called.
    ToolCalled,

    // ===== Deployment =====
    /// A batch began executing.
    DeploymentStarted,
    /// An artifact reached `deployed` or `deployed_with_fallback`.
    ArtifactDeployed,
    /// An artifact reached `failed`.
    ArtifactFailed,
    /// A transactional batch deleted the records it had created.
    TransactionRolledBack,
    /// A batch finished.
    DeploymentFinished,
    /// A checkpoint was captured before a batch.
    CheckpointCreated,

    // ===== Rollback =====
    /// An update-set rollback was requested.
    RollbackRequested,
    /// Prior field values were written back.
    RecordRestored,
    /// An update-set rollback finished.
    RollbackCompleted,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCalled => write!(f, "TOOL_CALLED"),
            Self::DeploymentStarted => write!(f, "DEPLOYMENT_STARTED"),
            Self::ArtifactDeployed => write!(f, "ARTIFACT_DEPLOYED"),
            Self::ArtifactFailed => write!(f, "ARTIFACT_FAILED"),
            Self::TransactionRolledBack => write!(f, "TRANSACTION_ROLLED_BACK"),
            Self::DeploymentFinished => write!(f, "DEPLOYMENT_FINISHED"),
            Self::CheckpointCreated => write!(f, "CHECKPOINT_CREATED"),
            Self::RollbackRequested => write!(f, "ROLLBACK_REQUESTED"),
            Self::RecordRestored => write!(f, "RECORD_RESTORED"),
            Self::RollbackCompleted => write!(f, "ROLLBACK_COMPLETED"),
        }
    }
}

/// An audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// Event type.
    pub event_type: AuditEventType,

    /// Operation or tool name (e.g. "deploy_batch", "rollback").
    pub action: String,

    // ===== Correlation =====
    /// Request the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Who issued the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_set_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,

    // ===== Artifact =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// Primary attempts made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Fallback strategy that succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    // ===== Outcome =====
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message (if event_type indicates failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Fields that changed, as `{field: {old, new}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

impl AuditEvent {
    /// Create a new audit event with the given type and action.
    pub fn new(event_type: AuditEventType, action: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            action: action.into(),
            request_id: None,
            principal: None,
            update_set_id: None,
            batch_id: None,
            entity_type: None,
            collection: None,
            record_id: None,
            attempts: None,
            fallback: None,
            duration_ms: None,
            error: None,
            diff: None,
            meta: Value::Null,
        }
    }

    /// Create a builder for an audit event.
    pub fn builder(event_type: AuditEventType, action: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type, action)
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] EVENT_TYPE action=... [update_set=...] [batch=...] ...`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} action={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_type,
            self.action,
        );

        let optional = [
            ("request", &self.request_id),
            ("principal", &self.principal),
            ("update_set", &self.update_set_id),
            ("batch", &self.batch_id),
            ("type", &self.entity_type),
            ("collection", &self.collection),
            ("record", &self.record_id),
            ("fallback", &self.fallback),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                line.push_str(&format!(" {}={}", key, value));
            }
        }

        if let Some(attempts) = self.attempts {
            line.push_str(&format!(" attempts={}", attempts));
        }

        if let Some(duration) = self.duration_ms {
            line.push_str(&format!(" duration_ms={}", duration));
        }

        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        if let Some(obj) = self.diff.as_ref().and_then(Value::as_object) {
            let changed: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
            if !changed.is_empty() {
                line.push_str(&format!(" changed_fields=[{}]", changed.join(",")));
            }
        }

        line
    }
}

/// Builder for creating audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(event_type: AuditEventType, action: impl Into<String>) -> Self {
        Self {
            event: AuditEvent::new(event_type, action),
        }
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.event.request_id = Some(id.into());
        self
    }

    pub fn principal(mut self, principal: Option<&str>) -> Self {
        self.event.principal = principal.map(str::to_string);
        self
    }

    pub fn update_set(mut self, id: impl Into<String>) -> Self {
        self.event.update_set_id = Some(id.into());
        self
    }

    pub fn batch(mut self, id: impl Into<String>) -> Self {
        self.event.batch_id = Some(id.into());
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.event.entity_type = Some(entity_type.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.event.collection = Some(collection.into());
        self
    }

    pub fn record_id(mut self, id: impl Into<String>) -> Self {
        self.event.record_id = Some(id.into());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.event.attempts = Some(attempts);
        self
    }

    pub fn fallback(mut self, strategy: impl Into<String>) -> Self {
        self.event.fallback = Some(strategy.into());
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.event.duration_ms = Some(duration);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.event.error = Some(error.into());
        self
    }

    /// Set the diff between two states; nothing is set when they are equal.
    pub fn diff(mut self, before: &Value, after: &Value) -> Self {
        let diff = compute_json_diff(before, after);
        if !diff.is_null() {
            self.event.diff = Some(diff);
        }
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.event.meta = meta;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

/// Compute a diff between two JSON values.
/// Returns an object with changed fields showing { "old": ..., "new": ... }
pub fn compute_json_diff(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(before_obj), Value::Object(after_obj)) => {
            let mut diff = Map::new();

            for (key, before_val) in before_obj {
                let after_val = after_obj.get(key).unwrap_or(&Value::Null);
                if before_val != after_val {
                    diff.insert(key.clone(), json!({"old": before_val, "new": after_val}));
                }
            }
            for (key, after_val) in after_obj {
                if !before_obj.contains_key(key) {
                    diff.insert(key.clone(), json!({"old": null, "new": after_val}));
                }
            }

            if diff.is_empty() {
                Value::Null
            } else {
                Value::Object(diff)
            }
        }
        _ if before != after => json!({"old": before, "new": after}),
        _ => Value::Null,
    }
}
