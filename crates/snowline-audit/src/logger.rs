//! Audit logger implementation.
//!
//! Provides the main `AuditLogger` type with helper methods for the events
//! the tool surface emits. Deployment and rollback events are built by their
//! services and passed to [`AuditLogger::record`].

use chrono::{DateTime, Utc};
use snowline_core::{AuditConfig, OperationContext};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AuditError;
use crate::event::{AuditEvent, AuditEventBuilder, AuditEventType};
use crate::storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};

/// The main audit logger.
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a new audit logger with the given configuration.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage)
        } else {
            let file: Arc<dyn AuditStorage> = Arc::new(FileStorage::open(&config.directory)?);
            if config.stdout {
                Arc::new(DualStorage::new(file, Arc::new(ConsoleStorage)))
            } else {
                file
            }
        };

        Ok(Self { config, storage })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self { config, storage }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            storage: Arc::new(NullStorage),
        }
    }

    /// Create a console-only logger (useful for development).
    pub fn console_only() -> Self {
        Self {
            config: AuditConfig {
                enabled: true,
                stdout: true,
                ..Default::default()
            },
            storage: Arc::new(ConsoleStorage),
        }
    }

    /// Check if logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Start an event pre-filled with the request's correlation fields.
    pub fn event(
        ctx: &OperationContext,
        event_type: AuditEventType,
        action: &str,
    ) -> AuditEventBuilder {
        let mut builder = AuditEvent::builder(event_type, action)
            .request_id(&ctx.request_id)
            .principal(ctx.principal.as_deref());
        if let Some(ref update_set) = ctx.update_set_id {
            builder = builder.update_set(update_set);
        }
        builder
    }

    /// Log an audit event.
    pub async fn log(&self, event: AuditEvent) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            action = %event.action,
            update_set = event.update_set_id.as_deref().unwrap_or("-"),
            "Audit event"
        );

        self.storage.store(event).await
    }

    /// Log an event, downgrading a storage failure to a warning.
    ///
    /// Deployment and rollback outcomes never depend on the audit trail.
    pub async fn record(&self, event: AuditEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.log(event).await {
            tracing::warn!(event_type = %event_type, error = %e, "Failed to write audit event");
        }
    }

    /// Log a tool call event.
    pub async fn log_tool_call(
        &self,
        ctx: &OperationContext,
        tool: &str,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<(), AuditError> {
        let mut builder =
            Self::event(ctx, AuditEventType::ToolCalled, tool).duration_ms(duration_ms);
        if let Some(error) = error {
            builder = builder.error(error);
        }
        self.log(builder.build()).await
    }

    /// Query audit events.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        self.storage.query(filter).await
    }

    /// Get an audit event by ID.
    pub async fn get(&self, event_id: Uuid) -> Result<Option<AuditEvent>, AuditError> {
        self.storage.get(event_id).await
    }
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub update_set_id: Option<String>,
    pub batch_id: Option<String>,
    pub request_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditFilter {
    pub fn for_update_set(update_set_id: impl Into<String>) -> Self {
        Self {
            update_set_id: Some(update_set_id.into()),
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Whether a single event passes every set criterion.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
            wanted.is_none() || wanted == actual
        }

        self.event_type.is_none_or(|t| t == event.event_type)
            && field_matches(&self.update_set_id, &event.update_set_id)
            && field_matches(&self.batch_id, &event.batch_id)
            && field_matches(&self.request_id, &event.request_id)
            && self.start_time.is_none_or(|start| event.occurred_at >= start)
            && self.end_time.is_none_or(|end| event.occurred_at <= end)
    }

    /// Filter, then apply offset and limit.
    pub fn apply<'a>(&self, events: impl Iterator<Item = &'a AuditEvent>) -> Vec<AuditEvent> {
        events
            .filter(|e| self.matches(e))
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}
