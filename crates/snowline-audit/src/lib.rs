//! # snowline-audit
//!
//! Audit trail for Snowline.
//!
//! Every deployment, per-artifact outcome, transactional rollback, checkpoint
//! and explicit rollback request is recorded as an [`AuditEvent`].
//!
//! - **File output**: JSON Lines (`<directory>/audit.log`, one event per line)
//! - **Console output**: human-readable lines on stderr
//!
//! ## Event Types
//!
//! | Event Type | Description |
//! |------------|-------------|
//! | `ToolCalled` | A tool was invoked |
//! | `DeploymentStarted` | A batch began executing |
//! | `ArtifactDeployed` | An artifact reached a deployed state |
//! | `ArtifactFailed` | An artifact reached the failed state |
//! | `TransactionRolledBack` | A transactional batch undid its creations |
//! | `DeploymentFinished` | A batch finished |
//! | `CheckpointCreated` | A checkpoint was captured |
//! | `RollbackRequested` | An update-set rollback was requested |
//! | `RollbackCompleted` | An update-set rollback finished |
//! | `RecordRestored` | Rollback wrote back prior field values |

pub mod error;
pub mod event;
pub mod logger;
pub mod storage;

pub use error::AuditError;
pub use event::{AuditEvent, AuditEventBuilder, AuditEventType, compute_json_diff};
pub use logger::{AuditFilter, AuditLogger};
pub use storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};
