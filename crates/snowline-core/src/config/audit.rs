//! Audit logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Also print human-readable events to stderr.
    #[serde(default)]
    pub stdout: bool,

    /// Directory holding `audit.log` (JSON Lines).
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            stdout: false,
            directory: default_directory(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from(".snowline/audit")
}
