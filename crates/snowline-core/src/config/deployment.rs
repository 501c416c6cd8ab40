//! Deployment orchestrator configuration.

use crate::deployment::FallbackStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Attempts per artifact before fallbacks are tried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff base: attempt `n` failing waits `n * base` before the next.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Fallback order used when a batch does not specify one.
    #[serde(default = "default_fallback_strategies")]
    pub fallback_strategies: Vec<FallbackStrategy>,

    /// Overall timeout for one batch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Directory holding checkpoints, batch results and rollback reports.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            fallback_strategies: default_fallback_strategies(),
            timeout_ms: default_timeout_ms(),
            journal_dir: default_journal_dir(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_fallback_strategies() -> Vec<FallbackStrategy> {
    FallbackStrategy::ALL.to_vec()
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from(".snowline/journal")
}
