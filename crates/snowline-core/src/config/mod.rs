//! Configuration types for Snowline.
//!
//! All sections are optional and defaulted, so an empty file is a valid
//! configuration. Files are YAML (`.yaml`/`.yml`) or TOML (`.toml`),
//! chosen by extension.
//!
//! ```yaml
//! index:
//!   root: .snowline/index
//! store:
//!   max_concurrent_calls: 4
//! resolver:
//!   any_type_fanout: [widget, flow, script_include]
//! deployment:
//!   max_retries: 3
//!   backoff_base_ms: 1000
//!   fallback_strategies: [alternate_scope, manual_approval, staged_deployment]
//! ```

pub mod audit;
pub mod deployment;
pub mod mcp;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub use audit::AuditConfig;
pub use deployment::DeploymentConfig;
pub use mcp::{McpConfig, Transport};
pub use resolver::ResolverConfig;

use crate::entity::{EntityType, EntityTypeMap};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SNOWLINE_CONFIG";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "snowline.yaml";

/// Complete Snowline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnowlineConfig {
    /// Persistent artifact index.
    #[serde(default)]
    pub index: IndexConfig,

    /// Record store access.
    #[serde(default)]
    pub store: StoreConfig,

    /// Cascading resolver.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Deployment orchestrator.
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Audit logging.
    #[serde(default)]
    pub audit: AuditConfig,

    /// MCP tool server.
    #[serde(default)]
    pub mcp: McpConfig,
}

/// Persistent index location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding one document per indexed artifact.
    #[serde(default = "default_index_root")]
    pub root: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_index_root(),
        }
    }
}

fn default_index_root() -> PathBuf {
    PathBuf::from(".snowline/index")
}

/// Record store access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on in-flight remote calls.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Directory of `<collection>.json` fixture files for offline use.
    #[serde(default)]
    pub fixtures_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            fixtures_dir: None,
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    4
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl SnowlineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let config = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&raw)?,
            "toml" => Self::from_toml_str(&raw)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from `$SNOWLINE_CONFIG`, else from
    /// `snowline.yaml` when it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::load(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            return Self::load(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        // An empty YAML document deserializes as null.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// The entity type map with configured collection overrides applied.
    pub fn entity_map(&self) -> EntityTypeMap {
        EntityTypeMap::with_overrides(&self.resolver.collections)
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid(
                "store.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if self.deployment.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "deployment.max_retries must be at least 1".to_string(),
            ));
        }
        if self.resolver.per_type_limit == 0 || self.resolver.result_limit == 0 {
            return Err(ConfigError::Invalid(
                "resolver limits must be at least 1".to_string(),
            ));
        }

        let map = self.entity_map();
        for tag in &self.resolver.any_type_fanout {
            let entity_type = EntityType::new(tag);
            if entity_type.is_any() || !map.contains(&entity_type) {
                return Err(ConfigError::Invalid(format!(
                    "resolver.any_type_fanout names unknown entity type '{}'",
                    tag
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::FallbackStrategy;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = SnowlineConfig::from_yaml_str("").unwrap();
        assert_eq!(config.deployment.max_retries, 3);
        assert_eq!(config.store.max_concurrent_calls, 4);
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_sections() {
        let config = SnowlineConfig::from_yaml_str(
            r#"
index:
  root: /tmp/idx
deployment:
  max_retries: 5
  backoff_base_ms: 10
  fallback_strategies: [staged_deployment]
resolver:
  any_type_fanout: [widget, flow]
  collections:
    x_card:
      collection: x_cards
      name_field: title
mcp:
  transport: http
  port: 8811
"#,
        )
        .unwrap();

        assert_eq!(config.index.root, PathBuf::from("/tmp/idx"));
        assert_eq!(config.deployment.max_retries, 5);
        assert_eq!(
            config.deployment.fallback_strategies,
            vec![FallbackStrategy::StagedDeployment]
        );
        assert!(config.mcp.is_http());
        assert_eq!(
            config.entity_map().collection(&EntityType::new("x_card")),
            Some("x_cards")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_file_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snowline.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[store]\nmax_concurrent_calls = 2\n").unwrap();

        let config = SnowlineConfig::load(&path).unwrap();
        assert_eq!(config.store.max_concurrent_calls, 2);
    }

    #[test]
    fn test_validate_rejects_unknown_fanout_type() {
        let config = SnowlineConfig::from_yaml_str("resolver:\n  any_type_fanout: [hologram]\n")
            .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = SnowlineConfig::default();
        config.store.max_concurrent_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snowline.ini");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            SnowlineConfig::load(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
