//! Wiring of the record store, index, journal, audit trail and services.

use anyhow::{Context, Result};
use snowline_audit::AuditLogger;
use snowline_core::SnowlineConfig;
use snowline_index::{ArtifactIndex, DeploymentJournal};
use snowline_mcp::ToolExecutor;
use snowline_resolver::{CascadingResolver, DiscoveryService};
use snowline_runtime::{DeploymentOrchestrator, RollbackService};
use snowline_store::{LimitedStore, MemoryRecordStore, RecordStore};
use std::sync::Arc;

pub struct App {
    pub discovery: Arc<DiscoveryService>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub rollback: Arc<RollbackService>,
    pub audit: Arc<AuditLogger>,
}

impl App {
    pub fn from_config(config: &SnowlineConfig) -> Result<Self> {
        let store = open_store(config)?;
        let resolver = CascadingResolver::new(
            store.clone(),
            config.entity_map(),
            config.resolver.clone(),
        );

        let index = ArtifactIndex::open(&config.index.root)
            .with_context(|| format!("Failed to open index at {:?}", config.index.root))?;
        let journal = Arc::new(
            DeploymentJournal::open(&config.deployment.journal_dir).with_context(|| {
                format!(
                    "Failed to open deployment journal at {:?}",
                    config.deployment.journal_dir
                )
            })?,
        );
        let audit = Arc::new(
            AuditLogger::new(config.audit.clone()).context("Failed to initialize audit logging")?,
        );

        Ok(Self {
            discovery: Arc::new(DiscoveryService::new(resolver.clone(), index)),
            orchestrator: Arc::new(DeploymentOrchestrator::new(
                Arc::new(resolver),
                journal.clone(),
                audit.clone(),
                config.deployment.clone(),
            )),
            rollback: Arc::new(RollbackService::new(store, journal, audit.clone())),
            audit,
        })
    }

    pub fn executor(&self) -> ToolExecutor {
        ToolExecutor::new(
            self.discovery.clone(),
            self.orchestrator.clone(),
            self.rollback.clone(),
            self.audit.clone(),
        )
    }
}

/// The fixture-backed store, bounded to the configured number of in-flight calls.
fn open_store(config: &SnowlineConfig) -> Result<Arc<dyn RecordStore>> {
    let inner = match config.store.fixtures_dir {
        Some(ref dir) => {
            let store = MemoryRecordStore::from_fixture_dir(dir)
                .with_context(|| format!("Failed to load fixtures from {:?}", dir))?;
            tracing::info!(dir = %dir.display(), "Loaded record store fixtures");
            store
        }
        None => {
            tracing::warn!("No store.fixtures_dir configured; starting with an empty record store");
            MemoryRecordStore::new()
        }
    };
    Ok(Arc::new(LimitedStore::new(
        Arc::new(inner),
        config.store.max_concurrent_calls,
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn test_config(dir: &TempDir) -> SnowlineConfig {
        let fixtures = dir.path().join("fixtures");
        fs::create_dir_all(&fixtures).unwrap();
        fs::write(
            fixtures.join("sp_widget.json"),
            r#"[{"sys_id": "0123456789abcdef0123456789abcdef", "name": "Cart Summary", "id": "cart-summary"}]"#,
        )
        .unwrap();

        let mut config = SnowlineConfig::default();
        config.store.fixtures_dir = Some(fixtures);
        config.index.root = dir.path().join("index");
        config.deployment.journal_dir = dir.path().join("journal");
        config.audit.directory = dir.path().join("audit");
        config
    }

    #[tokio::test]
    async fn test_app_resolves_from_fixtures() {
        let dir = TempDir::new().unwrap();
        let app = App::from_config(&test_config(&dir)).unwrap();

        let found = app
            .discovery
            .discover(&snowline_core::OperationContext::new(), "find the \"Cart Summary\" widget")
            .await
            .unwrap();
        assert_eq!(found.artifacts.len(), 1);
        assert!(dir.path().join("index").exists());
    }

    #[test]
    fn test_missing_fixture_dir_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.store.fixtures_dir = Some(dir.path().join("absent"));
        assert!(App::from_config(&config).is_err());
    }
}
