//! `snowline deploy | rollback`.

use super::print_json;
use crate::app::App;
use anyhow::{Context, Result, bail};
use clap::Args;
use snowline_core::{BatchStatus, DeploymentBatch, OperationContext, RollbackStatus, SnowlineConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for `snowline deploy`.
#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Batch file (.json, .yaml or .yml).
    pub file: PathBuf,

    /// Application scope applied to created records.
    #[arg(long)]
    pub scope: Option<String>,

    /// Update set the batch belongs to. Overrides the file.
    #[arg(long)]
    pub update_set: Option<String>,

    /// All-or-nothing: roll back every created record if any artifact fails.
    #[arg(long)]
    pub transaction: bool,

    /// Deploy artifacts concurrently (ignored with --transaction).
    #[arg(long)]
    pub parallel: bool,

    /// Capture a checkpoint before writing anything.
    #[arg(long)]
    pub checkpoint: bool,

    /// Look up each new artifact's name remotely before deploying.
    #[arg(long)]
    pub check_conflicts: bool,

    /// Principal recorded in the audit trail.
    #[arg(long, env = "SNOWLINE_PRINCIPAL")]
    pub principal: Option<String>,
}

/// Read a batch file, choosing the format by extension.
pub fn load_batch(path: &Path) -> Result<DeploymentBatch> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch file {:?}", path))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    let batch = match extension.as_str() {
        "json" => serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON batch file {:?}", path))?,
        "yaml" | "yml" => serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid YAML batch file {:?}", path))?,
        other => bail!("Unsupported batch file extension '{}' (expected json, yaml or yml)", other),
    };
    Ok(batch)
}

fn apply_flags(mut batch: DeploymentBatch, args: &DeployArgs) -> DeploymentBatch {
    if let Some(ref update_set) = args.update_set {
        batch.update_set_id = Some(update_set.clone());
    }
    batch.transaction_mode |= args.transaction;
    batch.parallel |= args.parallel;
    batch.checkpoint |= args.checkpoint;
    batch.check_remote_conflicts |= args.check_conflicts;
    batch
}

pub async fn deploy(config: &SnowlineConfig, args: DeployArgs) -> Result<()> {
    let batch = apply_flags(load_batch(&args.file)?, &args);

    let mut ctx = OperationContext::new();
    if let Some(ref scope) = args.scope {
        ctx = ctx.with_scope(scope);
    }
    if let Some(ref principal) = args.principal {
        ctx = ctx.with_principal(principal);
    }

    let app = App::from_config(config)?;
    let result = app.orchestrator.deploy(&ctx, batch).await?;
    print_json(&result)?;

    tracing::info!(summary = %result.summary, "Deployment finished");
    if result.status != BatchStatus::Completed {
        bail!("{}", result.summary);
    }
    Ok(())
}

pub async fn rollback(config: &SnowlineConfig, update_set_id: &str, reason: &str) -> Result<()> {
    let app = App::from_config(config)?;
    let report = app
        .rollback
        .rollback(&OperationContext::new(), update_set_id, reason)
        .await?;
    print_json(&report)?;

    if report.status == RollbackStatus::Partial {
        let failed = report.actions.iter().filter(|a| !a.succeeded).count();
        bail!("{} rollback step(s) failed; run the rollback again to retry them", failed);
    }
    Ok(())
}
