//! `snowline classify | resolve | index | search`.

use super::print_json;
use crate::app::App;
use anyhow::{Result, bail};
use clap::Args;
use snowline_core::{EntityType, Intent, OperationContext, SnowlineConfig};
use snowline_index::ArtifactIndex;
use snowline_resolver::{LookupMode, classify as classify_query};

/// Arguments for `snowline resolve`.
#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Free-text request. Omit when using --type.
    pub query: Option<String>,

    /// Entity type to resolve instead of classifying the query.
    #[arg(long = "type")]
    pub entity_type: Option<String>,

    /// Name or record id to look for (with --type).
    #[arg(long)]
    pub identifier: Option<String>,

    /// Enumerate every record of the type.
    #[arg(long)]
    pub list_all: bool,

    /// Skip the index and always query the record store.
    #[arg(long)]
    pub refresh: bool,
}

/// Build the intent a `resolve` invocation asks for.
fn intent_for(args: &ResolveArgs) -> Result<Intent> {
    let intent = match (&args.entity_type, &args.query) {
        (Some(entity_type), _) => {
            let entity_type = EntityType::new(entity_type);
            match args.identifier.as_deref().map(str::trim).filter(|i| !i.is_empty()) {
                Some(identifier) => Intent::new(entity_type, identifier),
                None if args.list_all => Intent::list(entity_type),
                None => bail!("--identifier is required with --type unless --list-all is set"),
            }
        }
        (None, Some(query)) => {
            let mut intent = classify_query(query);
            intent.list_all |= args.list_all;
            intent
        }
        (None, None) => bail!("either a query or --type is required"),
    };
    Ok(intent)
}

pub fn classify(query: &str) -> Result<()> {
    print_json(&classify_query(query))
}

pub async fn resolve(config: &SnowlineConfig, args: ResolveArgs) -> Result<()> {
    let intent = intent_for(&args)?;
    let mode = if args.refresh {
        LookupMode::Refresh
    } else {
        LookupMode::CacheFirst
    };

    let app = App::from_config(config)?;
    let discovery = app
        .discovery
        .resolve(&OperationContext::new(), intent, mode)
        .await?;
    if discovery.is_empty() {
        tracing::info!("No matching artifacts");
    }
    print_json(&discovery)
}

pub async fn index(config: &SnowlineConfig, entity_type: &str, record_id: &str) -> Result<()> {
    let app = App::from_config(config)?;
    let artifact = app
        .discovery
        .analyze(&OperationContext::new(), &EntityType::new(entity_type), record_id)
        .await?;
    print_json(&artifact)
}

/// Index-only search; no record store is opened.
pub fn search(config: &SnowlineConfig, term: &str, entity_type: Option<&str>) -> Result<()> {
    let index = ArtifactIndex::open(&config.index.root)?;
    let entity_type = entity_type.map(EntityType::new);
    let hits = index.search(term, entity_type.as_ref())?;
    print_json(&hits)
}
