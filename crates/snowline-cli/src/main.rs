use anyhow::Context;
use clap::{Parser, Subcommand};
use snowline_core::SnowlineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use commands::{deploy, resolve, serve};

#[derive(Parser, Debug)]
#[command(
    name = "snowline",
    version,
    about = "Resolve platform artifacts and deploy them with retries, fallbacks and rollback"
)]
struct Cli {
    /// Configuration file (YAML or TOML). Defaults to $SNOWLINE_CONFIG, then ./snowline.yaml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tool server over stdio or HTTP.
    Serve(serve::ServeArgs),

    /// Classify a free-text request without contacting the record store.
    Classify {
        /// The request, e.g. "find the OrderHelper script include".
        query: String,
    },

    /// Find artifacts, answering from the local index when possible.
    Resolve(resolve::ResolveArgs),

    /// Fetch one record by id and (re-)index it.
    Index {
        /// Entity type tag, e.g. widget or script_include.
        entity_type: String,
        record_id: String,
    },

    /// Search the local index only.
    Search {
        term: String,
        /// Restrict hits to one entity type.
        #[arg(long = "type")]
        entity_type: Option<String>,
    },

    /// Deploy a batch described in a JSON or YAML file.
    Deploy(deploy::DeployArgs),

    /// Undo everything deployed under an update set.
    Rollback {
        update_set_id: String,
        /// Why the rollback is requested. Recorded in the audit trail.
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries results and the stdio tool protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SnowlineConfig::discover(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.cmd {
        Command::Serve(args) => serve::run(config, args).await,
        Command::Classify { query } => resolve::classify(&query),
        Command::Resolve(args) => resolve::resolve(&config, args).await,
        Command::Index {
            entity_type,
            record_id,
        } => resolve::index(&config, &entity_type, &record_id).await,
        Command::Search { term, entity_type } => {
            resolve::search(&config, &term, entity_type.as_deref())
        }
        Command::Deploy(args) => deploy::deploy(&config, args).await,
        Command::Rollback {
            update_set_id,
            reason,
        } => deploy::rollback(&config, &update_set_id, &reason).await,
    }
}
