//! `snowline serve`: run the tool server.

use crate::app::App;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use snowline_core::{SnowlineConfig, Transport};
use snowline_mcp::McpServer;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    Stdio,
    Http,
}

/// Arguments for `snowline serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Transport type. Overrides the config file.
    #[arg(long, value_enum)]
    pub transport: Option<TransportArg>,

    /// HTTP host. Overrides the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port. Overrides the config file.
    #[arg(long)]
    pub port: Option<u16>,

    /// Principal attributed to stdio requests.
    #[arg(long, env = "SNOWLINE_PRINCIPAL")]
    pub principal: Option<String>,
}

/// Apply command-line overrides to the configured transport settings.
fn apply_overrides(config: &mut SnowlineConfig, args: &ServeArgs) {
    if let Some(transport) = args.transport {
        config.mcp.transport = match transport {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::Http => Transport::Http,
        };
    }
    if let Some(ref host) = args.host {
        config.mcp.host = host.clone();
    }
    if let Some(port) = args.port {
        config.mcp.port = port;
    }
}

pub async fn run(mut config: SnowlineConfig, args: ServeArgs) -> Result<()> {
    apply_overrides(&mut config, &args);
    let app = App::from_config(&config)?;

    let mut server = McpServer::new(config.mcp.clone(), Arc::new(app.executor()));
    if let Some(principal) = args.principal {
        server = server.with_principal(principal);
    }

    tracing::info!(
        transport = ?config.mcp.transport,
        tools = server.tools().len(),
        "Starting Snowline tool server"
    );

    tokio::select! {
        result = server.run() => result.context("Tool server failed"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config() {
        let mut config = SnowlineConfig::default();
        apply_overrides(
            &mut config,
            &ServeArgs {
                transport: Some(TransportArg::Http),
                host: Some("0.0.0.0".to_string()),
                port: Some(8811),
                principal: None,
            },
        );
        assert!(config.mcp.is_http());
        assert_eq!(config.mcp.bind_addr(), "0.0.0.0:8811");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = SnowlineConfig::default();
        apply_overrides(
            &mut config,
            &ServeArgs {
                transport: None,
                host: None,
                port: None,
                principal: None,
            },
        );
        assert_eq!(config.mcp.transport, Transport::Stdio);
        assert_eq!(config.mcp.port, 3000);
    }
}
