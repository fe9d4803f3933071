//! Interview tracker API server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracker_server::{InMemoryUserStore, ServerConfig, build_app, serve};

#[derive(Debug, Parser)]
#[command(name = "tracker-server", version, about = "Interview tracker API server")]
struct Cli {
    /// Configuration file (.toml, .yaml or .json)
    #[arg(short, long, env = "TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Override `server.port`
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config
        .logging
        .init()
        .context("failed to initialize logging")?;

    #[cfg(feature = "metrics")]
    tracker_admission::init_admission_metrics();

    let app = build_app(&config, Arc::new(InMemoryUserStore::new()))?;
    serve(&config, app.router).await
}
