//! Canvas relay daemon
//!
//! Accepts TCP clients of the shared drawing canvas, replays the canvas
//! history to each newcomer and relays every valid command to all clients.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (12345, or $PORT)
//! relayd
//!
//! # Explicit address and config file
//! relayd --host 127.0.0.1 --port 9000 --config relay.toml
//!
//! # More logging
//! RUST_LOG=relayd=debug relayd
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::{parse_port, RelayConfig};
use relayd::registry::spawn_registry;
use relayd::server::RelayServer;

/// Canvas relay - shared drawing board server
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// TOML configuration file (overrides $RELAY_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Interface to bind (overrides config and $RELAY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and $PORT)
    #[arg(short, long, value_parser = parse_port_arg)]
    port: Option<u16>,
}

fn parse_port_arg(value: &str) -> Result<u16, String> {
    parse_port(value).map_err(|e| e.to_string())
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Canvas relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry();

    let server = RelayServer::bind(&config, registry, cancel_token)
        .await
        .context("Failed to start server")?;

    server.run().await;

    info!("Canvas relay stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
