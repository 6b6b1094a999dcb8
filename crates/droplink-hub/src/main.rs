//! droplink signaling hub daemon
//!
//! Usage:
//!   droplink [--config path/to/config.toml] [--addr 0.0.0.0:9000]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use droplink_hub::{HubConfig, SignalServer};
use tracing::info;

#[derive(Parser)]
#[command(name = "droplink")]
#[command(about = "WebRTC signaling hub for peer discovery and file drops", long_about = None)]
struct Cli {
    /// Path to a TOML config file (default: ~/.droplink/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:9000
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = HubConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.addr {
        config.server.bind_address = addr;
    }

    println!("Starting droplink hub on {}", config.server.bind_address);
    println!("Signaling endpoint: ws://{}/ws", config.server.bind_address);
    if config.turn.port > 0 {
        println!(
            "TURN relay advertised on port {} (realm {}, relay ports {}-{})",
            config.turn.port, config.turn.realm, config.turn.relay_port_min, config.turn.relay_port_max
        );
        if config.turn.secret.is_empty() {
            println!("TURN secret not set: HELLO will advertise STUN only");
        }
    } else {
        println!("TURN disabled, advertising public STUN only");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;

    let server = SignalServer::new(config);
    server.serve(listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
