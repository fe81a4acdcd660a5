//! ignite-client – on-device telemetry agent binary.
//!
//! Loads a device profile and a JSON configuration tree, opens the local
//! store, and runs the coordinator until interrupted.

mod bootstrap;
mod device;
mod http_clients;
mod mqtt_client;

use anyhow::Result;
use clap::Parser;
use ignite_coordinator::Coordinator;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ignite-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "Captures, persists, and forwards application telemetry events.",
)]
struct Cli {
    /// Path to the JSON configuration tree.
    #[arg(long, default_value = "config/ignite.json")]
    config: String,

    /// Path to this device's identity/endpoint profile.
    #[arg(long, default_value = "config/device.json")]
    device: String,

    /// Path to the SQLite database file.
    #[arg(long, default_value = "ignite.db")]
    db: String,

    /// Run attached to the terminal instead of detaching.
    #[arg(long)]
    foreground: bool,

    /// Log level filter, e.g. "info", "debug", "ignite_coordinator=debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .try_init()
        .ok();

    if cli.foreground {
        info!("starting in foreground");
    }

    let deps = bootstrap::bootstrap(&cli.config, &cli.device, &cli.db).await?;
    let coordinator = Coordinator::start(deps).await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let outcome = coordinator.shutdown().await;
    if !outcome.clean {
        warn!("coordinator shutdown did not complete within the grace period");
    }

    Ok(())
}
