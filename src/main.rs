//! Shared-memory HTTP bridge.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                 SHM BRIDGE                   │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!   ──────────────────┼─▶│   net   │──▶│   http   │──▶│ submitter │──┼──▶ request ring ──┐
//!                     │  │listener │   │  parser  │   └───────────┘  │   + semaphore     │
//!                     │  │  + tls  │   └──────────┘                  │                   ▼
//!                     │  └─────────┘                                 │              ┌────────┐
//!   Client Response   │  ┌──────────┐   ┌────────────┐               │              │ worker │
//!   ◀─────────────────┼──│ response │◀──│ correlator │◀──────────────┼── response ──└────────┘
//!                     │  └──────────┘   └────────────┘               │     ring
//!                     │                                              │
//!                     │  config · observability · lifecycle · admin  │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use shm_bridge::config::load_or_default;
use shm_bridge::lifecycle;
use shm_bridge::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "shm-bridge")]
#[command(about = "HTTP front end for a shared-memory worker", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "bridge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, found) = load_or_default(&cli.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!("shm-bridge v{} starting", env!("CARGO_PKG_VERSION"));
    if found {
        tracing::info!(path = ?cli.config, "Configuration loaded");
    } else {
        tracing::warn!(path = ?cli.config, "Configuration file not found, using defaults");
    }
    tracing::info!(
        bind_address = %config.server.bind_address(),
        tls = config.server.tls,
        channel = %config.channel.name,
        request_signal = %config.channel.request_signal,
        overflow = %config.channel.overflow,
        timeout_seconds = config.server.timeout_seconds,
        "Effective configuration"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = match lifecycle::start(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    runtime.run().await?;
    Ok(())
}
