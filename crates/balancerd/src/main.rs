//! vlb daemon
//!
//! Loads configuration, initializes tracing, and runs the balancing daemon
//! (standalone or distributed, per `raft.enabled`).

use anyhow::Result;
use balancer_lib::config::{Config, LogFormat};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Autonomous workload rebalancer daemon
#[derive(Parser)]
#[command(name = "balancerd", version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(long, short, env = "VLB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    info!(version = VERSION, "starting balancerd");
    balancer_lib::daemon::run(config).await
}
