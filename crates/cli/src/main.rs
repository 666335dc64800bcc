//! vlb operator CLI
//!
//! Inspects and drives the workload rebalancer: cluster status, VM listing,
//! one-shot balancing cycles, capacity planning, and coordinator state.

mod commands;
mod output;

use anyhow::Result;
use balancer_lib::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for the vlb workload rebalancer
#[derive(Parser)]
#[command(name = "vlb", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, short, env = "VLB_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cluster utilization and balancing status
    Status,

    /// List all VMs and containers with their placement tags
    List,

    /// Run one balancing cycle now
    Balance {
        /// Bypass the trigger and cooldown gates
        #[arg(long)]
        force: bool,
    },

    /// Show cluster identity and quorum
    Cluster,

    /// Show capacity metrics, predictions, and recommendations per host
    Capacity {
        /// Include p95/p99 analysis
        #[arg(long)]
        detailed: bool,

        /// Forecast horizon (e.g. 7d, 24h)
        #[arg(long, default_value = "7d")]
        forecast: String,
    },

    /// Show the consensus group state from the local daemon
    Raft,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status => commands::status::show(&config, cli.format).await,
        Commands::List => commands::vms::list(&config, cli.format).await,
        Commands::Balance { force } => commands::balance::run(&config, force, cli.format).await,
        Commands::Cluster => commands::status::cluster(&config, cli.format).await,
        Commands::Capacity { detailed, forecast } => {
            commands::capacity::show(&config, detailed, &forecast, cli.format).await
        }
        Commands::Raft => commands::raft::show(&config, cli.format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn balance_force_flag_parses() {
        let cli = Cli::parse_from(["vlb", "balance", "--force"]);
        assert!(matches!(cli.command, Commands::Balance { force: true }));
    }

    #[test]
    fn capacity_defaults() {
        let cli = Cli::parse_from(["vlb", "capacity"]);
        match cli.command {
            Commands::Capacity { detailed, forecast } => {
                assert!(!detailed);
                assert_eq!(forecast, "7d");
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
