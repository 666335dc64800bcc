//! Cluster status and identity commands

use super::platform_client;
use crate::output::{format_pct, print_info, print_warning, OutputFormat};
use anyhow::Result;
use balancer_lib::balancer::{build_balancer, RunGate};
use balancer_lib::config::Config;
use colored::Colorize;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Hosts")]
    hosts: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "VMs")]
    vms: String,
    #[tabled(rename = "Running")]
    running: String,
    #[tabled(rename = "Avg CPU")]
    cpu: String,
    #[tabled(rename = "Avg Mem")]
    mem: String,
    #[tabled(rename = "Avg Storage")]
    storage: String,
}

pub async fn show(config: &Config, format: OutputFormat) -> Result<()> {
    let client = platform_client(config)?;
    let balancer = build_balancer(client, Arc::new(config.clone()), RunGate::always_open());
    let summary = balancer.summary().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => {
            let row = SummaryRow {
                hosts: summary.total_hosts.to_string(),
                active: summary.active_hosts.to_string(),
                vms: summary.total_vms.to_string(),
                running: summary.running_vms.to_string(),
                cpu: format_pct(summary.avg_cpu_pct),
                mem: format_pct(summary.avg_mem_pct),
                storage: format_pct(summary.avg_storage_pct),
            };
            let table = Table::new([row]).with(Style::rounded()).to_string();
            println!("{table}");
            match summary.last_balanced {
                Some(t) => print_info(&format!("last balanced at {t}")),
                None => print_info("no balancing cycle has run yet"),
            }
        }
    }
    Ok(())
}

pub async fn cluster(config: &Config, format: OutputFormat) -> Result<()> {
    let client = platform_client(config)?;
    let info = client.cluster_info().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Table => {
            println!("Cluster:  {}", info.name.bold());
            println!("Version:  {}", info.version);
            if info.quorum {
                println!("Quorum:   {}", "ok".green());
            } else {
                print_warning("cluster has no quorum");
            }
        }
    }
    Ok(())
}
