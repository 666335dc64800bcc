//! Capacity planning view
//!
//! Fetches host history, computes percentile metrics and predictions, and
//! prints recommendations. Hosts without history are analyzed from live
//! usage, mirroring the balancer's degraded mode.

use super::platform_client;
use crate::output::{format_pct, print_info, print_warning, OutputFormat};
use anyhow::{Context, Result};
use balancer_lib::capacity::CapacityAnalyzer;
use balancer_lib::config::Config;
use balancer_lib::models::{HostStatus, VmStatus};
use balancer_lib::platform::{PlatformClient, Timeframe};
use balancer_lib::profile::WorkloadProfiler;
use colored::Colorize;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "VM")]
    vm: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "CPU Pattern")]
    cpu_pattern: String,
    #[tabled(rename = "Memory Pattern")]
    memory_pattern: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Criticality")]
    criticality: String,
}

#[derive(Tabled)]
struct CapacityRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Now")]
    current: String,
    #[tabled(rename = "p50")]
    p50: String,
    #[tabled(rename = "p90")]
    p90: String,
    #[tabled(rename = "p99")]
    p99: String,
    #[tabled(rename = "StdDev")]
    stddev: String,
    #[tabled(rename = "Predicted")]
    predicted: String,
}

pub async fn show(
    config: &Config,
    detailed: bool,
    forecast: &str,
    format: OutputFormat,
) -> Result<()> {
    let horizon = humantime::parse_duration(forecast)
        .with_context(|| format!("invalid forecast duration: {forecast}"))?;
    let client = platform_client(config)?;
    let hosts = client.list_hosts().await?;
    let timeframe = Timeframe::for_horizon(horizon);

    let mut analyzer = CapacityAnalyzer::new();
    let mut degraded = Vec::new();
    for host in hosts.iter().filter(|h| h.status == HostStatus::Online) {
        match client.host_history(&host.name, timeframe).await {
            Ok(samples) if !samples.is_empty() => analyzer.observe_history(&host.name, &samples),
            _ => {
                analyzer.observe_current(&host.name, host.cpu.usage_pct);
                degraded.push(host.name.clone());
            }
        }
    }

    match format {
        OutputFormat::Json => {
            let report: Vec<serde_json::Value> = hosts
                .iter()
                .filter(|h| h.status == HostStatus::Online)
                .map(|host| {
                    serde_json::json!({
                        "host": host.name,
                        "current_cpu_pct": host.cpu.usage_pct,
                        "metrics": analyzer.get(&host.name),
                        "predicted_pct": analyzer.predict(&host.name, horizon),
                        "recommendations": analyzer.recommendations(&host.name, detailed),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            let rows: Vec<CapacityRow> = hosts
                .iter()
                .filter(|h| h.status == HostStatus::Online)
                .map(|host| {
                    let m = analyzer.get(&host.name).copied().unwrap_or_default();
                    CapacityRow {
                        host: host.name.clone(),
                        current: format_pct(host.cpu.usage_pct),
                        p50: format!("{:.1}%", m.p50),
                        p90: format_pct(m.p90),
                        p99: format!("{:.1}%", m.p99),
                        stddev: format!("{:.1}", m.stddev),
                        predicted: format_pct(analyzer.predict(&host.name, horizon) as f32),
                    }
                })
                .collect();
            if rows.is_empty() {
                print_warning("no online hosts found");
                return Ok(());
            }
            println!(
                "Capacity forecast over {} ({} history)\n",
                forecast,
                timeframe.as_str()
            );
            let table = Table::new(&rows).with(Style::rounded()).to_string();
            println!("{table}");

            for host in hosts.iter().filter(|h| h.status == HostStatus::Online) {
                let recommendations = analyzer.recommendations(&host.name, detailed);
                if recommendations.is_empty() {
                    continue;
                }
                println!("\n{}", host.name.bold());
                for recommendation in recommendations {
                    println!("  - {recommendation}");
                }
            }

            if detailed {
                let profiles = profile_vms(&client, &hosts).await;
                if !profiles.is_empty() {
                    println!("\nWorkload profiles:");
                    let table = Table::new(profiles).with(Style::rounded()).to_string();
                    println!("{table}");
                }
            }

            if !degraded.is_empty() {
                println!();
                print_info(&format!(
                    "no history for {}; analyzed from live usage",
                    degraded.join(", ")
                ));
            }
        }
    }
    Ok(())
}

async fn profile_vms(
    client: &Arc<dyn PlatformClient>,
    hosts: &[balancer_lib::models::Host],
) -> Vec<ProfileRow> {
    let mut profiler = WorkloadProfiler::new();
    let mut rows = Vec::new();

    for host in hosts.iter().filter(|h| h.status == HostStatus::Online) {
        for vm in host.vms.iter().filter(|vm| vm.status == VmStatus::Running) {
            let samples = client
                .vm_history(&host.name, vm.id, vm.kind, Timeframe::Day)
                .await
                .unwrap_or_default();
            let profile = profiler.analyze(vm, &samples);
            rows.push(ProfileRow {
                vm: format!("{} ({})", vm.name, vm.id),
                host: host.name.clone(),
                cpu_pattern: format!("{:?}", profile.cpu.kind).to_lowercase(),
                memory_pattern: format!("{:?}", profile.memory.kind).to_lowercase(),
                priority: format!("{:?}", profile.priority).to_lowercase(),
                criticality: format!("{:?}", profile.criticality).to_lowercase(),
            });
        }
    }
    rows
}
