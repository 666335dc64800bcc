//! VM listing

use super::platform_client;
use crate::output::{color_status, format_bytes, format_pct, print_warning, OutputFormat};
use anyhow::Result;
use balancer_lib::config::Config;
use balancer_lib::models::{Vm, VmKind, VmStatus};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VmRow {
    #[tabled(rename = "ID")]
    id: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Tags")]
    tags: String,
}

fn kind_label(kind: VmKind) -> &'static str {
    match kind {
        VmKind::Machine => "vm",
        VmKind::Container => "ct",
    }
}

fn status_label(status: VmStatus) -> &'static str {
    match status {
        VmStatus::Running => "running",
        VmStatus::Stopped => "stopped",
        VmStatus::Unknown => "unknown",
    }
}

pub async fn list(config: &Config, format: OutputFormat) -> Result<()> {
    let client = platform_client(config)?;
    let hosts = client.list_hosts().await?;
    let mut vms: Vec<Vm> = hosts.into_iter().flat_map(|h| h.vms).collect();
    vms.sort_by_key(|vm| vm.id);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&vms)?),
        OutputFormat::Table => {
            if vms.is_empty() {
                print_warning("no VMs found");
                return Ok(());
            }
            let total = vms.len();
            let rows: Vec<VmRow> = vms
                .into_iter()
                .map(|vm| VmRow {
                    id: vm.id,
                    name: vm.name,
                    host: vm.host,
                    kind: kind_label(vm.kind).to_string(),
                    status: color_status(status_label(vm.status)),
                    cpu: format_pct(vm.cpu_pct),
                    memory: format_bytes(vm.memory_bytes),
                    tags: vm.tags.join(", "),
                })
                .collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{table}");
            println!("\nTotal: {total} VMs");
        }
    }
    Ok(())
}
