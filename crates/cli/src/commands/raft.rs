//! Consensus group state from the local daemon's status socket

use crate::output::{color_status, print_info, print_warning, OutputFormat};
use anyhow::{Context, Result};
use balancer_lib::config::Config;
use balancer_lib::status::{query, socket_path};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Address")]
    address: String,
}

pub async fn show(config: &Config, format: OutputFormat) -> Result<()> {
    let path = socket_path(&config.raft.data_dir);
    let body = query(&path).await.with_context(|| {
        format!(
            "could not reach the daemon's status socket at {}; is balancerd running?",
            path.display()
        )
    })?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Table => {
            println!("Node:     {}", body.node_id.bold());
            if !body.address.is_empty() {
                println!("Address:  {}", body.address);
            }
            println!("State:    {}", color_status(&body.state));
            match &body.leader {
                Some(leader) if body.is_leader => {
                    println!("Leader:   {} {}", leader, "(this node)".green())
                }
                Some(leader) => println!("Leader:   {leader}"),
                None => print_warning("no leader elected"),
            }

            if body.peers.is_empty() {
                print_info("no peers configured (single-node group)");
            } else {
                let rows: Vec<PeerRow> = body
                    .peers
                    .iter()
                    .map(|p| PeerRow {
                        node: p.node_id.clone(),
                        address: p.address.clone(),
                    })
                    .collect();
                let table = Table::new(rows).with(Style::rounded()).to_string();
                println!("\nPeers:\n{table}");
            }
        }
    }
    Ok(())
}
