//! Coordinator peer discovery through the platform's cluster view
//!
//! When auto-discovery is enabled, the peer set for the consensus group is
//! derived once at startup: list cluster hosts, resolve each to an address,
//! and pair it with the host name as node id. The local node is identified
//! by matching the short hostname against the platform's host names.

use super::PlatformClient;
use crate::models::HostStatus;
use crate::raft::Peer;
use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DiscoveryService {
    client: Arc<dyn PlatformClient>,
    port: u16,
}

impl DiscoveryService {
    pub fn new(client: Arc<dyn PlatformClient>, port: u16) -> Self {
        Self { client, port }
    }

    /// Determine this manager's node id by matching the local short hostname
    /// against the cluster's host names. Fails when no host matches; callers
    /// must then require explicit configuration instead of guessing.
    pub async fn current_node_id(&self) -> Result<String> {
        let hostname = local_short_hostname()?;
        let hosts = self.client.list_hosts().await?;

        for host in &hosts {
            if host.status == HostStatus::Online && hostname_matches(&host.name, &hostname) {
                return Ok(host.name.clone());
            }
        }
        bail!("local hostname '{hostname}' does not match any online cluster host; set raft.node_id explicitly")
    }

    /// Build the consensus peer set, excluding the local node.
    pub async fn discover_peers(&self, local_node_id: &str) -> Result<Vec<Peer>> {
        let hosts = self.client.list_hosts().await?;
        let mut peers = Vec::new();

        for host in &hosts {
            if host.name == local_node_id || host.status != HostStatus::Online {
                continue;
            }
            match self.resolve_host(&host.name).await {
                Some(ip) => {
                    let peer = Peer {
                        node_id: host.name.clone(),
                        address: format!("{ip}:{}", self.port),
                    };
                    debug!(node = %peer.node_id, address = %peer.address, "discovered peer");
                    peers.push(peer);
                }
                None => {
                    info!(host = %host.name, "could not resolve host address, skipping peer");
                }
            }
        }
        Ok(peers)
    }

    async fn resolve_host(&self, name: &str) -> Option<IpAddr> {
        // Host names like "pve-192.168.1.10" carry their address inline.
        if let Some(ip) = embedded_ip(name) {
            return Some(ip);
        }
        let lookup = tokio::net::lookup_host((name, self.port)).await.ok()?;
        let mut fallback = None;
        for addr in lookup {
            match addr.ip() {
                ip @ IpAddr::V4(_) => return Some(ip),
                ip @ IpAddr::V6(_) => fallback = fallback.or(Some(ip)),
            }
        }
        fallback
    }
}

fn embedded_ip(name: &str) -> Option<IpAddr> {
    name.split('-').find_map(|part| part.parse().ok())
}

fn local_short_hostname() -> Result<String> {
    let hostname = hostname::get()
        .context("failed to read local hostname")?
        .to_string_lossy()
        .into_owned();
    Ok(strip_domain(&hostname).to_string())
}

fn strip_domain(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

fn hostname_matches(host_name: &str, local: &str) -> bool {
    host_name == local || strip_domain(host_name) == local
}
