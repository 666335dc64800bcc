//! CLI command implementations

pub mod balance;
pub mod capacity;
pub mod raft;
pub mod status;
pub mod vms;

use anyhow::{Context, Result};
use balancer_lib::config::Config;
use balancer_lib::platform::{PlatformClient, RestClient};
use std::sync::Arc;

/// Platform client shared by the commands that talk to the cluster.
pub fn platform_client(config: &Config) -> Result<Arc<dyn PlatformClient>> {
    let client = RestClient::new(&config.platform).context("failed to build platform client")?;
    Ok(Arc::new(client))
}
