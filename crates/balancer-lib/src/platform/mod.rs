//! Platform client abstraction
//!
//! The balancer consumes the virtualization platform through this trait so
//! that planning and coordination can be tested against mock clusters. The
//! REST implementation lives in [`rest`]; peer discovery for the coordinator
//! in [`discovery`].

pub mod discovery;
pub mod rest;

use crate::models::{ClusterInfo, Host, Sample, VmKind};
use anyhow::Result;
use async_trait::async_trait;

pub use rest::RestClient;

/// History granularity accepted by the platform's metric store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Hour => "hour",
            Timeframe::Day => "day",
            Timeframe::Week => "week",
            Timeframe::Month => "month",
            Timeframe::Year => "year",
        }
    }

    /// Pick the coarsest timeframe that still covers the forecast horizon.
    pub fn for_horizon(horizon: std::time::Duration) -> Self {
        const DAY: u64 = 24 * 3600;
        if horizon.as_secs() >= 7 * DAY {
            Timeframe::Week
        } else if horizon.as_secs() >= DAY {
            Timeframe::Day
        } else {
            Timeframe::Hour
        }
    }
}

/// Operations the core consumes from the virtualization platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Cluster identity and quorum state.
    async fn cluster_info(&self) -> Result<ClusterInfo>;

    /// All hosts with their resident VMs inlined.
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Historical utilization series for one host.
    async fn host_history(&self, host: &str, timeframe: Timeframe) -> Result<Vec<Sample>>;

    /// Historical utilization series for one VM.
    async fn vm_history(
        &self,
        host: &str,
        vm_id: u32,
        kind: VmKind,
        timeframe: Timeframe,
    ) -> Result<Vec<Sample>>;

    /// Live-migrate a VM between hosts.
    async fn migrate(&self, vm_id: u32, from_host: &str, to_host: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeframe_for_horizon() {
        assert_eq!(
            Timeframe::for_horizon(Duration::from_secs(8 * 24 * 3600)),
            Timeframe::Week
        );
        assert_eq!(
            Timeframe::for_horizon(Duration::from_secs(36 * 3600)),
            Timeframe::Day
        );
        assert_eq!(
            Timeframe::for_horizon(Duration::from_secs(600)),
            Timeframe::Hour
        );
    }
}
