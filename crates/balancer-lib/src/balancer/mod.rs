//! Balancing engines
//!
//! Two planners implement the [`Balancer`] trait: the advanced planner
//! (capacity-aware scoring, migration history, aggressiveness presets) and
//! the legacy threshold planner (single weighted-usage score). Both consume
//! the platform through [`crate::platform::PlatformClient`] and validate
//! every placement against the rule engine.

pub mod advanced;
pub mod score;
pub mod threshold;

use crate::config::{BalancerKind, Config, Thresholds};
use crate::models::{BalancingOutcome, ClusterSummary, Host, Vm};
use crate::platform::PlatformClient;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

pub use advanced::AdvancedBalancer;
pub use threshold::ThresholdBalancer;

/// Hard cap on migrations emitted per cycle
pub const MAX_MIGRATIONS_PER_CYCLE: usize = 5;

/// Phase of the per-cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Snapshotting,
    Analyzing,
    Planning,
    Executing,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Snapshotting => "snapshotting",
            CyclePhase::Analyzing => "analyzing",
            CyclePhase::Planning => "planning",
            CyclePhase::Executing => "executing",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation checked between migrations.
///
/// The control loop closes the gate when leadership is lost or shutdown
/// begins; a migration already in flight completes and is recorded before
/// the cancellation is honored.
#[derive(Debug, Clone)]
pub struct RunGate(Option<watch::Receiver<bool>>);

impl RunGate {
    /// A gate that never closes, for one-shot and standalone runs.
    pub fn always_open() -> Self {
        Self(None)
    }

    pub fn watching(rx: watch::Receiver<bool>) -> Self {
        Self(Some(rx))
    }

    pub fn is_open(&self) -> bool {
        self.0.as_ref().map(|rx| *rx.borrow()).unwrap_or(true)
    }
}

/// A balancing engine: produces and executes one cycle's migration plan
#[async_trait]
pub trait Balancer: Send {
    /// Run one balancing cycle. `force` bypasses the trigger and cooldown
    /// gates. Returns the outcome of every attempted migration; an empty
    /// list is a successful no-op cycle.
    async fn run(&mut self, force: bool) -> Result<Vec<BalancingOutcome>>;

    /// Aggregate cluster view for operator tooling.
    async fn summary(&self) -> Result<ClusterSummary>;
}

/// Build the balancer selected by `balancing.balancer_type`.
pub fn build_balancer(
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    gate: RunGate,
) -> Box<dyn Balancer> {
    match config.balancing.balancer_type {
        BalancerKind::Advanced => Box::new(AdvancedBalancer::new(client, config, gate)),
        BalancerKind::Threshold => Box::new(ThresholdBalancer::new(client, config, gate)),
    }
}

/// Hosts that may participate in balancing: online, not flagged for
/// maintenance, not listed in `cluster.maintenance_hosts`.
pub(crate) fn filter_available(hosts: &[Host], maintenance: &[String]) -> Vec<Host> {
    hosts
        .iter()
        .filter(|h| h.is_available() && !maintenance.iter().any(|m| m == &h.name))
        .cloned()
        .collect()
}

pub(crate) fn collect_vms(hosts: &[Host]) -> Vec<Vm> {
    hosts.iter().flat_map(|h| h.vms.iter().cloned()).collect()
}

pub(crate) fn exceeds_thresholds(host: &Host, thresholds: &Thresholds) -> bool {
    host.cpu.usage_pct > f32::from(thresholds.cpu)
        || host.memory.usage_pct > f32::from(thresholds.memory)
        || host.storage.usage_pct > f32::from(thresholds.storage)
}

pub(crate) fn summarize(
    hosts: &[Host],
    maintenance: &[String],
    last_balanced: Option<DateTime<Utc>>,
) -> ClusterSummary {
    let active: Vec<&Host> = hosts
        .iter()
        .filter(|h| h.is_available() && !maintenance.iter().any(|m| m == &h.name))
        .collect();

    let total_vms = hosts.iter().map(|h| h.vms.len()).sum();
    let running_vms = hosts
        .iter()
        .flat_map(|h| h.vms.iter())
        .filter(|vm| vm.status == crate::models::VmStatus::Running)
        .count();

    let n = active.len().max(1) as f32;
    ClusterSummary {
        total_hosts: hosts.len(),
        active_hosts: active.len(),
        total_vms,
        running_vms,
        avg_cpu_pct: active.iter().map(|h| h.cpu.usage_pct).sum::<f32>() / n,
        avg_mem_pct: active.iter().map(|h| h.memory.usage_pct).sum::<f32>() / n,
        avg_storage_pct: active.iter().map(|h| h.storage.usage_pct).sum::<f32>() / n,
        last_balanced,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::models::*;
    use crate::platform::{PlatformClient, Timeframe};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Scripted platform used by the balancer tests: fixed host snapshot,
    /// optional per-host history, recorded migrations, injectable failures.
    #[derive(Default)]
    pub struct MockPlatform {
        pub hosts: Mutex<Vec<Host>>,
        pub host_histories: Mutex<HashMap<String, Vec<Sample>>>,
        pub migrations: Mutex<Vec<(u32, String, String)>>,
        pub fail_migrations_for: Mutex<Vec<u32>>,
    }

    impl MockPlatform {
        pub fn with_hosts(hosts: Vec<Host>) -> Self {
            Self {
                hosts: Mutex::new(hosts),
                ..Default::default()
            }
        }

        pub fn recorded_migrations(&self) -> Vec<(u32, String, String)> {
            self.migrations.lock().clone()
        }
    }

    #[async_trait]
    impl PlatformClient for MockPlatform {
        async fn cluster_info(&self) -> Result<ClusterInfo> {
            Ok(ClusterInfo {
                name: "test-cluster".to_string(),
                version: "1".to_string(),
                quorum: true,
            })
        }

        async fn list_hosts(&self) -> Result<Vec<Host>> {
            Ok(self.hosts.lock().clone())
        }

        async fn host_history(&self, host: &str, _timeframe: Timeframe) -> Result<Vec<Sample>> {
            match self.host_histories.lock().get(host) {
                Some(samples) => Ok(samples.clone()),
                None => bail!("no history for {host}"),
            }
        }

        async fn vm_history(
            &self,
            _host: &str,
            _vm_id: u32,
            _kind: VmKind,
            _timeframe: Timeframe,
        ) -> Result<Vec<Sample>> {
            Ok(vec![])
        }

        async fn migrate(&self, vm_id: u32, from_host: &str, to_host: &str) -> Result<()> {
            if self.fail_migrations_for.lock().contains(&vm_id) {
                bail!("simulated migration failure for VM {vm_id}");
            }
            self.migrations
                .lock()
                .push((vm_id, from_host.to_string(), to_host.to_string()));
            Ok(())
        }
    }

    pub fn host(name: &str, cpu: f32, mem: f32, storage: f32, vms: Vec<Vm>) -> Host {
        Host {
            name: name.to_string(),
            status: HostStatus::Online,
            cpu: CpuInfo {
                usage_pct: cpu,
                cores: 16,
                load_avg: 0.0,
            },
            memory: MemoryInfo {
                usage_pct: mem,
                total_bytes: 64 << 30,
                used_bytes: 0,
                available_bytes: 0,
            },
            storage: StorageInfo {
                usage_pct: storage,
                ..Default::default()
            },
            vms,
            in_maintenance: false,
        }
    }

    pub fn vm(id: u32, name: &str, host: &str, tags: &[&str]) -> Vm {
        Vm {
            id,
            name: name.to_string(),
            host: host.to_string(),
            kind: VmKind::Machine,
            status: VmStatus::Running,
            cpu_pct: 20.0,
            memory_bytes: 4 << 30,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            last_migrated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{host, vm};
    use super::*;
    use crate::models::VmStatus;

    #[test]
    fn maintenance_hosts_are_filtered() {
        let hosts = vec![
            host("a", 50.0, 50.0, 0.0, vec![]),
            host("b", 50.0, 50.0, 0.0, vec![]),
        ];
        let available = filter_available(&hosts, &["b".to_string()]);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "a");
    }

    #[test]
    fn threshold_check_matches_any_resource() {
        let thresholds = Thresholds::default();
        assert!(exceeds_thresholds(
            &host("a", 81.0, 10.0, 10.0, vec![]),
            &thresholds
        ));
        assert!(exceeds_thresholds(
            &host("a", 10.0, 86.0, 10.0, vec![]),
            &thresholds
        ));
        assert!(exceeds_thresholds(
            &host("a", 10.0, 10.0, 91.0, vec![]),
            &thresholds
        ));
        assert!(!exceeds_thresholds(
            &host("a", 80.0, 85.0, 90.0, vec![]),
            &thresholds
        ));
    }

    #[test]
    fn summary_averages_active_hosts_only() {
        let mut stopped = vm(2, "halted", "a", &[]);
        stopped.status = VmStatus::Stopped;
        let hosts = vec![
            host("a", 80.0, 60.0, 40.0, vec![vm(1, "v1", "a", &[]), stopped]),
            host("b", 40.0, 20.0, 20.0, vec![]),
            host("m", 99.0, 99.0, 99.0, vec![]),
        ];
        let summary = summarize(&hosts, &["m".to_string()], None);

        assert_eq!(summary.total_hosts, 3);
        assert_eq!(summary.active_hosts, 2);
        assert_eq!(summary.total_vms, 2);
        assert_eq!(summary.running_vms, 1);
        assert_eq!(summary.avg_cpu_pct, 60.0);
        assert_eq!(summary.avg_mem_pct, 40.0);
    }

    #[test]
    fn gate_defaults_open() {
        assert!(RunGate::always_open().is_open());

        let (tx, rx) = watch::channel(true);
        let gate = RunGate::watching(rx);
        assert!(gate.is_open());
        tx.send(false).unwrap();
        assert!(!gate.is_open());
    }
}
