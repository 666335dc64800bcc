//! Core data models for the balancer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational status of a host as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

/// CPU capacity and live utilization of a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Utilization percentage in [0, 100]
    pub usage_pct: f32,
    pub cores: u32,
    pub load_avg: f32,
}

/// Memory capacity and live utilization of a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    /// Utilization percentage in [0, 100]
    pub usage_pct: f32,
}

/// Storage capacity and live utilization of a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    /// Utilization percentage in [0, 100]
    pub usage_pct: f32,
}

/// One virtualization host and its resident workloads.
///
/// Snapshots are immutable within a balancing cycle; the platform owns the
/// authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub status: HostStatus,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub storage: StorageInfo,
    pub vms: Vec<Vm>,
    pub in_maintenance: bool,
}

impl Host {
    /// True when the host may participate in balancing at all.
    pub fn is_available(&self) -> bool {
        self.status == HostStatus::Online && !self.in_maintenance
    }
}

/// Workload kind; full virtual machines and containers are modeled uniformly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    Machine,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Unknown,
}

impl VmStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            _ => VmStatus::Unknown,
        }
    }
}

/// A virtual machine or container managed by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    /// Cluster-unique numeric id
    pub id: u32,
    pub name: String,
    /// Name of the host the VM currently resides on
    pub host: String,
    pub kind: VmKind,
    pub status: VmStatus,
    /// Live CPU utilization percentage in [0, 100]
    pub cpu_pct: f32,
    pub memory_bytes: u64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_migrated: Option<DateTime<Utc>>,
}

/// Cluster identity as reported by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub version: String,
    pub quorum: bool,
}

/// One historical utilization sample for a host or VM
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// CPU percentage in [0, 100]
    pub cpu_pct: f64,
    /// Memory in bytes (hosts) or percent (normalized VM series)
    pub memory: f64,
    pub load_avg: f64,
}

/// Percentile metrics over a host's historical CPU series.
///
/// All fields are percentages. A zero `p90` means the series was empty and
/// downstream scoring treats the host as having no history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityMetrics {
    pub p50: f32,
    pub p90: f32,
    pub p95: f32,
    pub p99: f32,
    /// 10th percentile of the series
    pub min_p90: f32,
    /// 90th percentile of the series
    pub max_p90: f32,
    pub mean: f32,
    pub stddev: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuPatternKind {
    Burst,
    Sustained,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPatternKind {
    Static,
    Growing,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoragePatternKind {
    ReadHeavy,
    WriteHeavy,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Realtime,
    Interactive,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    Important,
    Normal,
}

/// CPU usage pattern of a single VM
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CpuPattern {
    pub kind: CpuPatternKind,
    /// p90 of the sample series, meaningful for sustained workloads
    pub sustained_level: f32,
}

/// Memory usage pattern of a single VM
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryPattern {
    pub kind: MemoryPatternKind,
    /// Projected growth in percent per hour, from the series trend
    pub growth_pct_per_hour: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoragePattern {
    pub kind: StoragePatternKind,
}

/// Derived workload characteristics of a VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProfile {
    pub cpu: CpuPattern,
    pub memory: MemoryPattern,
    pub storage: StoragePattern,
    pub priority: Priority,
    pub criticality: Criticality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A planned or executed VM migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub vm: Vm,
    pub from_host: String,
    pub to_host: String,
    pub status: MigrationStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one migration attempt within a balancing cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancingOutcome {
    pub vm: Vm,
    pub from_host: String,
    pub to_host: String,
    pub reason: String,
    /// Score improvement the planner predicted for this move
    pub resource_gain: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of the in-memory migration history used for anti-flip-flop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub vm_id: u32,
    pub from_host: String,
    pub to_host: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Score of a host as a placement target; lower is more attractive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostScore {
    pub host: String,
    pub score: f64,
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub storage_pct: f32,
}

/// Aggregate view of the cluster for operator tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_hosts: usize,
    pub active_hosts: usize,
    pub total_vms: usize,
    pub running_vms: usize,
    pub avg_cpu_pct: f32,
    pub avg_mem_pct: f32,
    pub avg_storage_pct: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_balanced: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_availability() {
        let mut host = Host {
            name: "node1".to_string(),
            status: HostStatus::Online,
            cpu: CpuInfo::default(),
            memory: MemoryInfo::default(),
            storage: StorageInfo::default(),
            vms: vec![],
            in_maintenance: false,
        };
        assert!(host.is_available());

        host.in_maintenance = true;
        assert!(!host.is_available());

        host.in_maintenance = false;
        host.status = HostStatus::Offline;
        assert!(!host.is_available());
    }

    #[test]
    fn vm_status_parsing() {
        assert_eq!(VmStatus::parse("running"), VmStatus::Running);
        assert_eq!(VmStatus::parse("stopped"), VmStatus::Stopped);
        assert_eq!(VmStatus::parse("paused"), VmStatus::Unknown);
    }
}
