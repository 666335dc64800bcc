//! Configuration loading and validation
//!
//! Configuration is layered: a YAML/TOML file (optional) overridden by
//! `VLB_`-prefixed environment variables. Validation errors are fatal at
//! startup and never raised mid-operation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub balancing: BalancingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub raft: RaftSettings,
}

/// Connection settings for the virtualization platform API
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: String,
    /// Accept self-signed certificates; honored for localhost endpoints only
    #[serde(default = "default_true")]
    pub insecure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSettings {
    /// Auto-detected from the platform when empty
    #[serde(default)]
    pub name: String,
    /// Hosts excluded from balancing as both source and target
    #[serde(default)]
    pub maintenance_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalancingSettings {
    /// Control loop tick period
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub balancer_type: BalancerKind,
    #[serde(default)]
    pub aggressiveness: Aggressiveness,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub weights: Weights,
    #[serde(default)]
    pub load_profiles: LoadProfileSettings,
    #[serde(default)]
    pub capacity: CapacitySettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerKind {
    Threshold,
    #[default]
    Advanced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressiveness {
    #[default]
    Low,
    Medium,
    High,
}

/// Fixed tuning preset derived from the aggressiveness level
#[derive(Debug, Clone, Copy)]
pub struct AggressivenessProfile {
    /// Per-VM reuse delay, also the inter-cycle floor
    pub cooldown: Duration,
    pub min_improvement: f64,
    pub stability_weight: f64,
    pub capacity_weight: f64,
}

impl Aggressiveness {
    pub fn profile(self) -> AggressivenessProfile {
        match self {
            Aggressiveness::Low => AggressivenessProfile {
                cooldown: Duration::from_secs(4 * 3600),
                min_improvement: 15.0,
                stability_weight: 0.8,
                capacity_weight: 0.2,
            },
            Aggressiveness::Medium => AggressivenessProfile {
                cooldown: Duration::from_secs(2 * 3600),
                min_improvement: 10.0,
                stability_weight: 0.6,
                capacity_weight: 0.5,
            },
            Aggressiveness::High => AggressivenessProfile {
                cooldown: Duration::from_secs(30 * 60),
                min_improvement: 5.0,
                stability_weight: 0.4,
                capacity_weight: 0.8,
            },
        }
    }
}

/// Utilization bounds that trigger a balancing cycle
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_cpu_threshold")]
    pub cpu: u8,
    #[serde(default = "default_mem_threshold")]
    pub memory: u8,
    #[serde(default = "default_storage_threshold")]
    pub storage: u8,
}

/// Relative importance of each resource in the composite score
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Weights {
    #[serde(default = "default_weight_one")]
    pub cpu: f64,
    #[serde(default = "default_weight_one")]
    pub memory: f64,
    #[serde(default = "default_weight_storage")]
    pub storage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadProfileSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sample window considered when classifying a VM
    #[serde(default = "default_profile_window", with = "humantime_serde")]
    pub window: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapacitySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Horizon used for usage prediction and history timeframe selection
    #[serde(default = "default_forecast", with = "humantime_serde")]
    pub forecast: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Leader-election coordinator settings
#[derive(Debug, Clone, Deserialize)]
pub struct RaftSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Required when auto-discovery is disabled
    #[serde(default)]
    pub node_id: String,
    #[serde(default = "default_raft_address")]
    pub address: String,
    #[serde(default = "default_raft_port")]
    pub port: u16,
    /// Static peer list, `addr:port` or `node_id@addr:port` entries
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_discover: bool,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_endpoint() -> String {
    "https://localhost:8006".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cpu_threshold() -> u8 {
    80
}

fn default_mem_threshold() -> u8 {
    85
}

fn default_storage_threshold() -> u8 {
    90
}

fn default_weight_one() -> f64 {
    1.0
}

fn default_weight_storage() -> f64 {
    0.5
}

fn default_profile_window() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_forecast() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_raft_address() -> String {
    "0.0.0.0".to_string()
}

fn default_raft_port() -> u16 {
    7946
}

fn default_data_dir() -> String {
    "/var/lib/vlb".to_string()
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: String::new(),
            password: String::new(),
            token: String::new(),
            insecure: true,
        }
    }
}

impl Default for BalancingSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            balancer_type: BalancerKind::default(),
            aggressiveness: Aggressiveness::default(),
            thresholds: Thresholds::default(),
            weights: Weights::default(),
            load_profiles: LoadProfileSettings::default(),
            capacity: CapacitySettings::default(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_cpu_threshold(),
            memory: default_mem_threshold(),
            storage: default_storage_threshold(),
        }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
            storage: 0.5,
        }
    }
}

impl Default for LoadProfileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_profile_window(),
        }
    }
}

impl Default for CapacitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            forecast: default_forecast(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for RaftSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: String::new(),
            address: default_raft_address(),
            port: default_raft_port(),
            peers: Vec::new(),
            auto_discover: true,
            data_dir: default_data_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform: PlatformSettings::default(),
            cluster: ClusterSettings::default(),
            balancing: BalancingSettings::default(),
            logging: LoggingSettings::default(),
            raft: RaftSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus `VLB_` environment
    /// overrides (`VLB_BALANCING__INTERVAL=1m` style nesting).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            let file = path
                .to_str()
                .with_context(|| format!("config path is not valid UTF-8: {}", path.display()))?;
            builder = builder.add_source(config::File::with_name(file));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("VLB").separator("__"))
            .build()
            .context("failed to read configuration")?;

        let cfg: Config = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration; any failure here aborts startup.
    pub fn validate(&self) -> Result<()> {
        if self.platform.endpoint.is_empty() {
            bail!("platform endpoint is required");
        }
        let local = self.platform.endpoint.contains("localhost")
            || self.platform.endpoint.contains("127.0.0.1");
        if !local && self.platform.username.is_empty() && self.platform.token.is_empty() {
            bail!("either username/password or an API token is required for remote platforms");
        }

        for (name, value) in [
            ("cpu", self.balancing.thresholds.cpu),
            ("memory", self.balancing.thresholds.memory),
            ("storage", self.balancing.thresholds.storage),
        ] {
            if value == 0 || value > 100 {
                bail!("{name} threshold must be between 1 and 100, got {value}");
            }
        }

        for (name, value) in [
            ("cpu", self.balancing.weights.cpu),
            ("memory", self.balancing.weights.memory),
            ("storage", self.balancing.weights.storage),
        ] {
            if value < 0.0 {
                bail!("{name} weight cannot be negative, got {value}");
            }
        }
        let total = self.balancing.weights.cpu
            + self.balancing.weights.memory
            + self.balancing.weights.storage;
        if total <= 0.0 {
            bail!("at least one resource weight must be positive");
        }

        if self.balancing.interval < Duration::from_secs(1) {
            bail!("balancing interval must be at least one second");
        }

        if self.raft.enabled && !self.raft.auto_discover && self.raft.node_id.is_empty() {
            bail!("raft.node_id is required when auto-discovery is disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.balancing.thresholds.cpu, 80);
        assert_eq!(cfg.balancing.thresholds.memory, 85);
        assert_eq!(cfg.balancing.thresholds.storage, 90);
        assert_eq!(cfg.balancing.interval, Duration::from_secs(300));
        assert_eq!(cfg.balancing.balancer_type, BalancerKind::Advanced);
        assert_eq!(cfg.balancing.aggressiveness, Aggressiveness::Low);
        assert!(!cfg.raft.enabled);
    }

    #[test]
    fn aggressiveness_presets() {
        let low = Aggressiveness::Low.profile();
        assert_eq!(low.cooldown, Duration::from_secs(4 * 3600));
        assert_eq!(low.min_improvement, 15.0);
        assert_eq!(low.stability_weight, 0.8);
        assert_eq!(low.capacity_weight, 0.2);

        let medium = Aggressiveness::Medium.profile();
        assert_eq!(medium.cooldown, Duration::from_secs(2 * 3600));
        assert_eq!(medium.min_improvement, 10.0);

        let high = Aggressiveness::High.profile();
        assert_eq!(high.cooldown, Duration::from_secs(30 * 60));
        assert_eq!(high.min_improvement, 5.0);
        assert_eq!(high.capacity_weight, 0.8);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = Config::default();
        cfg.balancing.thresholds.cpu = 0;
        assert!(cfg.validate().is_err());
        cfg.balancing.thresholds.cpu = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let mut cfg = Config::default();
        cfg.balancing.weights.memory = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_remote_platform_without_credentials() {
        let mut cfg = Config::default();
        cfg.platform.endpoint = "https://cluster.example:8006".to_string();
        assert!(cfg.validate().is_err());

        cfg.platform.token = "user@pve!lb=secret".to_string();
        cfg.validate().unwrap();
    }

    #[test]
    fn loads_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vlb.yaml");
        std::fs::write(
            &path,
            concat!(
                "balancing:\n",
                "  interval: 1m\n",
                "  aggressiveness: high\n",
                "  thresholds:\n",
                "    cpu: 70\n",
                "cluster:\n",
                "  maintenance_hosts: [pve3]\n",
                "raft:\n",
                "  enabled: true\n",
                "  node_id: pve1\n",
            ),
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.balancing.interval, Duration::from_secs(60));
        assert_eq!(cfg.balancing.aggressiveness, Aggressiveness::High);
        assert_eq!(cfg.balancing.thresholds.cpu, 70);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.balancing.thresholds.memory, 85);
        assert_eq!(cfg.cluster.maintenance_hosts, vec!["pve3".to_string()]);
        assert!(cfg.raft.enabled);
        assert_eq!(cfg.raft.node_id, "pve1");
    }

    #[test]
    fn raft_requires_node_id_without_discovery() {
        let mut cfg = Config::default();
        cfg.raft.enabled = true;
        cfg.raft.auto_discover = false;
        assert!(cfg.validate().is_err());

        cfg.raft.node_id = "node1".to_string();
        cfg.validate().unwrap();
    }
}
