//! REST client for the virtualization platform management API

use super::{PlatformClient, Timeframe};
use crate::config::PlatformSettings;
use crate::models::{
    ClusterInfo, CpuInfo, Host, HostStatus, MemoryInfo, Sample, StorageInfo, Vm, VmKind, VmStatus,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the platform's `api2/json` surface
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: String,
    token: String,
}

impl RestClient {
    pub fn new(settings: &PlatformSettings) -> Result<Self> {
        let base = Url::parse(&settings.endpoint)
            .with_context(|| format!("invalid platform endpoint: {}", settings.endpoint))?;

        // Self-signed certificates are tolerated for local endpoints only.
        let local = matches!(base.host_str(), Some("localhost") | Some("127.0.0.1") | Some("::1"));
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(settings.insecure && local)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base,
            username: settings.username.clone(),
            password: settings.password.clone(),
            token: settings.token.clone(),
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.token.is_empty() {
            req.header("Authorization", format!("PVEAPIToken={}", self.token))
        } else if !self.username.is_empty() {
            req.basic_auth(&self.username, Some(&self.password))
        } else {
            // Local root access needs no credentials.
            req
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base.join(path).context("invalid API path")?;
        let resp = self
            .authorize(self.http.get(url.clone()))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("platform returned {status} for {path}: {body}");
        }
        resp.json().await.context("failed to decode platform response")
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<()> {
        let url = self.base.join(path).context("invalid API path")?;
        let resp = self
            .authorize(self.http.post(url.clone()))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("platform returned {status} for {path}: {body}");
        }
        Ok(())
    }

    async fn host_detail(&self, name: &str, status: HostStatus) -> Result<Host> {
        let status_resp: Envelope<NodeStatusDto> = self
            .get(&format!("api2/json/nodes/{name}/status"))
            .await
            .with_context(|| format!("failed to fetch status of host {name}"))?;
        let detail = status_resp.data;

        let mut vms = self.host_vms(name, VmKind::Machine).await?;
        vms.extend(self.host_vms(name, VmKind::Container).await?);

        // A `maintenance` tag on any resident VM flags the whole host.
        let in_maintenance = vms
            .iter()
            .any(|vm| vm.tags.iter().any(|t| t.contains("maintenance")));

        let mem_total = detail.memory.total.max(1);
        let storage = detail.rootfs.unwrap_or_default();
        let storage_total = storage.total.max(1);

        Ok(Host {
            name: name.to_string(),
            status,
            cpu: CpuInfo {
                usage_pct: (detail.cpu * 100.0) as f32,
                cores: detail.cpuinfo.map(|c| c.cpus).unwrap_or_default(),
                load_avg: detail.loadavg.first().copied().unwrap_or_default() as f32,
            },
            memory: MemoryInfo {
                total_bytes: detail.memory.total,
                used_bytes: detail.memory.used,
                available_bytes: detail.memory.total.saturating_sub(detail.memory.used),
                usage_pct: (detail.memory.used as f64 / mem_total as f64 * 100.0) as f32,
            },
            storage: StorageInfo {
                total_bytes: storage.total,
                used_bytes: storage.used,
                free_bytes: storage.total.saturating_sub(storage.used),
                usage_pct: if storage.total == 0 {
                    0.0
                } else {
                    (storage.used as f64 / storage_total as f64 * 100.0) as f32
                },
            },
            vms,
            in_maintenance,
        })
    }

    async fn host_vms(&self, host: &str, kind: VmKind) -> Result<Vec<Vm>> {
        let resp: Envelope<Vec<VmDto>> = self
            .get(&format!("api2/json/nodes/{host}/{}", kind_path(kind)))
            .await
            .with_context(|| format!("failed to list {} on host {host}", kind_path(kind)))?;

        Ok(resp
            .data
            .into_iter()
            .map(|dto| Vm {
                id: dto.vmid,
                name: dto.name.unwrap_or_else(|| format!("vm{}", dto.vmid)),
                host: host.to_string(),
                kind,
                status: VmStatus::parse(&dto.status),
                cpu_pct: (dto.cpu * 100.0) as f32,
                memory_bytes: dto.mem,
                tags: split_tags(dto.tags.as_deref().unwrap_or_default()),
                last_migrated: None,
            })
            .collect())
    }
}

fn kind_path(kind: VmKind) -> &'static str {
    match kind {
        VmKind::Machine => "qemu",
        VmKind::Container => "lxc",
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn sample_from(time: i64, cpu: f64, memory: f64, load: f64) -> Sample {
    Sample {
        timestamp: DateTime::<Utc>::from_timestamp(time, 0).unwrap_or_else(Utc::now),
        cpu_pct: cpu * 100.0,
        memory,
        load_avg: load,
    }
}

#[async_trait]
impl PlatformClient for RestClient {
    async fn cluster_info(&self) -> Result<ClusterInfo> {
        let resp: Envelope<Vec<ClusterStatusDto>> =
            self.get("api2/json/cluster/status").await?;

        let cluster = resp
            .data
            .iter()
            .find(|e| e.kind == "cluster")
            .or_else(|| resp.data.first())
            .context("cluster status response was empty")?;

        Ok(ClusterInfo {
            name: cluster.name.clone(),
            version: cluster.version.map(|v| v.to_string()).unwrap_or_default(),
            quorum: cluster.quorate.map(|q| q != 0).unwrap_or(true),
        })
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let resp: Envelope<Vec<NodeDto>> = self.get("api2/json/nodes").await?;

        let mut hosts = Vec::with_capacity(resp.data.len());
        for node in resp.data {
            let status = match node.status.as_str() {
                "online" => HostStatus::Online,
                _ => HostStatus::Offline,
            };
            if status == HostStatus::Offline {
                // Detail endpoints are unreachable for offline hosts.
                hosts.push(Host {
                    name: node.node,
                    status,
                    cpu: CpuInfo::default(),
                    memory: MemoryInfo::default(),
                    storage: StorageInfo::default(),
                    vms: Vec::new(),
                    in_maintenance: false,
                });
                continue;
            }
            let host = self.host_detail(&node.node, status).await?;
            hosts.push(host);
        }
        Ok(hosts)
    }

    async fn host_history(&self, host: &str, timeframe: Timeframe) -> Result<Vec<Sample>> {
        let resp: Envelope<Vec<HostRrdDto>> = self
            .get(&format!(
                "api2/json/nodes/{host}/rrddata?timeframe={}",
                timeframe.as_str()
            ))
            .await
            .with_context(|| format!("failed to fetch history of host {host}"))?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|d| {
                // RRD rows with no CPU reading are padding at series edges.
                let cpu = d.cpu?;
                Some(sample_from(
                    d.time,
                    cpu,
                    d.memused.unwrap_or_default(),
                    d.loadavg.unwrap_or_default(),
                ))
            })
            .collect())
    }

    async fn vm_history(
        &self,
        host: &str,
        vm_id: u32,
        kind: VmKind,
        timeframe: Timeframe,
    ) -> Result<Vec<Sample>> {
        let resp: Envelope<Vec<VmRrdDto>> = self
            .get(&format!(
                "api2/json/nodes/{host}/{}/{vm_id}/rrddata?timeframe={}",
                kind_path(kind),
                timeframe.as_str()
            ))
            .await
            .with_context(|| format!("failed to fetch history of VM {vm_id}"))?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|d| {
                let cpu = d.cpu?;
                Some(sample_from(d.time, cpu, d.mem.unwrap_or_default(), 0.0))
            })
            .collect())
    }

    async fn migrate(&self, vm_id: u32, from_host: &str, to_host: &str) -> Result<()> {
        debug!(vm_id, from = %from_host, to = %to_host, "issuing migration");
        self.post_form(
            &format!("api2/json/nodes/{from_host}/qemu/{vm_id}/migrate"),
            &[("target", to_host), ("online", "1")],
        )
        .await
        .with_context(|| format!("migration of VM {vm_id} to {to_host} failed"))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ClusterStatusDto {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    version: Option<u32>,
    quorate: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct NodeDto {
    node: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct UsedTotalDto {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    used: u64,
}

#[derive(Debug, Deserialize)]
struct CpuInfoDto {
    #[serde(default)]
    cpus: u32,
}

#[derive(Debug, Deserialize)]
struct NodeStatusDto {
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: UsedTotalDto,
    rootfs: Option<UsedTotalDto>,
    cpuinfo: Option<CpuInfoDto>,
    #[serde(default)]
    loadavg: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct VmDto {
    vmid: u32,
    name: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    mem: u64,
    tags: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HostRrdDto {
    time: i64,
    cpu: Option<f64>,
    memused: Option<f64>,
    loadavg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VmRrdDto {
    time: i64,
    cpu: Option<f64>,
    mem: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_splitting() {
        assert_eq!(
            split_tags("plb_affinity_web, plb_pin_node1;prod"),
            vec!["plb_affinity_web", "plb_pin_node1", "prod"]
        );
        assert!(split_tags("").is_empty());
        assert!(split_tags(" , ;").is_empty());
    }

    #[test]
    fn kind_paths() {
        assert_eq!(kind_path(VmKind::Machine), "qemu");
        assert_eq!(kind_path(VmKind::Container), "lxc");
    }

    #[test]
    fn client_rejects_bad_endpoint() {
        let settings = PlatformSettings {
            endpoint: "not a url".to_string(),
            ..Default::default()
        };
        assert!(RestClient::new(&settings).is_err());
    }
}
