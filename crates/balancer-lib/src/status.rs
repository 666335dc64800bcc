//! Local status endpoint
//!
//! A Unix domain socket, namespaced under the daemon's data directory, that
//! answers line-terminated requests with a minimal HTTP/1.1 response.
//! Requests naming `/metrics` receive the Prometheus text exposition;
//! everything else receives the JSON status body. Access control is the
//! socket path's filesystem permissions; nothing binds off-host.

use crate::observability;
use crate::raft::{Peer, RaftStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const SOCKET_FILE: &str = "status.sock";

/// Status socket location under the daemon's data directory.
pub fn socket_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(SOCKET_FILE)
}

/// The JSON body served to status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub node_id: String,
    pub address: String,
    pub is_leader: bool,
    pub state: String,
    pub leader: Option<String>,
    pub peers: Vec<Peer>,
}

/// Where the server reads its fields from
#[derive(Clone)]
pub enum StatusSource {
    /// Live view of the consensus group
    Raft(watch::Receiver<RaftStatus>),
    /// No coordinator; a standalone daemon is trivially the leader
    Standalone { node_id: String },
}

impl StatusSource {
    fn snapshot(&self) -> StatusBody {
        match self {
            StatusSource::Raft(rx) => {
                let status = rx.borrow().clone();
                StatusBody {
                    is_leader: status.role == "leader",
                    node_id: status.node_id,
                    address: status.address,
                    state: status.role,
                    leader: status.leader,
                    peers: status.peers,
                }
            }
            StatusSource::Standalone { node_id } => StatusBody {
                node_id: node_id.clone(),
                address: String::new(),
                is_leader: true,
                state: "standalone".to_string(),
                leader: Some(node_id.clone()),
                peers: vec![],
            },
        }
    }
}

pub struct StatusServer {
    listener: UnixListener,
    source: StatusSource,
    path: PathBuf,
}

impl StatusServer {
    /// Bind the socket, removing any stale file left by a previous run.
    pub fn bind(path: PathBuf, source: StatusSource) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind status socket {}", path.display()))?;

        // Local operator tools run as unprivileged users.
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;

        info!(path = %path.display(), "status endpoint listening");
        Ok(Self {
            listener,
            source,
            path,
        })
    }

    /// Accept loop; each connection is handled independently.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let source = self.source.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, source).await {
                                    debug!(error = %err, "status connection failed");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "status accept failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("status endpoint shutting down");
                    let _ = std::fs::remove_file(&self.path);
                    return;
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, source: StatusSource) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request = String::new();
    tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut request))
        .await
        .context("status request timed out")?
        .context("failed to read status request")?;

    let (content_type, body) = if request.contains("/metrics") {
        (
            "text/plain; version=0.0.4; charset=utf-8",
            observability::gather_text(),
        )
    } else {
        (
            "application/json",
            serde_json::to_string(&source.snapshot()).context("failed to encode status")?,
        )
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let stream = reader.get_mut();
    stream
        .write_all(response.as_bytes())
        .await
        .context("failed to write status response")?;
    stream.flush().await.context("failed to flush status response")?;
    Ok(())
}

/// Query a status socket; used by operator tooling.
pub async fn query(path: &Path) -> Result<StatusBody> {
    let raw = query_raw(path, "GET /status HTTP/1.1").await?;
    let body = raw
        .split("\r\n\r\n")
        .nth(1)
        .context("malformed status response")?;
    serde_json::from_str(body).context("failed to decode status body")
}

/// Send one request line and return the full response text.
pub async fn query_raw(path: &Path, request_line: &str) -> Result<String> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("failed to connect to status socket {}", path.display()))?;
    stream
        .write_all(format!("{request_line}\r\n").as_bytes())
        .await
        .context("failed to send status request")?;

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .context("failed to read status response")?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone(dir: &tempfile::TempDir) -> (PathBuf, StatusServer) {
        let path = dir.path().join(SOCKET_FILE);
        let server = StatusServer::bind(
            path.clone(),
            StatusSource::Standalone {
                node_id: "solo".to_string(),
            },
        )
        .unwrap();
        (path, server)
    }

    #[tokio::test]
    async fn standalone_status_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (path, server) = standalone(&dir);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let body = query(&path).await.unwrap();
        assert_eq!(body.node_id, "solo");
        assert!(body.is_leader);
        assert_eq!(body.state, "standalone");
        assert_eq!(body.leader.as_deref(), Some("solo"));
        assert!(body.peers.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn raft_source_reflects_watch_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_FILE);
        let (status_tx, status_rx) = watch::channel(RaftStatus {
            node_id: "pve1".to_string(),
            address: "10.0.0.1:7946".to_string(),
            term: 3,
            role: "follower".to_string(),
            leader: Some("pve2".to_string()),
            peers: vec![Peer {
                node_id: "pve2".to_string(),
                address: "10.0.0.2:7946".to_string(),
            }],
        });
        let server = StatusServer::bind(path.clone(), StatusSource::Raft(status_rx)).unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let body = query(&path).await.unwrap();
        assert_eq!(body.node_id, "pve1");
        assert!(!body.is_leader);
        assert_eq!(body.leader.as_deref(), Some("pve2"));
        assert_eq!(body.peers.len(), 1);

        status_tx.send_modify(|s| {
            s.role = "leader".to_string();
            s.leader = Some("pve1".to_string());
        });
        let body = query(&path).await.unwrap();
        assert!(body.is_leader);
        assert_eq!(body.state, "leader");

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn metrics_request_gets_text_exposition() {
        let dir = tempfile::tempdir().unwrap();
        let (path, server) = standalone(&dir);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(shutdown_rx));

        // Touch a metric so the exposition is non-empty.
        crate::observability::BalancerMetrics::new().observe_cycle(0.01);

        let response = query_raw(&path, "GET /metrics HTTP/1.1").await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("text/plain"));
        assert!(response.contains("vlb_cycles_total"));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_FILE);
        std::fs::write(&path, b"stale").unwrap();

        let server = StatusServer::bind(
            path.clone(),
            StatusSource::Standalone {
                node_id: "solo".to_string(),
            },
        )
        .unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(shutdown_rx));

        assert!(query(&path).await.is_ok());
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
