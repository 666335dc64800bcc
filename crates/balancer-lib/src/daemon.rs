//! Daemon assembly
//!
//! Wires the platform client, balancer, coordinator, status endpoint, and
//! control loop together and runs until a shutdown signal. With
//! `raft.enabled` the balancer only acts while this instance is the elected
//! leader; without it the daemon is standalone and trivially the leader.

use crate::balancer::{build_balancer, RunGate};
use crate::config::Config;
use crate::control::ControlLoop;
use crate::observability::BalancerMetrics;
use crate::platform::discovery::DiscoveryService;
use crate::platform::{PlatformClient, RestClient};
use crate::raft::{LeaderCoordinator, Peer};
use crate::status::{socket_path, StatusServer, StatusSource};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

pub async fn run(mut config: Config) -> Result<()> {
    let client: Arc<dyn PlatformClient> =
        Arc::new(RestClient::new(&config.platform).context("failed to build platform client")?);

    if config.cluster.name.is_empty() {
        match client.cluster_info().await {
            Ok(info) => {
                info!(cluster = %info.name, "auto-detected cluster name");
                config.cluster.name = info.name;
            }
            Err(err) => warn!(error = %err, "could not auto-detect cluster name"),
        }
    }

    let config = Arc::new(config);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if config.raft.enabled {
        run_distributed(config, client, shutdown_tx).await
    } else {
        run_standalone(config, client, shutdown_tx).await
    }
}

async fn run_distributed(
    config: Arc<Config>,
    client: Arc<dyn PlatformClient>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let discovery = DiscoveryService::new(client.clone(), config.raft.port);

    let node_id = if config.raft.node_id.is_empty() {
        // Config validation guarantees auto-discovery is on here.
        discovery
            .current_node_id()
            .await
            .context("failed to determine local node id")?
    } else {
        config.raft.node_id.clone()
    };

    let peers: Vec<Peer> = if config.raft.auto_discover {
        discovery
            .discover_peers(&node_id)
            .await
            .context("peer discovery failed")?
    } else {
        config.raft.peers.iter().map(|p| Peer::parse(p)).collect()
    };
    info!(node_id = %node_id, peers = peers.len(), "starting in distributed mode");

    let coordinator = LeaderCoordinator::start(&config.raft, node_id, peers).await?;

    let status_server = StatusServer::bind(
        socket_path(&config.raft.data_dir),
        StatusSource::Raft(coordinator.status_watch()),
    )?;
    tokio::spawn(status_server.run(shutdown_tx.subscribe()));

    // The run gate closes on leadership loss or shutdown so an executing
    // plan stops between migrations.
    let gate_rx = spawn_gate(
        coordinator.leader_changes(),
        coordinator.is_leader(),
        shutdown_tx.subscribe(),
    );

    let balancer = build_balancer(client, config.clone(), RunGate::watching(gate_rx));
    let control = ControlLoop::new(
        balancer,
        config.balancing.interval,
        coordinator.leader_changes(),
    );

    info!("waiting for leader election");
    coordinator
        .wait_for_leader(crate::raft::node::STARTUP_DEADLINE)
        .await?;
    info!(leader = ?coordinator.current_leader(), "leader elected");

    let control_task = tokio::spawn(control.run(shutdown_tx.subscribe()));

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = control_task.await;
    coordinator.shutdown().await?;
    Ok(())
}

async fn run_standalone(
    config: Arc<Config>,
    client: Arc<dyn PlatformClient>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let node_id = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "standalone".to_string());
    info!(node_id = %node_id, "starting in standalone mode");

    let status_server = StatusServer::bind(
        socket_path(&config.raft.data_dir),
        StatusSource::Standalone {
            node_id: node_id.clone(),
        },
    )?;
    tokio::spawn(status_server.run(shutdown_tx.subscribe()));

    // Always leader; the gate still closes on shutdown.
    let (leader_tx, leader_rx) = watch::channel(true);
    let gate_rx = spawn_gate(leader_rx.clone(), true, shutdown_tx.subscribe());

    let balancer = build_balancer(client, config.clone(), RunGate::watching(gate_rx));
    let control = ControlLoop::new(balancer, config.balancing.interval, leader_rx);
    let control_task = tokio::spawn(control.run(shutdown_tx.subscribe()));

    wait_for_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = control_task.await;
    drop(leader_tx);
    Ok(())
}

/// Combine leadership and shutdown into the balancer's run gate.
fn spawn_gate(
    mut leader_rx: watch::Receiver<bool>,
    initial: bool,
    mut shutdown: broadcast::Receiver<()>,
) -> watch::Receiver<bool> {
    let (gate_tx, gate_rx) = watch::channel(initial);
    let metrics = BalancerMetrics::new();
    metrics.set_leader(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        let _ = gate_tx.send(false);
                        break;
                    }
                    let leading = *leader_rx.borrow();
                    metrics.set_leader(leading);
                    let _ = gate_tx.send(leading);
                }
                _ = shutdown.recv() => {
                    let _ = gate_tx.send(false);
                    break;
                }
            }
        }
    });
    gate_rx
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
