//! Coordinator node: timers, transport wiring, and the public API
//!
//! A single task owns the [`RaftCore`] and serializes every event — timer
//! fires, inbound requests, peer replies — so the protocol state needs no
//! locks. Observers read coalescing watch channels: the control loop only
//! ever needs the latest leadership value.

use super::state::{Effects, RaftCore, Role};
use super::storage::{PersistedState, StableStore};
use super::transport::{self, InboundRequest};
use super::{Message, Peer, RaftStatus};
use crate::config::RaftSettings;
use anyhow::{bail, Context, Result};
use rand::Rng;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const ELECTION_TIMEOUT: Duration = Duration::from_millis(1000);
const ELECTION_JITTER_MS: u64 = 500;
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// How long process startup waits for the group to elect a leader
pub const STARTUP_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the consensus group; the single-actor gate for the balancer
pub struct LeaderCoordinator {
    node_id: String,
    address: String,
    status_rx: watch::Receiver<RaftStatus>,
    leader_rx: watch::Receiver<bool>,
    shutdown_tx: broadcast::Sender<()>,
    node_task: JoinHandle<()>,
}

impl LeaderCoordinator {
    /// Join the consensus group. Binds the raft listener, restores the
    /// persisted term/vote, and bootstraps: an empty peer list self-elects
    /// immediately, otherwise the node starts as follower. All errors here
    /// are fatal at startup.
    pub async fn start(settings: &RaftSettings, node_id: String, peers: Vec<Peer>) -> Result<Self> {
        let store = StableStore::open(Path::new(&settings.data_dir))
            .context("failed to open raft stable store")?;
        let persisted = store.load().context("failed to load raft state")?;

        let bind = format!("{}:{}", settings.address, settings.port);
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("failed to bind raft listener on {bind}"))?;
        let address = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or(bind);

        info!(
            node_id = %node_id,
            address = %address,
            peers = peers.len(),
            term = persisted.term,
            "joining consensus group"
        );

        let core = RaftCore::new(node_id.clone(), peers, persisted.term, persisted.voted_for);
        let (status_tx, status_rx) = watch::channel(status_of(&core, &address));
        let (leader_tx, leader_rx) = watch::channel(core.role() == Role::Leader);
        let (request_tx, request_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);

        tokio::spawn(transport::serve(
            listener,
            request_tx,
            shutdown_tx.subscribe(),
        ));
        let node_task = tokio::spawn(node_loop(
            core,
            store,
            address.clone(),
            request_rx,
            status_tx,
            leader_tx,
            shutdown_tx.subscribe(),
        ));

        Ok(Self {
            node_id,
            address,
            status_rx,
            leader_rx,
            shutdown_tx,
            node_task,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_rx.borrow()
    }

    pub fn current_leader(&self) -> Option<String> {
        self.status_rx.borrow().leader.clone()
    }

    /// Coalescing leadership notifications; emits on every transition.
    pub fn leader_changes(&self) -> watch::Receiver<bool> {
        self.leader_rx.clone()
    }

    pub fn status(&self) -> RaftStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<RaftStatus> {
        self.status_rx.clone()
    }

    /// Wait until the group has any leader, or time out.
    pub async fn wait_for_leader(&self, deadline: Duration) -> Result<()> {
        let mut status_rx = self.status_rx.clone();
        let wait = async {
            loop {
                if status_rx.borrow().leader.is_some() {
                    return;
                }
                if status_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            bail!("no leader elected within {deadline:?}");
        }
        if self.status_rx.borrow().leader.is_none() {
            bail!("coordinator stopped before a leader was elected");
        }
        Ok(())
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.node_task.await.context("raft node task panicked")?;
        Ok(())
    }
}

fn status_of(core: &RaftCore, address: &str) -> RaftStatus {
    RaftStatus {
        node_id: core.id().to_string(),
        address: address.to_string(),
        term: core.term(),
        role: core.role().as_str().to_string(),
        leader: core.leader().map(str::to_string),
        peers: core.peers().to_vec(),
    }
}

fn next_election_deadline() -> Instant {
    let jitter = rand::thread_rng().gen_range(0..ELECTION_JITTER_MS);
    Instant::now() + ELECTION_TIMEOUT + Duration::from_millis(jitter)
}

#[allow(clippy::too_many_arguments)]
async fn node_loop(
    mut core: RaftCore,
    store: StableStore,
    address: String,
    mut requests: mpsc::Receiver<InboundRequest>,
    status_tx: watch::Sender<RaftStatus>,
    leader_tx: watch::Sender<bool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (reply_tx, mut replies) = mpsc::channel::<(String, Message)>(64);

    let effects = core.start();
    apply_effects(&core, &store, effects, &reply_tx);
    publish(&core, &address, &status_tx, &leader_tx);

    let mut election_deadline = next_election_deadline();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(election_deadline), if core.role() != Role::Leader => {
                debug!(term = core.term(), "election timeout, starting candidacy");
                let effects = core.on_election_timeout();
                election_deadline = next_election_deadline();
                apply_effects(&core, &store, effects, &reply_tx);
            }
            _ = heartbeat.tick(), if core.role() == Role::Leader => {
                broadcast_message(&core, core.heartbeat(), &reply_tx);
            }
            Some(request) = requests.recv() => {
                let (reply, effects) = core.on_request(request.message);
                if effects.persist {
                    persist(&store, &core);
                }
                if effects.reset_election_timer {
                    election_deadline = next_election_deadline();
                }
                let _ = request.reply.send(reply);
                if let Some(message) = effects.broadcast {
                    broadcast_message(&core, message, &reply_tx);
                }
            }
            Some((peer, message)) = replies.recv() => {
                let was_leader = core.role() == Role::Leader;
                let effects = core.on_reply(&peer, message);
                if effects.persist {
                    persist(&store, &core);
                }
                if effects.reset_election_timer {
                    election_deadline = next_election_deadline();
                }
                if !was_leader && core.role() == Role::Leader {
                    info!(term = core.term(), "elected leader");
                }
                if let Some(message) = effects.broadcast {
                    broadcast_message(&core, message, &reply_tx);
                }
            }
            _ = shutdown.recv() => {
                info!("raft node shutting down");
                return;
            }
        }
        publish(&core, &address, &status_tx, &leader_tx);
    }
}

fn apply_effects(
    core: &RaftCore,
    store: &StableStore,
    effects: Effects,
    reply_tx: &mpsc::Sender<(String, Message)>,
) {
    if effects.persist {
        persist(store, core);
    }
    if let Some(message) = effects.broadcast {
        broadcast_message(core, message, reply_tx);
    }
}

/// Durable state is written before anything leaves the node; a failed
/// write is logged and the node keeps running on its in-memory state.
fn persist(store: &StableStore, core: &RaftCore) {
    let state = PersistedState {
        term: core.term(),
        voted_for: core.voted_for().map(str::to_string),
    };
    if let Err(err) = store.save(&state) {
        error!(error = %err, "failed to persist raft state");
    }
}

fn broadcast_message(core: &RaftCore, message: Message, reply_tx: &mpsc::Sender<(String, Message)>) {
    for peer in core.peers() {
        let peer_id = peer.node_id.clone();
        let peer_addr = peer.address.clone();
        let message = message.clone();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            match transport::call(&peer_addr, &message).await {
                Ok(reply) => {
                    let _ = reply_tx.send((peer_id, reply)).await;
                }
                Err(err) => {
                    debug!(peer = %peer_id, error = %err, "peer unreachable");
                }
            }
        });
    }
}

fn publish(
    core: &RaftCore,
    address: &str,
    status_tx: &watch::Sender<RaftStatus>,
    leader_tx: &watch::Sender<bool>,
) {
    let status = status_of(core, address);
    status_tx.send_if_modified(|current| {
        if *current != status {
            *current = status;
            true
        } else {
            false
        }
    });

    let is_leader = core.role() == Role::Leader;
    let changed = leader_tx.send_if_modified(|current| {
        if *current != is_leader {
            *current = is_leader;
            true
        } else {
            false
        }
    });
    if changed {
        if is_leader {
            info!("this node is now the leader");
        } else {
            warn!("this node lost leadership");
        }
    }
}
