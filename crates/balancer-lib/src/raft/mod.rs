//! Leader-election consensus
//!
//! A compact raft implementation whose only job is single-leader
//! arbitration among manager instances. The replicated log is intentionally
//! empty: heartbeats carry no entries, snapshots do not exist, and the only
//! durable state is the current term and vote under `raft.data_dir`.
//!
//! The coordinator exposes leadership through a coalescing watch channel;
//! consumers only ever need the latest value.

pub mod node;
pub mod state;
pub mod storage;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use node::LeaderCoordinator;
pub use state::{RaftCore, Role};

/// One member of the consensus group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub node_id: String,
    /// `host:port` of the peer's raft listener
    pub address: String,
}

impl Peer {
    /// Parse a configured peer entry: `addr:port` or `node_id@addr:port`.
    /// Bare addresses use the address as node id, matching older deployments.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('@') {
            Some((id, addr)) => Peer {
                node_id: id.to_string(),
                address: addr.to_string(),
            },
            None => Peer {
                node_id: raw.to_string(),
                address: raw.to_string(),
            },
        }
    }
}

/// Wire messages exchanged between group members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    RequestVote { term: u64, candidate_id: String },
    RequestVoteReply { term: u64, granted: bool },
    /// Heartbeat; the log is empty by design so no entries are carried
    AppendEntries { term: u64, leader_id: String },
    AppendEntriesReply { term: u64, success: bool },
}

/// Point-in-time view of the local raft node for the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftStatus {
    pub node_id: String,
    pub address: String,
    pub term: u64,
    pub role: String,
    pub leader: Option<String>,
    pub peers: Vec<Peer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_parsing() {
        let plain = Peer::parse("10.0.0.5:7946");
        assert_eq!(plain.node_id, "10.0.0.5:7946");
        assert_eq!(plain.address, "10.0.0.5:7946");

        let tagged = Peer::parse("pve2@10.0.0.5:7946");
        assert_eq!(tagged.node_id, "pve2");
        assert_eq!(tagged.address, "10.0.0.5:7946");
    }

    #[test]
    fn message_roundtrip() {
        let msg = Message::RequestVote {
            term: 7,
            candidate_id: "pve1".to_string(),
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
