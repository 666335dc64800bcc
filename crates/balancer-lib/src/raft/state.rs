//! Pure raft state machine
//!
//! All protocol decisions live here, synchronously and without I/O, so the
//! election rules can be tested directly. The node task feeds in timer and
//! message events and carries out the returned effects (persisting state,
//! broadcasting messages, resetting the election timer).

use super::{Message, Peer};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate => "candidate",
            Role::Leader => "leader",
        }
    }
}

/// Side effects the node task must carry out after a state transition
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Message to send to every peer
    pub broadcast: Option<Message>,
    /// Durable term/vote changed and must be saved before anything is sent
    pub persist: bool,
    pub reset_election_timer: bool,
}

#[derive(Debug)]
pub struct RaftCore {
    id: String,
    peers: Vec<Peer>,
    term: u64,
    voted_for: Option<String>,
    role: Role,
    leader: Option<String>,
    votes: HashSet<String>,
}

impl RaftCore {
    pub fn new(id: String, peers: Vec<Peer>, term: u64, voted_for: Option<String>) -> Self {
        Self {
            id,
            peers,
            term,
            voted_for,
            role: Role::Follower,
            leader: None,
            votes: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Votes needed for leadership: a majority of the full group
    /// (peers plus self).
    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Bootstrap. An empty peer list self-bootstraps as a single-server
    /// group and assumes leadership immediately.
    pub fn start(&mut self) -> Effects {
        if self.peers.is_empty() {
            self.term += 1;
            self.voted_for = Some(self.id.clone());
            self.become_leader();
            return Effects {
                persist: true,
                ..Default::default()
            };
        }
        Effects {
            reset_election_timer: true,
            ..Default::default()
        }
    }

    /// The election timer fired without hearing from a leader.
    pub fn on_election_timeout(&mut self) -> Effects {
        if self.role == Role::Leader {
            return Effects::default();
        }
        self.term += 1;
        self.role = Role::Candidate;
        self.leader = None;
        self.voted_for = Some(self.id.clone());
        self.votes = HashSet::from([self.id.clone()]);

        if self.votes.len() >= self.quorum() {
            self.become_leader();
            return Effects {
                broadcast: Some(self.heartbeat()),
                persist: true,
                ..Default::default()
            };
        }

        Effects {
            broadcast: Some(Message::RequestVote {
                term: self.term,
                candidate_id: self.id.clone(),
            }),
            persist: true,
            reset_election_timer: true,
        }
    }

    /// Leader heartbeat tick.
    pub fn heartbeat(&self) -> Message {
        Message::AppendEntries {
            term: self.term,
            leader_id: self.id.clone(),
        }
    }

    /// Incoming request from a peer; returns the reply plus local effects.
    pub fn on_request(&mut self, message: Message) -> (Message, Effects) {
        match message {
            Message::RequestVote { term, candidate_id } => self.on_request_vote(term, candidate_id),
            Message::AppendEntries { term, leader_id } => self.on_append_entries(term, leader_id),
            // Replies are not requests; answer with our term and move on.
            _ => (
                Message::AppendEntriesReply {
                    term: self.term,
                    success: false,
                },
                Effects::default(),
            ),
        }
    }

    fn on_request_vote(&mut self, term: u64, candidate_id: String) -> (Message, Effects) {
        if term < self.term {
            return (
                Message::RequestVoteReply {
                    term: self.term,
                    granted: false,
                },
                Effects::default(),
            );
        }

        let mut persist = false;
        if term > self.term {
            self.step_down(term);
            persist = true;
        }

        // The log is empty on every member, so any candidate's log is
        // up to date; only the vote record gates the grant.
        let granted = match &self.voted_for {
            None => true,
            Some(v) => v == &candidate_id,
        };
        if granted {
            self.voted_for = Some(candidate_id);
            persist = true;
        }

        (
            Message::RequestVoteReply {
                term: self.term,
                granted,
            },
            Effects {
                persist,
                reset_election_timer: granted,
                ..Default::default()
            },
        )
    }

    fn on_append_entries(&mut self, term: u64, leader_id: String) -> (Message, Effects) {
        if term < self.term {
            return (
                Message::AppendEntriesReply {
                    term: self.term,
                    success: false,
                },
                Effects::default(),
            );
        }

        let persist = term > self.term;
        if persist {
            self.term = term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader = Some(leader_id);
        self.votes.clear();

        (
            Message::AppendEntriesReply {
                term: self.term,
                success: true,
            },
            Effects {
                persist,
                reset_election_timer: true,
                ..Default::default()
            },
        )
    }

    /// Reply received from `peer` to a message we sent.
    pub fn on_reply(&mut self, peer: &str, message: Message) -> Effects {
        match message {
            Message::RequestVoteReply { term, granted } => {
                if term > self.term {
                    self.step_down(term);
                    return Effects {
                        persist: true,
                        reset_election_timer: true,
                        ..Default::default()
                    };
                }
                if self.role == Role::Candidate && term == self.term && granted {
                    self.votes.insert(peer.to_string());
                    if self.votes.len() >= self.quorum() {
                        self.become_leader();
                        return Effects {
                            broadcast: Some(self.heartbeat()),
                            ..Default::default()
                        };
                    }
                }
                Effects::default()
            }
            Message::AppendEntriesReply { term, .. } => {
                if term > self.term {
                    self.step_down(term);
                    return Effects {
                        persist: true,
                        reset_election_timer: true,
                        ..Default::default()
                    };
                }
                Effects::default()
            }
            _ => Effects::default(),
        }
    }

    fn step_down(&mut self, term: u64) {
        self.term = term;
        self.role = Role::Follower;
        self.voted_for = None;
        self.leader = None;
        self.votes.clear();
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        self.votes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(names: &[&str]) -> Vec<Peer> {
        names
            .iter()
            .map(|n| Peer {
                node_id: n.to_string(),
                address: format!("{n}:7946"),
            })
            .collect()
    }

    #[test]
    fn single_node_bootstraps_as_leader() {
        let mut core = RaftCore::new("a".to_string(), vec![], 0, None);
        let effects = core.start();
        assert_eq!(core.role(), Role::Leader);
        assert_eq!(core.leader(), Some("a"));
        assert_eq!(core.term(), 1);
        assert!(effects.persist);
    }

    #[test]
    fn multi_node_starts_as_follower() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 0, None);
        let effects = core.start();
        assert_eq!(core.role(), Role::Follower);
        assert!(effects.reset_election_timer);
        assert_eq!(core.quorum(), 2);
    }

    #[test]
    fn election_timeout_starts_candidacy() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 0, None);
        core.start();
        let effects = core.on_election_timeout();

        assert_eq!(core.role(), Role::Candidate);
        assert_eq!(core.term(), 1);
        assert_eq!(core.voted_for(), Some("a"));
        assert!(effects.persist);
        assert_eq!(
            effects.broadcast,
            Some(Message::RequestVote {
                term: 1,
                candidate_id: "a".to_string()
            })
        );
    }

    #[test]
    fn majority_of_votes_wins_leadership() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 0, None);
        core.start();
        core.on_election_timeout();

        let effects = core.on_reply(
            "b",
            Message::RequestVoteReply {
                term: 1,
                granted: true,
            },
        );
        // Self + b is a majority of three.
        assert_eq!(core.role(), Role::Leader);
        assert_eq!(core.leader(), Some("a"));
        assert!(matches!(
            effects.broadcast,
            Some(Message::AppendEntries { term: 1, .. })
        ));
    }

    #[test]
    fn minority_does_not_win() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c", "d", "e"]), 0, None);
        core.start();
        core.on_election_timeout();
        core.on_reply(
            "b",
            Message::RequestVoteReply {
                term: 1,
                granted: true,
            },
        );
        // Two of five is not a quorum of three.
        assert_eq!(core.role(), Role::Candidate);
    }

    #[test]
    fn vote_is_granted_once_per_term() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 0, None);
        core.start();

        let (reply, effects) = core.on_request(Message::RequestVote {
            term: 1,
            candidate_id: "b".to_string(),
        });
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 1,
                granted: true
            }
        );
        assert!(effects.persist);

        let (reply, _) = core.on_request(Message::RequestVote {
            term: 1,
            candidate_id: "c".to_string(),
        });
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 1,
                granted: false
            }
        );

        // The same candidate may ask again.
        let (reply, _) = core.on_request(Message::RequestVote {
            term: 1,
            candidate_id: "b".to_string(),
        });
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 1,
                granted: true
            }
        );
    }

    #[test]
    fn stale_term_requests_are_rejected() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b"]), 5, None);

        let (reply, _) = core.on_request(Message::RequestVote {
            term: 3,
            candidate_id: "b".to_string(),
        });
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 5,
                granted: false
            }
        );

        let (reply, _) = core.on_request(Message::AppendEntries {
            term: 3,
            leader_id: "b".to_string(),
        });
        assert_eq!(
            reply,
            Message::AppendEntriesReply {
                term: 5,
                success: false
            }
        );
    }

    #[test]
    fn heartbeat_converts_candidate_to_follower() {
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 0, None);
        core.start();
        core.on_election_timeout();
        assert_eq!(core.role(), Role::Candidate);

        let (reply, effects) = core.on_request(Message::AppendEntries {
            term: 1,
            leader_id: "b".to_string(),
        });
        assert_eq!(core.role(), Role::Follower);
        assert_eq!(core.leader(), Some("b"));
        assert!(effects.reset_election_timer);
        assert_eq!(
            reply,
            Message::AppendEntriesReply {
                term: 1,
                success: true
            }
        );
    }

    #[test]
    fn higher_term_reply_steps_leader_down() {
        let mut core = RaftCore::new("a".to_string(), vec![], 0, None);
        core.start();
        assert_eq!(core.role(), Role::Leader);

        let effects = core.on_reply(
            "b",
            Message::AppendEntriesReply {
                term: 9,
                success: false,
            },
        );
        assert_eq!(core.role(), Role::Follower);
        assert_eq!(core.term(), 9);
        assert_eq!(core.leader(), None);
        assert!(effects.persist);
    }

    #[test]
    fn leader_ignores_election_timer() {
        let mut core = RaftCore::new("a".to_string(), vec![], 0, None);
        core.start();
        let effects = core.on_election_timeout();
        assert_eq!(core.role(), Role::Leader);
        assert_eq!(effects, Effects::default());
    }

    #[test]
    fn persisted_vote_survives_into_new_core() {
        // Restart mid-term: the prior vote must still bind.
        let mut core = RaftCore::new("a".to_string(), peers(&["b", "c"]), 4, Some("b".to_string()));
        let (reply, _) = core.on_request(Message::RequestVote {
            term: 4,
            candidate_id: "c".to_string(),
        });
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 4,
                granted: false
            }
        );
    }
}
