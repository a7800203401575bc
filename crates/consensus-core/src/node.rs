//! # node
//!
//! why: own the mutable raft state on one thread and publish snapshots of it
//! relations: writes log.rs, drives membership/manager.rs, read by waiter.rs
//! what: NodeState enum, ExposedRaftState snapshot, RaftMachine trait, RaftNode

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::{InMemoryRaftLog, RaftLogCommand, ReadableRaftLog};
use crate::member::{MemberId, MemberSet};
use crate::membership::RaftMembershipManager;
use crate::time::Clock;

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

/// Immutable snapshot of a node's raft state, safe to hand to other threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedRaftState {
    pub myself: MemberId,
    pub role: NodeState,
    pub term: u64,
    pub voting_members: MemberSet,
    /// Last commit index heard from a leader, if any leader was heard yet
    pub leader_commit: Option<u64>,
    pub commit_index: u64,
    pub append_index: u64,
}

impl ExposedRaftState {
    fn initial(myself: MemberId) -> Self {
        Self {
            myself,
            role: NodeState::Follower,
            term: 0,
            voting_members: MemberSet::new(),
            leader_commit: None,
            commit_index: 0,
            append_index: 0,
        }
    }

    pub fn is_voting_member(&self) -> bool {
        self.voting_members.contains(&self.myself)
    }

    /// Render for status reporting.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Source of raft state snapshots.
pub trait RaftMachine: Send + Sync {
    fn state(&self) -> ExposedRaftState;
}

/// Read-only handle on a node's published state.
#[derive(Debug, Clone)]
pub struct RaftHandle {
    exposed: Arc<RwLock<ExposedRaftState>>,
}

impl RaftMachine for RaftHandle {
    fn state(&self) -> ExposedRaftState {
        self.exposed.read().clone()
    }
}

/// A single Raft node: the entry log plus the membership it implies.
///
/// Every mutation goes through `&mut self`, and finishes by publishing a
/// fresh snapshot that `RaftHandle`s read.
pub struct RaftNode {
    id: MemberId,
    role: NodeState,
    term: u64,
    commit_index: u64,
    leader_commit: Option<u64>,
    entry_log: Arc<InMemoryRaftLog>,
    membership: RaftMembershipManager,
    exposed: Arc<RwLock<ExposedRaftState>>,
}

impl RaftNode {
    /// Create a node with an empty log.
    pub fn new(id: MemberId, clock: Arc<dyn Clock>, config: RaftConfig) -> Result<Self> {
        Self::with_log(id, Arc::new(InMemoryRaftLog::new()), clock, config)
    }

    /// Create a node over an existing log; call `start` to recover membership.
    pub fn with_log(
        id: MemberId,
        entry_log: Arc<InMemoryRaftLog>,
        clock: Arc<dyn Clock>,
        config: RaftConfig,
    ) -> Result<Self> {
        config.validate()?;
        let membership = RaftMembershipManager::new(entry_log.clone(), clock, config);
        let node = Self {
            id,
            role: NodeState::Follower,
            term: 0,
            commit_index: 0,
            leader_commit: None,
            entry_log,
            membership,
            exposed: Arc::new(RwLock::new(ExposedRaftState::initial(id))),
        };
        node.publish();
        Ok(node)
    }

    pub fn start(&mut self) -> Result<()> {
        self.membership.start()?;
        self.publish();
        Ok(())
    }

    /// Write `commands` to the log and replay them into membership.
    ///
    /// Each command is checked against both before either changes, so a
    /// rejected command touches neither. Commands ahead of it stay applied.
    pub fn apply(&mut self, commands: &[RaftLogCommand]) -> Result<()> {
        let result = commands.iter().try_for_each(|command| {
            self.entry_log.validate(command)?;
            self.membership.validate(command)?;
            self.entry_log.apply(command)?;
            self.membership.apply(command)
        });
        self.publish();
        result
    }

    /// Advance the local commit index; never moves backwards.
    pub fn set_commit_index(&mut self, commit_index: u64) {
        if commit_index > self.commit_index {
            self.commit_index = commit_index;
            self.membership.commit(commit_index);
            self.publish();
        }
    }

    /// Record the commit index reported by the leader.
    pub fn set_leader_commit(&mut self, leader_commit: u64) {
        self.leader_commit = Some(leader_commit);
        self.publish();
    }

    pub fn set_term(&mut self, term: u64) {
        self.term = term;
        self.publish();
    }

    pub fn set_role(&mut self, role: NodeState) {
        self.role = role;
        self.publish();
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    pub fn entry_log(&self) -> &Arc<InMemoryRaftLog> {
        &self.entry_log
    }

    pub fn membership(&self) -> &RaftMembershipManager {
        &self.membership
    }

    pub fn membership_mut(&mut self) -> &mut RaftMembershipManager {
        &mut self.membership
    }

    /// Handle for readers on other threads.
    pub fn handle(&self) -> RaftHandle {
        RaftHandle {
            exposed: Arc::clone(&self.exposed),
        }
    }

    fn publish(&self) {
        let snapshot = ExposedRaftState {
            myself: self.id,
            role: self.role,
            term: self.term,
            voting_members: self.membership.voting_members(),
            leader_commit: self.leader_commit,
            commit_index: self.commit_index,
            append_index: self.entry_log.append_index(),
        };
        *self.exposed.write() = snapshot;
    }
}
