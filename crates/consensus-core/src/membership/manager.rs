//! # manager
//!
//! why: derive the voting member set from the entry log as commands arrive
//! relations: owns state.rs, reads log.rs, drives catchup.rs for joining members;
//!            driven by node.rs and recovered by consensus-storage
//! what: RaftMembershipManager, MembersListener

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catchup::{CatchupGoalTracker, CatchupStatus};
use crate::config::RaftConfig;
use crate::error::{ConsensusError, Result};
use crate::follower::FollowerStates;
use crate::log::{EntryCursor, LogEntry, RaftLogCommand, ReadableRaftLog};
use crate::member::{MemberId, MemberSet};
use crate::membership::RaftMembershipState;
use crate::time::Clock;

/// Notified whenever the latest member set changes.
pub trait MembersListener: Send + Sync {
    fn on_members_changed(&self, voting_members: &MemberSet);
}

impl<F> MembersListener for F
where
    F: Fn(&MemberSet) + Send + Sync,
{
    fn on_members_changed(&self, voting_members: &MemberSet) {
        self(voting_members)
    }
}

/// Keeps the membership state in step with the entry log.
///
/// Owned by the consensus engine: commands must arrive from a single thread
/// of control, in log order. Other threads read membership through an
/// exposed snapshot, never through this struct.
pub struct RaftMembershipManager {
    entry_log: Arc<dyn ReadableRaftLog>,
    clock: Arc<dyn Clock>,
    config: RaftConfig,
    state: RaftMembershipState,
    recover_from_index: Box<dyn Fn() -> u64 + Send + Sync>,
    /// index of the last log command seen, once known
    last_index: Option<u64>,
    catchup: BTreeMap<MemberId, CatchupGoalTracker>,
    listeners: Vec<Box<dyn MembersListener>>,
}

impl RaftMembershipManager {
    pub fn new(
        entry_log: Arc<dyn ReadableRaftLog>,
        clock: Arc<dyn Clock>,
        config: RaftConfig,
    ) -> Self {
        Self::with_state(entry_log, clock, config, RaftMembershipState::new())
    }

    /// Start from a previously persisted state.
    pub fn with_state(
        entry_log: Arc<dyn ReadableRaftLog>,
        clock: Arc<dyn Clock>,
        config: RaftConfig,
        state: RaftMembershipState,
    ) -> Self {
        Self {
            entry_log,
            clock,
            config,
            state,
            recover_from_index: Box::new(|| 0),
            last_index: None,
            catchup: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Index from which `start` replays the entry log.
    pub fn set_recover_from_index_supplier(
        &mut self,
        supplier: impl Fn() -> u64 + Send + Sync + 'static,
    ) {
        self.recover_from_index = Box::new(supplier);
    }

    pub fn register_listener(&mut self, listener: impl MembersListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Replay membership entries already in the entry log.
    pub fn start(&mut self) -> Result<()> {
        let recover_from = (self.recover_from_index)();
        let append_index = self.entry_log.append_index();
        tracing::info!(state = %self.state, "membership state before recovery");
        tracing::info!(from = recover_from, to = append_index, "recovering membership");

        let before = self.state.get_latest();
        let log = Arc::clone(&self.entry_log);
        // an explicit index below the compacted range is an error, not a skip
        let start = if recover_from == 0 { log.prev_index() + 1 } else { recover_from };
        for item in EntryCursor::open(log.as_ref(), start)? {
            let (index, entry) = item?;
            self.append_entry(index, &entry);
        }
        self.last_index = Some(append_index);

        tracing::info!(state = %self.state, "membership state after recovery");
        self.notify_if_changed(&before);
        Ok(())
    }

    /// Apply `commands` in log order, then advance the commit point.
    pub fn process_log<'a>(
        &mut self,
        commit_index: u64,
        commands: impl IntoIterator<Item = &'a RaftLogCommand>,
    ) -> Result<()> {
        for command in commands {
            self.apply(command)?;
        }
        self.commit(commit_index);
        Ok(())
    }

    /// Check that `command` would apply cleanly, without applying it.
    pub fn validate(&self, command: &RaftLogCommand) -> Result<()> {
        let (from_index, appends) = match command {
            RaftLogCommand::Append { index, .. } => (*index, true),
            RaftLogCommand::BatchAppend { base_index, .. } => (*base_index, true),
            RaftLogCommand::Truncate { from_index } => (*from_index, false),
            RaftLogCommand::Prune { .. } => return Ok(()),
        };

        if let Some(last) = self.last_index {
            let expected = last + 1;
            if (appends && from_index != expected) || (!appends && from_index > expected) {
                return Err(ConsensusError::OutOfOrderCommand {
                    expected,
                    actual: from_index,
                });
            }
        }
        match self.state.committed() {
            Some(committed) if !appends && from_index <= committed.log_index() => {
                Err(ConsensusError::TruncateCommitted {
                    from_index,
                    committed_index: committed.log_index(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Apply one log command; a rejected command leaves the state untouched.
    pub fn apply(&mut self, command: &RaftLogCommand) -> Result<()> {
        self.validate(command)?;
        match command {
            RaftLogCommand::Append { index, entry } => {
                self.append(*index, std::slice::from_ref(entry))
            }
            RaftLogCommand::BatchAppend {
                base_index,
                entries,
            } => self.append(*base_index, entries),
            RaftLogCommand::Truncate { from_index } => self.truncate(*from_index),
            // pruned entries are committed, nothing to revert
            RaftLogCommand::Prune { .. } => Ok(()),
        }
    }

    /// Advance the committed membership entry to `commit_index`.
    pub fn commit(&mut self, commit_index: u64) {
        if self.state.commit(commit_index) {
            tracing::info!(commit_index, state = %self.state, "committed member set");
        }
    }

    fn append(&mut self, base_index: u64, entries: &[LogEntry]) -> Result<()> {
        let before = self.state.get_latest();
        for (offset, entry) in entries.iter().enumerate() {
            self.append_entry(base_index + offset as u64, entry);
        }
        if !entries.is_empty() {
            self.last_index = Some(base_index + entries.len() as u64 - 1);
        }
        self.notify_if_changed(&before);
        Ok(())
    }

    fn append_entry(&mut self, index: u64, entry: &LogEntry) {
        let Some(members) = entry.members() else {
            return;
        };
        if self.state.uncommitted_member_change_in_log() {
            tracing::warn!(index, "appending with uncommitted membership change in log");
        }
        if self.state.append(index, members.clone()) {
            tracing::info!(index, members = ?members, "appending new member set");
        } else {
            tracing::warn!(
                index,
                state = %self.state,
                "appending member set was ignored"
            );
        }
    }

    fn truncate(&mut self, from_index: u64) -> Result<()> {
        let before = self.state.get_latest();
        if self.state.truncate(from_index)? {
            tracing::info!(from_index, state = %self.state, "truncated member set");
            // an earlier uncommitted entry may survive below the truncation point
            if let Some((index, members)) = self.find_last_membership_entry(from_index)? {
                self.state.append(index, members);
            }
        }
        self.last_index = Some(from_index.saturating_sub(1));
        self.notify_if_changed(&before);
        Ok(())
    }

    /// Latest membership entry left in the log below `below_index`.
    fn find_last_membership_entry(&self, below_index: u64) -> Result<Option<(u64, MemberSet)>> {
        let committed = self.state.committed().map_or(0, |entry| entry.log_index());
        let start = (committed + 1).max(self.entry_log.prev_index() + 1);

        let mut last = None;
        for item in EntryCursor::open(self.entry_log.as_ref(), start)? {
            let (index, entry) = item?;
            if index >= below_index {
                break;
            }
            if let Some(members) = entry.members() {
                last = Some((index, members.clone()));
            }
        }
        Ok(last)
    }

    fn notify_if_changed(&mut self, before: &MemberSet) {
        let latest = self.state.get_latest();
        if &latest == before {
            return;
        }
        // members that made it into the voting set no longer need catching up
        self.catchup.retain(|member, _| !latest.contains(member));
        for listener in &self.listeners {
            listener.on_members_changed(&latest);
        }
    }

    /// Start catching up `member` before it can be proposed as a voter.
    ///
    /// Returns false if the member already votes or is already catching up.
    pub fn start_catchup(&mut self, member: MemberId) -> bool {
        if self.state.get_latest().contains(&member) || self.catchup.contains_key(&member) {
            return false;
        }
        let tracker = CatchupGoalTracker::new(
            Arc::clone(&self.entry_log),
            Arc::clone(&self.clock),
            self.config.catchup_round_timeout(),
            self.config.catchup_timeout(),
        )
        .with_max_rounds(self.config.max_catchup_rounds);
        tracing::info!(%member, target_index = tracker.target_index(), "catching up new member");
        self.catchup.insert(member, tracker);
        true
    }

    /// Feed follower progress to every member being caught up.
    ///
    /// Returns the members that caught up with this update, in id order.
    /// Finished attempts, successful or not, stop being tracked.
    pub fn on_follower_state_change(&mut self, follower_states: &FollowerStates) -> Vec<MemberId> {
        let mut caught_up = Vec::new();
        self.catchup.retain(|member, tracker| {
            match tracker.update_progress(&follower_states.get(member)) {
                CatchupStatus::Running { .. } => true,
                CatchupStatus::Achieved => {
                    caught_up.push(*member);
                    false
                }
                failed => {
                    tracing::warn!(%member, status = ?failed, "member failed to catch up");
                    false
                }
            }
        });
        caught_up
    }

    /// Members currently counted for quorum.
    pub fn voting_members(&self) -> MemberSet {
        self.state.get_latest()
    }

    /// Members the leader replicates to: voters plus members catching up.
    pub fn replication_members(&self) -> MemberSet {
        let mut members = self.state.get_latest();
        members.extend(self.catchup.keys().copied());
        members
    }

    pub fn uncommitted_member_change_in_log(&self) -> bool {
        self.state.uncommitted_member_change_in_log()
    }

    /// Copy of the membership state, for persisting.
    pub fn membership_state(&self) -> RaftMembershipState {
        self.state.clone()
    }
}
