//! # follower
//!
//! why: track how far each follower has replicated, as seen by the leader
//! relations: fed to catchup.rs goals and membership/manager.rs admission
//! what: FollowerState (monotonic match index), FollowerStates (immutable map)

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::member::MemberId;

/// Replication progress of one follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FollowerState {
    match_index: u64,
}

impl FollowerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful append response up to `index`.
    ///
    /// Progress never regresses: a stale response with a lower index is ignored.
    #[must_use]
    pub fn on_success_response(self, index: u64) -> Self {
        Self {
            match_index: self.match_index.max(index),
        }
    }

    pub fn match_index(&self) -> u64 {
        self.match_index
    }
}

/// Leader's view of all followers.
///
/// Updates produce a new value; readers holding an older copy are unaffected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerStates {
    states: Arc<BTreeMap<MemberId, FollowerState>>,
}

impl FollowerStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy with `member`'s state replaced.
    #[must_use]
    pub fn with(&self, member: MemberId, state: FollowerState) -> Self {
        let mut states = (*self.states).clone();
        states.insert(member, state);
        Self {
            states: Arc::new(states),
        }
    }

    /// A copy with `member` advanced by a success response.
    #[must_use]
    pub fn on_success_response(&self, member: MemberId, index: u64) -> Self {
        let state = self.get(&member).on_success_response(index);
        self.with(member, state)
    }

    /// State of `member`; unknown members have made no progress.
    pub fn get(&self, member: &MemberId) -> FollowerState {
        self.states.get(member).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &FollowerState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_index_does_not_regress_progress() {
        let state = FollowerState::new().on_success_response(84).on_success_response(50);
        assert_eq!(state.match_index(), 84);

        let state = state.on_success_response(100);
        assert_eq!(state.match_index(), 100);
    }

    #[test]
    fn updates_leave_earlier_copies_untouched() {
        let member = MemberId::random();
        let before = FollowerStates::new().on_success_response(member, 10);
        let after = before.on_success_response(member, 20);

        assert_eq!(before.get(&member).match_index(), 10);
        assert_eq!(after.get(&member).match_index(), 20);
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn unknown_member_has_no_progress() {
        let states = FollowerStates::new();
        assert!(states.is_empty());
        assert_eq!(states.get(&MemberId::random()), FollowerState::default());
    }
}
