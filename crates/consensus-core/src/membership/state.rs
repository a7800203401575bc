//! # state
//!
//! why: track which member set is in force while a change is still uncommitted
//! relations: owned by manager.rs, persisted through marshal.rs by consensus-storage
//! what: MembershipEntry, RaftMembershipState (committed + appended entries, ordinal)
//!
//! At most one change is outstanding at a time. Appending over an outstanding
//! entry promotes it to committed, and every change bumps the ordinal so a
//! reader can tell two snapshots apart.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{ConsensusError, MarshalError, Result};
use crate::marshal::{self, Marshal};
use crate::member::{self, MemberSet};

/// The voting member set as of a log index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    log_index: u64,
    members: MemberSet,
}

impl MembershipEntry {
    pub fn new(log_index: u64, members: MemberSet) -> Self {
        Self { log_index, members }
    }

    pub fn log_index(&self) -> u64 {
        self.log_index
    }

    pub fn members(&self) -> &MemberSet {
        &self.members
    }
}

impl Marshal for MembershipEntry {
    fn marshal<B: BufMut>(&self, channel: &mut B) {
        channel.put_u64(self.log_index);
        member::marshal_members(&self.members, channel);
    }

    fn unmarshal<B: Buf>(channel: &mut B) -> std::result::Result<Self, MarshalError> {
        let log_index = marshal::get_u64(channel)?;
        let members = member::unmarshal_members(channel)?;
        Ok(Self { log_index, members })
    }
}

/// Membership entries a member needs to know about.
///
/// At most two: the committed one and a later, appended but uncommitted one.
/// Raft only proposes a new membership once the previous one committed, so
/// a log never holds more than one outstanding change. The ordinal counts
/// every effective transition and never goes down, so it orders snapshots
/// of this state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftMembershipState {
    ordinal: u64,
    committed: Option<MembershipEntry>,
    appended: Option<MembershipEntry>,
}

impl RaftMembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the member set appended at `index`.
    ///
    /// Returns false, changing nothing, if an entry at or beyond `index` is
    /// already known, so replaying the log is idempotent. Appending over an
    /// outstanding entry promotes that entry to committed: a leader cannot
    /// have proposed this one before the previous one committed.
    pub fn append(&mut self, index: u64, members: MemberSet) -> bool {
        if self.latest_index().is_some_and(|latest| index <= latest) {
            return false;
        }
        if let Some(previous) = self.appended.take() {
            self.committed = Some(previous);
        }
        self.appended = Some(MembershipEntry::new(index, members));
        self.ordinal += 1;
        true
    }

    /// Commit the outstanding entry if `commit_index` covers it.
    pub fn commit(&mut self, commit_index: u64) -> bool {
        match self.appended.take() {
            Some(entry) if entry.log_index <= commit_index => {
                self.committed = Some(entry);
                self.ordinal += 1;
                true
            }
            other => {
                self.appended = other;
                false
            }
        }
    }

    /// Discard the outstanding entry if it lies at or beyond `from_index`.
    ///
    /// Fails if the truncation would cut into the committed entry.
    pub fn truncate(&mut self, from_index: u64) -> Result<bool> {
        if let Some(committed) = &self.committed {
            if from_index <= committed.log_index {
                return Err(ConsensusError::TruncateCommitted {
                    from_index,
                    committed_index: committed.log_index,
                });
            }
        }
        match &self.appended {
            Some(entry) if from_index <= entry.log_index => {
                self.appended = None;
                self.ordinal += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The most recent member set; empty before anything was appended.
    pub fn get_latest(&self) -> MemberSet {
        self.latest().map(|entry| entry.members.clone()).unwrap_or_default()
    }

    /// The most recent entry, committed or not.
    pub fn latest(&self) -> Option<&MembershipEntry> {
        self.appended.as_ref().or(self.committed.as_ref())
    }

    pub fn committed(&self) -> Option<&MembershipEntry> {
        self.committed.as_ref()
    }

    pub fn get_ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn uncommitted_member_change_in_log(&self) -> bool {
        self.appended.is_some()
    }

    fn latest_index(&self) -> Option<u64> {
        self.latest().map(MembershipEntry::log_index)
    }
}

impl fmt::Display for RaftMembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = |entry: &Option<MembershipEntry>| entry.as_ref().map(|e| e.log_index);
        write!(
            f,
            "RaftMembershipState{{ordinal={}, committed={:?}, appended={:?}}}",
            self.ordinal,
            index(&self.committed),
            index(&self.appended)
        )
    }
}

fn marshal_optional<B: BufMut>(entry: &Option<MembershipEntry>, channel: &mut B) {
    match entry {
        Some(entry) => {
            channel.put_u8(1);
            entry.marshal(channel);
        }
        None => channel.put_u8(0),
    }
}

fn unmarshal_optional<B: Buf>(
    channel: &mut B,
) -> std::result::Result<Option<MembershipEntry>, MarshalError> {
    if marshal::get_flag(channel)? {
        Ok(Some(MembershipEntry::unmarshal(channel)?))
    } else {
        Ok(None)
    }
}

/// `ordinal | committed? | appended?`, each optional entry behind a presence byte.
impl Marshal for RaftMembershipState {
    fn marshal<B: BufMut>(&self, channel: &mut B) {
        channel.put_u64(self.ordinal);
        marshal_optional(&self.committed, channel);
        marshal_optional(&self.appended, channel);
    }

    fn unmarshal<B: Buf>(channel: &mut B) -> std::result::Result<Self, MarshalError> {
        let ordinal = marshal::get_u64(channel)?;
        let committed = unmarshal_optional(channel)?;
        let appended = unmarshal_optional(channel)?;
        if let (Some(committed), Some(appended)) = (&committed, &appended) {
            if appended.log_index <= committed.log_index {
                return Err(MarshalError::Invalid {
                    reason: format!(
                        "appended entry {} not after committed entry {}",
                        appended.log_index, committed.log_index
                    ),
                });
            }
        }
        Ok(Self {
            ordinal,
            committed,
            appended,
        })
    }
}
