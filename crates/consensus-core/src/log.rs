//! # log
//!
//! why: give the membership layer a read-only view of the replicated log
//! relations: read by membership/manager.rs and catchup.rs, written by node.rs
//! what: LogEntry, RaftLogCommand, ReadableRaftLog, EntryCursor, InMemoryRaftLog
//!
//! Log indices are 1-indexed. Index 0 is the sentinel for "before the log",
//! so an empty log has an append index of 0.

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{ConsensusError, Result};
use crate::member::MemberSet;

/// Payload of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicatedContent {
    /// A new voting member set
    MemberSet(MemberSet),
    /// Anything else; opaque to this layer
    Data(Bytes),
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// What was replicated
    pub content: ReplicatedContent,
}

impl LogEntry {
    pub fn new(term: u64, content: ReplicatedContent) -> Self {
        Self { term, content }
    }

    pub fn data(term: u64, data: impl Into<Bytes>) -> Self {
        Self::new(term, ReplicatedContent::Data(data.into()))
    }

    pub fn member_set(term: u64, members: MemberSet) -> Self {
        Self::new(term, ReplicatedContent::MemberSet(members))
    }

    /// The member set carried by this entry, if it is a membership change.
    pub fn members(&self) -> Option<&MemberSet> {
        match &self.content {
            ReplicatedContent::MemberSet(members) => Some(members),
            ReplicatedContent::Data(_) => None,
        }
    }
}

/// A mutation of the log, in the order it was applied to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftLogCommand {
    Append { index: u64, entry: LogEntry },
    BatchAppend { base_index: u64, entries: Vec<LogEntry> },
    /// Drop every entry at `from_index` and above.
    Truncate { from_index: u64 },
    /// Drop every entry up to and including `prune_index`.
    Prune { prune_index: u64 },
}

/// Read-only view over the replicated log.
///
/// Implementations must be safe for concurrent readers.
pub trait ReadableRaftLog: Send + Sync {
    /// Index of the last appended entry (0 if none).
    fn append_index(&self) -> u64;

    /// Index just before the first retained entry.
    fn prev_index(&self) -> u64;

    /// Term of the entry at `index`. The term at `prev_index` stays readable.
    fn read_entry_term(&self, index: u64) -> Result<u64>;

    fn read_entry(&self, index: u64) -> Result<LogEntry>;

    /// Lazily iterate the entries from `from_index` to the end of the log.
    fn get_entry_cursor(&self, from_index: u64) -> Result<EntryCursor<'_>>;
}

/// Cursor over `(index, entry)` pairs, reading one entry per step.
pub struct EntryCursor<'a> {
    log: &'a (dyn ReadableRaftLog + 'a),
    next_index: u64,
}

impl<'a> EntryCursor<'a> {
    /// Open a cursor on `log`, failing if `from_index` has been compacted away.
    pub fn open(log: &'a (dyn ReadableRaftLog + 'a), from_index: u64) -> Result<Self> {
        let prev_index = log.prev_index();
        if prev_index > 0 && from_index <= prev_index {
            return Err(ConsensusError::Compacted {
                index: from_index,
                prev_index,
            });
        }
        Ok(Self {
            log,
            next_index: from_index.max(prev_index + 1),
        })
    }
}

impl<'a> Iterator for EntryCursor<'a> {
    type Item = Result<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index > self.log.append_index() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(self.log.read_entry(index).map(|entry| (index, entry)))
    }
}

// -- in-memory log implementation --

#[derive(Debug, Default)]
struct Entries {
    prev_index: u64,
    prev_term: u64,
    /// entry at log index `i` lives at `entries[i - prev_index - 1]`
    entries: Vec<LogEntry>,
}

impl Entries {
    fn append_index(&self) -> u64 {
        self.prev_index + self.entries.len() as u64
    }

    fn slot(&self, index: u64) -> Result<usize> {
        if index <= self.prev_index {
            return Err(ConsensusError::Compacted {
                index,
                prev_index: self.prev_index,
            });
        }
        if index > self.append_index() {
            return Err(ConsensusError::MissingEntry { index });
        }
        Ok((index - self.prev_index - 1) as usize)
    }

    fn validate(&self, command: &RaftLogCommand) -> Result<()> {
        let expected = self.append_index() + 1;
        match command {
            RaftLogCommand::Append { index, .. } if *index != expected => {
                Err(ConsensusError::OutOfOrderCommand {
                    expected,
                    actual: *index,
                })
            }
            RaftLogCommand::BatchAppend { base_index, .. } if *base_index != expected => {
                Err(ConsensusError::OutOfOrderCommand {
                    expected,
                    actual: *base_index,
                })
            }
            RaftLogCommand::Truncate { from_index } if *from_index < expected => {
                self.slot(*from_index).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, index: u64, entry: LogEntry) -> Result<()> {
        let expected = self.append_index() + 1;
        if index != expected {
            return Err(ConsensusError::OutOfOrderCommand {
                expected,
                actual: index,
            });
        }
        self.entries.push(entry);
        Ok(())
    }
}

/// In-memory entry log.
#[derive(Debug, Default)]
pub struct InMemoryRaftLog {
    inner: RwLock<Entries>,
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the end of the log, returning its index.
    pub fn append(&self, entry: LogEntry) -> u64 {
        let mut inner = self.inner.write();
        inner.entries.push(entry);
        inner.append_index()
    }

    /// Remove every entry at `from_index` and above.
    pub fn truncate(&self, from_index: u64) -> Result<()> {
        let mut inner = self.inner.write();
        if from_index > inner.append_index() {
            return Ok(());
        }
        let slot = inner.slot(from_index)?;
        inner.entries.truncate(slot);
        Ok(())
    }

    /// Remove every entry up to and including `prune_index`.
    ///
    /// Returns the new prev index.
    pub fn prune(&self, prune_index: u64) -> u64 {
        let mut inner = self.inner.write();
        let upto = prune_index.min(inner.append_index());
        if upto <= inner.prev_index {
            return inner.prev_index;
        }
        let count = (upto - inner.prev_index) as usize;
        let removed: Vec<LogEntry> = inner.entries.drain(..count).collect();
        if let Some(last) = removed.last() {
            inner.prev_term = last.term;
        }
        inner.prev_index = upto;
        upto
    }

    /// Check that `command` would apply cleanly, without applying it.
    pub fn validate(&self, command: &RaftLogCommand) -> Result<()> {
        self.inner.read().validate(command)
    }

    /// Apply one log command; a rejected command leaves the log untouched.
    pub fn apply(&self, command: &RaftLogCommand) -> Result<()> {
        self.inner.read().validate(command)?;
        match command {
            RaftLogCommand::Append { index, entry } => {
                self.inner.write().push(*index, entry.clone())
            }
            RaftLogCommand::BatchAppend {
                base_index,
                entries,
            } => {
                let mut inner = self.inner.write();
                for (offset, entry) in entries.iter().enumerate() {
                    inner.push(base_index + offset as u64, entry.clone())?;
                }
                Ok(())
            }
            RaftLogCommand::Truncate { from_index } => self.truncate(*from_index),
            RaftLogCommand::Prune { prune_index } => {
                self.prune(*prune_index);
                Ok(())
            }
        }
    }
}

impl ReadableRaftLog for InMemoryRaftLog {
    fn append_index(&self) -> u64 {
        self.inner.read().append_index()
    }

    fn prev_index(&self) -> u64 {
        self.inner.read().prev_index
    }

    fn read_entry_term(&self, index: u64) -> Result<u64> {
        let inner = self.inner.read();
        if index == inner.prev_index {
            return Ok(inner.prev_term);
        }
        let slot = inner.slot(index)?;
        Ok(inner.entries[slot].term)
    }

    fn read_entry(&self, index: u64) -> Result<LogEntry> {
        let inner = self.inner.read();
        let slot = inner.slot(index)?;
        Ok(inner.entries[slot].clone())
    }

    fn get_entry_cursor(&self, from_index: u64) -> Result<EntryCursor<'_>> {
        EntryCursor::open(self, from_index)
    }
}
