//! # error
//!
//! why: give callers distinguishable failure kinds instead of stringly errors
//! relations: returned by log.rs, membership/, marshal.rs, config.rs, waiter.rs
//! what: ConsensusError, MarshalError, WaitError and the crate Result alias

use thiserror::Error;

/// Errors raised by the consensus core.
///
/// These are caller or protocol errors: a correct engine never triggers them,
/// so they always propagate instead of being swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// A log command arrived out of strict log order.
    #[error("out of order log command (expected index {expected}, got {actual})")]
    OutOfOrderCommand { expected: u64, actual: u64 },

    /// Truncation would remove an entry that is already committed.
    #[error("cannot truncate from {from_index}: entry {committed_index} is committed")]
    TruncateCommitted { from_index: u64, committed_index: u64 },

    /// The requested entry has been compacted out of the log.
    #[error("entry {index} has been compacted (log starts after {prev_index})")]
    Compacted { index: u64, prev_index: u64 },

    /// The requested entry lies beyond the end of the log.
    #[error("no entry at index {index}")]
    MissingEntry { index: u64 },

    /// Invalid configuration.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Wire data could not be decoded.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

/// Errors raised while decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The channel ended in the middle of a record.
    #[error("end of stream (needed {needed} bytes, {remaining} remaining)")]
    EndOfStream { needed: usize, remaining: usize },

    /// The bytes were present but do not form a valid record.
    #[error("invalid record: {reason}")]
    Invalid { reason: String },
}

/// Terminal failures of a membership wait.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The member did not catch up within the configured bound.
    #[error("timed out after {elapsed_ms}ms waiting to become a caught up member")]
    Timeout { elapsed_ms: u64 },

    /// The local database reported itself unhealthy.
    #[error("database unhealthy: {cause}")]
    Unhealthy { cause: String },

    /// The wait was abandoned before it completed.
    #[error("membership wait cancelled")]
    Cancelled,
}

/// Result type of the consensus core.
pub type Result<T> = std::result::Result<T, ConsensusError>;
