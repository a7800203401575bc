//! # consensus-core
//!
//! why: keep a cluster's voting membership consistent with its replicated log
//! relations: persisted by consensus-storage; network, timers and the storage
//!            engine stay outside and are reached through small traits
//! what: log view, membership state and manager, catch-up tracking, join waiter

pub mod catchup;
pub mod config;
pub mod error;
pub mod follower;
pub mod log;
pub mod marshal;
pub mod member;
pub mod membership;
pub mod node;
pub mod scheduler;
pub mod time;
pub mod waiter;

pub use catchup::{CatchupGoal, CatchupGoalTracker, CatchupStatus};
pub use config::RaftConfig;
pub use error::{ConsensusError, MarshalError, Result, WaitError};
pub use follower::{FollowerState, FollowerStates};
pub use log::{
    EntryCursor, InMemoryRaftLog, LogEntry, RaftLogCommand, ReadableRaftLog, ReplicatedContent,
};
pub use marshal::Marshal;
pub use member::{MemberId, MemberSet};
pub use membership::{MembershipEntry, RaftMembershipManager, RaftMembershipState};
pub use node::{ExposedRaftState, NodeState, RaftHandle, RaftMachine, RaftNode};
pub use scheduler::{JobHandle, JobScheduler, OnDemandJobScheduler, TokioJobScheduler};
pub use time::{Clock, FakeClock, SystemClock};
pub use waiter::{HealthCheck, MembershipWait, MembershipWaiter};
