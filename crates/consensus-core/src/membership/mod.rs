//! # membership
//!
//! why: keep the voting member set consistent with the replicated log
//! relations: state.rs is owned by manager.rs, which node.rs drives
//! what: RaftMembershipState (versioned entries), RaftMembershipManager (log replay)

mod manager;
mod state;

pub use manager::{MembersListener, RaftMembershipManager};
pub use state::{MembershipEntry, RaftMembershipState};
