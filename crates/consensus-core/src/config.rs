//! # config
//!
//! why: collect the timeouts and bounds that govern catch-up and joining
//! relations: read by catchup.rs, membership/manager.rs and waiter.rs
//! what: RaftConfig with defaults, validation and json loading

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsensusError, Result};

/// Configuration for a raft member.
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Minimum election timeout (ms)
    pub election_timeout_min: u64,
    /// Maximum election timeout (ms)
    pub election_timeout_max: u64,
    /// Heartbeat interval (ms)
    pub heartbeat_interval: u64,

    /// Time bound of a single catch-up round (ms).
    ///
    /// A follower that reaches the round target within this bound is
    /// considered caught up. Defaults to the minimum election timeout.
    pub catchup_round_timeout: u64,

    /// Overall bound of one catch-up attempt (ms).
    pub catchup_timeout: u64,

    /// Maximum number of catch-up rounds before giving up.
    pub max_catchup_rounds: u32,

    /// How long a joining member waits to become a caught up voter (ms).
    pub join_catchup_timeout: u64,

    /// First delay between membership wait polls (ms). Each further poll
    /// waits one interval longer, up to `join_max_poll_interval`.
    pub join_poll_interval: u64,

    /// Upper bound on the delay between membership wait polls (ms).
    pub join_max_poll_interval: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            catchup_round_timeout: 150,
            catchup_timeout: 10_000,
            max_catchup_rounds: 10,
            join_catchup_timeout: 10 * 60 * 1000,
            join_poll_interval: 1000,
            join_max_poll_interval: 60_000,
        }
    }
}

impl RaftConfig {
    /// Parse a configuration from json, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RaftConfig = serde_json::from_str(json).map_err(|e| ConsensusError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants between the configured values.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| -> Result<()> {
            Err(ConsensusError::Config {
                reason: reason.to_string(),
            })
        };

        if self.election_timeout_min >= self.election_timeout_max {
            return fail("election_timeout_min must be < election_timeout_max");
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return fail("heartbeat_interval must be < election_timeout_min");
        }
        if self.catchup_round_timeout == 0 || self.catchup_timeout == 0 {
            return fail("catch-up timeouts must be positive");
        }
        if self.max_catchup_rounds == 0 {
            return fail("max_catchup_rounds must be positive");
        }
        if self.join_catchup_timeout == 0 || self.join_poll_interval == 0 {
            return fail("join timeout and poll interval must be positive");
        }
        if self.join_max_poll_interval < self.join_poll_interval {
            return fail("join_max_poll_interval must be >= join_poll_interval");
        }
        Ok(())
    }

    pub fn catchup_round_timeout(&self) -> Duration {
        Duration::from_millis(self.catchup_round_timeout)
    }

    pub fn catchup_timeout(&self) -> Duration {
        Duration::from_millis(self.catchup_timeout)
    }

    pub fn join_catchup_timeout(&self) -> Duration {
        Duration::from_millis(self.join_catchup_timeout)
    }

    /// Round bound for catch-up judged by the membership waiter.
    ///
    /// The waiter only sees progress once per poll, so a round has to span
    /// the longest gap between polls plus the usual round bound.
    pub fn join_catchup_round_timeout(&self) -> Duration {
        Duration::from_millis(self.join_max_poll_interval + self.catchup_round_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RaftConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.catchup_round_timeout, config.election_timeout_min);
        assert_eq!(config.max_catchup_rounds, 10);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let json = r#"{ "catchup_timeout": 2500, "max_catchup_rounds": 3 }"#;
        let config = RaftConfig::from_json(json).unwrap();
        assert_eq!(config.catchup_timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_catchup_rounds, 3);
        assert_eq!(config.heartbeat_interval, 50);
    }

    #[test]
    fn inverted_election_window_is_rejected() {
        let config = RaftConfig {
            election_timeout_min: 400,
            election_timeout_max: 300,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConsensusError::Config { .. })));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RaftConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConsensusError::Config { .. }));
    }

    #[test]
    fn join_rounds_span_the_longest_poll_gap() {
        let config = RaftConfig::default();
        assert_eq!(config.join_catchup_round_timeout(), Duration::from_millis(60_150));
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let config = RaftConfig {
            max_catchup_rounds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
