//! # catchup
//!
//! why: decide when a lagging or joining member has caught up with the leader
//! relations: uses log.rs for the target index, time.rs for rounds, follower.rs
//!            for progress; driven by membership/manager.rs and waiter.rs
//! what: CatchupGoal (one bounded round), CatchupGoalTracker (rounds + overall timeout)
//!
//! A follower is caught up once it reaches, within a single round, the index
//! the leader had appended when that round started. A slow round starts a
//! new one against the then-current append index, so a follower chasing a
//! busy leader gets several chances before the attempt fails.

use std::sync::Arc;
use std::time::Duration;

use crate::follower::FollowerState;
use crate::log::ReadableRaftLog;
use crate::time::Clock;

/// Supplies the index a follower has to reach when a round starts.
pub type TargetIndex = Arc<dyn Fn() -> u64 + Send + Sync>;

/// One catch-up round.
///
/// Single-shot: once the round has run past its time bound, `achieved`
/// returns false for good, even if the follower catches up afterwards.
pub struct CatchupGoal {
    clock: Arc<dyn Clock>,
    start_time: u64,
    target_index: u64,
    round_timeout: u64,
    expired: bool,
}

impl CatchupGoal {
    pub fn new(target_index: u64, clock: Arc<dyn Clock>, round_timeout: Duration) -> Self {
        Self {
            start_time: clock.millis(),
            clock,
            target_index,
            round_timeout: round_timeout.as_millis() as u64,
            expired: false,
        }
    }

    /// A round targeting the current append index of `log`.
    pub fn for_log(
        log: &dyn ReadableRaftLog,
        clock: Arc<dyn Clock>,
        round_timeout: Duration,
    ) -> Self {
        Self::new(log.append_index(), clock, round_timeout)
    }

    /// Whether `state` reached the target within the round's time bound.
    pub fn achieved(&mut self, state: &FollowerState) -> bool {
        if self.round_expired() {
            self.expired = true;
            return false;
        }
        state.match_index() >= self.target_index
    }

    /// Whether the round has run past its time bound.
    pub fn round_expired(&self) -> bool {
        self.expired || self.clock.millis().saturating_sub(self.start_time) > self.round_timeout
    }

    pub fn target_index(&self) -> u64 {
        self.target_index
    }
}

/// Where a catch-up attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupStatus {
    Running { rounds_used: u32 },
    Achieved,
    FailedTimeout,
    FailedRoundsExhausted,
}

impl CatchupStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, CatchupStatus::Running { .. })
    }
}

/// Runs catch-up rounds until one succeeds, the rounds run out, or the
/// overall timeout passes. Terminal states ignore further progress.
pub struct CatchupGoalTracker {
    target: TargetIndex,
    clock: Arc<dyn Clock>,
    round_timeout: Duration,
    catchup_timeout: u64,
    max_rounds: u32,
    start_time: u64,
    goal: CatchupGoal,
    rounds_used: u32,
    status: CatchupStatus,
}

impl CatchupGoalTracker {
    /// Default bound on the number of rounds.
    pub const MAX_ROUNDS: u32 = 10;

    /// Track catch-up against the append index of `log`.
    pub fn new(
        log: Arc<dyn ReadableRaftLog>,
        clock: Arc<dyn Clock>,
        round_timeout: Duration,
        catchup_timeout: Duration,
    ) -> Self {
        Self::with_target(move || log.append_index(), clock, round_timeout, catchup_timeout)
    }

    /// Track catch-up against an arbitrary target, read at the start of each round.
    pub fn with_target(
        target: impl Fn() -> u64 + Send + Sync + 'static,
        clock: Arc<dyn Clock>,
        round_timeout: Duration,
        catchup_timeout: Duration,
    ) -> Self {
        let target: TargetIndex = Arc::new(target);
        let goal = CatchupGoal::new(target(), Arc::clone(&clock), round_timeout);
        Self {
            start_time: clock.millis(),
            target,
            clock,
            round_timeout,
            catchup_timeout: catchup_timeout.as_millis() as u64,
            max_rounds: Self::MAX_ROUNDS,
            goal,
            rounds_used: 0,
            status: CatchupStatus::Running { rounds_used: 0 },
        }
    }

    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Feed the follower's latest progress into the current round.
    pub fn update_progress(&mut self, state: &FollowerState) -> CatchupStatus {
        if self.status.is_finished() {
            return self.status;
        }
        let rounds_used = self.rounds_used;

        let elapsed = self.clock.millis().saturating_sub(self.start_time);
        if elapsed > self.catchup_timeout {
            tracing::warn!(
                elapsed_ms = elapsed,
                match_index = state.match_index(),
                target_index = self.goal.target_index(),
                "catch-up timed out"
            );
            self.status = CatchupStatus::FailedTimeout;
        } else if self.goal.achieved(state) {
            tracing::info!(
                match_index = state.match_index(),
                rounds_used,
                "catch-up goal achieved"
            );
            self.status = CatchupStatus::Achieved;
        } else if self.goal.round_expired() {
            let rounds_used = rounds_used + 1;
            self.rounds_used = rounds_used;
            if rounds_used >= self.max_rounds {
                tracing::warn!(rounds_used, "catch-up rounds exhausted");
                self.status = CatchupStatus::FailedRoundsExhausted;
            } else {
                let clock = Arc::clone(&self.clock);
                self.goal = CatchupGoal::new((self.target)(), clock, self.round_timeout);
                tracing::debug!(
                    rounds_used,
                    target_index = self.goal.target_index(),
                    "starting new catch-up round"
                );
                self.status = CatchupStatus::Running { rounds_used };
            }
        }
        self.status
    }

    pub fn status(&self) -> CatchupStatus {
        self.status
    }

    pub fn is_goal_achieved(&self) -> bool {
        self.status == CatchupStatus::Achieved
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    /// Rounds that timed out so far, including after the attempt finished.
    pub fn rounds_used(&self) -> u32 {
        self.rounds_used
    }

    /// Index the current round is chasing.
    pub fn target_index(&self) -> u64 {
        self.goal.target_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeClock;

    const ROUND_TIMEOUT: Duration = Duration::from_millis(15);
    const CATCHUP_TIMEOUT: Duration = Duration::from_secs(1);

    fn follower_at(index: u64) -> FollowerState {
        FollowerState::new().on_success_response(index)
    }

    #[test]
    fn goal_achieved_within_round() {
        let clock = Arc::new(FakeClock::new());
        let mut goal = CatchupGoal::new(10, clock.clone(), ROUND_TIMEOUT);

        assert!(!goal.achieved(&follower_at(9)));
        clock.forward(ROUND_TIMEOUT);
        assert!(goal.achieved(&follower_at(10)));
    }

    #[test]
    fn goal_is_single_shot_after_expiry() {
        let clock = Arc::new(FakeClock::new());
        let mut goal = CatchupGoal::new(10, clock.clone(), ROUND_TIMEOUT);

        clock.forward(ROUND_TIMEOUT + Duration::from_millis(1));
        assert!(!goal.achieved(&follower_at(10)));

        // even a clock that went back cannot revive the round
        clock.set(0);
        assert!(!goal.achieved(&follower_at(10)));
        assert!(goal.round_expired());
    }

    #[test]
    fn empty_log_goal_is_trivially_achieved() {
        let clock = Arc::new(FakeClock::new());
        let log = crate::log::InMemoryRaftLog::new();
        let mut goal = CatchupGoal::for_log(&log, clock, ROUND_TIMEOUT);

        assert_eq!(goal.target_index(), 0);
        assert!(goal.achieved(&FollowerState::new()));
    }

    #[test]
    fn new_round_recaptures_target() {
        let clock = Arc::new(FakeClock::new());
        let target = Arc::new(std::sync::atomic::AtomicU64::new(10));
        let source = Arc::clone(&target);
        let mut tracker = CatchupGoalTracker::with_target(
            move || source.load(std::sync::atomic::Ordering::SeqCst),
            clock.clone(),
            ROUND_TIMEOUT,
            Duration::from_secs(1),
        );

        target.store(20, std::sync::atomic::Ordering::SeqCst);
        clock.forward(ROUND_TIMEOUT + Duration::from_millis(5));
        let status = tracker.update_progress(&follower_at(10));

        assert_eq!(status, CatchupStatus::Running { rounds_used: 1 });
        assert_eq!(tracker.target_index(), 20);
        assert!(!tracker.update_progress(&follower_at(15)).is_finished());
        assert_eq!(tracker.update_progress(&follower_at(20)), CatchupStatus::Achieved);
    }

    #[test]
    fn rounds_used_survives_terminal_states() {
        let clock = Arc::new(FakeClock::new());
        let mut achieved =
            CatchupGoalTracker::with_target(|| 5, clock.clone(), ROUND_TIMEOUT, CATCHUP_TIMEOUT);
        let mut timed_out =
            CatchupGoalTracker::with_target(|| 5, clock.clone(), ROUND_TIMEOUT, CATCHUP_TIMEOUT);

        for _ in 0..2 {
            clock.forward(ROUND_TIMEOUT + Duration::from_millis(1));
            achieved.update_progress(&follower_at(0));
            timed_out.update_progress(&follower_at(0));
        }
        assert_eq!(achieved.update_progress(&follower_at(5)), CatchupStatus::Achieved);
        assert_eq!(achieved.rounds_used(), 2);

        clock.forward(Duration::from_secs(2));
        assert_eq!(timed_out.update_progress(&follower_at(5)), CatchupStatus::FailedTimeout);
        assert_eq!(timed_out.rounds_used(), 2);
    }

    #[test]
    fn terminal_state_ignores_updates() {
        let clock = Arc::new(FakeClock::new());
        let mut tracker =
            CatchupGoalTracker::with_target(|| 5, clock.clone(), ROUND_TIMEOUT, CATCHUP_TIMEOUT);

        clock.forward(Duration::from_secs(2));
        assert_eq!(tracker.update_progress(&follower_at(5)), CatchupStatus::FailedTimeout);

        clock.set(0);
        assert_eq!(tracker.update_progress(&follower_at(5)), CatchupStatus::FailedTimeout);
        assert!(!tracker.is_goal_achieved());
    }
}
