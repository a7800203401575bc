//! # waiter
//!
//! why: hold back a joining member until it votes and has caught up
//! relations: polls node.rs snapshots through scheduler.rs, uses catchup.rs
//! what: HealthCheck trait, MembershipWaiter, MembershipWait future
//!
//! Each poll runs as a scheduler job and schedules the next one; there is no
//! thread per wait. Cancelling or dropping the returned future stops further
//! polls.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::catchup::CatchupGoalTracker;
use crate::config::RaftConfig;
use crate::error::WaitError;
use crate::follower::FollowerState;
use crate::node::{ExposedRaftState, RaftMachine};
use crate::scheduler::{JobHandle, JobScheduler};
use crate::time::Clock;

/// Health of the local database.
pub trait HealthCheck: Send + Sync {
    fn is_healthy(&self) -> bool;

    /// Why the database is unhealthy.
    fn cause(&self) -> String {
        "database health check failed".to_string()
    }
}

impl<F> HealthCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_healthy(&self) -> bool {
        self()
    }
}

/// Waits for a member to become a caught up voter.
pub struct MembershipWaiter {
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    health: Arc<dyn HealthCheck>,
    config: RaftConfig,
}

impl MembershipWaiter {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        clock: Arc<dyn Clock>,
        health: Arc<dyn HealthCheck>,
        config: RaftConfig,
    ) -> Self {
        Self {
            scheduler,
            clock,
            health,
            config,
        }
    }

    /// Resolve to true once `raft`'s member votes and has caught up with the
    /// leader's commit index.
    ///
    /// Fails with [`WaitError::Timeout`] after the join timeout and with
    /// [`WaitError::Unhealthy`] as soon as a poll finds the database unhealthy.
    pub fn wait_until_caught_up_member(&self, raft: Arc<dyn RaftMachine>) -> MembershipWait {
        let (tx, rx) = oneshot::channel();
        let evaluator = Arc::new(Evaluator {
            raft,
            scheduler: Arc::clone(&self.scheduler),
            clock: Arc::clone(&self.clock),
            health: Arc::clone(&self.health),
            config: self.config.clone(),
            start_time: self.clock.millis(),
            leader_commit: Arc::new(AtomicU64::new(0)),
            cancelled: AtomicBool::new(false),
            inner: Mutex::new(EvaluatorState {
                result: Some(tx),
                tracker: None,
                delay: Duration::from_millis(self.config.join_poll_interval),
                job: None,
            }),
        });
        Evaluator::schedule_next(&evaluator);
        MembershipWait { rx, evaluator }
    }
}

struct EvaluatorState {
    result: Option<oneshot::Sender<Result<bool, WaitError>>>,
    tracker: Option<CatchupGoalTracker>,
    delay: Duration,
    job: Option<JobHandle>,
}

struct Evaluator {
    raft: Arc<dyn RaftMachine>,
    scheduler: Arc<dyn JobScheduler>,
    clock: Arc<dyn Clock>,
    health: Arc<dyn HealthCheck>,
    config: RaftConfig,
    start_time: u64,
    /// latest leader commit, read by the tracker when a round starts
    leader_commit: Arc<AtomicU64>,
    cancelled: AtomicBool,
    inner: Mutex<EvaluatorState>,
}

enum Tick {
    Done(Result<bool, WaitError>),
    Again,
}

impl Evaluator {
    fn schedule_next(this: &Arc<Self>) {
        let mut inner = this.inner.lock();
        if this.cancelled.load(Ordering::SeqCst) || inner.result.is_none() {
            return;
        }
        let delay = inner.delay;
        let next = Arc::clone(this);
        inner.job = Some(this.scheduler.schedule(delay, Box::new(move || Evaluator::run(&next))));
    }

    fn run(this: &Arc<Self>) {
        if this.cancelled.load(Ordering::SeqCst) {
            return;
        }
        match this.tick() {
            Tick::Done(result) => this.complete(result),
            Tick::Again => {
                this.back_off();
                Evaluator::schedule_next(this);
            }
        }
    }

    fn tick(&self) -> Tick {
        if !self.health.is_healthy() {
            return Tick::Done(Err(WaitError::Unhealthy {
                cause: self.health.cause(),
            }));
        }

        let elapsed = self.clock.millis().saturating_sub(self.start_time);
        if elapsed > self.config.join_catchup_timeout {
            return Tick::Done(Err(WaitError::Timeout { elapsed_ms: elapsed }));
        }

        let state = self.raft.state();
        match state.leader_commit {
            Some(leader_commit) if state.is_voting_member() => {
                tracing::debug!(
                    member = %state.myself,
                    gap = leader_commit.saturating_sub(state.commit_index),
                    "waiting to catch up with leader"
                );
                if self.caught_up(&state, leader_commit) {
                    tracing::info!(member = %state.myself, "joined raft group as caught up voter");
                    return Tick::Done(Ok(true));
                }
            }
            _ => tracing::debug!(member = %state.myself, "not yet a voting member"),
        }
        Tick::Again
    }

    fn caught_up(&self, state: &ExposedRaftState, leader_commit: u64) -> bool {
        self.leader_commit.store(leader_commit, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        let tracker = inner.tracker.get_or_insert_with(|| self.new_tracker());
        let progress = FollowerState::new().on_success_response(state.commit_index);
        tracker.update_progress(&progress);

        if tracker.is_goal_achieved() {
            return true;
        }
        if tracker.is_finished() {
            // only the join timeout ends the wait; try again with fresh rounds
            tracing::debug!(status = ?tracker.status(), "catch-up attempt ended, restarting");
            inner.tracker = None;
        }
        false
    }

    fn new_tracker(&self) -> CatchupGoalTracker {
        let leader_commit = Arc::clone(&self.leader_commit);
        CatchupGoalTracker::with_target(
            move || leader_commit.load(Ordering::SeqCst),
            Arc::clone(&self.clock),
            self.config.join_catchup_round_timeout(),
            self.config.join_catchup_timeout(),
        )
        .with_max_rounds(self.config.max_catchup_rounds)
    }

    fn back_off(&self) {
        let mut inner = self.inner.lock();
        let step = Duration::from_millis(self.config.join_poll_interval);
        let max = Duration::from_millis(self.config.join_max_poll_interval);
        inner.delay = (inner.delay + step).min(max);
    }

    fn complete(&self, result: Result<bool, WaitError>) {
        let mut inner = self.inner.lock();
        inner.job = None;
        if let Some(tx) = inner.result.take() {
            // the receiver may be gone; nobody is left to tell
            let _ = tx.send(result);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if let Some(job) = inner.job.take() {
            job.cancel();
        }
        inner.result = None;
    }
}

/// Outcome of [`MembershipWaiter::wait_until_caught_up_member`].
///
/// Dropping it cancels the wait.
pub struct MembershipWait {
    rx: oneshot::Receiver<Result<bool, WaitError>>,
    evaluator: Arc<Evaluator>,
}

impl MembershipWait {
    /// Abandon the wait; no further polls run.
    pub fn cancel(&self) {
        self.evaluator.cancel();
    }

    /// The outcome, if the wait already finished.
    pub fn try_result(&mut self) -> Option<Result<bool, WaitError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WaitError::Cancelled)),
        }
    }
}

impl Future for MembershipWait {
    type Output = Result<bool, WaitError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WaitError::Cancelled)))
    }
}

impl Drop for MembershipWait {
    fn drop(&mut self) {
        self.evaluator.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogEntry, RaftLogCommand};
    use crate::member::{MemberId, MemberSet};
    use crate::node::RaftNode;
    use crate::scheduler::OnDemandJobScheduler;
    use crate::time::FakeClock;

    struct Fixture {
        scheduler: Arc<OnDemandJobScheduler>,
        clock: Arc<FakeClock>,
        healthy: Arc<AtomicBool>,
        waiter: MembershipWaiter,
    }

    fn fixture() -> Fixture {
        let scheduler = Arc::new(OnDemandJobScheduler::new());
        let clock = Arc::new(FakeClock::new());
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&healthy);
        let waiter = MembershipWaiter::new(
            scheduler.clone(),
            clock.clone(),
            Arc::new(move || flag.load(Ordering::SeqCst)),
            RaftConfig::default(),
        );
        Fixture {
            scheduler,
            clock,
            healthy,
            waiter,
        }
    }

    fn voting_node(clock: Arc<FakeClock>) -> RaftNode {
        let mut node = RaftNode::new(MemberId::random(), clock, RaftConfig::default()).unwrap();
        let members: MemberSet = [node.id()].into_iter().collect();
        node.apply(&[RaftLogCommand::Append {
            index: 1,
            entry: LogEntry::member_set(1, members),
        }])
        .unwrap();
        node
    }

    #[test]
    fn backs_off_between_polls() {
        let f = fixture();
        let node =
            RaftNode::new(MemberId::random(), f.clock.clone(), RaftConfig::default()).unwrap();
        let mut wait = f.waiter.wait_until_caught_up_member(Arc::new(node.handle()));

        assert_eq!(f.scheduler.next_delay(), Some(Duration::from_secs(1)));
        f.scheduler.run_job();
        assert_eq!(f.scheduler.next_delay(), Some(Duration::from_secs(2)));
        assert!(wait.try_result().is_none());
    }

    #[test]
    fn caught_up_member_is_recognised_on_the_next_poll() {
        let f = fixture();
        let mut node = voting_node(f.clock.clone());
        node.set_leader_commit(5);
        node.set_commit_index(1);
        let mut wait = f.waiter.wait_until_caught_up_member(Arc::new(node.handle()));

        // polls arrive at the real cadence, far apart compared to a round
        let poll = |f: &Fixture| {
            if let Some(delay) = f.scheduler.next_delay() {
                f.clock.forward(delay);
            }
            f.scheduler.run_job();
        };

        poll(&f);
        assert!(wait.try_result().is_none());

        node.set_commit_index(5);
        poll(&f);

        assert!(matches!(wait.try_result(), Some(Ok(true))));
        assert_eq!(f.scheduler.pending_jobs(), 0);
    }

    #[test]
    fn unhealthy_database_fails_immediately() {
        let f = fixture();
        let node = voting_node(f.clock.clone());
        let mut wait = f.waiter.wait_until_caught_up_member(Arc::new(node.handle()));

        f.healthy.store(false, Ordering::SeqCst);
        f.scheduler.run_job();

        assert!(matches!(wait.try_result(), Some(Err(WaitError::Unhealthy { .. }))));
        assert_eq!(f.scheduler.pending_jobs(), 0);
    }

    #[test]
    fn dropping_the_wait_stops_polling() {
        let f = fixture();
        let node = voting_node(f.clock.clone());
        let wait = f.waiter.wait_until_caught_up_member(Arc::new(node.handle()));
        assert_eq!(f.scheduler.pending_jobs(), 1);

        drop(wait);
        assert_eq!(f.scheduler.pending_jobs(), 0);
        assert!(!f.scheduler.run_job());
    }
}
