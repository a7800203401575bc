//! # scheduler
//!
//! why: drive polling from a shared scheduler instead of a thread per wait
//! relations: used by waiter.rs to reschedule membership polls
//! what: JobScheduler trait, JobHandle, OnDemandJobScheduler, TokioJobScheduler

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

/// A unit of scheduled work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation token of a scheduled job.
///
/// Clones share the same flag, so any holder can cancel the job.
#[derive(Debug, Clone, Default)]
pub struct JobHandle {
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent the job from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs jobs after a delay.
pub trait JobScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: Job) -> JobHandle;
}

// -- on-demand scheduler --

/// Scheduler that only runs jobs when asked.
///
/// Delays are recorded but ignored: `run_job` executes the oldest pending
/// job immediately. Meant for deterministic tests.
#[derive(Default)]
pub struct OnDemandJobScheduler {
    queue: Mutex<VecDeque<(Duration, JobHandle, Job)>>,
}

impl OnDemandJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run exactly one pending, non-cancelled job.
    ///
    /// Returns false if there was nothing to run.
    pub fn run_job(&self) -> bool {
        loop {
            // the lock is released before running, the job may reschedule itself
            let next = self.queue.lock().pop_front();
            match next {
                None => return false,
                Some((_, handle, _)) if handle.is_cancelled() => continue,
                Some((_, _, job)) => {
                    job();
                    return true;
                }
            }
        }
    }

    /// Number of queued jobs that have not been cancelled.
    pub fn pending_jobs(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|(_, handle, _)| !handle.is_cancelled())
            .count()
    }

    /// Delay requested by the oldest pending job.
    pub fn next_delay(&self) -> Option<Duration> {
        self.queue
            .lock()
            .iter()
            .find(|(_, handle, _)| !handle.is_cancelled())
            .map(|(delay, _, _)| *delay)
    }
}

impl JobScheduler for OnDemandJobScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> JobHandle {
        let handle = JobHandle::new();
        self.queue.lock().push_back((delay, handle.clone(), job));
        handle
    }
}

// -- tokio scheduler --

/// Scheduler backed by a tokio runtime, honoring real delays.
#[derive(Clone)]
pub struct TokioJobScheduler {
    runtime: Handle,
}

impl TokioJobScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl JobScheduler for TokioJobScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> JobHandle {
        let handle = JobHandle::new();
        let task_handle = handle.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !task_handle.is_cancelled() {
                job();
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn on_demand_runs_one_job_per_call() {
        let scheduler = OnDemandJobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(10), counting_job(&counter));
        scheduler.schedule(Duration::from_millis(20), counting_job(&counter));
        assert_eq!(scheduler.pending_jobs(), 2);
        assert_eq!(scheduler.next_delay(), Some(Duration::from_millis(10)));

        assert!(scheduler.run_job());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 1);

        assert!(scheduler.run_job());
        assert!(!scheduler.run_job());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancelled_jobs_are_skipped() {
        let scheduler = OnDemandJobScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::ZERO, counting_job(&counter));
        handle.cancel();

        assert_eq!(scheduler.pending_jobs(), 0);
        assert!(!scheduler.run_job());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_after_delay() {
        let scheduler = TokioJobScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(42);
            }),
        );

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn tokio_scheduler_skips_cancelled_job() {
        let scheduler = TokioJobScheduler::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.schedule(Duration::from_millis(20), counting_job(&counter));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
