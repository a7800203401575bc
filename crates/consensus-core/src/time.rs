//! # time
//!
//! why: make every time-driven decision testable without sleeping
//! relations: consumed by catchup.rs, membership/manager.rs and waiter.rs
//! what: Clock trait, SystemClock (monotonic), FakeClock (manually advanced)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn millis(&self) -> u64;
}

/// Monotonic clock counting from its creation.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock by `amount`.
    pub fn forward(&self, amount: Duration) {
        self.now.fetch_add(amount.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_moves_only_when_forwarded() {
        let clock = FakeClock::new();
        assert_eq!(clock.millis(), 0);

        clock.forward(Duration::from_millis(15));
        clock.forward(Duration::from_secs(1));
        assert_eq!(clock.millis(), 1015);

        clock.set(3);
        assert_eq!(clock.millis(), 3);
    }

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let first = clock.millis();
        assert!(clock.millis() >= first);
    }
}
