//! Injectable time source.
//!
//! Every pending-window decision reads time through a [`Clock`] so tests and
//! scenario replay can move time forward deterministically.

use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the Unix epoch plus `millis`.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(Timestamp::UNIX_EPOCH + SignedDuration::from_millis(millis))
    }

    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock();
        *now = *now + SignedDuration::from_millis(millis);
    }

    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Timestamp::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_millis(1_000);
        let start = clock.now();
        clock.advance_millis(2_500);
        assert_eq!(
            clock.now().duration_since(start),
            SignedDuration::from_millis(2_500)
        );
    }
}
