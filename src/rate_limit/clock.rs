//! Time sources for token buckets.
//!
//! Buckets never call `Instant::now()` directly so refill behaviour can be
//! driven deterministically in tests.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Clock abstraction so refill timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(61));
        assert_eq!(clock.now().duration_since(start), Duration::from_secs(61));
    }

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), clock.now());
    }
}
