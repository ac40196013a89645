//! Wall-clock source.

use parking_lot::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch, with fractional precision.
    fn now(&self) -> f64;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        (self.now() * 1000.0) as i64
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<f64>,
}

impl ManualClock {
    /// Creates a clock reading `now` seconds.
    pub fn new(now: f64) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: f64) {
        *self.now.write() = now;
    }

    /// Moves the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.now.write() += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(1000.0);
        assert_eq!(clock.now(), 1000.0);
        clock.advance(2.5);
        assert_eq!(clock.now(), 1002.5);
        assert_eq!(clock.now_millis(), 1_002_500);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}
