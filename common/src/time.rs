//! Minimal wall-clock abstraction.
//!
//! A small `Clock` trait lets the event loop and its tests swap the real
//! clock for a deterministic one without threading `SystemTime` calls
//! through every function signature.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A point in time, expressed as seconds since the Unix epoch.
///
/// Using a plain `f64` (as the original Python `time.time()` does) rather
/// than `std::time::Instant` keeps this type `Copy`, comparable, and easy to
/// store in request bookkeeping structs.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct LocalTime(f64);

impl LocalTime {
    /// The Unix epoch.
    pub const EPOCH: LocalTime = LocalTime(0.0);

    /// Construct a `LocalTime` from a Unix timestamp in seconds.
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Seconds since the Unix epoch.
    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Elapsed duration since an earlier point in time. Zero if `other` is
    /// in the future.
    pub fn duration_since(&self, other: LocalTime) -> Duration {
        Duration::from_secs_f64((self.0 - other.0).max(0.0))
    }
}

impl std::ops::Sub for LocalTime {
    type Output = Duration;

    fn sub(self, other: LocalTime) -> Duration {
        self.duration_since(other)
    }
}

/// A source of the current time.
///
/// The event loop depends on this trait rather than calling
/// `SystemTime::now()` directly, so that timeout and retry logic can be
/// driven deterministically in tests.
pub trait Clock {
    /// Return the current local time.
    fn local_time(&self) -> LocalTime;
}

/// The real wall clock, backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn local_time(&self) -> LocalTime {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        LocalTime::from_secs(now.as_secs_f64())
    }
}

/// A fixed, manually advanced clock, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct TestClock(pub LocalTime);

impl TestClock {
    /// Construct a test clock starting at the given number of seconds.
    pub fn new(secs: f64) -> Self {
        Self(LocalTime::from_secs(secs))
    }

    /// Advance the clock by the given number of seconds.
    pub fn advance(&mut self, secs: f64) {
        self.0 = LocalTime::from_secs(self.0.as_secs() + secs);
    }
}

impl Clock for TestClock {
    fn local_time(&self) -> LocalTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_since_is_non_negative() {
        let a = LocalTime::from_secs(10.0);
        let b = LocalTime::from_secs(5.0);
        assert_eq!((a - b).as_secs_f64(), 5.0);
        assert_eq!((b - a).as_secs_f64(), 0.0);
    }

    #[test]
    fn test_clock_advances() {
        let mut clock = TestClock::new(0.0);
        assert_eq!(clock.local_time().as_secs(), 0.0);
        clock.advance(20.0);
        assert_eq!(clock.local_time().as_secs(), 20.0);
    }
}
