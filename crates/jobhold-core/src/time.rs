//! Abstract "now" so scheduling and lease math are deterministic in tests.
//!
//! Every component that reads "now" for persisted timestamps, lease
//! computation, or cutoff arithmetic routes through a [`TimeProvider`]
//! instead of calling `Utc::now()` directly.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Capability object exposing the current time.
pub trait TimeProvider: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed, manually-advanced clock for deterministic tests.
#[derive(Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by `delta`, returning the new time.
    pub fn advance(&self, delta: Duration) -> DateTime<Utc> {
        let mut guard = self.inner.lock().expect("FixedClock mutex poisoned");
        *guard += delta;
        *guard
    }

    /// Overwrite the clock to an absolute time.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().expect("FixedClock mutex poisoned") = at;
    }
}

impl TimeProvider for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("FixedClock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_monotonically() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        let advanced = clock.advance(Duration::seconds(5));
        assert_eq!(advanced, start + Duration::seconds(5));
        assert_eq!(clock.now(), advanced);
    }

    #[test]
    fn fixed_clock_set_overwrites() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        let later = start + Duration::hours(1);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
