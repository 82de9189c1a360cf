//! Clock abstraction so window and expiry logic can be tested without
//! sleeping.
//!
//! - `SystemClock`: wall-clock UTC time
//! - `MockClock`: fixed time that advances only when told to

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Longest span a configured duration may reach (100 years)
pub const MAX_SPAN_SECS: i64 = 100 * 365 * 86_400;

/// Seconds as a `chrono::Duration`, clamped to `0..=MAX_SPAN_SECS`
pub fn span_secs(secs: i64) -> chrono::Duration {
    chrono::Duration::seconds(secs.clamp(0, MAX_SPAN_SECS))
}

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Live implementation backed by `Utc::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests.
#[derive(Clone, Debug)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += step;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
