//! Time source shared by the TTL stores and the attendance transactor.

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Monotonic time for expiry math plus wall-clock time for persisted timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
