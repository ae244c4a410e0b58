//! Wall-clock source
//!
//! Persisted facts (restart records, circuit windows, lock expiry) are
//! stamped with wall-clock time so that separate processes agree on them.
//! Delays between steps use `tokio::time` instead.

use chrono::{DateTime, FixedOffset, Utc};

/// Source of the current wall-clock instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format an instant for human-facing messages in the given offset
pub fn display(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
pub use manual::ManualClock;
