//! Store-backed run lock
//!
//! Guards the fleet sweep so that overlapping triggers never remediate the
//! same fleet twice. The lock expires on its own so a crashed holder cannot
//! wedge future runs.

use crate::error::Result;
use crate::ledger::{Ledger, LockRecord, records};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Lock guarding the fleet sweep
pub const MONITOR_LOCK: &str = "monitor";

pub struct RunLock {
    ledger: Ledger,
    key: String,
}

impl RunLock {
    pub fn new(ledger: Ledger, name: &str) -> Self {
        Self {
            ledger,
            key: records::lock_key(name),
        }
    }

    /// Fresh random holder token
    pub fn token() -> String {
        Uuid::new_v4().to_string()
    }

    /// Create the lock if no live lock exists
    pub fn try_acquire(&self, token: &str, ttl: Duration) -> Result<bool> {
        let record = LockRecord {
            holder: token.to_string(),
            acquired_at: self.ledger.now(),
        };
        let acquired = self.ledger.create_if_absent(&self.key, &record, Some(ttl))?;
        debug!(key = %self.key, acquired, "run lock acquire");
        Ok(acquired)
    }

    /// Delete the lock only if `token` holds it
    pub fn release(&self, token: &str) -> Result<bool> {
        let released = self
            .ledger
            .delete_if::<LockRecord, _>(&self.key, |lock| lock.holder == token)?;
        debug!(key = %self.key, released, "run lock release");
        Ok(released)
    }
}

#[cfg(test)]
impl RunLock {
    /// Current live holder, if any
    pub fn holder(&self) -> Result<Option<LockRecord>> {
        self.ledger.get(&self.key)
    }
}
