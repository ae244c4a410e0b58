//! Remediation record store
//!
//! A redb database holding every persistent fact the controller relies on:
//! restart records, circuit state, the run lock and the monitor log. Values
//! are JSON. Records carry an optional expiry; an expired record reads as
//! absent and is overwritten by the next write.
//!
//! redb serializes write transactions, so `create_if_absent`, `update` and
//! `delete_if` are atomic with respect to each other.

pub mod records;

pub use records::{CircuitState, LockRecord, LogStatus, MonitorLogEntry, RestartRecord};

use crate::clock::Clock;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Keyed records (restart records, circuits, locks), keyed `{kind}:{...}`
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Monitor log keyed `{YYYY-MM-DD}/{millis}/{seq}/{app}`
const MONITOR_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("monitor_log");

/// Wrap any `Display` error into `Error::Store` with a context label.
macro_rules! map_err {
    ($ctx:literal) => {
        |e| Error::Store(format!("{}: {}", $ctx, e))
    };
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    value: T,
}

impl<T> Envelope<T> {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Thread-safe handle to the record store
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    seq: Arc<AtomicU64>,
    #[cfg(test)]
    refuse_puts: Arc<std::sync::atomic::AtomicBool>,
}

impl Ledger {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(map_err!("open"))?;
        let ledger = Self::from_database(db, clock)?;
        debug!(?path, "record store opened");
        Ok(ledger)
    }

    /// Ephemeral store, used by tests
    #[cfg(test)]
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!("open"))?;
        Self::from_database(db, clock)
    }

    /// Make every later `put` fail
    #[cfg(test)]
    pub fn refuse_puts(&self) {
        self.refuse_puts.store(true, Ordering::SeqCst);
    }

    fn from_database(db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = Self {
            db: Arc::new(db),
            clock,
            seq: Arc::new(AtomicU64::new(0)),
            #[cfg(test)]
            refuse_puts: Arc::default(),
        };
        ledger.ensure_tables()?;
        Ok(ledger)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        txn.open_table(RECORDS).map_err(map_err!("table"))?;
        txn.open_table(MONITOR_LOG).map_err(map_err!("table"))?;
        txn.commit().map_err(map_err!("commit"))?;
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn expiry(&self, ttl: Option<std::time::Duration>) -> Result<Option<DateTime<Utc>>> {
        ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .map(|ttl| self.now() + ttl)
                .map_err(map_err!("ttl"))
        })
        .transpose()
    }

    // ── Generic primitives ─────────────────────────────────────────

    /// Read a live record
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
        let Some(guard) = table.get(key).map_err(map_err!("read"))? else {
            return Ok(None);
        };
        let envelope: Envelope<T> =
            serde_json::from_slice(guard.value()).map_err(map_err!("decode"))?;
        Ok(envelope.live(self.now()).then_some(envelope.value))
    }

    /// Write a record, overwriting any previous value
    pub fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<std::time::Duration>,
    ) -> Result<()> {
        #[cfg(test)]
        if self.refuse_puts.load(Ordering::SeqCst) {
            return Err(Error::Store("write: refused".into()));
        }
        let envelope = Envelope {
            expires_at: self.expiry(ttl)?,
            value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(map_err!("encode"))?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(())
    }

    /// Delete a record. Returns true if it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let existed;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
            existed = table.remove(key).map_err(map_err!("write"))?.is_some();
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(existed)
    }

    /// Write `value` only if no live record exists. Returns true if written.
    pub fn create_if_absent<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<std::time::Duration>,
    ) -> Result<bool> {
        let now = self.now();
        let envelope = Envelope {
            expires_at: self.expiry(ttl)?,
            value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(map_err!("encode"))?;

        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let created;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
            let existing = table
                .get(key)
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec());
            let occupied = match existing {
                Some(raw) => serde_json::from_slice::<Envelope<IgnoredAny>>(&raw)
                    .map_err(map_err!("decode"))?
                    .live(now),
                None => false,
            };
            if !occupied {
                table
                    .insert(key, bytes.as_slice())
                    .map_err(map_err!("write"))?;
            }
            created = !occupied;
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(created)
    }

    /// Atomic read-modify-write
    ///
    /// `f` sees the live value (or `None`) and returns the new value;
    /// returning `None` deletes the record. The written value never expires.
    pub fn update<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let next;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
            let existing = table
                .get(key)
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec());
            let current = match existing {
                Some(raw) => {
                    let envelope: Envelope<T> =
                        serde_json::from_slice(&raw).map_err(map_err!("decode"))?;
                    envelope.live(now).then_some(envelope.value)
                }
                None => None,
            };

            next = f(current);
            match &next {
                Some(value) => {
                    let envelope = Envelope {
                        expires_at: None,
                        value,
                    };
                    let bytes = serde_json::to_vec(&envelope).map_err(map_err!("encode"))?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!("write"))?;
                }
                None => {
                    table.remove(key).map_err(map_err!("write"))?;
                }
            }
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(next)
    }

    /// Delete a live record only if `pred` holds for it. Returns true if deleted.
    pub fn delete_if<T, P>(&self, key: &str, pred: P) -> Result<bool>
    where
        T: DeserializeOwned,
        P: FnOnce(&T) -> bool,
    {
        let now = self.now();
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let deleted;
        {
            let mut table = txn.open_table(RECORDS).map_err(map_err!("table"))?;
            let existing = table
                .get(key)
                .map_err(map_err!("read"))?
                .map(|guard| guard.value().to_vec());
            let matches = match existing {
                Some(raw) => {
                    let envelope: Envelope<T> =
                        serde_json::from_slice(&raw).map_err(map_err!("decode"))?;
                    envelope.live(now) && pred(&envelope.value)
                }
                None => false,
            };
            if matches {
                table.remove(key).map_err(map_err!("write"))?;
            }
            deleted = matches;
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(deleted)
    }

    // ── Restart records ────────────────────────────────────────────

    pub fn restart_record(&self, region: &str, app: &str) -> Result<Option<RestartRecord>> {
        self.get(&records::restart_key(region, app))
    }

    pub fn put_restart_record(&self, region: &str, app: &str, record: &RestartRecord) -> Result<()> {
        self.put(&records::restart_key(region, app), record, None)
    }

    // ── Circuits ───────────────────────────────────────────────────

    pub fn circuit(&self, region: &str, app: &str) -> Result<Option<CircuitState>> {
        self.get(&records::circuit_key(region, app))
    }

    /// Drop an app's circuit record. Returns true if one existed.
    pub fn clear_circuit(&self, region: &str, app: &str) -> Result<bool> {
        self.delete(&records::circuit_key(region, app))
    }

    pub fn update_circuit<F>(&self, region: &str, app: &str, f: F) -> Result<Option<CircuitState>>
    where
        F: FnOnce(Option<CircuitState>) -> Option<CircuitState>,
    {
        self.update(&records::circuit_key(region, app), f)
    }

    // ── Monitor log ────────────────────────────────────────────────

    /// Append an observation to the monitor log
    pub fn append_log(&self, app: &str, status: LogStatus, message: &str) -> Result<()> {
        let entry = MonitorLogEntry {
            app: app.to_string(),
            status,
            message: message.to_string(),
            timestamp: self.now(),
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = records::log_key(&entry, seq);
        let bytes = serde_json::to_vec(&entry).map_err(map_err!("encode"))?;

        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(MONITOR_LOG).map_err(map_err!("table"))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("commit"))?;
        Ok(())
    }

    /// Drop day partitions older than `retention`. Returns the number removed.
    pub fn prune_logs(&self, retention: chrono::Duration) -> Result<usize> {
        let cutoff = records::day_prefix(self.now() - retention);

        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let removed;
        {
            let mut table = txn.open_table(MONITOR_LOG).map_err(map_err!("table"))?;
            let mut stale = Vec::new();
            for entry in table
                .range::<&str>(..cutoff.as_str())
                .map_err(map_err!("read"))?
            {
                let (key, _) = entry.map_err(map_err!("read"))?;
                stale.push(key.value().to_string());
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!("write"))?;
            }
            removed = stale.len();
        }
        txn.commit().map_err(map_err!("commit"))?;

        if removed > 0 {
            debug!(removed, %cutoff, "monitor log pruned");
        }
        Ok(removed)
    }

    /// Most recent `error` entry for an app
    pub fn last_error(&self, app: &str) -> Result<Option<MonitorLogEntry>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(MONITOR_LOG).map_err(map_err!("table"))?;
        for entry in table.iter().map_err(map_err!("read"))?.rev() {
            let (key, value) = entry.map_err(map_err!("read"))?;
            if !key.value().ends_with(&format!("/{}", app)) {
                continue;
            }
            let entry: MonitorLogEntry =
                serde_json::from_slice(value.value()).map_err(map_err!("decode"))?;
            if entry.app == app && entry.status == LogStatus::Error {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// All log entries in key order
    #[cfg(test)]
    pub fn logs(&self) -> Result<Vec<MonitorLogEntry>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(MONITOR_LOG).map_err(map_err!("table"))?;
        let mut entries = Vec::new();
        for entry in table.iter().map_err(map_err!("read"))? {
            let (_, value) = entry.map_err(map_err!("read"))?;
            entries.push(serde_json::from_slice(value.value()).map_err(map_err!("decode"))?);
        }
        Ok(entries)
    }
}
