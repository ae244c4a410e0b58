//! Typed records kept in the ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last verified-healthy restart of an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRecord {
    /// Lower-cased operator, `system` for automated runs
    pub operator: String,
    pub timestamp: DateTime<Utc>,
}

/// Circuit breaker state of one app
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_until: Option<DateTime<Utc>>,
}

impl CircuitState {
    /// Whether automated remediation must be skipped at `now`
    pub fn is_broken(&self, now: DateTime<Utc>) -> bool {
        self.broken_until.is_some_and(|until| now < until)
    }

    /// Whether a past trip has lapsed
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.broken_until.is_some_and(|until| now >= until)
    }
}

/// Holder of the run lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Outcome recorded for one app observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Healthy,
    Offline,
    Restarted,
    Error,
    Skipped,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Healthy => write!(f, "healthy"),
            LogStatus::Offline => write!(f, "offline"),
            LogStatus::Restarted => write!(f, "restarted"),
            LogStatus::Error => write!(f, "error"),
            LogStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One monitor log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorLogEntry {
    pub app: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn restart_key(region: &str, app: &str) -> String {
    format!("restart:{}:{}", region, app)
}

pub(crate) fn circuit_key(region: &str, app: &str) -> String {
    format!("circuit:{}:{}", region, app)
}

pub(crate) fn lock_key(name: &str) -> String {
    format!("lock:{}", name)
}

/// UTC day partition of an instant
pub(crate) fn day_prefix(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

pub(crate) fn log_key(entry: &MonitorLogEntry, seq: u64) -> String {
    format!(
        "{}/{:013}/{:010}/{}",
        day_prefix(entry.timestamp),
        entry.timestamp.timestamp_millis(),
        seq,
        entry.app
    )
}
