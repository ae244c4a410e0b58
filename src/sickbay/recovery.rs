//! Remediation policy
//!
//! Thresholds and timing for automatic recovery: the circuit breaker,
//! restart retries, readiness polling and pacing between apps.

use serde::Deserialize;
use std::time::Duration;

/// Remediation configuration (`[remediation]` table)
#[derive(Debug, Clone, Deserialize)]
pub struct RemediationPolicy {
    /// Consecutive failures that trip the circuit breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a tripped circuit stays open (seconds)
    #[serde(default = "default_reset_window")]
    pub reset_window_secs: u64,

    /// Restart attempts per outage during a sweep (initial + retries)
    #[serde(default = "default_restart_attempts")]
    pub restart_attempts: u32,

    /// Pause between restart attempts (milliseconds)
    #[serde(default = "default_restart_retry_pause")]
    pub restart_retry_pause_ms: u64,

    /// Pause between apps in a sweep (milliseconds)
    #[serde(default = "default_sweep_pause")]
    pub sweep_pause_ms: u64,

    /// Pause between apps in a region batch (milliseconds)
    #[serde(default = "default_region_pause")]
    pub region_pause_ms: u64,

    /// Wait after issuing stop, before start (milliseconds)
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// First readiness poll delay (milliseconds)
    #[serde(default = "default_poll_base")]
    pub poll_base_ms: u64,

    /// Readiness poll delay multiplier
    #[serde(default = "default_poll_multiplier")]
    pub poll_multiplier: f64,

    /// Readiness poll delay cap (milliseconds)
    #[serde(default = "default_poll_max")]
    pub poll_max_ms: u64,

    /// Polls waiting for the app to report STARTED
    #[serde(default = "default_started_polls")]
    pub started_polls: u8,

    /// Polls waiting for a RUNNING instance
    #[serde(default = "default_running_polls")]
    pub running_polls: u8,

    /// Run lock lifetime, the worst-case sweep duration (seconds)
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Monitor log retention (days)
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_window() -> u64 {
    15 * 60
}

fn default_restart_attempts() -> u32 {
    2
}

fn default_restart_retry_pause() -> u64 {
    3000
}

fn default_sweep_pause() -> u64 {
    1000
}

fn default_region_pause() -> u64 {
    2000
}

fn default_settle() -> u64 {
    3000
}

fn default_poll_base() -> u64 {
    2000
}

fn default_poll_multiplier() -> f64 {
    1.5
}

fn default_poll_max() -> u64 {
    15000
}

fn default_started_polls() -> u8 {
    8
}

fn default_running_polls() -> u8 {
    10
}

fn default_lock_ttl() -> u64 {
    5 * 60
}

fn default_log_retention() -> u32 {
    30
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_window_secs: default_reset_window(),
            restart_attempts: default_restart_attempts(),
            restart_retry_pause_ms: default_restart_retry_pause(),
            sweep_pause_ms: default_sweep_pause(),
            region_pause_ms: default_region_pause(),
            settle_ms: default_settle(),
            poll_base_ms: default_poll_base(),
            poll_multiplier: default_poll_multiplier(),
            poll_max_ms: default_poll_max(),
            started_polls: default_started_polls(),
            running_polls: default_running_polls(),
            lock_ttl_secs: default_lock_ttl(),
            log_retention_days: default_log_retention(),
        }
    }
}

impl RemediationPolicy {
    pub fn reset_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_window_secs as i64)
    }

    pub fn restart_retry_pause(&self) -> Duration {
        Duration::from_millis(self.restart_retry_pause_ms)
    }

    pub fn sweep_pause(&self) -> Duration {
        Duration::from_millis(self.sweep_pause_ms)
    }

    pub fn region_pause(&self) -> Duration {
        Duration::from_millis(self.region_pause_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn log_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.log_retention_days as i64)
    }
}

// Builder methods for tightening timings in tests
#[cfg(test)]
impl RemediationPolicy {
    /// Set the breaker threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the number of restart attempts per outage
    pub fn with_restart_attempts(mut self, attempts: u32) -> Self {
        self.restart_attempts = attempts;
        self
    }

    /// Set readiness poll budgets
    pub fn with_poll_budgets(mut self, started: u8, running: u8) -> Self {
        self.started_polls = started;
        self.running_polls = running;
        self
    }
}
