//! HTTP health probes
//!
//! A probe is a GET against the app's public URL. An attempt passes when
//! the status is acceptable and, if configured, the body contains the
//! required marker. Any transport error or timeout fails the attempt.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Health check settings (`[health]` table)
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Pause between attempts
    #[serde(
        rename = "retry_interval_ms",
        default = "default_retry_interval",
        deserialize_with = "millis"
    )]
    pub retry_interval: Duration,

    /// Per-attempt timeout
    #[serde(
        rename = "timeout_ms",
        default = "default_timeout",
        deserialize_with = "millis"
    )]
    pub timeout: Duration,

    /// Status codes counted as healthy
    #[serde(default = "default_acceptable_status")]
    pub acceptable_status: Vec<u16>,

    /// Substring the body must contain
    #[serde(default)]
    pub required_body: Option<String>,
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(3000)
}

fn default_timeout() -> Duration {
    Duration::from_millis(30_000)
}

fn default_acceptable_status() -> Vec<u16> {
    vec![200, 204, 302]
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_interval: default_retry_interval(),
            timeout: default_timeout(),
            acceptable_status: default_acceptable_status(),
            required_body: None,
        }
    }
}

#[cfg(test)]
impl ProbeConfig {
    /// Set retries after the first attempt
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Set the body marker
    pub fn with_required_body(mut self, marker: &str) -> Self {
        self.required_body = Some(marker.to_string());
        self
    }
}

impl ProbeConfig {
    /// Judge a single response
    pub fn accepts(&self, page: &Page) -> bool {
        if !self.acceptable_status.contains(&page.status) {
            return false;
        }
        match &self.required_body {
            Some(marker) => page.body.contains(marker.as_str()),
            None => true,
        }
    }
}

/// A fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

/// Performs the GET behind a probe
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Page>;
}

/// Blocking ureq client run on the blocking pool
///
/// Redirects are not followed so a 302 is observed as such.
#[derive(Debug, Default, Clone, Copy)]
pub struct UreqFetch;

#[async_trait]
impl Fetch for UreqFetch {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Page> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || fetch_blocking(&url, timeout))
            .await
            .map_err(|e| Error::Transport(format!("probe task failed: {}", e)))?
    }
}

fn fetch_blocking(url: &str, timeout: Duration) -> Result<Page> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false)
        .build()
        .into();

    let mut response = agent
        .get(url)
        .header("User-Agent", "harbormaster-probe")
        .call()
        .map_err(|e| match e {
            ureq::Error::Timeout(_) => Error::Timeout(url.to_string()),
            other => Error::Transport(format!("{}: {}", url, other)),
        })?;

    let status = response.status().as_u16();
    // Unreadable bodies still carry a status worth judging
    let body = response.body_mut().read_to_string().unwrap_or_default();

    Ok(Page { status, body })
}

/// Runs probes with bounded retry
#[derive(Clone)]
pub struct HealthProber {
    fetch: Arc<dyn Fetch>,
}

impl HealthProber {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }

    /// Prober backed by real HTTP
    pub fn http() -> Self {
        Self::new(Arc::new(UreqFetch))
    }

    /// Probe `url`, trying at most `retry_count + 1` times
    ///
    /// Returns on the first passing attempt. Never errors: every failure
    /// mode reads as unhealthy.
    pub async fn probe(&self, url: &str, config: &ProbeConfig) -> bool {
        let attempts = config.retry_count + 1;

        for attempt in 1..=attempts {
            match self.attempt(url, config).await {
                Ok(()) => {
                    debug!(url, attempt, "probe passed");
                    return true;
                }
                Err(e) => {
                    warn!(url, attempt, attempts, error = %e, "probe attempt failed");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(config.retry_interval).await;
            }
        }

        false
    }

    async fn attempt(&self, url: &str, config: &ProbeConfig) -> Result<()> {
        let page = tokio::time::timeout(config.timeout, self.fetch.get(url, config.timeout))
            .await
            .map_err(|_| Error::Timeout(url.to_string()))??;

        if config.accepts(&page) {
            Ok(())
        } else if config.acceptable_status.contains(&page.status) {
            Err(Error::Unhealthy {
                url: url.to_string(),
                reason: "required body marker missing".to_string(),
            })
        } else {
            Err(Error::Unhealthy {
                url: url.to_string(),
                reason: format!("status {}", page.status),
            })
        }
    }
}
