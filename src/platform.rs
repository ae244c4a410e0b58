//! Control-plane client seam
//!
//! The restart orchestrator and the fleet-wide restart speak to the hosting
//! platform only through `Platform`. `cloudfoundry::CloudFoundry` is the
//! production implementation.

pub mod cloudfoundry;

pub use cloudfoundry::CloudFoundry;

use crate::chart::Region;
use crate::error::Result;
use async_trait::async_trait;

/// App state reported once an app is up
pub const STATE_STARTED: &str = "STARTED";
/// Instance state reported by a serving instance
pub const INSTANCE_RUNNING: &str = "RUNNING";
/// Process type preferred when picking the primary process
pub const PRIMARY_PROCESS: &str = "web";

/// Bearer token for one region
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Lifecycle action on an app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Stop,
    Start,
    Restart,
}

impl AppAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppAction::Stop => "stop",
            AppAction::Start => "start",
            AppAction::Restart => "restart",
        }
    }
}

/// A process of an app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub guid: String,
    pub kind: String,
}

/// Pick the `web` process, else the first listed
pub fn primary_process(processes: &[ProcessSummary]) -> Option<&ProcessSummary> {
    processes
        .iter()
        .find(|p| p.kind == PRIMARY_PROCESS)
        .or_else(|| processes.first())
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Obtain a token from the region's identity provider
    async fn authenticate(&self, region: &Region) -> Result<AccessToken>;

    /// Resolve an app name to its identifier
    async fn find_app(&self, region: &Region, token: &AccessToken, name: &str) -> Result<String>;

    /// Issue a lifecycle action
    async fn app_action(
        &self,
        region: &Region,
        token: &AccessToken,
        guid: &str,
        action: AppAction,
    ) -> Result<()>;

    /// Aggregate app state (e.g. "STARTED", "STOPPED")
    async fn app_state(&self, region: &Region, token: &AccessToken, guid: &str) -> Result<String>;

    /// Processes of an app
    async fn processes(
        &self,
        region: &Region,
        token: &AccessToken,
        guid: &str,
    ) -> Result<Vec<ProcessSummary>>;

    /// Per-instance states of a process
    async fn instance_states(
        &self,
        region: &Region,
        token: &AccessToken,
        process_guid: &str,
    ) -> Result<Vec<String>>;
}
