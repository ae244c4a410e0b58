//! Unified error types for Harbormaster

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Harbormaster operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Region errors
    #[error("Region '{code}' not found, known regions: {known}")]
    RegionNotFound { code: String, known: String },

    #[error("Region '{0}' has no monitored apps")]
    RegionEmpty(String),

    #[error("App '{app}' has an invalid region: {region}")]
    InvalidRegion { app: String, region: String },

    // Identity provider errors
    #[error("Authentication failed: {status} {body}")]
    Auth { status: u16, body: String },

    // Platform errors
    #[error("App '{0}' not found")]
    AppNotFound(String),

    #[error("Platform API error: {status} {url} -> {body}")]
    PlatformApi { status: u16, url: String, body: String },

    #[error("App '{app}' did not reach started state (last state: {state})")]
    NotStarted { app: String, state: String },

    #[error("App '{0}' has no running instance")]
    NoRunningInstance(String),

    #[error("Health check failed after restart of '{0}'")]
    UnhealthyAfterRestart(String),

    // Transport errors
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    // Health check errors
    #[error("Unhealthy response from {url}: {reason}")]
    Unhealthy { url: String, reason: String },

    // Store errors
    #[error("Record store error: {0}")]
    Store(String),

    // Restart state machine
    #[error("Invalid restart transition from {from}: {message}")]
    StateTransition { from: String, message: String },

    // Notification errors (always swallowed after logging)
    #[error("Notification delivery failed: {0}")]
    Notification(String),

    // Background executor
    #[error("Warden channel closed")]
    WardenClosed,

    #[error("Warden queue full, try again later")]
    WardenBusy,
}

impl Error {
    /// Short reason tag used in logs and outcome details
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Auth { .. } => "auth",
            Error::AppNotFound(_) => "not found",
            Error::InvalidRegion { .. } | Error::RegionNotFound { .. } => "invalid region",
            Error::RegionEmpty(_) => "empty region",
            Error::NotStarted { .. } => "did not reach started state",
            Error::NoRunningInstance(_) => "no running instance",
            Error::UnhealthyAfterRestart(_) => "health check failed after restart",
            Error::Timeout(_) => "timeout",
            Error::Unhealthy { .. } => "unhealthy",
            Error::PlatformApi { .. } => "platform api",
            Error::Store(_) => "store",
            _ => "internal",
        }
    }
}

/// Truncate a response body for error messages
pub fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Result type alias for Harbormaster operations
pub type Result<T> = std::result::Result<T, Error>;
