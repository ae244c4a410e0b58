//! Configuration file parsing for Harbormaster
//!
//! Parses `harbormaster.toml` configuration files using serde

use crate::error::{Error, Result};
use crate::sickbay::probe::ProbeConfig;
use crate::sickbay::recovery::RemediationPolicy;
use chrono::{FixedOffset, Offset, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the platform login email
pub const ENV_EMAIL: &str = "HARBORMASTER_EMAIL";
/// Environment variable overriding the platform login password
pub const ENV_PASSWORD: &str = "HARBORMASTER_PASSWORD";
/// Environment variable overriding the Telegram bot token
pub const ENV_TG_BOT_TOKEN: &str = "HARBORMASTER_TG_BOT_TOKEN";
/// Environment variable overriding the Telegram chat id
pub const ENV_TG_CHAT_ID: &str = "HARBORMASTER_TG_CHAT_ID";

/// Load configuration from a file
///
/// Environment overrides are applied before validation.
pub fn load(path: &Path) -> Result<HarborConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config: HarborConfig = toml::from_str(&content)?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct HarborConfig {
    /// Global configuration settings
    pub config: GlobalConfig,

    /// Platform login
    #[serde(default)]
    pub credentials: Credentials,

    /// Default health check settings
    #[serde(default)]
    pub health: ProbeConfig,

    /// Circuit breaker and restart timing
    #[serde(default)]
    pub remediation: RemediationPolicy,

    /// Telegram notification target (optional)
    pub telegram: Option<TelegramConfig>,

    /// Region definitions
    #[serde(default)]
    pub regions: Vec<RegionDef>,

    /// Monitored apps
    #[serde(default)]
    pub apps: Vec<AppDef>,
}

impl HarborConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.apps.is_empty() {
            return Err(Error::ConfigValidation("No apps configured".into()));
        }

        let mut codes = HashSet::new();
        for region in &self.regions {
            if !codes.insert(region.code.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate region code: {}",
                    region.code
                )));
            }
            Regex::new(&region.domain_pattern).map_err(|e| {
                Error::ConfigValidation(format!(
                    "Invalid domain pattern for region '{}': {}",
                    region.code, e
                ))
            })?;
        }

        // App names are unique per (explicit) region; inferred regions are
        // checked again once the chart is built.
        let mut names = HashSet::new();
        for app in &self.apps {
            if let Some(code) = &app.region {
                if !codes.contains(code.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "App '{}' references undefined region '{}'",
                        app.name, code
                    )));
                }
            }
            let key = (app.region.clone().unwrap_or_default(), app.name.clone());
            if !names.insert(key) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate app name: {}",
                    app.name
                )));
            }
            if !app.url.starts_with("http://") && !app.url.starts_with("https://") {
                return Err(Error::ConfigValidation(format!(
                    "App '{}' has a non-HTTP url: {}",
                    app.name, app.url
                )));
            }
        }

        if self.health.acceptable_status.is_empty() {
            return Err(Error::ConfigValidation(
                "health.acceptable_status must not be empty".into(),
            ));
        }

        if !(-12..=14).contains(&self.config.utc_offset_hours) {
            return Err(Error::ConfigValidation(format!(
                "utc_offset_hours out of range: {}",
                self.config.utc_offset_hours
            )));
        }

        Ok(())
    }

    /// Apply environment overrides (credentials and Telegram target)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(email) = lookup(ENV_EMAIL) {
            self.credentials.email = email;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.credentials.password = password;
        }

        let token = lookup(ENV_TG_BOT_TOKEN);
        let chat = lookup(ENV_TG_CHAT_ID);
        if token.is_some() || chat.is_some() {
            let tg = self.telegram.get_or_insert_with(TelegramConfig::default);
            if let Some(token) = token {
                tg.bot_token = token;
            }
            if let Some(chat) = chat {
                tg.chat_id = chat;
            }
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/harbormaster")
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

/// Global configuration settings
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding the record store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Offset used when rendering times in notifications
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Listen address for `serve`
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Seconds between scheduled sweeps in `serve`
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

impl GlobalConfig {
    /// Path of the redb record store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("harbormaster.redb")
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

/// Resource-owner credentials for the identity provider
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Telegram notification target
#[derive(Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_complete(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Region definition
#[derive(Debug, Clone, Deserialize)]
pub struct RegionDef {
    /// Short region code
    pub code: String,
    /// Display name
    pub name: Option<String>,
    /// Control-plane API base URL
    pub api: String,
    /// Identity-provider base URL
    pub uaa: String,
    /// Regex matched against app URLs for auto-classification
    pub domain_pattern: String,
}

/// Monitored app definition
#[derive(Debug, Clone, Deserialize)]
pub struct AppDef {
    /// App name on the platform
    pub name: String,
    /// Public URL, probed for health
    pub url: String,
    /// Explicit region code (inferred from the URL when absent)
    pub region: Option<String>,
}

/// Template written by `harbormaster init`
pub const TEMPLATE: &str = r#"# Harbormaster configuration

[config]
data_dir = "/var/lib/harbormaster"
utc_offset_hours = 8
listen = "0.0.0.0:8080"
sweep_interval = 300

# Overridable with HARBORMASTER_EMAIL / HARBORMASTER_PASSWORD
[credentials]
email = "ops@example.com"
password = ""

[health]
retry_count = 2
retry_interval_ms = 3000
timeout_ms = 30000
acceptable_status = [200, 204, 302]
# required_body = "ok"

[remediation]
failure_threshold = 3
reset_window_secs = 900
restart_attempts = 2

# Overridable with HARBORMASTER_TG_BOT_TOKEN / HARBORMASTER_TG_CHAT_ID
# [telegram]
# bot_token = ""
# chat_id = ""

[[regions]]
code = "US"
name = "US East"
api = "https://api.cf.us10-001.hana.ondemand.com"
uaa = "https://uaa.cf.us10-001.hana.ondemand.com"
domain_pattern = '\.us10(-001)?\.hana\.ondemand\.com$'

[[regions]]
code = "AP"
name = "Singapore"
api = "https://api.cf.ap21.hana.ondemand.com"
uaa = "https://uaa.cf.ap21.hana.ondemand.com"
domain_pattern = '\.ap21\.hana\.ondemand\.com$'

[[apps]]
name = "us0"
url = "https://us0.cfapps.us10-001.hana.ondemand.com"
region = "US"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FULL: &str = r#"
[config]
data_dir = "/tmp/harbor"
utc_offset_hours = 0

[credentials]
email = "ops@example.com"
password = "hunter2"

[health]
retry_count = 1
retry_interval_ms = 500
timeout_ms = 2000
acceptable_status = [200]
required_body = "vless"

[remediation]
failure_threshold = 5

[[regions]]
code = "US"
api = "https://api.us"
uaa = "https://uaa.us"
domain_pattern = '\.us10\.example$'

[[apps]]
name = "us0"
url = "https://us0.us10.example"

[[apps]]
name = "us1"
url = "https://us1.us10.example"
region = "US"
"#;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[config]

[[apps]]
name = "s1"
url = "https://s1.example"
"#;
        let config: HarborConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.config.sweep_interval, 300);
        assert_eq!(config.config.utc_offset_hours, 8);
        assert_eq!(config.health.retry_count, 2);
        assert_eq!(config.remediation.failure_threshold, 3);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: HarborConfig = toml::from_str(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.config.store_path(), PathBuf::from("/tmp/harbor/harbormaster.redb"));
        assert_eq!(config.health.timeout, Duration::from_millis(2000));
        assert_eq!(config.health.required_body.as_deref(), Some("vless"));
        assert_eq!(config.remediation.failure_threshold, 5);
        assert_eq!(config.regions.len(), 1);
        assert_eq!(config.apps[1].region.as_deref(), Some("US"));
    }

    #[test]
    fn test_undefined_region_error() {
        let toml = r#"
[config]

[[apps]]
name = "s1"
url = "https://s1.example"
region = "EU"
"#;
        let config: HarborConfig = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(Error::ConfigValidation(_))));
    }

    #[test]
    fn test_duplicate_app_error() {
        let toml = r#"
[config]

[[apps]]
name = "s1"
url = "https://a.example"

[[apps]]
name = "s1"
url = "https://b.example"
"#;
        let config: HarborConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate app name"));
    }

    #[test]
    fn test_bad_pattern_error() {
        let toml = r#"
[config]

[[regions]]
code = "US"
api = "https://api"
uaa = "https://uaa"
domain_pattern = "(unclosed"

[[apps]]
name = "s1"
url = "https://a.example"
"#;
        let config: HarborConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config: HarborConfig = toml::from_str(FULL).unwrap();
        config.apply_overrides(|key| match key {
            ENV_PASSWORD => Some("from-env".to_string()),
            ENV_TG_BOT_TOKEN => Some("123:abc".to_string()),
            ENV_TG_CHAT_ID => Some("42".to_string()),
            _ => None,
        });
        assert_eq!(config.credentials.email, "ops@example.com");
        assert_eq!(config.credentials.password, "from-env");
        let tg = config.telegram.unwrap();
        assert!(tg.is_complete());
        assert_eq!(tg.chat_id, "42");
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials {
            email: "a@b".into(),
            password: "secret".into(),
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_template_is_valid() {
        let config: HarborConfig = toml::from_str(TEMPLATE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.regions.len(), 2);
    }
}
