//! Region registry and the monitored fleet
//!
//! Regions are statically configured. An app either names its region
//! explicitly or gets classified from its URL by a `RegionResolver`.

use crate::error::{Error, Result};
use crate::manifest::HarborConfig;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Region code used when an app cannot be classified
pub const UNKNOWN_REGION: &str = "UNKNOWN";

/// A deployment target with its own control plane and identity provider
#[derive(Debug, Clone)]
pub struct Region {
    /// Short code (e.g. "US")
    pub code: String,
    /// Human-readable name
    pub name: String,
    /// Control-plane API base URL
    pub api: String,
    /// Identity-provider base URL
    pub uaa: String,
    /// Pattern matched against app URLs
    pub pattern: Regex,
}

impl Region {
    /// Whether an app URL belongs to this region
    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }
}

/// A supervised application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredApp {
    pub name: String,
    pub url: String,
    pub region: String,
}

/// Classifies an app URL into a region code
pub trait RegionResolver: Send + Sync {
    fn classify(&self, url: &str, regions: &[Region]) -> Option<String>;
}

/// Default resolver: first region whose pattern matches wins
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternResolver;

impl RegionResolver for PatternResolver {
    fn classify(&self, url: &str, regions: &[Region]) -> Option<String> {
        regions
            .iter()
            .find(|r| r.matches(url))
            .map(|r| r.code.clone())
    }
}

/// Static region registry
pub struct RegionRegistry {
    regions: Vec<Region>,
    resolver: Box<dyn RegionResolver>,
}

impl RegionRegistry {
    #[cfg(test)]
    pub fn new(regions: Vec<Region>) -> Self {
        Self::with_resolver(regions, Box::new(PatternResolver))
    }

    /// Registry classifying unlabelled apps with `resolver`
    pub fn with_resolver(regions: Vec<Region>, resolver: Box<dyn RegionResolver>) -> Self {
        Self { regions, resolver }
    }

    pub fn get(&self, code: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.code == code)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Comma-separated list of known codes, for error messages
    pub fn known_codes(&self) -> String {
        self.regions
            .iter()
            .map(|r| r.code.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Resolve an app's region: explicit code first, then URL classification
    pub fn resolve(&self, explicit: Option<&str>, url: &str) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.resolver.classify(url, &self.regions))
            .unwrap_or_else(|| UNKNOWN_REGION.to_string())
    }
}

/// Region registry plus the fleet it covers
pub struct Chart {
    registry: RegionRegistry,
    apps: Vec<MonitoredApp>,
}

impl Chart {
    pub fn new(registry: RegionRegistry, apps: Vec<MonitoredApp>) -> Self {
        Self { registry, apps }
    }

    /// Build the chart from a validated configuration, classifying
    /// unlabelled apps by their regions' domain patterns
    pub fn from_config(config: &HarborConfig) -> Result<Self> {
        Self::from_config_with(config, Box::new(PatternResolver))
    }

    /// Build the chart with a custom URL classifier
    pub fn from_config_with(
        config: &HarborConfig,
        resolver: Box<dyn RegionResolver>,
    ) -> Result<Self> {
        let mut regions = Vec::with_capacity(config.regions.len());
        for def in &config.regions {
            let pattern = Regex::new(&def.domain_pattern).map_err(|e| {
                Error::ConfigValidation(format!(
                    "Invalid domain pattern for region '{}': {}",
                    def.code, e
                ))
            })?;
            regions.push(Region {
                code: def.code.clone(),
                name: def.name.clone().unwrap_or_else(|| def.code.clone()),
                api: def.api.trim_end_matches('/').to_string(),
                uaa: def.uaa.trim_end_matches('/').to_string(),
                pattern,
            });
        }

        let registry = RegionRegistry::with_resolver(regions, resolver);
        let apps: Vec<MonitoredApp> = config
            .apps
            .iter()
            .map(|def| MonitoredApp {
                name: def.name.clone(),
                url: def.url.clone(),
                region: registry.resolve(def.region.as_deref(), &def.url),
            })
            .collect();

        let mut seen = HashSet::new();
        for app in &apps {
            if !seen.insert((app.region.as_str(), app.name.as_str())) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate app '{}' in region '{}'",
                    app.name, app.region
                )));
            }
        }

        Ok(Self::new(registry, apps))
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn apps(&self) -> &[MonitoredApp] {
        &self.apps
    }

    pub fn region(&self, code: &str) -> Option<&Region> {
        self.registry.get(code)
    }

    /// Display name of an app's region, falling back to the code
    pub fn region_name(&self, code: &str) -> String {
        self.registry
            .get(code)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| code.to_string())
    }

    /// Apps of one region, in configured order
    pub fn apps_in(&self, code: &str) -> Vec<MonitoredApp> {
        self.apps
            .iter()
            .filter(|a| a.region == code)
            .cloned()
            .collect()
    }
}
