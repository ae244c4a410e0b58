//! Bridge between triggers and the controller
//!
//! Handles:
//! - Wiring the record store, courier, platform client and prober together
//! - The lock-guarded fleet sweep
//! - Region batches and the fleet-wide restart
//! - The read-only status view

use crate::armada::{Armada, Outcome};
use crate::chart::{Chart, MonitoredApp};
use crate::clock::{self, Clock, SystemClock};
use crate::courier::{self, Courier, CourierTask, SweepCounts};
use crate::error::Result;
use crate::ledger::{Ledger, RestartRecord};
use crate::manifest::HarborConfig;
use crate::patrol::Patrol;
use crate::platform::{CloudFoundry, Platform};
use crate::runlock::{MONITOR_LOCK, RunLock};
use crate::sickbay::{CircuitBreaker, HealthProber, ProbeConfig, RemediationPolicy};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Shared dependencies of every controller component
#[derive(Clone)]
pub struct Crew {
    pub ledger: Ledger,
    pub courier: Courier,
    pub clock: Arc<dyn Clock>,
    pub platform: Arc<dyn Platform>,
    pub prober: HealthProber,
    pub chart: Arc<Chart>,
    pub breaker: CircuitBreaker,
    pub probe_config: ProbeConfig,
    pub policy: RemediationPolicy,
}

impl Crew {
    pub fn new(
        ledger: Ledger,
        courier: Courier,
        clock: Arc<dyn Clock>,
        chart: Arc<Chart>,
        platform: Arc<dyn Platform>,
        prober: HealthProber,
    ) -> Self {
        let policy = RemediationPolicy::default();
        let breaker = CircuitBreaker::new(
            ledger.clone(),
            clock.clone(),
            courier.clone(),
            chart.clone(),
            &policy,
        );
        Self {
            ledger,
            courier,
            clock,
            platform,
            prober,
            chart,
            breaker,
            probe_config: ProbeConfig::default(),
            policy,
        }
    }

    /// Set the default health check used by sweeps, restarts and status
    pub fn with_probe_config(mut self, config: ProbeConfig) -> Self {
        self.probe_config = config;
        self
    }

    /// Set remediation timing; rebuilds the breaker
    pub fn with_policy(mut self, policy: RemediationPolicy) -> Self {
        self.breaker = CircuitBreaker::new(
            self.ledger.clone(),
            self.clock.clone(),
            self.courier.clone(),
            self.chart.clone(),
            &policy,
        );
        self.policy = policy;
        self
    }
}

/// Status of one app, as served by `status` and `/api/status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub name: String,
    pub url: String,
    pub region: String,
    pub region_name: String,
    pub healthy: bool,
    pub last_restart: Option<RestartRecord>,
    pub circuit_broken: bool,
    pub broken_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Entry point for every trigger
pub struct Bridge {
    crew: Crew,
    patrol: Patrol,
    armada: Armada,
    lock: RunLock,
}

impl Bridge {
    pub fn new(crew: Crew) -> Self {
        Self {
            patrol: Patrol::new(crew.clone()),
            armada: Armada::new(crew.clone()),
            lock: RunLock::new(crew.ledger.clone(), MONITOR_LOCK),
            crew,
        }
    }

    /// Assemble the production controller from configuration
    ///
    /// Must run inside a tokio runtime: the courier's delivery task is
    /// spawned here.
    pub fn launch(config: &HarborConfig) -> Result<(Bridge, CourierTask)> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let chart = Arc::new(Chart::from_config(config)?);
        let ledger = Ledger::open(&config.config.store_path(), clock.clone())?;
        let (courier, task) = Courier::start(
            courier::notifier_for(config.telegram.as_ref()),
            ledger.clone(),
            clock.clone(),
            config.config.utc_offset(),
        );
        let platform: Arc<dyn Platform> = Arc::new(CloudFoundry::new(config.credentials.clone()));

        let crew = Crew::new(ledger, courier, clock, chart, platform, HealthProber::http())
            .with_probe_config(config.health.clone())
            .with_policy(config.remediation.clone());
        Ok((Bridge::new(crew), task))
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    /// Run one sweep under the run lock
    ///
    /// Returns `None` when another sweep holds the lock.
    pub async fn sweep(&self) -> Result<Option<SweepCounts>> {
        let token = RunLock::token();
        if !self.lock.try_acquire(&token, self.crew.policy.lock_ttl())? {
            info!("sweep already in progress, skipping");
            return Ok(None);
        }

        let counts = self.patrol.sweep().await;

        if let Err(e) = self.lock.release(&token) {
            warn!(error = %e, "failed to release run lock, it will expire");
        }
        Ok(Some(counts))
    }

    /// Synchronous region check, no network calls
    pub fn validate_region(&self, code: &str) -> Result<Vec<MonitoredApp>> {
        self.armada.validate(code)
    }

    pub async fn restart_region(&self, code: &str, operator: &str) -> Result<Vec<Outcome>> {
        self.armada.restart_region(code, operator).await
    }

    pub async fn restart_everything(&self, operator: &str) -> Vec<Outcome> {
        self.armada.restart_everything(operator).await
    }

    /// Read-only status of every app; probes run concurrently
    pub async fn status(&self) -> Result<Vec<AppStatus>> {
        let apps = self.crew.chart.apps();

        let mut probes = JoinSet::new();
        for (index, app) in apps.iter().enumerate() {
            let prober = self.crew.prober.clone();
            let config = self.crew.probe_config.clone();
            let url = app.url.clone();
            probes.spawn(async move { (index, prober.probe(&url, &config).await) });
        }
        let mut healthy = vec![false; apps.len()];
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, up)) => healthy[index] = up,
                Err(e) => warn!(error = %e, "status probe task failed"),
            }
        }

        let now = self.crew.clock.now();
        let mut statuses = Vec::with_capacity(apps.len());
        for (app, healthy) in apps.iter().zip(healthy) {
            let circuit = self.crew.breaker.state(app)?.unwrap_or_default();
            statuses.push(AppStatus {
                name: app.name.clone(),
                url: app.url.clone(),
                region: app.region.clone(),
                region_name: self.crew.chart.region_name(&app.region),
                healthy,
                last_restart: self.crew.ledger.restart_record(&app.region, &app.name)?,
                circuit_broken: circuit.is_broken(now),
                broken_until: circuit.broken_until.filter(|until| now < *until),
                consecutive_failures: circuit.consecutive_failures,
                last_error: self.crew.ledger.last_error(&app.name)?.map(|e| e.message),
            });
        }
        Ok(statuses)
    }
}

/// Print app status
pub fn print_status(statuses: &[AppStatus], offset: FixedOffset, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(statuses)
            .map_err(|e| crate::error::Error::Decode(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    println!(
        "{:<16} {:<12} {:<8} {:<24} {:<10}",
        "NAME", "REGION", "HEALTH", "LAST RESTART", "CIRCUIT"
    );
    println!("{}", "-".repeat(74));
    for status in statuses {
        let health = if status.healthy { "up" } else { "down" };
        let restart = status
            .last_restart
            .as_ref()
            .map(|r| format!("{} by {}", clock::display(r.timestamp, offset), r.operator))
            .unwrap_or_else(|| "-".to_string());
        let circuit = match status.broken_until {
            Some(until) => format!("open until {}", clock::display(until, offset)),
            None if status.consecutive_failures > 0 => {
                format!("{} failures", status.consecutive_failures)
            }
            None => "closed".to_string(),
        };
        println!(
            "{:<16} {:<12} {:<8} {:<24} {}",
            status.name, status.region, health, restart, circuit
        );
        if let Some(error) = &status.last_error {
            println!("  last error: {}", error);
        }
    }
    Ok(())
}

/// Print a configuration summary
pub fn print_check(config: &HarborConfig) -> Result<()> {
    let chart = Chart::from_config(config)?;
    println!("Configuration is valid.");

    println!("\nRegions:");
    for region in chart.registry().regions() {
        let apps = chart.apps_in(&region.code);
        println!(
            "  {} ({}): {} app(s), api {}",
            region.code,
            region.name,
            apps.len(),
            region.api
        );
    }

    let unknown: Vec<_> = chart
        .apps()
        .iter()
        .filter(|a| chart.region(&a.region).is_none())
        .collect();
    if !unknown.is_empty() {
        println!("\nApps without a known region (probed, never restarted):");
        for app in unknown {
            println!("  {} ({})", app.name, app.url);
        }
    }

    let notifications = match &config.telegram {
        Some(tg) if tg.is_complete() => "telegram",
        _ => "log only",
    };
    println!("\nNotifications: {}", notifications);
    println!("Record store: {}", config.config.store_path().display());
    Ok(())
}
