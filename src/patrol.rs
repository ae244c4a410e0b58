//! Fleet monitor
//!
//! One sweep walks every app in configured order, one at a time: skip if
//! the circuit is open, probe, and on failure try a bounded number of
//! verified restarts. Callers must hold the run lock.

use crate::bridge::Crew;
use crate::chart::MonitoredApp;
use crate::courier::{Notice, SweepCounts};
use crate::error::Result;
use crate::ledger::LogStatus;
use crate::restart::Orchestrator;
use tracing::{info, warn};

/// Operator recorded for automated restarts
pub const SYSTEM_OPERATOR: &str = "system";

pub struct Patrol {
    crew: Crew,
    orchestrator: Orchestrator,
}

impl Patrol {
    pub fn new(crew: Crew) -> Self {
        let orchestrator = Orchestrator::new(crew.clone());
        Self { crew, orchestrator }
    }

    /// Run one full sweep and report the tally
    pub async fn sweep(&self) -> SweepCounts {
        match self.crew.ledger.prune_logs(self.crew.policy.log_retention()) {
            Ok(removed) if removed > 0 => info!(removed, "pruned monitor log"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "monitor log prune failed"),
        }

        let apps = self.crew.chart.apps();
        info!(apps = apps.len(), "sweep starting");

        let mut counts = SweepCounts {
            total: apps.len(),
            ..SweepCounts::default()
        };

        for app in apps {
            match self.watch(app).await {
                LogStatus::Healthy => counts.healthy += 1,
                LogStatus::Restarted => counts.restarted += 1,
                LogStatus::Skipped => counts.skipped += 1,
                LogStatus::Error | LogStatus::Offline => {
                    counts.errors += 1;
                    counts.failed_apps.push(app.name.clone());
                }
            }
            tokio::time::sleep(self.crew.policy.sweep_pause()).await;
        }

        info!(
            healthy = counts.healthy,
            restarted = counts.restarted,
            errors = counts.errors,
            skipped = counts.skipped,
            "sweep finished"
        );
        self.crew.courier.send(Notice::SweepSummary(counts.clone()));
        counts
    }

    /// Observe and, if needed, remediate one app. Never fails.
    async fn watch(&self, app: &MonitoredApp) -> LogStatus {
        match self.check(app).await {
            Ok(status) => status,
            Err(e) => {
                warn!(app = %app.name, reason = e.reason(), error = %e, "app remediation failed");
                self.log(app, LogStatus::Error, &format!("monitor failed: {}", e));
                if let Err(store) = self.crew.breaker.record_outcome(app, true) {
                    warn!(app = %app.name, error = %store, "failed to record circuit failure");
                }
                self.crew.courier.send(Notice::MonitorError {
                    app: app.name.clone(),
                    url: app.url.clone(),
                    region: self.crew.chart.region_name(&app.region),
                    error: e.to_string(),
                });
                LogStatus::Error
            }
        }
    }

    async fn check(&self, app: &MonitoredApp) -> Result<LogStatus> {
        let ledger = &self.crew.ledger;

        if self.crew.breaker.is_broken(app)? {
            info!(app = %app.name, "circuit open, skipping");
            ledger.append_log(&app.name, LogStatus::Skipped, "circuit open, check skipped")?;
            return Ok(LogStatus::Skipped);
        }

        if self
            .crew
            .prober
            .probe(&app.url, &self.crew.probe_config)
            .await
        {
            ledger.append_log(&app.name, LogStatus::Healthy, "healthy")?;
            return Ok(LogStatus::Healthy);
        }

        let attempts = self.crew.policy.restart_attempts.max(1);
        warn!(app = %app.name, url = %app.url, "app offline");
        self.crew.courier.send(Notice::Offline {
            app: app.name.clone(),
            url: app.url.clone(),
            region: self.crew.chart.region_name(&app.region),
            attempts,
        });
        ledger.append_log(&app.name, LogStatus::Offline, "offline, restarting")?;

        let mut attempt = 1;
        loop {
            match self.orchestrator.restart(app, SYSTEM_OPERATOR).await {
                Ok(()) => {
                    ledger.append_log(
                        &app.name,
                        LogStatus::Restarted,
                        &format!("restarted (attempt {})", attempt),
                    )?;
                    self.crew.breaker.record_outcome(app, false)?;
                    return Ok(LogStatus::Restarted);
                }
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(app = %app.name, attempt, error = %e, "restart attempt failed, retrying");
                    tokio::time::sleep(self.crew.policy.restart_retry_pause()).await;
                    attempt += 1;
                }
            }
        }
    }

    fn log(&self, app: &MonitoredApp, status: LogStatus, message: &str) {
        if let Err(e) = self.crew.ledger.append_log(&app.name, status, message) {
            warn!(app = %app.name, error = %e, "failed to write monitor log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CircuitState;
    use crate::testkit::{self, Reply};
    use std::time::Duration;

    fn statuses(rig: &testkit::Rig, app: &str) -> Vec<LogStatus> {
        rig.ledger
            .logs()
            .unwrap()
            .into_iter()
            .filter(|e| e.app == app)
            .map(|e| e.status)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_app_makes_no_platform_calls() {
        let mut rig = testkit::rig_with(vec!["s1"]);
        let patrol = Patrol::new(rig.crew.clone());

        let counts = patrol.sweep().await;

        assert_eq!(counts.healthy, 1);
        assert_eq!(statuses(&rig, "s1"), vec![LogStatus::Healthy]);
        assert!(rig.platform.calls().is_empty());
        assert!(rig.ledger.circuit("AP", "s1").unwrap().is_none());
        assert!(matches!(
            rig.inbox.drain().as_slice(),
            [Notice::SweepSummary(SweepCounts { healthy: 1, .. })]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_app_restarted_on_second_attempt() {
        let mut rig = testkit::rig_with(vec!["us0"]);
        let us0 = rig.app("us0");
        rig.fetch.script(
            &us0.url,
            vec![
                Reply::Status(503),
                Reply::Status(503),
                Reply::Status(503),
                Reply::Status(200),
            ],
        );
        rig.platform.script_app_states(vec!["STOPPED"; 8]);
        rig.ledger
            .update_circuit("US", "us0", |_| {
                Some(CircuitState {
                    consecutive_failures: 2,
                    broken_until: None,
                })
            })
            .unwrap();
        let patrol = Patrol::new(rig.crew.clone());

        let counts = patrol.sweep().await;

        assert_eq!(counts.restarted, 1);
        assert_eq!(counts.errors, 0);
        assert_eq!(
            statuses(&rig, "us0"),
            vec![LogStatus::Offline, LogStatus::Restarted]
        );
        let record = rig.ledger.restart_record("US", "us0").unwrap().unwrap();
        assert_eq!(record.operator, "system");
        assert!(rig.ledger.circuit("US", "us0").unwrap().is_none());
        assert_eq!(rig.platform.count("stop:"), 2);
        assert_eq!(rig.fetch.calls(&us0.url), 4);

        let notices = rig.inbox.drain();
        assert!(matches!(notices.first(), Some(Notice::Offline { .. })));
        assert!(notices.iter().any(|n| matches!(n, Notice::RestartFailed { .. })));
        assert!(notices.iter().any(|n| matches!(n, Notice::Restarted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_pauses_after_each_app() {
        let rig = testkit::rig_with(vec!["s1", "us0"]);
        let patrol = Patrol::new(rig.crew.clone());

        let started = tokio::time::Instant::now();
        let counts = patrol.sweep().await;
        let elapsed = started.elapsed();

        assert_eq!(counts.healthy, 2);
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    /// Sweep an app that fails its first restart and recovers on the second
    async fn recover_on_retry(retry_pause_ms: u64) -> Duration {
        let rig = testkit::rig_with(vec!["us0"]);
        let us0 = rig.app("us0");
        rig.fetch.script(
            &us0.url,
            vec![
                Reply::Status(503),
                Reply::Status(503),
                Reply::Status(503),
                Reply::Status(200),
            ],
        );
        rig.platform.script_app_states(vec!["STOPPED"; 8]);
        let mut policy = rig.crew.policy.clone();
        policy.restart_retry_pause_ms = retry_pause_ms;
        let patrol = Patrol::new(rig.crew.clone().with_policy(policy));

        let started = tokio::time::Instant::now();
        let counts = patrol.sweep().await;
        assert_eq!(counts.restarted, 1);
        assert_eq!(rig.platform.count("stop:"), 2);
        started.elapsed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_retry_waits_between_attempts() {
        let paced = recover_on_retry(3000).await;
        let unpaced = recover_on_retry(0).await;

        assert_eq!(paced - unpaced, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_restarts_record_failure() {
        let mut rig = testkit::rig_with(vec!["us0"]);
        let us0 = rig.app("us0");
        rig.fetch.script(&us0.url, vec![Reply::Status(503)]);
        rig.platform.set_fallback_state("CRASHED");
        let patrol = Patrol::new(rig.crew.clone());

        let counts = patrol.sweep().await;

        assert_eq!(counts.errors, 1);
        assert_eq!(counts.failed_apps, vec!["us0".to_string()]);
        assert_eq!(rig.platform.count("stop:"), 2);
        let circuit = rig.ledger.circuit("US", "us0").unwrap().unwrap();
        assert_eq!(circuit.consecutive_failures, 1);
        assert_eq!(
            statuses(&rig, "us0"),
            vec![LogStatus::Offline, LogStatus::Error]
        );
        let last = rig.ledger.last_error("us0").unwrap().unwrap();
        assert!(last.message.contains("CRASHED"));
        assert!(rig
            .inbox
            .drain()
            .iter()
            .any(|n| matches!(n, Notice::MonitorError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_app() {
        let rig = testkit::rig_with(vec!["us0"]);
        let us0 = rig.app("us0");
        let until = rig.clock.now() + chrono::Duration::minutes(10);
        rig.ledger
            .update_circuit("US", "us0", |_| {
                Some(CircuitState {
                    consecutive_failures: 3,
                    broken_until: Some(until),
                })
            })
            .unwrap();
        let patrol = Patrol::new(rig.crew.clone());

        let counts = patrol.sweep().await;

        assert_eq!(counts.skipped, 1);
        assert_eq!(rig.fetch.calls(&us0.url), 0);
        assert_eq!(statuses(&rig, "us0"), vec![LogStatus::Skipped]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_prunes_old_logs() {
        let rig = testkit::rig_with(vec!["s1"]);
        rig.ledger.append_log("s1", LogStatus::Healthy, "ancient").unwrap();
        rig.clock.advance(chrono::Duration::days(31));
        let patrol = Patrol::new(rig.crew.clone());

        patrol.sweep().await;

        let messages: Vec<_> = rig
            .ledger
            .logs()
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["healthy"]);
    }
}
