//! Region batch controller and the fleet-wide restart
//!
//! A region batch restarts the region's apps strictly one after another
//! through the orchestrator, honouring the circuit breaker. The fleet-wide
//! restart fires the platform's single restart action at every app at once
//! and verifies nothing.

use crate::bridge::Crew;
use crate::chart::MonitoredApp;
use crate::courier::Notice;
use crate::error::{Error, Result};
use crate::platform::AppAction;
use crate::restart::Orchestrator;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

/// Result for one app of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub app: String,
    pub region: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    fn new(app: &MonitoredApp, status: OutcomeStatus, detail: Option<String>) -> Self {
        Self {
            app: app.name.clone(),
            region: app.region.clone(),
            status,
            detail,
        }
    }
}

fn failed_names(outcomes: &[Outcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .map(|o| o.app.clone())
        .collect()
}

fn count(outcomes: &[Outcome], status: OutcomeStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

pub struct Armada {
    crew: Crew,
    orchestrator: Orchestrator,
}

impl Armada {
    pub fn new(crew: Crew) -> Self {
        let orchestrator = Orchestrator::new(crew.clone());
        Self { crew, orchestrator }
    }

    /// Check a region code without touching the network
    ///
    /// Returns the region's apps in configured order.
    pub fn validate(&self, code: &str) -> Result<Vec<MonitoredApp>> {
        let chart = &self.crew.chart;
        if chart.region(code).is_none() {
            return Err(Error::RegionNotFound {
                code: code.to_string(),
                known: chart.registry().known_codes(),
            });
        }
        let apps = chart.apps_in(code);
        if apps.is_empty() {
            return Err(Error::RegionEmpty(chart.region_name(code)));
        }
        Ok(apps)
    }

    /// Restart every app of a region, one at a time
    pub async fn restart_region(&self, code: &str, operator: &str) -> Result<Vec<Outcome>> {
        let apps = self.validate(code)?;
        let region_name = self.crew.chart.region_name(code);
        info!(region = code, apps = apps.len(), operator, "region restart starting");

        let mut outcomes = Vec::with_capacity(apps.len());
        for app in &apps {
            outcomes.push(self.restart_one(app, operator).await);
            tokio::time::sleep(self.crew.policy.region_pause()).await;
        }

        let succeeded = count(&outcomes, OutcomeStatus::Success);
        let failed = count(&outcomes, OutcomeStatus::Failed);
        let skipped = count(&outcomes, OutcomeStatus::Skipped);
        info!(region = code, succeeded, failed, skipped, "region restart finished");

        self.crew.courier.send(Notice::RegionSummary {
            region: region_name,
            operator: operator.to_string(),
            total: apps.len(),
            succeeded,
            failed,
            skipped,
            failed_apps: failed_names(&outcomes),
        });
        Ok(outcomes)
    }

    async fn restart_one(&self, app: &MonitoredApp, operator: &str) -> Outcome {
        let breaker = &self.crew.breaker;
        match breaker.is_broken(app) {
            Ok(true) => {
                info!(app = %app.name, "circuit open, skipping");
                return Outcome::new(app, OutcomeStatus::Skipped, Some("circuit open".into()));
            }
            Ok(false) => {}
            Err(e) => return Outcome::new(app, OutcomeStatus::Failed, Some(e.to_string())),
        }

        let result = self.orchestrator.restart(app, operator).await;
        let outcome = match &result {
            Ok(()) => Outcome::new(app, OutcomeStatus::Success, None),
            Err(e) => Outcome::new(app, OutcomeStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = breaker.record_outcome(app, result.is_err()) {
            warn!(app = %app.name, error = %e, "failed to update circuit");
        }
        outcome
    }

    /// Issue the platform restart action to every app concurrently
    pub async fn restart_everything(&self, operator: &str) -> Vec<Outcome> {
        let apps = self.crew.chart.apps().to_vec();
        info!(apps = apps.len(), operator, "fleet restart starting");

        let mut tasks = JoinSet::new();
        for (index, app) in apps.iter().cloned().enumerate() {
            let crew = self.crew.clone();
            tasks.spawn(async move {
                let result = bounce(&crew, &app).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<()>>> = apps.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "fleet restart task failed"),
            }
        }

        let outcomes: Vec<Outcome> = apps
            .iter()
            .zip(results)
            .map(|(app, result)| match result {
                Some(Ok(())) => Outcome::new(app, OutcomeStatus::Success, None),
                Some(Err(e)) => {
                    warn!(app = %app.name, error = %e, "fleet restart failed for app");
                    Outcome::new(app, OutcomeStatus::Failed, Some(e.to_string()))
                }
                None => Outcome::new(app, OutcomeStatus::Failed, Some("task aborted".into())),
            })
            .collect();

        self.crew.courier.send(Notice::FleetRestartSummary {
            operator: operator.to_string(),
            total: outcomes.len(),
            succeeded: count(&outcomes, OutcomeStatus::Success),
            failed_apps: failed_names(&outcomes),
        });
        outcomes
    }
}

/// Authenticate, resolve and issue a single restart action
async fn bounce(crew: &Crew, app: &MonitoredApp) -> Result<()> {
    let region = crew.chart.region(&app.region).ok_or_else(|| Error::InvalidRegion {
        app: app.name.clone(),
        region: app.region.clone(),
    })?;
    let token = crew.platform.authenticate(region).await?;
    let guid = crew.platform.find_app(region, &token, &app.name).await?;
    crew.platform
        .app_action(region, &token, &guid, AppAction::Restart)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CircuitState;
    use crate::testkit;
    use std::time::Duration;

    #[test]
    fn test_unknown_region_rejected_without_calls() {
        let rig = testkit::rig();
        let armada = Armada::new(rig.crew.clone());

        let err = armada.validate("EU").unwrap_err();
        assert!(matches!(&err, Error::RegionNotFound { known, .. } if known == "US,AP"));
        assert!(rig.platform.calls().is_empty());
    }

    #[test]
    fn test_empty_region_rejected() {
        let rig = testkit::rig_with(vec!["s1"]);
        let armada = Armada::new(rig.crew.clone());
        assert!(matches!(armada.validate("US"), Err(Error::RegionEmpty(_))));
        assert_eq!(armada.validate("AP").unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_restart_sequential_with_skip() {
        let mut rig = testkit::rig_with(vec!["us0", "us1", "s1"]);
        let until = rig.clock.now() + chrono::Duration::minutes(5);
        rig.ledger
            .update_circuit("US", "us1", |_| {
                Some(CircuitState {
                    consecutive_failures: 3,
                    broken_until: Some(until),
                })
            })
            .unwrap();
        let armada = Armada::new(rig.crew.clone());

        let outcomes = armada.restart_region("US", "User").await.unwrap();

        let statuses: Vec<_> = outcomes.iter().map(|o| (o.app.as_str(), o.status)).collect();
        assert_eq!(
            statuses,
            vec![("us0", OutcomeStatus::Success), ("us1", OutcomeStatus::Skipped)]
        );
        assert_eq!(rig.platform.count("find:AP"), 0);
        let record = rig.ledger.restart_record("US", "us0").unwrap().unwrap();
        assert_eq!(record.operator, "user");

        let notices = rig.inbox.drain();
        assert!(matches!(
            notices.last(),
            Some(Notice::RegionSummary { succeeded: 1, skipped: 1, failed: 0, .. })
        ));
    }

    /// Run a two-app US batch and time it
    async fn timed_batch(region_pause_ms: u64) -> Duration {
        let rig = testkit::rig_with(vec!["us0", "us1"]);
        let mut policy = rig.crew.policy.clone();
        policy.region_pause_ms = region_pause_ms;
        let armada = Armada::new(rig.crew.clone().with_policy(policy));

        let started = tokio::time::Instant::now();
        let outcomes = armada.restart_region("US", "user").await.unwrap();
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Success));
        started.elapsed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_batch_paces_between_apps() {
        let paced = timed_batch(2000).await;
        let unpaced = timed_batch(0).await;

        assert_eq!(paced - unpaced, Duration::from_secs(4));
        // Two verified restarts, each with a 3s settle
        assert!(unpaced >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_failure_counts_against_circuit() {
        let rig = testkit::rig_with(vec!["us0"]);
        rig.platform.set_fallback_state("STOPPED");
        let armada = Armada::new(rig.crew.clone());

        let outcomes = armada.restart_region("US", "user").await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
        let circuit = rig.ledger.circuit("US", "us0").unwrap().unwrap();
        assert_eq!(circuit.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_everything_reports_each_app() {
        let mut rig = testkit::rig();
        rig.platform.missing("s1");
        let armada = Armada::new(rig.crew.clone());

        let outcomes = armada.restart_everything("user").await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].app, "s1");
        assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
        assert_eq!(outcomes[1].status, OutcomeStatus::Success);
        assert_eq!(rig.platform.count("restart:"), 1);
        assert_eq!(rig.platform.count("stop:"), 0);
        assert!(rig.ledger.restart_record("US", "us0").unwrap().is_none());
        assert!(matches!(
            rig.inbox.drain().as_slice(),
            [Notice::FleetRestartSummary { succeeded: 1, .. }]
        ));
    }
}
