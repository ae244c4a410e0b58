//! Restart orchestrator
//!
//! Drives one `RestartRun` against the platform. Every failure is
//! terminal for the run, reported through the courier and returned to the
//! caller, which owns any retry policy.

use super::RestartRun;
use crate::bridge::Crew;
use crate::chart::{MonitoredApp, Region};
use crate::courier::Notice;
use crate::error::{Error, Result};
use crate::ledger::RestartRecord;
use crate::platform::{self, AppAction, INSTANCE_RUNNING, STATE_STARTED};
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    crew: Crew,
    backoff: ExponentialBackoff,
}

impl Orchestrator {
    pub fn new(crew: Crew) -> Self {
        let policy = &crew.policy;
        let backoff = ExponentialBackoff::new()
            .base_delay_ms(policy.poll_base_ms)
            .max_delay_ms(policy.poll_max_ms)
            .multiplier(policy.poll_multiplier)
            .max_attempts(u8::MAX)
            .jitter_factor(0.0);
        Self { crew, backoff }
    }

    /// Readiness poll delay for the n-th poll (1-based)
    fn poll_delay(&self, step: u8) -> Duration {
        let ms = self
            .backoff
            .delay(step, &mut rand::rng())
            .unwrap_or(self.crew.policy.poll_max_ms);
        Duration::from_millis(ms)
    }

    /// Restart `app` and verify it serves again
    ///
    /// On success a restart record is written with the lower-cased
    /// `operator`. A record that cannot be written is logged and does not
    /// change the outcome. Any restart failure is reported and returned.
    pub async fn restart(&self, app: &MonitoredApp, operator: &str) -> Result<()> {
        let region_name = self.crew.chart.region_name(&app.region);
        let mut run = RestartRun::new();
        info!(app = %app.name, region = %app.region, operator, "restart starting");

        match self.drive(&mut run, app).await {
            Ok(()) => {
                info!(app = %app.name, "restart verified");
                if let Err(e) = self.record(app, operator) {
                    warn!(app = %app.name, error = %e, "failed to write restart record");
                }
                self.crew.courier.send(Notice::Restarted {
                    app: app.name.clone(),
                    url: app.url.clone(),
                    region: region_name,
                    operator: operator.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                let phase = run.phase();
                run.fail();
                warn!(app = %app.name, ?phase, reason = e.reason(), error = %e, "restart failed");
                self.crew.courier.send(Notice::RestartFailed {
                    app: app.name.clone(),
                    url: app.url.clone(),
                    region: region_name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn record(&self, app: &MonitoredApp, operator: &str) -> Result<()> {
        let record = RestartRecord {
            operator: operator.to_lowercase(),
            timestamp: self.crew.clock.now(),
        };
        self.crew
            .ledger
            .put_restart_record(&app.region, &app.name, &record)
    }

    async fn drive(&self, run: &mut RestartRun, app: &MonitoredApp) -> Result<()> {
        let chart = self.crew.chart.clone();
        let region = chart.region(&app.region).ok_or_else(|| Error::InvalidRegion {
            app: app.name.clone(),
            region: app.region.clone(),
        })?;
        let platform = &self.crew.platform;
        let policy = &self.crew.policy;

        let token = platform.authenticate(region).await?;
        let guid = platform.find_app(region, &token, &app.name).await?;
        run.locate()?;

        run.halt()?;
        platform
            .app_action(region, &token, &guid, AppAction::Stop)
            .await?;
        tokio::time::sleep(policy.settle()).await;
        run.settle()?;

        platform
            .app_action(region, &token, &guid, AppAction::Start)
            .await?;
        run.start()?;

        run.poll()?;
        let mut step = self.await_started(region, &token, &guid, app).await?;
        run.started()?;

        self.await_running(region, &token, &guid, app, &mut step)
            .await?;
        run.running()?;

        if !self
            .crew
            .prober
            .probe(&app.url, &self.crew.probe_config)
            .await
        {
            return Err(Error::UnhealthyAfterRestart(app.name.clone()));
        }
        run.verified()?;
        Ok(())
    }

    /// Poll until the app reports STARTED. Returns the backoff step reached.
    async fn await_started(
        &self,
        region: &Region,
        token: &platform::AccessToken,
        guid: &str,
        app: &MonitoredApp,
    ) -> Result<u8> {
        let budget = self.crew.policy.started_polls;
        let mut step: u8 = 1;
        let mut last_state = String::from("UNKNOWN");

        for poll in 1..=budget {
            tokio::time::sleep(self.poll_delay(step)).await;
            last_state = self.crew.platform.app_state(region, token, guid).await?;
            debug!(app = %app.name, poll, state = %last_state, "app state");
            if last_state == STATE_STARTED {
                return Ok(step);
            }
            if poll < budget {
                step = step.saturating_add(1);
            }
        }

        Err(Error::NotStarted {
            app: app.name.clone(),
            state: last_state,
        })
    }

    /// Poll the primary process until an instance is RUNNING
    ///
    /// Continues the delay sequence from the STARTED wait.
    async fn await_running(
        &self,
        region: &Region,
        token: &platform::AccessToken,
        guid: &str,
        app: &MonitoredApp,
        step: &mut u8,
    ) -> Result<()> {
        let processes = self.crew.platform.processes(region, token, guid).await?;
        let process = platform::primary_process(&processes)
            .ok_or_else(|| Error::NoRunningInstance(app.name.clone()))?
            .guid
            .clone();

        let budget = self.crew.policy.running_polls;
        for poll in 1..=budget {
            tokio::time::sleep(self.poll_delay(*step)).await;
            let states = self
                .crew
                .platform
                .instance_states(region, token, &process)
                .await?;
            debug!(app = %app.name, poll, ?states, "instance states");
            if states.iter().any(|s| s == INSTANCE_RUNNING) {
                return Ok(());
            }
            if poll < budget {
                *step = step.saturating_add(1);
            }
        }

        Err(Error::NoRunningInstance(app.name.clone()))
    }
}
