//! Store-backed circuit breaker
//!
//! One `CircuitState` record per (region, app). A tripped circuit blocks
//! automated remediation until its window passes; the window is never
//! extended by further failures.

use crate::chart::{Chart, MonitoredApp};
use crate::clock::Clock;
use crate::courier::{Courier, Notice};
use crate::error::Result;
use crate::ledger::{CircuitState, Ledger};
use crate::sickbay::recovery::RemediationPolicy;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CircuitBreaker {
    ledger: Ledger,
    clock: Arc<dyn Clock>,
    courier: Courier,
    chart: Arc<Chart>,
    threshold: u32,
    reset_window: chrono::Duration,
}

impl CircuitBreaker {
    pub fn new(
        ledger: Ledger,
        clock: Arc<dyn Clock>,
        courier: Courier,
        chart: Arc<Chart>,
        policy: &RemediationPolicy,
    ) -> Self {
        Self {
            ledger,
            clock,
            courier,
            chart,
            threshold: policy.failure_threshold.max(1),
            reset_window: policy.reset_window(),
        }
    }

    /// True iff the circuit's window is still open
    pub fn is_broken(&self, app: &MonitoredApp) -> Result<bool> {
        Ok(self
            .state(app)?
            .is_some_and(|state| state.is_broken(self.clock.now())))
    }

    /// Raw stored state, for status reporting
    pub fn state(&self, app: &MonitoredApp) -> Result<Option<CircuitState>> {
        self.ledger.circuit(&app.region, &app.name)
    }

    /// Fold one remediation outcome into the circuit
    pub fn record_outcome(&self, app: &MonitoredApp, failed: bool) -> Result<()> {
        if !failed {
            if self.ledger.clear_circuit(&app.region, &app.name)? {
                info!(app = %app.name, region = %app.region, "circuit reset");
            }
            return Ok(());
        }

        let now = self.clock.now();
        let threshold = self.threshold;
        let window = self.reset_window;
        let mut tripped = false;

        let next = self.ledger.update_circuit(&app.region, &app.name, |current| {
            let mut state = match current {
                Some(state) if state.window_elapsed(now) => CircuitState::default(),
                Some(state) => state,
                None => CircuitState::default(),
            };

            if state.is_broken(now) {
                state.consecutive_failures += 1;
                return Some(state);
            }

            state.consecutive_failures += 1;
            if state.consecutive_failures >= threshold {
                state.broken_until = Some(now + window);
                tripped = true;
            }
            Some(state)
        })?;

        if let Some(state) = next {
            if tripped {
                let broken_until = state.broken_until.unwrap_or(now + window);
                warn!(
                    app = %app.name,
                    region = %app.region,
                    failures = state.consecutive_failures,
                    %broken_until,
                    "circuit tripped"
                );
                self.courier.send(Notice::BreakerTripped {
                    app: app.name.clone(),
                    region: self.chart.region_name(&app.region),
                    broken_until,
                    failures: state.consecutive_failures,
                });
            } else {
                info!(
                    app = %app.name,
                    failures = state.consecutive_failures,
                    "failure recorded"
                );
            }
        }
        Ok(())
    }
}
