//! Restart run state machine
//!
//! Tracks a single restart run through its fixed sequence of steps. Uses
//! dynamic dispatch so the orchestrator can drive it step by step.

use crate::error;
use state_machines::state_machine;

state_machine! {
    name: RestartMachine,
    dynamic: true,
    initial: Authenticating,
    states: [
        Authenticating,
        Located,
        Stopping,
        Stopped,
        Starting,
        AwaitingAppStarted,
        AwaitingProcessRunning,
        VerifyingHealth,
        Succeeded,
        Failed
    ],
    events {
        locate {
            transition: { from: Authenticating, to: Located }
        }
        halt {
            transition: { from: Located, to: Stopping }
        }
        settle {
            transition: { from: Stopping, to: Stopped }
        }
        start {
            transition: { from: Stopped, to: Starting }
        }
        poll {
            transition: { from: Starting, to: AwaitingAppStarted }
        }
        started {
            transition: { from: AwaitingAppStarted, to: AwaitingProcessRunning }
        }
        running {
            transition: { from: AwaitingProcessRunning, to: VerifyingHealth }
        }
        verified {
            transition: { from: VerifyingHealth, to: Succeeded }
        }
        fail {
            transition: {
                from: [
                    Authenticating,
                    Located,
                    Stopping,
                    Stopped,
                    Starting,
                    AwaitingAppStarted,
                    AwaitingProcessRunning,
                    VerifyingHealth
                ],
                to: Failed
            }
        }
    }
}

/// Step of a restart run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Authenticating,
    Located,
    Stopping,
    Stopped,
    Starting,
    AwaitingAppStarted,
    AwaitingProcessRunning,
    VerifyingHealth,
    Succeeded,
    Failed,
}

impl RestartPhase {
    /// Parse phase from the machine's state name
    pub fn from_str(s: &str) -> Self {
        match s {
            "Authenticating" => RestartPhase::Authenticating,
            "Located" => RestartPhase::Located,
            "Stopping" => RestartPhase::Stopping,
            "Stopped" => RestartPhase::Stopped,
            "Starting" => RestartPhase::Starting,
            "AwaitingAppStarted" => RestartPhase::AwaitingAppStarted,
            "AwaitingProcessRunning" => RestartPhase::AwaitingProcessRunning,
            "VerifyingHealth" => RestartPhase::VerifyingHealth,
            "Succeeded" => RestartPhase::Succeeded,
            _ => RestartPhase::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RestartPhase::Succeeded | RestartPhase::Failed)
    }
}

/// One restart run's progress
pub struct RestartRun {
    machine: DynamicRestartMachine<()>,
}

impl Default for RestartRun {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartRun {
    pub fn new() -> Self {
        Self {
            machine: RestartMachine::new(()).into_dynamic(),
        }
    }

    pub fn phase(&self) -> RestartPhase {
        RestartPhase::from_str(self.machine.current_state())
    }

    fn fire(&mut self, event: RestartMachineEvent) -> error::Result<()> {
        let from = self.machine.current_state().to_string();
        self.machine
            .handle(event)
            .map_err(|e| error::Error::StateTransition {
                from,
                message: format!("{:?}", e),
            })
    }

    pub fn locate(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Locate)
    }

    pub fn halt(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Halt)
    }

    pub fn settle(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Settle)
    }

    pub fn start(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Start)
    }

    pub fn poll(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Poll)
    }

    pub fn started(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Started)
    }

    pub fn running(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Running)
    }

    pub fn verified(&mut self) -> error::Result<()> {
        self.fire(RestartMachineEvent::Verified)
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.phase().is_terminal() {
            let _ = self.fire(RestartMachineEvent::Fail);
        }
    }
}
