//! Start-up handshake
//!
//! Runs the modem through liveness, echo, SIM, registration, text mode,
//! notification mode and signal steps. Only the liveness probe is fatal.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::InitPolicy;
use crate::diagnostics::{parse_registration, parse_signal, RegistrationStatus, SignalQuality};
use crate::protocol::{CommandEngine, CommandResult, ModemError, Terminal};

/// Final state of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitState {
    /// Liveness passed; remaining steps ran best-effort
    Ready,
    /// The modem never answered the liveness probe
    Failed,
}

/// Handshake steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitStep {
    /// `AT`
    Probe,
    /// `ATE0`
    EchoOff,
    /// `AT+CPIN?` and unlock codes
    SimCheck,
    /// `AT+CREG?` polling
    NetworkWait,
    /// `AT+CMGF=1`
    TextMode,
    /// `AT+CNMI=...`
    NotificationMode,
    /// `AT+CSQ`
    SignalQuery,
}

/// What happened in one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step
    pub step: InitStep,
    /// Whether the step reached its goal
    pub success: bool,
    /// Commands issued for this step
    pub attempts: u32,
}

/// Outcome of [`Initializer::run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Final state
    pub state: InitState,
    /// SIM reported READY (or accepted an unlock code)
    pub sim_ready: bool,
    /// Last registration status seen
    pub registration: Option<RegistrationStatus>,
    /// Notification-mode command the modem accepted
    pub notification_mode: Option<String>,
    /// Signal quality at the end of the handshake
    pub signal: Option<SignalQuality>,
    /// Step trace
    pub steps: Vec<StepRecord>,
}

impl InitReport {
    fn new() -> Self {
        Self {
            state: InitState::Failed,
            sim_ready: false,
            registration: None,
            notification_mode: None,
            signal: None,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: InitStep, success: bool, attempts: u32) {
        tracing::info!(?step, success, attempts, "init step finished");
        self.steps.push(StepRecord {
            step,
            success,
            attempts,
        });
    }

    /// Whether the modem is usable
    pub fn is_ready(&self) -> bool {
        self.state == InitState::Ready
    }

    /// Whether the modem attached to a network during start-up
    pub fn is_registered(&self) -> bool {
        self.registration.is_some_and(|r| r.is_registered())
    }

    /// Record for a step, if it ran
    pub fn step(&self, step: InitStep) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }
}

/// Drives the handshake over a command engine
pub struct Initializer<'a> {
    engine: &'a CommandEngine,
    policy: &'a InitPolicy,
}

impl<'a> Initializer<'a> {
    /// Create an initializer
    pub fn new(engine: &'a CommandEngine, policy: &'a InitPolicy) -> Self {
        Self { engine, policy }
    }

    /// Send one handshake command. Timeouts count as a failed attempt;
    /// transport failures abort the handshake.
    async fn attempt(&self, command: &str) -> Result<Option<CommandResult>, ModemError> {
        match self
            .engine
            .execute(command, self.policy.step_timeout(), Terminal::COMMAND)
            .await
        {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                tracing::debug!(command, "no reply: {}", e);
                Ok(None)
            }
        }
    }

    async fn pause(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Run every step in order
    pub async fn run(&self) -> Result<InitReport, ModemError> {
        let mut report = InitReport::new();

        if !self.probe(&mut report).await? {
            tracing::error!(
                attempts = self.policy.probe_attempts,
                "modem not responding to AT"
            );
            return Ok(report);
        }

        let echo_off = self.attempt("ATE0").await?.is_some_and(|r| r.is_ok());
        report.record(InitStep::EchoOff, echo_off, 1);

        self.check_sim(&mut report).await?;
        self.wait_for_network(&mut report).await?;

        let text_mode = self.attempt("AT+CMGF=1").await?.is_some_and(|r| r.is_ok());
        report.record(InitStep::TextMode, text_mode, 1);

        self.select_notification_mode(&mut report).await?;

        let signal = self.attempt("AT+CSQ").await?.as_ref().and_then(parse_signal);
        if let Some(signal) = signal {
            tracing::info!(%signal, dbm = ?signal.dbm(), "signal quality");
        }
        report.signal = signal;
        report.record(InitStep::SignalQuery, signal.is_some(), 1);

        report.state = InitState::Ready;
        tracing::info!("modem ready");
        Ok(report)
    }

    async fn probe(&self, report: &mut InitReport) -> Result<bool, ModemError> {
        let attempts = self.policy.probe_attempts.max(1);
        for attempt in 1..=attempts {
            if self.attempt("AT").await?.is_some_and(|r| r.is_ok()) {
                tracing::info!(attempt, "modem responding");
                report.record(InitStep::Probe, true, attempt);
                return Ok(true);
            }
            if attempt < attempts {
                self.pause(self.policy.probe_gap_ms).await;
            }
        }
        report.record(InitStep::Probe, false, attempts);
        Ok(false)
    }

    async fn check_sim(&self, report: &mut InitReport) -> Result<(), ModemError> {
        let attempts = self.policy.sim_attempts.max(1);
        let mut issued = 0;
        for attempt in 1..=attempts {
            issued += 1;
            if self
                .attempt("AT+CPIN?")
                .await?
                .is_some_and(|r| r.contains("READY"))
            {
                report.sim_ready = true;
                break;
            }
            tracing::info!(attempt, "waiting for SIM");
            if attempt < attempts {
                self.pause(self.policy.sim_gap_ms).await;
            }
        }

        if !report.sim_ready {
            tracing::warn!("SIM not ready, trying unlock codes");
            for code in &self.policy.unlock_codes {
                issued += 1;
                let accepted = self
                    .attempt(&format!("AT+CPIN=\"{}\"", code))
                    .await?
                    .is_some_and(|r| r.is_ok());
                self.pause(self.policy.unlock_gap_ms).await;
                if accepted {
                    tracing::info!("SIM unlocked");
                    report.sim_ready = true;
                    break;
                }
            }
        }

        report.record(InitStep::SimCheck, report.sim_ready, issued);
        Ok(())
    }

    async fn wait_for_network(&self, report: &mut InitReport) -> Result<(), ModemError> {
        let attempts = self.policy.registration_attempts.max(1);
        for attempt in 1..=attempts {
            let status = self
                .attempt("AT+CREG?")
                .await?
                .as_ref()
                .and_then(parse_registration);
            if status.is_some() {
                report.registration = status;
            }
            if status.is_some_and(|s| s.is_registered()) {
                tracing::info!(status = ?status, "network registered");
                report.record(InitStep::NetworkWait, true, attempt);
                return Ok(());
            }
            tracing::info!("still searching ({}/{})", attempt, attempts);
            if attempt < attempts {
                self.pause(self.policy.registration_gap_ms).await;
            }
        }

        tracing::warn!("network not registered, continuing");
        report.record(InitStep::NetworkWait, false, attempts);
        Ok(())
    }

    async fn select_notification_mode(&self, report: &mut InitReport) -> Result<(), ModemError> {
        let mut issued = 0;
        for mode in &self.policy.notification_modes {
            issued += 1;
            if self.attempt(mode).await?.is_some_and(|r| r.is_ok()) {
                tracing::info!(mode = %mode, "message indication enabled");
                report.notification_mode = Some(mode.clone());
                break;
            }
        }
        let accepted = report.notification_mode.is_some();
        if !accepted {
            tracing::warn!("no notification mode accepted; inbound messages may not be reported");
        }
        report.record(InitStep::NotificationMode, accepted, issued);
        Ok(())
    }
}
