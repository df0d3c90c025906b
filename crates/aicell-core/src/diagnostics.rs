//! Network diagnostics
//!
//! Registration and signal queries, plus the step-by-step troubleshooting
//! report used when a modem will not attach to the network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::{CommandEngine, CommandResult, ModemError, Terminal};
use crate::sms::notification::split_fields;

/// Network registration status (`+CREG` stat field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// 0: not registered, not searching
    NotRegistered,
    /// 1: registered on the home network
    RegisteredHome,
    /// 2: searching for an operator
    Searching,
    /// 3: registration denied
    Denied,
    /// 4 (or anything unrecognized)
    Unknown,
    /// 5: registered while roaming
    RegisteredRoaming,
}

impl RegistrationStatus {
    /// Map a stat code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotRegistered,
            1 => Self::RegisteredHome,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::RegisteredRoaming,
            _ => Self::Unknown,
        }
    }

    /// Whether messages can be sent
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::RegisteredHome | Self::RegisteredRoaming)
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotRegistered => "Not registered",
            Self::RegisteredHome => "Registered (home)",
            Self::Searching => "Searching...",
            Self::Denied => "Registration denied",
            Self::Unknown => "Unknown",
            Self::RegisteredRoaming => "Registered (roaming)",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Received signal strength (`+CSQ` rssi field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalQuality {
    /// 0..=31
    Level(u8),
    /// 99 or out of range
    Unknown,
}

/// Coarse signal rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalBand {
    /// rssi 0
    NoSignal,
    /// rssi 1..=10
    VeryWeak,
    /// rssi 11..=20
    Weak,
    /// rssi 21..=31
    Good,
    /// Not detectable
    Unknown,
}

impl SignalQuality {
    /// Map an rssi value
    pub fn from_rssi(rssi: u8) -> Self {
        if rssi <= 31 {
            Self::Level(rssi)
        } else {
            Self::Unknown
        }
    }

    /// Approximate received power in dBm
    pub fn dbm(&self) -> Option<i32> {
        match self {
            Self::Level(v) => Some(-113 + 2 * i32::from(*v)),
            Self::Unknown => None,
        }
    }

    /// Coarse rating
    pub fn band(&self) -> SignalBand {
        match self {
            Self::Level(0) => SignalBand::NoSignal,
            Self::Level(1..=10) => SignalBand::VeryWeak,
            Self::Level(11..=20) => SignalBand::Weak,
            Self::Level(_) => SignalBand::Good,
            Self::Unknown => SignalBand::Unknown,
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(v) => write!(f, "{}/31", v),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Registration plus signal, recomputed on every query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Registration status
    pub registration: RegistrationStatus,
    /// Signal quality
    pub signal: SignalQuality,
}

fn info_fields(result: &CommandResult, prefix: &str) -> Option<Vec<String>> {
    result
        .line_with_prefix(prefix)
        .map(|line| split_fields(&line[prefix.len()..]))
}

/// Parse the reply to `AT+CREG?` (`+CREG: <n>,<stat>`)
pub fn parse_registration(result: &CommandResult) -> Option<RegistrationStatus> {
    let fields = info_fields(result, "+CREG:")?;
    let stat = if fields.len() >= 2 { &fields[1] } else { &fields[0] };
    stat.parse::<u8>().ok().map(RegistrationStatus::from_code)
}

/// Parse the reply to `AT+CSQ` (`+CSQ: <rssi>,<ber>`)
pub fn parse_signal(result: &CommandResult) -> Option<SignalQuality> {
    let fields = info_fields(result, "+CSQ:")?;
    fields.first()?.parse::<u8>().ok().map(SignalQuality::from_rssi)
}

impl NetworkStatus {
    /// Query registration and signal from the modem
    pub async fn query(engine: &CommandEngine) -> Result<Self, ModemError> {
        let creg = engine.command("AT+CREG?").await?;
        let csq = engine.command("AT+CSQ").await?;
        Ok(Self {
            registration: parse_registration(&creg).unwrap_or(RegistrationStatus::Unknown),
            signal: parse_signal(&csq).unwrap_or(SignalQuality::Unknown),
        })
    }
}

/// Outcome of a single troubleshooting check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    /// Working
    Pass,
    /// Degraded but usable
    Warn,
    /// Broken
    Fail,
}

/// One line of the troubleshooting report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCheck {
    /// What was checked
    pub name: String,
    /// Result
    pub status: CheckStatus,
    /// Explanation
    pub detail: String,
}

/// Result of [`run_diagnostics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Checks in the order they ran
    pub checks: Vec<DiagnosticCheck>,
}

impl DiagnosticReport {
    fn record(&mut self, name: &str, status: CheckStatus, detail: impl Into<String>) {
        let detail = detail.into();
        match status {
            CheckStatus::Pass => tracing::info!(check = name, "{}", detail),
            CheckStatus::Warn => tracing::warn!(check = name, "{}", detail),
            CheckStatus::Fail => tracing::error!(check = name, "{}", detail),
        }
        self.checks.push(DiagnosticCheck {
            name: name.to_string(),
            status,
            detail,
        });
    }

    /// Whether no check failed
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    /// Look up a check by name
    pub fn check(&self, name: &str) -> Option<&DiagnosticCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = match check.status {
                CheckStatus::Pass => "ok  ",
                CheckStatus::Warn => "warn",
                CheckStatus::Fail => "FAIL",
            };
            writeln!(f, "[{}] {:<14} {}", mark, check.name, check.detail)?;
        }
        Ok(())
    }
}

async fn reply(
    engine: &CommandEngine,
    command: &str,
    timeout: Duration,
) -> Result<Option<CommandResult>, ModemError> {
    match engine.execute(command, timeout, Terminal::COMMAND).await {
        Ok(result) => Ok(Some(result)),
        Err(e) if e.is_transport() => Err(e),
        Err(_) => Ok(None),
    }
}

/// Walk through liveness, SIM, radio, signal, registration and operator selection.
///
/// Stops early when the modem is silent or the SIM is not ready.
pub async fn run_diagnostics(engine: &CommandEngine) -> Result<DiagnosticReport, ModemError> {
    let short = Duration::from_secs(2);
    let scan = Duration::from_secs(10);
    let mut report = DiagnosticReport::default();

    match reply(engine, "AT", short).await? {
        Some(r) if r.is_ok() => report.record("modem", CheckStatus::Pass, "responding"),
        _ => {
            report.record("modem", CheckStatus::Fail, "not responding");
            return Ok(report);
        }
    }

    match reply(engine, "AT+CPIN?", short).await? {
        Some(r) if r.contains("READY") => report.record("sim", CheckStatus::Pass, "ready"),
        other => {
            let detail = other.map(|r| r.text()).unwrap_or_else(|| "no reply".to_string());
            report.record("sim", CheckStatus::Fail, detail);
            return Ok(report);
        }
    }

    match reply(engine, "AT+CFUN?", short).await? {
        Some(r) if r.contains("+CFUN: 1") => {
            report.record("radio", CheckStatus::Pass, "full functionality")
        }
        _ => {
            let enabled = reply(engine, "AT+CFUN=1", Duration::from_secs(5))
                .await?
                .is_some_and(|r| r.is_ok());
            let detail = if enabled {
                "radio was off, enabled"
            } else {
                "radio off and could not be enabled"
            };
            report.record("radio", CheckStatus::Warn, detail);
        }
    }

    match reply(engine, "AT+CSQ", short).await?.as_ref().and_then(parse_signal) {
        Some(signal) => {
            let (status, label) = match signal.band() {
                SignalBand::NoSignal => (CheckStatus::Fail, "no signal, check antenna"),
                SignalBand::VeryWeak => (CheckStatus::Warn, "very weak"),
                SignalBand::Weak => (CheckStatus::Warn, "weak"),
                SignalBand::Good => (CheckStatus::Pass, "good"),
                SignalBand::Unknown => (CheckStatus::Warn, "not detectable"),
            };
            report.record("signal", status, format!("{} ({})", label, signal));
        }
        None => report.record("signal", CheckStatus::Fail, "cannot read signal"),
    }

    match reply(engine, "AT+CREG?", short).await?.as_ref().and_then(parse_registration) {
        Some(status) if status.is_registered() => {
            report.record("registration", CheckStatus::Pass, status.description())
        }
        Some(status) => report.record("registration", CheckStatus::Warn, status.description()),
        None => report.record("registration", CheckStatus::Fail, "cannot read registration"),
    }

    match reply(engine, "AT+COPS=?", scan).await? {
        Some(r) if r.contains("+COPS:") => {
            let operators = r.line_with_prefix("+COPS:").unwrap_or_default().to_string();
            report.record("operators", CheckStatus::Pass, operators)
        }
        _ => report.record("operators", CheckStatus::Warn, "operator scan returned nothing"),
    }

    match reply(engine, "AT+COPS=0", scan).await? {
        Some(r) if r.is_ok() => report.record("auto-select", CheckStatus::Pass, "requested"),
        _ => report.record("auto-select", CheckStatus::Warn, "rejected"),
    }

    Ok(report)
}

/// Cycle the radio, rescan operators and poll registration for up to `polls` seconds
pub async fn force_registration(engine: &CommandEngine, polls: u32) -> Result<bool, ModemError> {
    tracing::info!("forcing network registration");
    reply(engine, "AT+CFUN=0", Duration::from_secs(5)).await?;
    reply(engine, "AT+CFUN=1", Duration::from_secs(10)).await?;
    reply(engine, "AT+COPS=?", Duration::from_secs(15)).await?;
    reply(engine, "AT+COPS=0", Duration::from_secs(15)).await?;

    for i in 0..polls {
        let status = reply(engine, "AT+CREG?", Duration::from_secs(2))
            .await?
            .as_ref()
            .and_then(parse_registration);
        if status.is_some_and(|s| s.is_registered()) {
            tracing::info!("network registered");
            return Ok(true);
        }
        tracing::info!(remaining = polls - i - 1, "still searching");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    tracing::warn!("network registration failed");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(lines: &[&str]) -> CommandResult {
        CommandResult {
            command: String::new(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            matched: Terminal::Ok,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_parse_registration() {
        assert_eq!(
            parse_registration(&result(&["+CREG: 0,1", "OK"])),
            Some(RegistrationStatus::RegisteredHome)
        );
        assert_eq!(
            parse_registration(&result(&["+CREG: 2,5,\"1A2B\",\"0C3D\"", "OK"])),
            Some(RegistrationStatus::RegisteredRoaming)
        );
        assert_eq!(
            parse_registration(&result(&["+CREG: 0,2", "OK"])),
            Some(RegistrationStatus::Searching)
        );
        assert_eq!(parse_registration(&result(&["OK"])), None);
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(
            parse_signal(&result(&["+CSQ: 23,0", "OK"])),
            Some(SignalQuality::Level(23))
        );
        assert_eq!(
            parse_signal(&result(&["+CSQ: 99,99", "OK"])),
            Some(SignalQuality::Unknown)
        );
        assert_eq!(parse_signal(&result(&["ERROR"])), None);
    }

    #[test]
    fn test_signal_bands() {
        assert_eq!(SignalQuality::Level(0).band(), SignalBand::NoSignal);
        assert_eq!(SignalQuality::Level(10).band(), SignalBand::VeryWeak);
        assert_eq!(SignalQuality::Level(20).band(), SignalBand::Weak);
        assert_eq!(SignalQuality::Level(31).band(), SignalBand::Good);
        assert_eq!(SignalQuality::Level(15).dbm(), Some(-83));
        assert_eq!(SignalQuality::Unknown.dbm(), None);
    }

    #[test]
    fn test_registration_codes() {
        for code in [1, 5] {
            assert!(RegistrationStatus::from_code(code).is_registered());
        }
        for code in [0, 2, 3, 4, 9] {
            assert!(!RegistrationStatus::from_code(code).is_registered());
        }
        assert_eq!(RegistrationStatus::from_code(9), RegistrationStatus::Unknown);
    }
}
