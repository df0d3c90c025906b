//! Modem configuration
//!
//! Every field has a default, so a partial JSON document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::DEFAULT_BAUD_RATE;

/// Connection and protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Serial device; discovered from `candidate_ports` when unset
    pub device: Option<String>,

    /// Ports tried in order during discovery (all listed ports when empty)
    pub candidate_ports: Vec<String>,

    /// Baud rate
    pub baud_rate: u32,

    /// Interval between transport polls in milliseconds
    pub poll_interval_ms: u64,

    /// Quiet time after which a message body is considered complete
    pub settle_ms: u64,

    /// Liveness probe cadence in seconds (0 disables)
    pub health_check_secs: u64,

    /// Timeout of the liveness probe in milliseconds
    pub health_timeout_ms: u64,

    /// Reopen attempts after a transport failure
    pub reconnect_attempts: u32,

    /// Backoff step between reopen attempts in milliseconds
    pub reconnect_backoff_ms: u64,

    /// Destination number normalization
    pub number_plan: NumberPlan,

    /// Start-up handshake policy
    pub init: InitPolicy,

    /// Send protocol timing
    pub send: SendPolicy,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: None,
            candidate_ports: Vec::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval_ms: 20,
            settle_ms: 500,
            health_check_secs: 30,
            health_timeout_ms: 1000,
            reconnect_attempts: 5,
            reconnect_backoff_ms: 1000,
            number_plan: NumberPlan::default(),
            init: InitPolicy::default(),
            send: SendPolicy::default(),
        }
    }
}

impl ModemConfig {
    /// Parse a JSON document
    pub fn from_json(content: &str) -> Result<Self, crate::protocol::ModemError> {
        serde_json::from_str(content).map_err(|e| crate::protocol::ModemError::Config(e.to_string()))
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::protocol::ModemError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Write as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::protocol::ModemError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::protocol::ModemError::Config(e.to_string()))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Body settle delay
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Health check cadence, `None` when disabled
    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_check_secs > 0).then(|| Duration::from_secs(self.health_check_secs))
    }

    /// Health check timeout
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Reconnect backoff step
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// National numbering plan used to rewrite destinations into international form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberPlan {
    /// Country calling code without "+" (e.g. "880")
    pub country_code: String,
    /// National trunk prefix dropped before adding the country code
    pub trunk_prefix: String,
}

impl Default for NumberPlan {
    fn default() -> Self {
        Self {
            country_code: "880".to_string(),
            trunk_prefix: "0".to_string(),
        }
    }
}

/// Attempt counts and gaps for each start-up step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitPolicy {
    /// Liveness probe attempts before giving up
    pub probe_attempts: u32,
    /// Gap between probe attempts in milliseconds
    pub probe_gap_ms: u64,
    /// SIM readiness polls
    pub sim_attempts: u32,
    /// Gap between SIM polls in milliseconds
    pub sim_gap_ms: u64,
    /// Unlock codes tried when the SIM is not ready
    pub unlock_codes: Vec<String>,
    /// Gap after each unlock attempt in milliseconds
    pub unlock_gap_ms: u64,
    /// Registration polls
    pub registration_attempts: u32,
    /// Gap between registration polls in milliseconds
    pub registration_gap_ms: u64,
    /// Notification-mode commands, first accepted wins
    pub notification_modes: Vec<String>,
    /// Timeout for each handshake command in milliseconds
    pub step_timeout_ms: u64,
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            probe_attempts: 3,
            probe_gap_ms: 2000,
            sim_attempts: 5,
            sim_gap_ms: 2000,
            unlock_codes: vec!["0000".into(), "1234".into(), "1111".into()],
            unlock_gap_ms: 2000,
            registration_attempts: 10,
            registration_gap_ms: 5000,
            notification_modes: vec![
                "AT+CNMI=2,2,0,0,0".into(),
                "AT+CNMI=1,2,0,0,0".into(),
                "AT+CNMI=2,1,0,0,0".into(),
                "AT+CNMI=1,1,0,0,0".into(),
            ],
            step_timeout_ms: 3000,
        }
    }
}

impl InitPolicy {
    /// Per-command timeout
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Timing of the message send protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendPolicy {
    /// Text-mode selection timeout in milliseconds
    pub text_mode_timeout_ms: u64,
    /// Wait for the `>` prompt in milliseconds
    pub prompt_timeout_ms: u64,
    /// Wait for the carrier confirmation in milliseconds
    pub confirm_timeout_ms: u64,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            text_mode_timeout_ms: 2000,
            prompt_timeout_ms: 5000,
            confirm_timeout_ms: 20000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ModemConfig::from_json(r#"{ "device": "/dev/ttyUSB2", "init": { "probe_attempts": 5 } }"#)
                .unwrap();
        assert_eq!(config.device.as_deref(), Some("/dev/ttyUSB2"));
        assert_eq!(config.init.probe_attempts, 5);
        assert_eq!(config.init.registration_attempts, 10);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.number_plan, NumberPlan::default());
    }

    #[test]
    fn test_health_check_can_be_disabled() {
        let config = ModemConfig {
            health_check_secs: 0,
            ..ModemConfig::default()
        };
        assert_eq!(config.health_interval(), None);
        assert_eq!(
            ModemConfig::default().health_interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            ModemConfig::from_json("{ not json"),
            Err(crate::protocol::ModemError::Config(_))
        ));
    }
}
