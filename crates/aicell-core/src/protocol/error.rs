//! Protocol errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the modem
#[derive(Error, Debug)]
pub enum ModemError {
    /// The device could not be opened or an I/O operation on it failed
    #[error("Serial port error: {0}")]
    Transport(String),

    /// A command's terminal token never arrived
    #[error("Timeout after {elapsed:?} waiting for reply to {command:?}")]
    Timeout {
        /// Command that was awaiting its reply
        command: String,
        /// Lines captured before the deadline
        partial: Vec<String>,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// An expected terminal token was absent (e.g. no send prompt)
    #[error("Protocol mismatch: expected {expected}, got {actual:?}")]
    ProtocolMismatch {
        /// What the protocol step required
        expected: String,
        /// What the modem produced instead
        actual: String,
    },

    /// A notification could not be assembled into a message
    #[error("Could not parse notification: {0}")]
    ParseFailure(String),

    /// No open transport
    #[error("Not connected to modem")]
    NotConnected,

    /// Steady-state reconnect attempts gave up
    #[error("Reconnect gave up after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        /// Number of reopen attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// No candidate port answered the liveness probe
    #[error("Modem not found on any of: {0}")]
    PortNotFound(String),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModemError {
    /// Whether this error means the transport itself is unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ModemError::Transport(_)
                | ModemError::NotConnected
                | ModemError::Io(_)
                | ModemError::ReconnectExhausted { .. }
        )
    }

    /// Lines captured before a timeout, empty for other errors
    pub fn partial_output(&self) -> &[String] {
        match self {
            ModemError::Timeout { partial, .. } => partial,
            _ => &[],
        }
    }
}
