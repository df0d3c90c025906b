//! Text-mode message send protocol
//!
//! `AT+CMGF=1`, then `AT+CMGS="<dest>"` up to the `>` prompt, then the body
//! and Ctrl-Z, then a long wait for `+CMGS: <ref>` and `OK`. The whole
//! exchange holds one command session so nothing can interleave.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::address::normalize_destination;
use crate::config::{NumberPlan, SendPolicy};
use crate::protocol::{CommandEngine, ModemError, Terminal, CTRL_Z};

/// Characters allowed in one text message
pub const MAX_MESSAGE_CHARS: usize = 160;

const ELLIPSIS: &str = "...";

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// Whether the modem confirmed hand-off to the carrier
    pub success: bool,
    /// Destination after normalization
    pub destination: String,
    /// Message reference from `+CMGS: <ref>`
    pub reference: Option<u16>,
    /// Captured confirmation or the failure reason
    pub detail: String,
}

impl SendOutcome {
    fn failed(destination: &str, detail: impl Into<String>) -> Self {
        let outcome = Self {
            success: false,
            destination: destination.to_string(),
            reference: None,
            detail: detail.into(),
        };
        tracing::warn!(to = %outcome.destination, "send failed: {}", outcome.detail);
        outcome
    }
}

/// Cut a body to 160 characters, ending in "..." when shortened
pub fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_MESSAGE_CHARS {
        return body.to_string();
    }
    let keep = MAX_MESSAGE_CHARS - ELLIPSIS.len();
    let mut truncated: String = body.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

fn parse_reference(text: &str) -> Option<u16> {
    text.lines()
        .find_map(|l| l.trim().strip_prefix("+CMGS:"))
        .and_then(|r| r.trim().parse().ok())
}

/// Sends text messages through a command engine
pub struct SmsSender<'a> {
    engine: &'a CommandEngine,
    plan: &'a NumberPlan,
    policy: &'a SendPolicy,
}

impl<'a> SmsSender<'a> {
    /// Create a sender
    pub fn new(engine: &'a CommandEngine, plan: &'a NumberPlan, policy: &'a SendPolicy) -> Self {
        Self {
            engine,
            plan,
            policy,
        }
    }

    /// Send `body` to `destination`. Never retries.
    ///
    /// Protocol failures come back as an unsuccessful [`SendOutcome`];
    /// only transport failures are errors.
    pub async fn send(&self, destination: &str, body: &str) -> Result<SendOutcome, ModemError> {
        let to = normalize_destination(destination, self.plan);
        let payload = truncate_body(body);
        tracing::info!(to = %to, chars = payload.chars().count(), "sending message");

        let mut session = self.engine.session().await;

        let text_mode = session
            .execute(
                "AT+CMGF=1",
                Duration::from_millis(self.policy.text_mode_timeout_ms),
                Terminal::COMMAND,
            )
            .await;
        match text_mode {
            Ok(r) if r.is_ok() => {}
            Ok(r) => return Ok(SendOutcome::failed(&to, format!("text mode rejected: {}", r.text()))),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => return Ok(SendOutcome::failed(&to, e.to_string())),
        }

        // Bare CR: a trailing LF would reach the modem as the first body byte
        let command = format!("AT+CMGS=\"{}\"", to);
        let prompt = session
            .transact(
                &command,
                format!("{}\r", command).as_bytes(),
                Duration::from_millis(self.policy.prompt_timeout_ms),
                Terminal::PROMPT,
            )
            .await;
        match prompt {
            Ok(r) if r.matched == Terminal::Prompt => {}
            Ok(r) => {
                let mismatch = ModemError::ProtocolMismatch {
                    expected: "'>' prompt".to_string(),
                    actual: r.text(),
                };
                return Ok(SendOutcome::failed(&to, mismatch.to_string()));
            }
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                let mismatch = ModemError::ProtocolMismatch {
                    expected: "'>' prompt".to_string(),
                    actual: e.partial_output().join("\n"),
                };
                return Ok(SendOutcome::failed(&to, mismatch.to_string()));
            }
        }

        let mut wire = payload.into_bytes();
        wire.push(CTRL_Z);
        let confirmation = session
            .transact(
                "<message body>",
                &wire,
                Duration::from_millis(self.policy.confirm_timeout_ms),
                Terminal::COMMAND,
            )
            .await;

        match confirmation {
            Ok(r) if r.is_ok() && r.contains("+CMGS:") => {
                let text = r.text();
                let reference = parse_reference(&text);
                tracing::info!(to = %to, ?reference, "message sent");
                Ok(SendOutcome {
                    success: true,
                    destination: to,
                    reference,
                    detail: text,
                })
            }
            Ok(r) => Ok(SendOutcome::failed(&to, r.text())),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => Ok(SendOutcome::failed(
                &to,
                format!("{} (last output: {:?})", e, e.partial_output()),
            )),
        }
    }
}
