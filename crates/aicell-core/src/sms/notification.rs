//! Inbound message notifications
//!
//! Parses `+CMT:` headers and assembles them with the body line(s) that follow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::ModemError;

/// Body lines joined into one message
const MAX_BODY_LINES: usize = 2;

/// A received text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Originating address as reported by the modem
    pub sender: String,
    /// Message text
    pub body: String,
    /// The raw `+CMT:` header line
    pub header: String,
    /// Service-centre time stamp from the header, if present
    pub sent_at: Option<String>,
    /// When the header arrived here
    pub received_at: DateTime<Utc>,
}

/// Split a comma-separated field list, honoring double quotes.
///
/// Quotes are removed from the returned fields.
pub fn split_fields(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in s.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Parse a `+CMT: "<sender>",["<alpha>"],"<scts>"` header into sender and time stamp
pub fn parse_message_header(line: &str) -> Result<(String, Option<String>), ModemError> {
    let rest = line
        .strip_prefix("+CMT:")
        .ok_or_else(|| ModemError::ParseFailure(format!("not a message header: {}", line)))?;

    let fields = split_fields(rest);
    let sender = fields
        .first()
        .filter(|s| !s.is_empty())
        .cloned()
        .ok_or_else(|| ModemError::ParseFailure(format!("no sender in header: {}", line)))?;
    let sent_at = fields.get(2).filter(|s| !s.is_empty()).cloned();

    Ok((sender, sent_at))
}

#[derive(Debug)]
enum Assembly {
    Idle,
    AwaitingBody {
        header: String,
        sender: String,
        sent_at: Option<String>,
        received_at: DateTime<Utc>,
        since: Instant,
    },
    Collecting {
        message: InboundMessage,
        lines: usize,
        since: Instant,
    },
}

/// Pairs a message header with its body.
///
/// The first line after the header is always body. One more line is
/// appended unless it is a status line; the message completes after
/// two body lines, at the next status line, or when the settle delay expires.
#[derive(Debug)]
pub struct NotificationAssembler {
    state: Assembly,
    settle: Duration,
}

impl NotificationAssembler {
    /// Create an assembler that waits `settle` for body lines
    pub fn new(settle: Duration) -> Self {
        Self {
            state: Assembly::Idle,
            settle,
        }
    }

    /// Start assembling a message from its header
    pub fn begin(&mut self, header: &str, now: Instant) -> Result<(), ModemError> {
        let (sender, sent_at) = parse_message_header(header)?;
        self.state = Assembly::AwaitingBody {
            header: header.to_string(),
            sender,
            sent_at,
            received_at: Utc::now(),
            since: now,
        };
        Ok(())
    }

    /// Whether `line` belongs to the message being assembled
    pub fn accepts(&self, line: &str) -> bool {
        match &self.state {
            Assembly::Idle => false,
            Assembly::AwaitingBody { .. } => true,
            Assembly::Collecting { lines, .. } => {
                *lines < MAX_BODY_LINES && !crate::protocol::is_status_line(line)
            }
        }
    }

    /// Add a body line; returns the message once it is complete
    pub fn push(&mut self, line: &str, now: Instant) -> Option<InboundMessage> {
        match std::mem::replace(&mut self.state, Assembly::Idle) {
            Assembly::Idle => None,
            Assembly::AwaitingBody {
                header,
                sender,
                sent_at,
                received_at,
                ..
            } => {
                let message = InboundMessage {
                    sender,
                    body: line.trim().to_string(),
                    header,
                    sent_at,
                    received_at,
                };
                self.state = Assembly::Collecting {
                    message,
                    lines: 1,
                    since: now,
                };
                None
            }
            Assembly::Collecting {
                mut message, lines, ..
            } => {
                message.body.push(' ');
                message.body.push_str(line.trim());
                if lines + 1 >= MAX_BODY_LINES {
                    Some(message)
                } else {
                    self.state = Assembly::Collecting {
                        message,
                        lines: lines + 1,
                        since: now,
                    };
                    None
                }
            }
        }
    }

    /// End the current assembly.
    ///
    /// A header that never received a body is a parse failure.
    pub fn finish(&mut self) -> Option<Result<InboundMessage, ModemError>> {
        match std::mem::replace(&mut self.state, Assembly::Idle) {
            Assembly::Idle => None,
            Assembly::AwaitingBody { header, .. } => Some(Err(ModemError::ParseFailure(
                format!("no body followed header: {}", header),
            ))),
            Assembly::Collecting { message, .. } => Some(Ok(message)),
        }
    }

    /// Finish the assembly if the settle delay has passed since its last line
    pub fn expire(&mut self, now: Instant) -> Option<Result<InboundMessage, ModemError>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.finish(),
            _ => None,
        }
    }

    /// When the current assembly will be closed by the settle delay
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            Assembly::Idle => None,
            Assembly::AwaitingBody { since, .. } | Assembly::Collecting { since, .. } => {
                Some(*since + self.settle)
            }
        }
    }

    /// Whether no message is being assembled
    pub fn is_idle(&self) -> bool {
        matches!(self.state, Assembly::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str = "+CMT: \"+8801712345678\",\"\",\"26/10/19,12:00:00+24\"";

    #[test]
    fn test_split_fields_keeps_quoted_commas() {
        assert_eq!(
            split_fields(" \"+8801712345678\",\"\",\"26/10/19,12:00:00+24\""),
            vec!["+8801712345678", "", "26/10/19,12:00:00+24"]
        );
        assert_eq!(split_fields(" \"SM\",3"), vec!["SM", "3"]);
    }

    #[test]
    fn test_parse_header() {
        let (sender, sent_at) = parse_message_header(HEADER).unwrap();
        assert_eq!(sender, "+8801712345678");
        assert_eq!(sent_at.as_deref(), Some("26/10/19,12:00:00+24"));
    }

    #[test]
    fn test_parse_header_without_sender() {
        assert!(matches!(
            parse_message_header("+CMT: ,,"),
            Err(ModemError::ParseFailure(_))
        ));
        assert!(parse_message_header("+CMTI: \"SM\",1").is_err());
    }

    #[test]
    fn test_two_body_lines_complete_immediately() {
        let now = Instant::now();
        let mut asm = NotificationAssembler::new(Duration::from_millis(500));
        asm.begin(HEADER, now).unwrap();
        assert!(asm.accepts("what is"));
        assert_eq!(asm.push("what is", now), None);
        assert!(asm.accepts("aicell"));
        let msg = asm.push("aicell", now).unwrap();
        assert_eq!(msg.body, "what is aicell");
        assert_eq!(msg.sender, "+8801712345678");
        assert!(asm.is_idle());
    }

    #[test]
    fn test_status_line_ends_body() {
        let now = Instant::now();
        let mut asm = NotificationAssembler::new(Duration::from_millis(500));
        asm.begin(HEADER, now).unwrap();
        asm.push("hi", now);
        assert!(!asm.accepts("OK"));
        assert!(!asm.accepts("+CMTI: \"SM\",2"));
        let msg = asm.finish().unwrap().unwrap();
        assert_eq!(msg.body, "hi");
    }

    #[test]
    fn test_settle_delay() {
        let now = Instant::now();
        let mut asm = NotificationAssembler::new(Duration::from_millis(500));
        asm.begin(HEADER, now).unwrap();
        asm.push("hi", now);
        assert!(asm.expire(now + Duration::from_millis(100)).is_none());
        let msg = asm.expire(now + Duration::from_millis(500)).unwrap().unwrap();
        assert_eq!(msg.body, "hi");
    }

    #[test]
    fn test_header_without_body_is_parse_failure() {
        let now = Instant::now();
        let mut asm = NotificationAssembler::new(Duration::from_millis(500));
        asm.begin(HEADER, now).unwrap();
        let result = asm.expire(now + Duration::from_secs(1)).unwrap();
        assert!(matches!(result, Err(ModemError::ParseFailure(_))));
    }
}
