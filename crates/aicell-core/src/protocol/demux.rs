//! Traffic demultiplexing
//!
//! Routes every line to the pending command, to a notification, or to the
//! noise log. Unsolicited headers are recognized whether or not a command is
//! pending, so they are never swallowed by a command's reply.

use std::time::Duration;
use tokio::time::Instant;

use super::classifier::{classify_unsolicited, LineClass, UnsolicitedKind};
use super::{ModemError, RawLine};
use crate::diagnostics::RegistrationStatus;
use crate::sms::notification::{split_fields, InboundMessage, NotificationAssembler};

/// Events raised by unsolicited notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// A complete inbound message (`+CMT:` header plus body)
    IncomingMessage(InboundMessage),
    /// A message was stored instead of delivered (`+CMTI:`)
    StoredMessage {
        /// Storage area, e.g. "SM"
        storage: String,
        /// Slot index within the storage
        index: u32,
    },
    /// Network registration changed
    RegistrationChanged(RegistrationStatus),
    /// Incoming call
    Ring,
    /// Caller identification for the ringing call
    CallerId(String),
}

/// Where a line went
#[derive(Debug)]
pub enum Routed {
    /// Part of the pending command's reply
    Solicited(String),
    /// A decoded notification
    Event(ModemEvent),
    /// Nobody was waiting for this line
    Noise(String),
    /// A notification that could not be decoded
    Dropped(ModemError),
}

/// Line router owned by the monitor task
#[derive(Debug)]
pub struct Demultiplexer {
    assembler: NotificationAssembler,
}

impl Demultiplexer {
    /// Create a router that waits `settle` for message bodies
    pub fn new(settle: Duration) -> Self {
        Self {
            assembler: NotificationAssembler::new(settle),
        }
    }

    /// Classify a line given whether a command is pending
    pub fn classify(&self, line: &str, command_pending: bool) -> LineClass {
        if self.assembler.accepts(line) {
            LineClass::UnsolicitedBody
        } else if let Some(kind) = classify_unsolicited(line) {
            LineClass::UnsolicitedHeader(kind)
        } else if command_pending {
            LineClass::SolicitedFragment
        } else {
            LineClass::Noise
        }
    }

    /// Route one line. A line may also close a message under assembly,
    /// so more than one result can come back.
    pub fn route(&mut self, line: RawLine, command_pending: bool, now: Instant) -> Vec<Routed> {
        let mut out = Vec::new();
        let class = self.classify(line.as_str(), command_pending);

        if class == LineClass::UnsolicitedBody {
            if let Some(message) = self.assembler.push(line.as_str(), now) {
                out.push(Routed::Event(ModemEvent::IncomingMessage(message)));
            }
            return out;
        }

        if let Some(done) = self.assembler.finish() {
            out.push(assembled(done));
        }

        match class {
            LineClass::UnsolicitedHeader(UnsolicitedKind::NewMessage) => {
                if let Err(e) = self.assembler.begin(line.as_str(), now) {
                    out.push(Routed::Dropped(e));
                }
            }
            LineClass::UnsolicitedHeader(kind) => out.push(match decode_event(kind, line.as_str()) {
                Ok(event) => Routed::Event(event),
                Err(e) => Routed::Dropped(e),
            }),
            LineClass::SolicitedFragment => out.push(Routed::Solicited(line.into_string())),
            LineClass::Noise | LineClass::UnsolicitedBody => {
                out.push(Routed::Noise(line.into_string()))
            }
        }
        out
    }

    /// Close a message whose settle delay has passed
    pub fn flush_expired(&mut self, now: Instant) -> Option<Routed> {
        self.assembler.expire(now).map(assembled)
    }
}

fn assembled(result: Result<InboundMessage, ModemError>) -> Routed {
    match result {
        Ok(message) => Routed::Event(ModemEvent::IncomingMessage(message)),
        Err(e) => Routed::Dropped(e),
    }
}

fn decode_event(kind: UnsolicitedKind, line: &str) -> Result<ModemEvent, ModemError> {
    let fields = match line.split_once(':') {
        Some((_, rest)) => split_fields(rest),
        None => Vec::new(),
    };
    let bad = || ModemError::ParseFailure(format!("malformed notification: {}", line));

    match kind {
        UnsolicitedKind::Ring => Ok(ModemEvent::Ring),
        UnsolicitedKind::CallerId => fields
            .first()
            .filter(|n| !n.is_empty())
            .map(|n| ModemEvent::CallerId(n.clone()))
            .ok_or_else(bad),
        UnsolicitedKind::StoredMessage => {
            let storage = fields.first().cloned().ok_or_else(bad)?;
            let index = fields
                .get(1)
                .and_then(|i| i.parse::<u32>().ok())
                .ok_or_else(bad)?;
            Ok(ModemEvent::StoredMessage { storage, index })
        }
        UnsolicitedKind::RegistrationChange => fields
            .first()
            .and_then(|c| c.parse::<u8>().ok())
            .map(|code| ModemEvent::RegistrationChanged(RegistrationStatus::from_code(code)))
            .ok_or_else(bad),
        UnsolicitedKind::NewMessage => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LineBuffer;

    const SETTLE: Duration = Duration::from_millis(500);

    fn route_all(demux: &mut Demultiplexer, bytes: &[u8], pending: bool) -> Vec<Routed> {
        let mut buf = LineBuffer::new();
        let now = Instant::now();
        buf.feed(bytes)
            .into_iter()
            .flat_map(|line| demux.route(line, pending, now))
            .collect()
    }

    #[test]
    fn test_noise_without_pending_command() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(&mut demux, b"Call Ready\r\n", false);
        assert!(matches!(&routed[..], [Routed::Noise(l)] if l == "Call Ready"));
    }

    #[test]
    fn test_reply_lines_go_to_pending_command() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(&mut demux, b"+CSQ: 18,0\r\nOK\r\n", true);
        assert_eq!(routed.len(), 2);
        assert!(matches!(&routed[0], Routed::Solicited(l) if l == "+CSQ: 18,0"));
        assert!(matches!(&routed[1], Routed::Solicited(l) if l == "OK"));
    }

    #[test]
    fn test_header_interleaved_mid_reply() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(
            &mut demux,
            b"+CSQ: 18,0\r\n+CMT: \"+8801712345678\",,\"26/10/19,12:00:00+24\"\r\nhi\r\nOK\r\n",
            true,
        );
        let solicited: Vec<&str> = routed
            .iter()
            .filter_map(|r| match r {
                Routed::Solicited(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(solicited, vec!["+CSQ: 18,0", "OK"]);

        let messages: Vec<&InboundMessage> = routed
            .iter()
            .filter_map(|r| match r {
                Routed::Event(ModemEvent::IncomingMessage(m)) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "+8801712345678");
        assert_eq!(messages[0].body, "hi");
    }

    #[test]
    fn test_dial_result_after_message_body_reaches_command() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(
            &mut demux,
            b"+CMT: \"+8801712345678\",,\"x\"\r\nhi\r\nNO CARRIER\r\n",
            true,
        );
        assert_eq!(routed.len(), 2);
        assert!(matches!(
            &routed[0],
            Routed::Event(ModemEvent::IncomingMessage(m)) if m.body == "hi"
        ));
        assert!(matches!(&routed[1], Routed::Solicited(l) if l == "NO CARRIER"));
    }

    #[test]
    fn test_other_events() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(
            &mut demux,
            b"RING\r\n+CLIP: \"+8801712345678\",145\r\n+CMTI: \"SM\",4\r\n+CREG: 5\r\n",
            false,
        );
        let events: Vec<&ModemEvent> = routed
            .iter()
            .filter_map(|r| match r {
                Routed::Event(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![
                &ModemEvent::Ring,
                &ModemEvent::CallerId("+8801712345678".to_string()),
                &ModemEvent::StoredMessage {
                    storage: "SM".to_string(),
                    index: 4
                },
                &ModemEvent::RegistrationChanged(RegistrationStatus::RegisteredRoaming),
            ]
        );
    }

    #[test]
    fn test_malformed_header_dropped() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(&mut demux, b"+CMT: ,,\r\n", false);
        assert!(matches!(&routed[..], [Routed::Dropped(ModemError::ParseFailure(_))]));
    }

    #[test]
    fn test_single_body_line_released_after_settle() {
        let mut demux = Demultiplexer::new(SETTLE);
        let routed = route_all(&mut demux, b"+CMT: \"+8801712345678\",,\"x\"\r\nhello\r\n", false);
        assert!(routed.is_empty());
        let later = Instant::now() + SETTLE;
        match demux.flush_expired(later) {
            Some(Routed::Event(ModemEvent::IncomingMessage(m))) => assert_eq!(m.body, "hello"),
            other => panic!("expected message, got {:?}", other),
        }
    }
}
