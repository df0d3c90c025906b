//! Line classification
//!
//! A fixed prefix table decides which lines are unsolicited notifications.
//! It is evaluated once per line, before any pending-command routing.

use serde::{Deserialize, Serialize};

use super::Terminal;

/// Kinds of unsolicited notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsolicitedKind {
    /// `+CMT:` message delivered directly; the body follows on the next line
    NewMessage,
    /// `+CMTI:` message stored in SIM/phone memory
    StoredMessage,
    /// `+CREG: <stat>` registration change
    RegistrationChange,
    /// `RING` incoming call
    Ring,
    /// `+CLIP:` caller identification
    CallerId,
}

/// Classification of a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Part of the reply to the pending command
    SolicitedFragment,
    /// Start of an unsolicited notification
    UnsolicitedHeader(UnsolicitedKind),
    /// Message text following a `+CMT:` header
    UnsolicitedBody,
    /// Nothing is waiting for this line
    Noise,
}

const UNSOLICITED_PATTERNS: &[(&str, UnsolicitedKind)] = &[
    ("+CMT:", UnsolicitedKind::NewMessage),
    ("+CMTI:", UnsolicitedKind::StoredMessage),
    ("+CREG:", UnsolicitedKind::RegistrationChange),
    ("+CLIP:", UnsolicitedKind::CallerId),
    ("RING", UnsolicitedKind::Ring),
];

/// The solicited reply to `AT+CREG?` is `+CREG: <n>,<stat>[,...]` while the
/// unsolicited report is `+CREG: <stat>[,"<lac>","<ci>"]`. Only the second
/// field tells them apart.
fn is_unsolicited_registration(rest: &str) -> bool {
    let mut fields = rest.split(',').map(str::trim);
    let first = fields.next().unwrap_or("");
    if first.is_empty() || !first.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match fields.next() {
        None => true,
        Some(second) => second.starts_with('"'),
    }
}

/// Match a line against the unsolicited pattern table
pub fn classify_unsolicited(line: &str) -> Option<UnsolicitedKind> {
    for (prefix, kind) in UNSOLICITED_PATTERNS {
        let Some(rest) = line.strip_prefix(prefix) else {
            continue;
        };
        return match kind {
            UnsolicitedKind::RegistrationChange => {
                is_unsolicited_registration(rest).then_some(*kind)
            }
            UnsolicitedKind::Ring => rest.trim().is_empty().then_some(*kind),
            _ => Some(*kind),
        };
    }
    None
}

/// Whether a line is a `+`-prefixed status line or a terminal token.
/// Such lines end a message body.
pub(crate) fn is_status_line(line: &str) -> bool {
    line.starts_with('+')
        || Terminal::find(Terminal::DIAL, line).is_some()
        || line == ">"
        || classify_unsolicited(line).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_headers() {
        assert_eq!(
            classify_unsolicited("+CMT: \"+8801712345678\",\"\",\"26/10/19,12:00:00+24\""),
            Some(UnsolicitedKind::NewMessage)
        );
        assert_eq!(
            classify_unsolicited("+CMTI: \"SM\",3"),
            Some(UnsolicitedKind::StoredMessage)
        );
    }

    #[test]
    fn test_registration_shapes() {
        assert_eq!(
            classify_unsolicited("+CREG: 1"),
            Some(UnsolicitedKind::RegistrationChange)
        );
        assert_eq!(
            classify_unsolicited("+CREG: 5,\"1A2B\",\"0C3D\""),
            Some(UnsolicitedKind::RegistrationChange)
        );
        // Query replies belong to the pending command
        assert_eq!(classify_unsolicited("+CREG: 0,1"), None);
        assert_eq!(classify_unsolicited("+CREG: 2,1,\"1A2B\",\"0C3D\""), None);
    }

    #[test]
    fn test_ring_and_caller_id() {
        assert_eq!(classify_unsolicited("RING"), Some(UnsolicitedKind::Ring));
        assert_eq!(classify_unsolicited("RINGTONE"), None);
        assert_eq!(
            classify_unsolicited("+CLIP: \"+8801712345678\",145"),
            Some(UnsolicitedKind::CallerId)
        );
    }

    #[test]
    fn test_ordinary_replies() {
        for line in ["OK", "ERROR", "+CSQ: 20,0", "+CPIN: READY", "+CMGS: 12", ">"] {
            assert_eq!(classify_unsolicited(line), None, "{}", line);
        }
        assert!(is_status_line("+CSQ: 20,0"));
        assert!(is_status_line("RING"));
        assert!(!is_status_line("hello there"));
    }

    #[test]
    fn test_terminal_tokens_end_a_body() {
        for line in ["OK", "ERROR", ">", "NO CARRIER", "BUSY", "NO ANSWER", "NO DIALTONE"] {
            assert!(is_status_line(line), "{}", line);
        }
        assert!(!is_status_line("NO CARRIER PIGEONS"));
    }
}
