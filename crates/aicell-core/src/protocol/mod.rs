//! AT Command Protocol
//!
//! Implements the line-oriented AT command protocol spoken by cellular modems.
//!
//! The byte stream is shared between solicited command replies and unsolicited
//! notifications. The monitor task owns reading and demultiplexes every line;
//! the command engine serializes writers and correlates replies with a deadline.

mod classifier;
mod connection;
mod demux;
mod engine;
mod error;
pub mod line_buffer;
pub(crate) mod monitor;
pub mod serial;
mod transport;

pub(crate) use classifier::is_status_line;
pub use classifier::{classify_unsolicited, LineClass, UnsolicitedKind};
pub use connection::{ConnectionState, ModemConnection, TransportFactory};
pub use demux::{Demultiplexer, ModemEvent, Routed};
pub use engine::{CommandEngine, CommandResult, CommandSession, PendingSlot, Terminal};
pub use error::ModemError;
pub use line_buffer::{LineBuffer, RawLine};
pub use serial::{discover_port, list_ports, open_port, PortInfo, SerialTransport};
pub use transport::{into_shared, SharedTransport, Transport};

/// Default baud rate for SIM800-class modems
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for a single AT command in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Line terminator appended to every command
pub const LINE_TERMINATOR: &str = "\r\n";

/// Payload terminator for text-mode message bodies (Ctrl-Z)
pub const CTRL_Z: u8 = 0x1A;

/// Longest partial line kept before it is flushed unterminated
pub const MAX_LINE_LEN: usize = 1024;
