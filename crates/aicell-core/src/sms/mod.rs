//! Text messaging
//!
//! Destination normalization, the send protocol, inbound notification
//! parsing and per-message dispatch.

pub mod address;
mod dispatcher;
pub mod notification;
pub mod send;

pub use address::normalize_destination;
pub use dispatcher::{Dispatcher, InboundHandler};
pub use notification::{InboundMessage, NotificationAssembler};
pub use send::{truncate_body, SendOutcome, SmsSender, MAX_MESSAGE_CHARS};
