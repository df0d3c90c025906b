//! # AiCell Core Library
//!
//! AT command protocol engine and SMS session manager for cellular modems.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial transport with non-blocking polling and port discovery
//! - Line framing and solicited/unsolicited traffic demultiplexing
//! - A command engine with exclusive access and terminal-token correlation
//! - The modem start-up handshake
//! - The two-phase SMS send protocol
//! - Inbound message parsing and per-message dispatch
//! - Network diagnostics
//!
//! ## Example
//!
//! ```rust,ignore
//! use aicell_core::{config::ModemConfig, modem::Modem, sms::Dispatcher};
//!
//! let config = ModemConfig::default();
//! let modem = Modem::connect(&config)?;
//! let monitor = modem.start_monitor(Dispatcher::logging_only());
//!
//! let report = modem.initialize().await?;
//! if report.is_ready() {
//!     let outcome = modem.send_sms("01712345678", "hello").await?;
//!     println!("sent: {}", outcome.success);
//! }
//! monitor.shutdown().await;
//! ```

pub mod config;
pub mod diagnostics;
pub mod init;
pub mod modem;
pub mod protocol;
pub mod simulator;
pub mod sms;
pub mod voice;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{InitPolicy, ModemConfig, NumberPlan, SendPolicy};
    pub use crate::diagnostics::{NetworkStatus, RegistrationStatus, SignalQuality};
    pub use crate::init::{InitReport, InitState};
    pub use crate::modem::{Modem, MonitorHandle};
    pub use crate::protocol::{
        CommandEngine, CommandResult, ConnectionState, ModemError, Terminal, Transport,
    };
    pub use crate::sms::{Dispatcher, InboundHandler, InboundMessage, SendOutcome};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
