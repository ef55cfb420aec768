//! # Atlink Core Library
//!
//! Half-duplex AT-command sessions with GSM modems over a serial line:
//! - Send AT commands and suppress their echo
//! - Frame the modem's CRLF-delimited output into lines
//! - Recognize incoming-SMS notifications (`+CMT:`, `+CMGR:`, `+CMTI:`)
//! - Send text-mode SMS with the standard `AT+CMGF` / `AT+CMGS` handshake
//!
//! ## Example
//!
//! ```rust,no_run
//! use atlink_core::{AtSession, SmsProfile};
//!
//! fn main() -> anyhow::Result<()> {
//!     let session = AtSession::new();
//!     session.set_log_callback(|event| println!("{}", event));
//!     session.set_sms_callback(|header, body| println!("{}\n{}", header, body));
//!
//!     session.connect("/dev/ttyUSB0", 115_200)?;
//!     session.set_sms_profile(SmsProfile::new("+15551234567"));
//!     session.send_sms("Hello from atlink")?;
//!     session.disconnect();
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, CommandItem, ConfigError};
pub use crate::core::framing::LineFramer;
pub use crate::core::sequencer::{ImmediatePacer, Pacer, SendPlan, ThreadPacer};
pub use crate::core::session::{AtSession, SessionError, SessionEvent};
pub use crate::core::sms::{SmsMessage, SmsProfile};
pub use crate::core::transport::{
    ByteTransport, MemoryTransport, SerialConfig, SerialFlowControl, SerialParity, SerialTransport,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
