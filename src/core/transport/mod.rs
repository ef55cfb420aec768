//! Byte-stream transports the AT session runs over
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial modems) via a background reader thread
//! - An in-memory transport for tests and dry runs

mod memory;
mod serial;

pub use memory::MemoryTransport;
pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use std::sync::Arc;
use thiserror::Error;

/// Callback receiving every chunk of incoming bytes.
///
/// Invoked on a transport-owned thread, in arrival order.
pub type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Fewer bytes were accepted than requested
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the device
        written: usize,
        /// Bytes requested
        expected: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Write calls
    pub packets_sent: u64,
    /// Chunks delivered to the data handler
    pub packets_received: u64,
}

/// Byte-stream device the session talks through.
///
/// All methods take `&self`; implementations synchronize internally so the
/// session can write from the caller thread while the reader thread delivers
/// incoming data.
#[cfg_attr(test, mockall::automock)]
pub trait ByteTransport: Send + Sync {
    /// Open the device at `address` with the given line speed.
    fn open(&self, address: &str, speed: u32) -> Result<(), TransportError>;

    /// Close the device. On return no further data handler calls happen.
    fn close(&self);

    /// Blocking write; succeeds only if every byte was accepted.
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Check if the device is open
    fn is_open(&self) -> bool;

    /// Replace the active data handler; `None` disables delivery.
    fn set_data_handler(&self, handler: Option<DataHandler>);
}
