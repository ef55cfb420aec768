//! In-memory transport
//!
//! Records outgoing bytes and lets the caller play the modem side by
//! injecting incoming chunks. Used by the test suite and for dry runs.

use super::{ByteTransport, DataHandler, TransportError};
use parking_lot::Mutex;

#[derive(Default)]
struct MemoryState {
    open: bool,
    address: Option<(String, u32)>,
    writes: Vec<Vec<u8>>,
    fail_open: bool,
    fail_writes: bool,
}

/// Loopback-style transport living entirely in memory
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    handler: Mutex<Option<DataHandler>>,
}

impl MemoryTransport {
    /// Create a closed transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls fail
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make subsequent `write` calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Deliver a chunk to the registered data handler, as the reader thread would.
    ///
    /// Returns `false` when no handler is registered. Must not be called from
    /// inside a data handler or a session callback that holds session state.
    pub fn inject(&self, chunk: &[u8]) -> bool {
        let current = self.handler.lock().clone();
        match current {
            Some(callback) => {
                callback(chunk);
                true
            }
            None => false,
        }
    }

    /// Whether a data handler is currently registered
    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Address and speed of the last successful `open`
    pub fn opened_with(&self) -> Option<(String, u32)> {
        self.state.lock().address.clone()
    }

    /// Every buffer written so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Written buffers decoded as text
    pub fn written_text(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

impl ByteTransport for MemoryTransport {
    fn open(&self, address: &str, speed: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(TransportError::PortNotFound(address.to_string()));
        }
        state.open = true;
        state.address = Some((address.to_string(), speed));
        Ok(())
    }

    fn close(&self) {
        self.state.lock().open = false;
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        if state.fail_writes {
            return Err(TransportError::ShortWrite {
                written: 0,
                expected: data.len(),
            });
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn set_data_handler(&self, handler: Option<DataHandler>) {
        *self.handler.lock() = handler;
    }
}
