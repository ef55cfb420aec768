//! Command echo suppression
//!
//! Modems in echo mode repeat each command line before answering. Sent
//! commands are queued and the next received line equal to the oldest pending
//! command is swallowed. Matching is exact and front-only; there is no
//! correlation with response boundaries.

use std::collections::VecDeque;

/// Maximum number of commands awaiting their echo
pub const ECHO_CAPACITY: usize = 32;

/// Bounded FIFO of commands whose echo has not been seen yet
#[derive(Debug, Default)]
pub struct EchoSuppressor {
    pending: VecDeque<String>,
}

impl EchoSuppressor {
    /// Create an empty suppressor
    pub fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(ECHO_CAPACITY),
        }
    }

    /// Remember a sent command. The oldest entry is evicted past capacity.
    pub fn command_sent(&mut self, text: &str) {
        self.pending.push_back(text.trim().to_string());
        if self.pending.len() > ECHO_CAPACITY {
            if let Some(evicted) = self.pending.pop_front() {
                tracing::debug!("Echo never arrived for {:?}", evicted);
            }
        }
    }

    /// Returns `true` if `line` is the echo of the oldest pending command,
    /// consuming that entry.
    pub fn is_echo(&mut self, line: &str) -> bool {
        let line = line.trim();
        if self.pending.front().is_some_and(|front| front == line) {
            self.pending.pop_front();
            return true;
        }
        false
    }

    /// Number of commands still awaiting their echo
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no echo is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget all pending commands
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
