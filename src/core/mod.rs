//! Core module containing the AT session machinery
//!
//! This module provides:
//! - Transport layer (serial port, in-memory)
//! - CRLF line framing
//! - Command echo suppression
//! - URC classification and SMS assembly
//! - Multi-step send sequences with pacing
//! - The session facade tying them together

pub mod echo;
pub mod framing;
pub mod sequencer;
pub mod session;
pub mod sms;
pub mod transport;
pub mod urc;
