//! CLI Module
//!
//! Exit codes and result mapping for the `atlink` binary.

pub mod exit_codes;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};
