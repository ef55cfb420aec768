//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::session::SessionError;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Write to the device failed
    pub const WRITE_FAILED: u8 = 10;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Input validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message for the user
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::ConnectionFailed(_) | TransportError::NotConnected => {
                ExitCodes::CONNECTION_FAILED
            }
            TransportError::ShortWrite { .. } | TransportError::IoError(_) => ExitCodes::WRITE_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&SessionError> for CliResult {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Transport(e) => e.into(),
            SessionError::NotConnected => Self::Error(ExitCodes::CONNECTION_FAILED, err.to_string()),
            SessionError::EmptyCommand | SessionError::EmptyBody => {
                Self::Error(ExitCodes::INVALID_ARGS, err.to_string())
            }
            SessionError::NoDestination => Self::Error(ExitCodes::VALIDATION_FAILED, err.to_string()),
        }
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        7 => "Permission denied",
        8 => "Configuration error",
        10 => "Write failed",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}
