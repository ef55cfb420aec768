//! Application settings and command presets

use crate::core::sms::SmsProfile;
use crate::core::transport::{SerialConfig, SerialFlowControl, SerialParity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Platform config directory unknown
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this schema
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed
    #[error("Could not serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial port defaults
    pub serial: SerialSettings,
    /// SMS destination
    pub sms: SmsProfile,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Command presets, in display order
    pub commands: Vec<CommandItem>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            sms: SmsProfile::default(),
            logging: LoggingConfig::default(),
            commands: default_commands(),
        }
    }
}

impl AppConfig {
    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_or_init(&path)
    }

    /// Load config from `path`.
    ///
    /// A missing, empty or unparsable file is replaced by the defaults, which
    /// are written back and returned.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        match toml::from_str::<Self>(&content) {
            Ok(mut config) => {
                if config.commands.is_empty() {
                    config.commands = default_commands();
                }
                Ok(config)
            }
            Err(e) => {
                tracing::warn!("Invalid config {}: {}; restoring defaults", path.display(), e);
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Presets that carry a command (separators skipped)
    pub fn presets(&self) -> impl Iterator<Item = &CommandItem> {
        self.commands.iter().filter(|c| !c.is_separator())
    }
}

/// Serial port defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let line = SerialConfig::default();
        Self {
            port: if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" }.to_string(),
            baud_rate: 115_200,
            data_bits: line.data_bits,
            stop_bits: line.stop_bits,
            parity: line.parity,
            flow_control: line.flow_control,
        }
    }
}

impl SerialSettings {
    /// Line settings for [`SerialTransport`](crate::core::transport::SerialTransport)
    pub fn line_config(&self) -> SerialConfig {
        SerialConfig::default()
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(self.flow_control)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Write daily rolling log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// A command preset with a short description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandItem {
    /// Command text, sent as-is
    pub text: String,
    /// Human-readable description
    pub summary: String,
}

impl CommandItem {
    /// Create a preset
    pub fn new(text: &str, summary: &str) -> Self {
        Self {
            text: text.to_string(),
            summary: summary.to_string(),
        }
    }

    /// Empty entries group presets visually
    pub fn is_separator(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn default_commands() -> Vec<CommandItem> {
    vec![
        CommandItem::new("AT", "Handshake"),
        CommandItem::new("AT+CSQ", "Signal quality"),
        CommandItem::new("AT+CREG?", "Network registration"),
        CommandItem::default(),
        CommandItem::new("AT+CMGF=1", "SMS text mode"),
        CommandItem::new("AT+CSCA?", "SMS service center"),
        CommandItem::new("AT+CMGL=\"REC UNREAD\"", "List unread SMS"),
        CommandItem::new("AT+CMGL=\"ALL\"", "List all SMS"),
        CommandItem::default(),
        CommandItem::new("AT&F", "Factory defaults"),
        CommandItem::new("AT+CFUN=1,1", "Restart module"),
    ]
}
