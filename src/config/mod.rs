//! Configuration module
//!
//! Handles application settings: serial defaults, SMS profile and command presets

mod settings;

pub use settings::{AppConfig, CommandItem, ConfigError, LoggingConfig, SerialSettings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "atlink", "Atlink").map(|dirs| dirs.config_dir().to_path_buf())
}

fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "atlink", "Atlink").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the default log directory, used when file logging is requested
/// without a configured directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Get the default configuration file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
