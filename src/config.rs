//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::{FtmsBridgeError, Result};

/// Main configuration structure
///
/// Every section is optional; a missing section uses its defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ble: BleConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bluetooth LE device selection
#[derive(Debug, Deserialize, Clone)]
pub struct BleConfig {
    /// Index into the host's Bluetooth adapters
    #[serde(default)]
    pub adapter_index: usize,

    /// Case-insensitive name filter; empty accepts any FTMS device
    #[serde(default)]
    pub device_name: String,

    /// How long device selection scans before giving up
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

/// Telemetry recorder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_telemetry_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    /// Minimum spacing between written records; 0 writes every record
    #[serde(default)]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Diagnostic logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file_enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Period of the status line printed by the binary
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

// Default value functions
fn default_scan_timeout_ms() -> u64 { 10000 }

fn default_telemetry_enabled() -> bool { true }
fn default_telemetry_dir() -> String { "./telemetry".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_status_interval_ms() -> u64 { 5000 }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            device_name: String::new(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_telemetry_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: 0,
            format: default_log_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_enabled: false,
            log_dir: default_log_dir(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

fn invalid(message: &str) -> FtmsBridgeError {
    FtmsBridgeError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ftms_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.ble.scan_timeout_ms == 0 || self.ble.scan_timeout_ms > 120000 {
            return Err(invalid("scan_timeout_ms must be between 1 and 120000"));
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.log_interval_ms > 60000 {
            return Err(invalid("log_interval_ms must be between 0 and 60000"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        // Validate logging configuration
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(FtmsBridgeError::Config(toml::de::Error::custom(format!(
                "log level '{}' must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ))));
        }

        if self.logging.file_enabled && self.logging.log_dir.is_empty() {
            return Err(invalid("logging log_dir cannot be empty when file logging is enabled"));
        }

        if self.logging.status_interval_ms == 0 || self.logging.status_interval_ms > 600000 {
            return Err(invalid("status_interval_ms must be between 1 and 600000"));
        }

        Ok(())
    }
}
