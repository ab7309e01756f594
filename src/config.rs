//! Recorder configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (optional; missing files are ignored)
//! 3. Environment variables prefixed with `SONAR_RECORDER_`, nested keys
//!    separated by `__` (e.g. `SONAR_RECORDER_DEVICE__ADDRESS=10.0.0.7`)
//!
//! Acquisition settings (record mode, rotation, output directory, prefix) are
//! owned by the acquisition unit and never appear here.
//!
//! # Example
//! ```no_run
//! use sonar_recorder::config::RecorderConfig;
//!
//! let config = RecorderConfig::load_from("sonar-recorder.toml")?;
//! config.validate()?;
//! println!("Recording from {}", config.device.address);
//! # Ok::<(), sonar_recorder::RecorderError>(())
//! ```

use crate::device::TransportMode;
use crate::error::{RecorderError, RecorderResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SONAR_RECORDER_";

/// Top-level recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecorderConfig {
    /// Acquisition unit connection
    #[serde(default)]
    pub device: DeviceConfig,
    /// Recording file writer
    #[serde(default)]
    pub writer: WriterConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the acquisition unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Address of the unit
    #[serde(default = "default_address")]
    pub address: String,
    /// Socket mode for the session
    #[serde(default)]
    pub transport: TransportMode,
    /// Connect timeout used in non-blocking mode
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Wait between failed connection attempts
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
    /// Wait after a successful connect before polling
    #[serde(default = "default_connect_settle")]
    pub connect_settle_ms: u64,
    /// Loop pause when the unit cannot report its ping interval
    #[serde(default = "default_fallback_nap")]
    pub fallback_nap_ms: u64,
}

/// Settings of the recording file writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Pings buffered for reassembly before the oldest is forced out
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Size of the in-memory write cache
    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: usize,
    /// Used-space percentage at which recording stops
    #[serde(default = "default_disk_full_percent")]
    pub disk_full_percent: u32,
    /// Pings between close/reopen durability checkpoints (0 disables)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_pings: u32,
    /// Extension of recording files
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    250
}

fn default_reconnect_backoff() -> u64 {
    1000
}

fn default_connect_settle() -> u64 {
    1000
}

fn default_fallback_nap() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    50
}

fn default_cache_bytes() -> usize {
    10_000_000
}

fn default_disk_full_percent() -> u32 {
    95
}

fn default_checkpoint_interval() -> u32 {
    100
}

fn default_file_extension() -> String {
    "sdf".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            transport: TransportMode::default(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            connect_settle_ms: default_connect_settle(),
            fallback_nap_ms: default_fallback_nap(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            cache_bytes: default_cache_bytes(),
            disk_full_percent: default_disk_full_percent(),
            checkpoint_interval_pings: default_checkpoint_interval(),
            file_extension: default_file_extension(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn fallback_nap(&self) -> Duration {
        Duration::from_millis(self.fallback_nap_ms)
    }
}

impl RecorderConfig {
    /// Build the layered figment for `path`.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from defaults, `path` and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> RecorderResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RecorderResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(RecorderError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(RecorderError::Configuration(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.writer.queue_capacity == 0 {
            return Err(RecorderError::Configuration(
                "writer.queue_capacity must be at least 1".into(),
            ));
        }

        if self.writer.cache_bytes == 0 {
            return Err(RecorderError::Configuration(
                "writer.cache_bytes must be at least 1".into(),
            ));
        }

        if !(1..=100).contains(&self.writer.disk_full_percent) {
            return Err(RecorderError::Configuration(format!(
                "Invalid writer.disk_full_percent {}. Must be 1-100",
                self.writer.disk_full_percent
            )));
        }

        if self.writer.file_extension.is_empty() {
            return Err(RecorderError::Configuration(
                "writer.file_extension must not be empty".into(),
            ));
        }

        if self.device.address.trim().is_empty() {
            return Err(RecorderError::Configuration(
                "device.address must not be empty".into(),
            ));
        }

        Ok(())
    }
}
