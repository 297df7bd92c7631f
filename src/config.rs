//! Configuration management for Edge Latency
//!
//! Settings are read from a TOML file in the platform config directory. A
//! missing file means defaults; a malformed or inconsistent one is an error
//! reported before any capture starts.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/edge-latency/config.toml` |
//! | macOS | `~/Library/Application Support/edge-latency/config.toml` |
//! | Windows | `%APPDATA%\edge-latency\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use edge_latency::Config;
//!
//! let mut config = Config::load().unwrap_or_default();
//! config.debounce.settle_window_ms = 10;
//! config.validate().expect("invalid config");
//! config.save().expect("Failed to save config");
//! ```

use crate::actuator::{ActuatorError, PulseSchedule};
use crate::pipeline::{DebounceConfig, ReleaseMode, DEFAULT_CAPACITY};
use crate::sink::TimeUnit;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "edge-latency";

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Returns the path to the config file, creating its directory if needed
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join(APP_DIR);

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir.join("config.toml"))
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub debounce: DebounceSettings,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
}

/// Event queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Ring size; must be a power of two
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Debounce filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSettings {
    /// Settle window in ms; 0 disables debouncing
    pub settle_window_ms: u64,
    pub release_mode: ReleaseMode,
    /// Also write every raw, unfiltered event
    pub raw_tap: bool,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            settle_window_ms: 5,
            release_mode: ReleaseMode::Symmetric,
            raw_tap: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub period_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { period_ms: 1000 }
    }
}

/// Consumer loop and output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sleep between empty polls, in microseconds; 0 spins
    pub idle_sleep_us: u64,
    pub timestamp_unit: TimeUnit,
    /// CSV file for accepted events
    pub output: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_sleep_us: 200,
            timestamp_unit: TimeUnit::Nanos,
            output: PathBuf::from("keyboard_log.csv"),
        }
    }
}

/// Keyboard backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardBackend {
    /// Evdev when available, polling otherwise
    #[default]
    Auto,
    Evdev,
    Poll,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub backend: KeyboardBackend,
    /// Only capture devices whose path or name contains this
    pub device_filter: Option<String>,
}

/// Serial capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Transcript of every received line with its host timestamp
    pub output: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port().to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
            output: PathBuf::from("pico_log.csv"),
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(windows) {
        "COM9"
    } else {
        "/dev/ttyACM0"
    }
}

/// Scheduled pulse settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub pins: Vec<u8>,
    /// Time between pulse starts
    pub interval_ms: u64,
    /// How long each pin stays active
    pub duration_ms: u64,
    /// Active level is low, idle is high
    pub active_low: bool,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            pins: vec![0, 1, 2, 3, 4, 5, 10, 11, 12, 13, 14, 15],
            interval_ms: 150,
            duration_ms: 50,
            active_low: true,
        }
    }
}

impl PulseConfig {
    pub fn schedule(&self) -> Result<PulseSchedule, ActuatorError> {
        PulseSchedule::new(
            self.pins.clone(),
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.duration_ms),
            self.active_low,
        )
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot be armed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.queue.capacity;
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(ConfigError::invalid(
                "queue.capacity",
                format!("{} is not a power of two >= 2", capacity),
            ));
        }
        if self.heartbeat.period_ms == 0 {
            return Err(ConfigError::invalid(
                "heartbeat.period_ms",
                "must be greater than zero",
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::invalid("serial.baud_rate", "must be greater than zero"));
        }
        self.pulse
            .schedule()
            .map_err(|e| ConfigError::invalid("pulse", e.to_string()))?;
        Ok(())
    }

    pub fn debounce_config(&self) -> DebounceConfig {
        DebounceConfig::from_millis(self.debounce.settle_window_ms, self.debounce.release_mode)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat.period_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.capture.idle_sleep_us)
    }
}
