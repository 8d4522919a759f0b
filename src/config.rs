// Configuration management for pinrec
//
// Two layers: the persistent `Config` file holding defaults, and the validated
// `RecordingConfig` built once per invocation from CLI flags over those defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::devices::gpio::MAX_BCM_PIN;
use crate::devices::{CameraSettings, PinLevel, Resolution};
use crate::encoding;
use crate::recording::monitor::DEFAULT_ARM_POLL;
use crate::recording::PollSettings;

/// Error type for parameter validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("A pin number is required")]
    MissingPin,

    #[error("Pin must be an integer of 0 ~ {max}, got '{value}'")]
    InvalidPin { value: String, max: u8 },

    #[error("Interval must be a positive number of seconds, got '{0}'")]
    InvalidInterval(String),

    #[error("Resolution must be WIDTH:HEIGHT with positive integers, got '{0}'")]
    InvalidResolution(String),

    #[error("'{0}' has an invalid time format (expected e.g. 1h30m15s or 90)")]
    InvalidDuration(String),

    #[error("Duration must be greater than zero, got '{0}'")]
    ZeroDuration(String),

    #[error("'{value}' has an invalid extension (expected one of {allowed})")]
    InvalidTarget { value: String, allowed: String },
}

/// Parse a BCM pin number
pub fn parse_pin(value: &str) -> Result<u8, ConfigError> {
    let invalid = || ConfigError::InvalidPin {
        value: value.to_string(),
        max: MAX_BCM_PIN,
    };
    let pin: u8 = value.trim().parse().map_err(|_| invalid())?;
    if pin > MAX_BCM_PIN {
        return Err(invalid());
    }
    Ok(pin)
}

/// Parse a polling interval in (possibly fractional) seconds
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidInterval(value.to_string()))?;
    interval_from_secs(secs)
}

/// Validate an interval given as a number of seconds
pub fn interval_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidInterval(secs.to_string()));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidInterval(secs.to_string()))
}

/// Parse a `WIDTH:HEIGHT` resolution
pub fn parse_resolution(value: &str) -> Result<Resolution, ConfigError> {
    let invalid = || ConfigError::InvalidResolution(value.to_string());

    let (width, height) = value.split_once(':').ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(Resolution::new(width, height))
}

/// Parse a duration such as `1h30m15s`, `2.5m` or `90`.
///
/// The string is a sequence of `<number><unit>` pairs with units `h`, `m`
/// and `s` (any case), optionally followed by a bare number of seconds.
/// Zero-length durations are rejected.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let mut total = 0.0_f64;
    let mut number = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }

        let scale = match c.to_ascii_lowercase() {
            'h' => 3600.0,
            'm' => 60.0,
            's' => 1.0,
            _ => return Err(invalid()),
        };
        let amount: f64 = number.parse().map_err(|_| invalid())?;
        total += amount * scale;
        number.clear();
    }
    if !number.is_empty() {
        total += number.parse::<f64>().map_err(|_| invalid())?;
    }

    if value.is_empty() {
        return Err(invalid());
    }
    if total <= 0.0 {
        return Err(ConfigError::ZeroDuration(value.to_string()));
    }
    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

/// Check that a target file name has a supported extension
pub fn parse_target(value: &str) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(value);
    if encoding::is_valid_target(&path) {
        Ok(path)
    } else {
        Err(ConfigError::InvalidTarget {
            value: value.to_string(),
            allowed: encoding::supported_extensions(),
        })
    }
}

/// Fully validated settings for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingConfig {
    pub pin: u8,
    /// Explicit target; `None` means a timestamped name in `output_dir`
    pub target: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub resolution: Resolution,
    pub interval: Duration,
    pub timeout: Option<Duration>,
    pub start_level: PinLevel,
    pub arm_timeout: Option<Duration>,
    pub arm_poll: Duration,
    pub camera: CameraSettings,
}

impl RecordingConfig {
    /// File the session records to
    pub fn target_path(&self) -> PathBuf {
        self.target
            .clone()
            .unwrap_or_else(|| encoding::default_target(&self.output_dir))
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(self.interval, self.timeout, self.start_level)
            .with_arm_timeout(self.arm_timeout)
            .with_arm_poll(self.arm_poll)
    }
}

/// Persistent defaults, read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling interval in seconds while recording
    pub interval_secs: f64,

    /// Capture resolution as WIDTH:HEIGHT
    pub resolution: String,

    /// Record while the pin is low instead of high
    pub start_with_low: bool,

    /// Directory for timestamped recordings
    pub output_dir: PathBuf,

    /// Pause between pin reads while waiting for the trigger
    pub arm_poll_ms: u64,

    /// Give up waiting for the trigger after this long (duration string)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arm_timeout: Option<String>,

    pub camera: CameraSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            resolution: Resolution::default().to_string(),
            start_with_low: false,
            output_dir: PathBuf::from("."),
            arm_poll_ms: DEFAULT_ARM_POLL.as_millis() as u64,
            arm_timeout: None,
            camera: CameraSettings::default(),
        }
    }
}

impl Config {
    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file {}: {}", path.display(), e);
                }
            }
        }

        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinrec")
        .join("config.toml")
}
