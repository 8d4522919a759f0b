// Command line surface

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{self, Config, ConfigError, RecordingConfig};
use crate::devices::{PinLevel, Resolution};

/// Record video while a GPIO pin holds a level.
///
/// Recording starts once the pin reads the trigger level (high unless
/// --start-with-low is given) and stops when it flips back, when the timeout
/// elapses, or on Ctrl-C.
#[derive(Parser, Debug, Clone)]
#[command(name = "pinrec", version, about)]
pub struct Args {
    /// BCM number of the trigger pin (0 ~ 26)
    #[arg(value_parser = config::parse_pin, required_unless_present = "save_config")]
    pub pin: Option<u8>,

    /// Output file; extension must be one of h264, mjpeg, yuv, rgb, rgba, bgr, bgra
    #[arg(short, long, value_parser = config::parse_target)]
    pub fname: Option<PathBuf>,

    /// Seconds between checks while recording [default: 1.0]
    #[arg(short, long, value_parser = config::parse_interval)]
    pub interval: Option<Duration>,

    /// Capture resolution as WIDTH:HEIGHT [default: 640:480]
    #[arg(short, long, value_parser = config::parse_resolution)]
    pub resolution: Option<Resolution>,

    /// Record while the pin is low instead of high
    #[arg(long)]
    pub start_with_low: bool,

    /// Stop recording after this long, e.g. 1h30m, 45s or 90
    #[arg(short, long, value_parser = config::parse_duration)]
    pub timeout: Option<Duration>,

    /// Give up if the trigger level is not seen within this long
    #[arg(long, value_parser = config::parse_duration)]
    pub arm_timeout: Option<Duration>,

    /// Directory for timestamped recordings when --fname is not given
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Config file to read defaults from
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the given options to the config file as new defaults and exit
    #[arg(long)]
    pub save_config: bool,
}

impl Args {
    /// Config file path in effect
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::default_config_path)
    }

    /// Merge flags over file defaults. Flags win; file values are validated the
    /// same way as flags.
    pub fn into_config(self, file: &Config) -> Result<RecordingConfig, ConfigError> {
        let pin = self.pin.ok_or(ConfigError::MissingPin)?;

        let interval = match self.interval {
            Some(interval) => interval,
            None => config::interval_from_secs(file.interval_secs)?,
        };
        let resolution = match self.resolution {
            Some(resolution) => resolution,
            None => config::parse_resolution(&file.resolution)?,
        };
        let start_level = if self.start_with_low || file.start_with_low {
            PinLevel::Low
        } else {
            PinLevel::High
        };

        Ok(RecordingConfig {
            pin,
            target: self.fname,
            output_dir: self.output_dir.unwrap_or_else(|| file.output_dir.clone()),
            resolution,
            interval,
            timeout: self.timeout,
            start_level,
            arm_timeout: or_file_duration(self.arm_timeout, file.arm_timeout.as_deref())?,
            arm_poll: Duration::from_millis(file.arm_poll_ms.max(1)),
            camera: file.camera.clone(),
        })
    }

    /// Copy the given flags into `file` for `--save-config`
    pub fn apply_to(&self, file: &mut Config) {
        if let Some(interval) = self.interval {
            file.interval_secs = interval.as_secs_f64();
        }
        if let Some(resolution) = self.resolution {
            file.resolution = resolution.to_string();
        }
        if self.start_with_low {
            file.start_with_low = true;
        }
        if let Some(dir) = &self.output_dir {
            file.output_dir = dir.clone();
        }
        if let Some(arm_timeout) = self.arm_timeout {
            file.arm_timeout = Some(duration_string(arm_timeout));
        }
    }
}

fn or_file_duration(
    flag: Option<Duration>,
    file: Option<&str>,
) -> Result<Option<Duration>, ConfigError> {
    match (flag, file) {
        (Some(flag), _) => Ok(Some(flag)),
        (None, Some(file)) => config::parse_duration(file).map(Some),
        (None, None) => Ok(None),
    }
}

fn duration_string(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}
