// Hardware capabilities consumed by the recorder

pub mod camera;
pub mod gpio;

pub use camera::{CameraSettings, RpicamSink};
pub use gpio::GpioInput;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::encoding::VideoFormat;

/// Error type for camera and GPIO backends
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Capture exited unexpectedly: {0}")]
    CaptureExited(String),

    #[error("Unsupported format for this camera: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to spawn polling task: {0}")]
    Spawn(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Logic level of a digital input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    /// The opposite level
    pub fn flipped(self) -> PinLevel {
        match self {
            PinLevel::Low => PinLevel::High,
            PinLevel::High => PinLevel::Low,
        }
    }

    pub fn is_high(self) -> bool {
        self == PinLevel::High
    }
}

impl From<bool> for PinLevel {
    fn from(high: bool) -> Self {
        if high {
            PinLevel::High
        } else {
            PinLevel::Low
        }
    }
}

impl From<rppal::gpio::Level> for PinLevel {
    fn from(level: rppal::gpio::Level) -> Self {
        match level {
            rppal::gpio::Level::High => PinLevel::High,
            rppal::gpio::Level::Low => PinLevel::Low,
        }
    }
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinLevel::Low => f.write_str("low"),
            PinLevel::High => f.write_str("high"),
        }
    }
}

/// Capture resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// A camera that records to a named target.
///
/// The polling task is the only caller while a session is running, so
/// methods take `&mut self` and need no internal locking.
pub trait VideoSink: Send + 'static {
    /// Whether this sink can write the given format
    fn supports(&self, _format: VideoFormat) -> bool {
        true
    }

    /// Begin writing video to `target`
    fn start_capture(&mut self, target: &Path) -> Result<(), DeviceError>;

    /// Block for up to `max` while capture runs, servicing the device.
    /// Returns `Ok(false)` if capture ended on its own during the wait.
    fn wait_capturing(&mut self, max: Duration) -> Result<bool, DeviceError>;

    /// Stop writing video. Called exactly once for every successful `start_capture`.
    fn stop_capture(&mut self) -> Result<(), DeviceError>;

    /// Release the camera. Called once when the owning session closes.
    fn release(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// A digital input pin, bound once at construction.
///
/// Reads go straight to the hardware and may happen from any thread.
pub trait DigitalInput: Send + Sync + 'static {
    /// BCM number of the bound pin
    fn pin(&self) -> u8;

    /// Current level of the pin
    fn read_level(&self) -> PinLevel;
}
