// Recording modules

pub mod monitor;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use monitor::{PollOutcome, PollSettings};
pub use session::{RecordingSession, SessionHandle};

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

use crate::devices::DeviceError;

/// Error type for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A polling task is already running for this session")]
    AlreadyRunning,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid target '{0}': expected one of {1}")]
    InvalidTarget(String, String),

    #[error("Polling interval must be positive")]
    InvalidInterval,

    #[error("Polling task did not finish within {0:?}")]
    JoinTimeout(Duration),

    #[error("Polling task panicked")]
    TaskPanicked,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Where a session is in the arm/record cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    /// No polling task is running
    Idle,
    /// Waiting for the pin to reach the trigger level
    Arming,
    /// Capture is running
    Recording,
    /// Stopping capture
    Finalizing,
    /// Devices released; terminal
    Closed,
}

/// Snapshot of a session, shared between the caller and the polling task
#[derive(Debug, Clone)]
pub struct RecordingState {
    pub status: RecordingStatus,
    pub target: PathBuf,
    /// Wall-clock time the current or last capture started
    pub started_at: Option<DateTime<Local>>,
    /// Length of the last finished capture
    pub last_duration: Option<Duration>,
    /// How the last polling task ended
    pub last_outcome: Option<PollOutcome>,
}

impl RecordingState {
    pub fn new(target: PathBuf) -> Self {
        Self {
            status: RecordingStatus::Idle,
            target,
            started_at: None,
            last_duration: None,
            last_outcome: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.status == RecordingStatus::Recording
    }
}
