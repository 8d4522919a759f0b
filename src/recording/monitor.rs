// Level-triggered polling task
//
// The task runs on its own thread, one per `RecordingSession::start`:
//   1. Arming: poll the pin until it reaches the trigger level, sleeping
//      `arm_poll` between reads.
//   2. Recording: start capture, then keep waiting on the sink in `interval`
//      slices until the level flips, the timeout elapses, the session is
//      stopped, or the sink fails.
//   3. Finalizing: stop capture. This always runs once capture has started,
//      including when the wait errors or panics.

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{RecordingState, RecordingStatus};
use crate::devices::{DeviceError, DigitalInput, PinLevel, VideoSink};

/// Default pause between pin reads while arming
pub const DEFAULT_ARM_POLL: Duration = Duration::from_millis(10);

/// Parameters for one polling task
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Longest single wait on the sink while recording
    pub interval: Duration,
    /// Bound on the recording phase, measured from capture start
    pub timeout: Option<Duration>,
    /// Level that starts recording; the opposite level stops it
    pub start_level: PinLevel,
    /// Bound on the arming phase
    pub arm_timeout: Option<Duration>,
    /// Pause between pin reads while arming
    pub arm_poll: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Option<Duration>, start_level: PinLevel) -> Self {
        Self {
            interval,
            timeout,
            start_level,
            arm_timeout: None,
            arm_poll: DEFAULT_ARM_POLL,
        }
    }

    pub fn with_arm_timeout(mut self, arm_timeout: Option<Duration>) -> Self {
        self.arm_timeout = arm_timeout;
        self
    }

    pub fn with_arm_poll(mut self, arm_poll: Duration) -> Self {
        self.arm_poll = arm_poll;
        self
    }

    /// Level that ends a recording
    pub fn stop_level(&self) -> PinLevel {
        self.start_level.flipped()
    }
}

/// Why a polling task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Stopped while arming; capture never started
    Cancelled,
    /// The pin never reached the trigger level within the arming timeout
    ArmingTimedOut,
    /// The pin left the trigger level
    LevelReleased,
    /// The recording timeout elapsed
    TimedOut,
    /// Stopped while recording
    Stopped,
    /// The sink stopped capturing on its own
    SinkEnded,
}

impl PollOutcome {
    /// Whether capture was started before the task ended
    pub fn captured(&self) -> bool {
        !matches!(self, PollOutcome::Cancelled | PollOutcome::ArmingTimedOut)
    }
}

/// Everything a polling task borrows from its session
pub(crate) struct TaskContext<S, I> {
    pub sink: Arc<Mutex<S>>,
    pub input: Arc<I>,
    pub target: PathBuf,
    pub state: Arc<RwLock<RecordingState>>,
    pub cancel: Arc<AtomicBool>,
}

impl<S: VideoSink, I: DigitalInput> TaskContext<S, I> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: RecordingStatus) {
        self.state.write().status = status;
    }
}

/// Stops capture when dropped unless `finish` already did
struct CaptureGuard<'a, S: VideoSink> {
    sink: &'a mut S,
    stopped: bool,
}

impl<'a, S: VideoSink> CaptureGuard<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self { sink, stopped: false }
    }

    fn finish(mut self) -> Result<(), DeviceError> {
        self.stopped = true;
        self.sink.stop_capture()
    }
}

impl<S: VideoSink> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        if !self.stopped {
            log::warn!("Recording aborted, stopping capture");
            if let Err(e) = self.sink.stop_capture() {
                log::warn!("Failed to stop capture while unwinding: {}", e);
            }
        }
    }
}

/// Run the arm/record/finalize protocol to completion
pub(crate) fn run<S: VideoSink, I: DigitalInput>(
    ctx: &TaskContext<S, I>,
    settings: &PollSettings,
) -> Result<PollOutcome, DeviceError> {
    let pin = ctx.input.pin();
    let should_stop = || ctx.input.read_level() != settings.start_level;

    ctx.set_status(RecordingStatus::Arming);
    log::info!("Armed on GPIO {}: recording starts when the pin reads {}", pin, settings.start_level);

    let armed_at = Instant::now();
    while should_stop() {
        if ctx.cancelled() {
            log::info!("Stopped while armed, no recording made");
            return Ok(PollOutcome::Cancelled);
        }
        if let Some(arm_timeout) = settings.arm_timeout {
            if armed_at.elapsed() >= arm_timeout {
                log::info!("GPIO {} did not read {} within {:?}", pin, settings.start_level, arm_timeout);
                return Ok(PollOutcome::ArmingTimedOut);
            }
        }
        std::thread::sleep(settings.arm_poll);
    }

    let mut sink = ctx.sink.lock();
    sink.start_capture(&ctx.target)?;
    let started = Instant::now();
    {
        let mut state = ctx.state.write();
        state.status = RecordingStatus::Recording;
        state.started_at = Some(Local::now());
    }
    log::info!("Recording to {}", ctx.target.display());

    let guard = CaptureGuard::new(&mut *sink);
    let outcome = loop {
        if ctx.cancelled() {
            break Ok(PollOutcome::Stopped);
        }
        if should_stop() {
            break Ok(PollOutcome::LevelReleased);
        }
        if let Some(timeout) = settings.timeout {
            if started.elapsed() >= timeout {
                break Ok(PollOutcome::TimedOut);
            }
        }
        match guard.sink.wait_capturing(settings.interval) {
            Ok(true) => {}
            Ok(false) => break Ok(PollOutcome::SinkEnded),
            Err(e) => break Err(e),
        }
    };

    ctx.set_status(RecordingStatus::Finalizing);
    let stopped = guard.finish();
    let duration = started.elapsed();
    ctx.state.write().last_duration = Some(duration);

    match (outcome, stopped) {
        (Ok(outcome), Ok(())) => {
            log::info!("Recording stopped after {:.1}s ({:?})", duration.as_secs_f64(), outcome);
            Ok(outcome)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), stopped) => {
            if let Err(stop_err) = stopped {
                log::warn!("Failed to stop capture after error: {}", stop_err);
            }
            log::error!("Recording failed after {:.1}s: {}", duration.as_secs_f64(), e);
            Err(e)
        }
    }
}
