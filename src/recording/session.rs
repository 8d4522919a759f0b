// Recording session: owns the camera and the trigger pin, runs one polling task at a time

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::monitor::{self, PollOutcome, PollSettings, TaskContext};
use super::{RecordingState, RecordingStatus, Result, SessionError};
use crate::devices::{
    CameraSettings, DeviceError, DigitalInput, GpioInput, PinLevel, Resolution, RpicamSink,
    VideoSink,
};
use crate::encoding::{self, VideoFormat};

/// Signals when a polling task has finished.
///
/// The task holds the only sender and drops it on exit (including unwinding),
/// so the receiver disconnects exactly when the task is done.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    done: Receiver<()>,
}

impl SessionHandle {
    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until the task finishes
    pub fn wait(&self) {
        let _ = self.done.recv();
    }

    /// Block for up to `limit`; returns whether the task finished
    pub fn wait_timeout(&self, limit: Duration) -> bool {
        !matches!(self.done.recv_timeout(limit), Err(RecvTimeoutError::Timeout))
    }

    /// Receiver for use in `crossbeam_channel::select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.done
    }
}

struct Devices<S, I> {
    sink: Arc<Mutex<S>>,
    input: Arc<I>,
}

struct PollingTask {
    thread: JoinHandle<std::result::Result<PollOutcome, DeviceError>>,
    cancel: Arc<AtomicBool>,
    handle: SessionHandle,
}

/// A camera bound to a trigger pin.
///
/// Devices are released by `close`, or on drop if `close` was never called.
pub struct RecordingSession<S: VideoSink, I: DigitalInput> {
    pin: u8,
    target: PathBuf,
    devices: Option<Devices<S, I>>,
    state: Arc<RwLock<RecordingState>>,
    task: Option<PollingTask>,
}

impl RecordingSession<RpicamSink, GpioInput> {
    /// Open the camera and bind `pin` as the trigger input.
    ///
    /// Without a target, a timestamped H.264 file in the current directory is used.
    pub fn open(
        pin: u8,
        target: Option<PathBuf>,
        resolution: Resolution,
        camera: CameraSettings,
    ) -> Result<Self> {
        // Validate before touching any hardware
        let target = resolve_target(target)?;
        let sink = RpicamSink::open(resolution, camera)?;
        let input = GpioInput::bind(pin)?;
        Self::from_parts(sink, input, Some(target))
    }
}

impl<S: VideoSink, I: DigitalInput> RecordingSession<S, I> {
    /// Build a session from already opened devices
    pub fn from_parts(sink: S, input: I, target: Option<PathBuf>) -> Result<Self> {
        let target = resolve_target(target)?;
        let format = VideoFormat::from_path(&target).unwrap_or(VideoFormat::DEFAULT);
        if !sink.supports(format) {
            return Err(DeviceError::UnsupportedFormat(format.to_string()).into());
        }

        let pin = input.pin();
        log::info!("Session on GPIO {} writing {}", pin, target.display());

        Ok(Self {
            pin,
            target: target.clone(),
            devices: Some(Devices {
                sink: Arc::new(Mutex::new(sink)),
                input: Arc::new(input),
            }),
            state: Arc::new(RwLock::new(RecordingState::new(target))),
            task: None,
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn status(&self) -> RecordingStatus {
        self.state.read().status
    }

    /// Snapshot of the session state
    pub fn state(&self) -> RecordingState {
        self.state.read().clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state.read().is_recording()
    }

    pub fn last_outcome(&self) -> Option<PollOutcome> {
        self.state.read().last_outcome
    }

    pub fn is_closed(&self) -> bool {
        self.devices.is_none()
    }

    /// Read the trigger pin now
    pub fn level(&self) -> Result<PinLevel> {
        let devices = self.devices.as_ref().ok_or(SessionError::SessionClosed)?;
        Ok(devices.input.read_level())
    }

    pub fn is_high(&self) -> Result<bool> {
        Ok(self.level()?.is_high())
    }

    /// Start a polling task. Returns as soon as the task is spawned.
    pub fn start(
        &mut self,
        interval: Duration,
        timeout: Option<Duration>,
        start_level: PinLevel,
    ) -> Result<SessionHandle> {
        self.start_with(PollSettings::new(interval, timeout, start_level))
    }

    pub fn start_with(&mut self, settings: PollSettings) -> Result<SessionHandle> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        if let Some(task) = &self.task {
            if !task.handle.is_finished() {
                return Err(SessionError::AlreadyRunning);
            }
            // Collect whatever the previous task left behind
            match self.join(None) {
                Ok(Some(outcome)) => log::debug!("Previous polling task ended: {:?}", outcome),
                Ok(None) => {}
                Err(e) => log::warn!("Previous polling task failed: {}", e),
            }
        }
        if settings.interval.is_zero() {
            return Err(SessionError::InvalidInterval);
        }

        let devices = self.devices.as_ref().ok_or(SessionError::SessionClosed)?;
        let ctx = TaskContext {
            sink: devices.sink.clone(),
            input: devices.input.clone(),
            target: self.target.clone(),
            state: self.state.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        let cancel = ctx.cancel.clone();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        self.state.write().status = RecordingStatus::Arming;

        let thread = std::thread::Builder::new()
            .name("pinrec-poller".into())
            .spawn(move || {
                // Dropped in reverse order: state is Idle before waiters wake
                let _done = done_tx;
                let mut exit = TaskExit::new(ctx.state.clone());
                let result = monitor::run(&ctx, &settings);
                exit.outcome = result.as_ref().ok().copied();
                result
            })
            .map_err(|e| {
                self.state.write().status = RecordingStatus::Idle;
                DeviceError::Spawn(e)
            })?;

        let handle = SessionHandle { done: done_rx };
        self.task = Some(PollingTask {
            thread,
            cancel,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Ask the polling task to stop and wait for it.
    ///
    /// A task that is arming ends without recording; one that is recording ends
    /// within one interval. If `join_timeout` elapses first the task is left
    /// running and `JoinTimeout` is returned.
    pub fn stop(&mut self, join_timeout: Option<Duration>) -> Result<Option<PollOutcome>> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        self.cancel_task();
        self.join(join_timeout)
    }

    /// Wait for the polling task to end on its own
    pub fn wait(&mut self, join_timeout: Option<Duration>) -> Result<Option<PollOutcome>> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        self.join(join_timeout)
    }

    /// Stop any polling task and release the camera and pin. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        let Some(devices) = self.devices.take() else {
            return Ok(());
        };

        self.cancel_task();
        let joined = self.join(None).map(|_| ());
        let released = devices.sink.lock().release().map_err(SessionError::from);
        drop(devices);

        self.state.write().status = RecordingStatus::Closed;
        log::info!("Session on GPIO {} closed", self.pin);
        joined.and(released)
    }

    fn cancel_task(&self) {
        if let Some(task) = &self.task {
            task.cancel.store(true, Ordering::SeqCst);
        }
    }

    fn join(&mut self, join_timeout: Option<Duration>) -> Result<Option<PollOutcome>> {
        let Some(task) = self.task.take() else {
            return Ok(None);
        };

        if let Some(limit) = join_timeout {
            if !task.handle.wait_timeout(limit) {
                self.task = Some(task);
                return Err(SessionError::JoinTimeout(limit));
            }
        }

        match task.thread.join() {
            Ok(Ok(outcome)) => Ok(Some(outcome)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::TaskPanicked),
        }
    }
}

/// Publishes the end of a polling task, including when it unwinds
struct TaskExit {
    state: Arc<RwLock<RecordingState>>,
    outcome: Option<PollOutcome>,
}

impl TaskExit {
    fn new(state: Arc<RwLock<RecordingState>>) -> Self {
        Self { state, outcome: None }
    }
}

impl Drop for TaskExit {
    fn drop(&mut self) {
        let mut state = self.state.write();
        state.status = RecordingStatus::Idle;
        state.last_outcome = self.outcome;
    }
}

impl<S: VideoSink, I: DigitalInput> Drop for RecordingSession<S, I> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error while closing session on GPIO {}: {}", self.pin, e);
        }
    }
}

fn resolve_target(target: Option<PathBuf>) -> Result<PathBuf> {
    match target {
        Some(target) if encoding::is_valid_target(&target) => Ok(target),
        Some(target) => Err(SessionError::InvalidTarget(
            target.display().to_string(),
            encoding::supported_extensions(),
        )),
        None => Ok(encoding::default_target(Path::new("."))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::testing::{Event, FakeSink, ScriptedInput, Timeline};
    use std::time::Instant;
    use PinLevel::*;

    type FakeSession = RecordingSession<FakeSink, ScriptedInput>;

    fn session(levels: Vec<PinLevel>, sink: FakeSink, timeline: &Timeline) -> FakeSession {
        let input = ScriptedInput::new(17, levels, timeline);
        RecordingSession::from_parts(sink, input, Some(PathBuf::from("clip.h264"))).unwrap()
    }

    fn fast(interval_ms: u64, timeout_ms: Option<u64>, start_level: PinLevel) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(interval_ms),
            timeout_ms.map(Duration::from_millis),
            start_level,
        )
        .with_arm_poll(Duration::from_millis(1))
    }

    #[test]
    fn trigger_scenario_records_until_release() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low, Low, High, High, Low], FakeSink::new(&timeline), &timeline);

        let handle = s.start_with(fast(500, Some(2000), High)).unwrap();
        let started = Instant::now();
        handle.wait();
        let outcome = s.wait(None).unwrap();

        assert_eq!(outcome, Some(PollOutcome::LevelReleased));
        assert!(started.elapsed() < Duration::from_millis(2000));
        assert_eq!(timeline.reads_before_start(), Some(3));
        assert_eq!(timeline.stops(), 1);
        assert_eq!(s.status(), RecordingStatus::Idle);
        assert_eq!(s.last_outcome(), Some(PollOutcome::LevelReleased));
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low], FakeSink::new(&timeline), &timeline);

        s.start_with(fast(10, None, High)).unwrap();
        let err = s.start_with(fast(10, None, High)).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning));

        assert_eq!(s.stop(None).unwrap(), Some(PollOutcome::Cancelled));
        assert_eq!(timeline.starts(), 0);
    }

    #[test]
    fn stop_cancels_a_running_capture() {
        let timeline = Timeline::new();
        let mut s = session(vec![High], FakeSink::new(&timeline).sleeping(), &timeline);

        s.start_with(fast(20, None, High)).unwrap();
        while !s.is_recording() {
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(s.stop(None).unwrap(), Some(PollOutcome::Stopped));
        assert_eq!(timeline.starts(), 1);
        assert_eq!(timeline.stops(), 1);
        assert!(!s.is_recording());
    }

    #[test]
    fn session_restarts_after_stop() {
        let timeline = Timeline::new();
        let mut s = session(vec![High], FakeSink::new(&timeline).sleeping(), &timeline);

        for _ in 0..2 {
            s.start_with(fast(5, Some(20), High)).unwrap();
            assert_eq!(s.wait(None).unwrap(), Some(PollOutcome::TimedOut));
        }
        assert_eq!(timeline.starts(), 2);
        assert_eq!(timeline.stops(), 2);
    }

    #[test]
    fn finished_task_does_not_block_a_new_start() {
        let timeline = Timeline::new();
        let mut s = session(vec![High, Low], FakeSink::new(&timeline), &timeline);

        s.start_with(fast(5, None, High)).unwrap().wait();
        s.start_with(fast(5, Some(10), Low)).unwrap();
        s.stop(None).unwrap();
        assert_eq!(timeline.starts(), 2);
    }

    #[test]
    fn device_errors_surface_through_stop() {
        let timeline = Timeline::new();
        let sink = FakeSink::new(&timeline).failing_wait_after(0);
        let mut s = session(vec![High], sink, &timeline);

        s.start_with(fast(5, None, High)).unwrap().wait();
        let err = s.stop(None).unwrap_err();

        assert!(matches!(err, SessionError::Device(DeviceError::CaptureExited(_))));
        assert_eq!(timeline.stops(), 1);
        assert_eq!(s.status(), RecordingStatus::Idle);
        assert_eq!(s.last_outcome(), None);
    }

    #[test]
    fn a_panicking_task_is_reported() {
        let timeline = Timeline::new();
        let mut s = session(vec![High], FakeSink::new(&timeline).panicking_wait(), &timeline);

        s.start_with(fast(5, None, High)).unwrap().wait();
        // Settled before anyone joins
        assert_eq!(s.status(), RecordingStatus::Idle);
        assert!(!s.is_recording());

        assert!(matches!(s.wait(None), Err(SessionError::TaskPanicked)));
        assert_eq!(timeline.stops(), 1);
        assert_eq!(s.status(), RecordingStatus::Idle);
    }

    #[test]
    fn join_timeout_leaves_the_task_running() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low], FakeSink::new(&timeline), &timeline);

        s.start_with(fast(5, None, High)).unwrap();
        let err = s.wait(Some(Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, SessionError::JoinTimeout(_)));
        assert!(matches!(s.start_with(fast(5, None, High)), Err(SessionError::AlreadyRunning)));

        assert_eq!(s.stop(Some(Duration::from_secs(2))).unwrap(), Some(PollOutcome::Cancelled));
    }

    #[test]
    fn close_after_a_join_timeout_still_finalizes() {
        let timeline = Timeline::new();
        let mut s = session(vec![High], FakeSink::new(&timeline).sleeping(), &timeline);

        s.start_with(fast(300, None, High)).unwrap();
        while timeline.waits() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        let err = s.stop(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(err, SessionError::JoinTimeout(_)));
        assert_eq!(timeline.stops(), 0);

        s.close().unwrap();
        assert_eq!(timeline.stops(), 1);
        assert_eq!(timeline.events().last(), Some(&Event::Release));
        assert_eq!(s.status(), RecordingStatus::Closed);
    }

    #[test]
    fn stop_without_a_task_is_a_no_op() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low], FakeSink::new(&timeline), &timeline);
        assert_eq!(s.stop(None).unwrap(), None);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low], FakeSink::new(&timeline), &timeline);
        s.start_with(fast(5, None, High)).unwrap();

        s.close().unwrap();
        s.close().unwrap();

        assert_eq!(s.status(), RecordingStatus::Closed);
        assert_eq!(timeline.releases(), 1);
        assert!(matches!(s.start(Duration::from_secs(1), None, High), Err(SessionError::SessionClosed)));
        assert!(matches!(s.stop(None), Err(SessionError::SessionClosed)));
        assert!(matches!(s.level(), Err(SessionError::SessionClosed)));
    }

    #[test]
    fn drop_stops_capture_and_releases() {
        let timeline = Timeline::new();
        {
            let mut s = session(vec![High], FakeSink::new(&timeline).sleeping(), &timeline);
            s.start_with(fast(10, None, High)).unwrap();
            while !s.is_recording() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(timeline.stops(), 1);
        assert_eq!(timeline.events().last(), Some(&Event::Release));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let timeline = Timeline::new();
        let mut s = session(vec![Low], FakeSink::new(&timeline), &timeline);
        let err = s.start(Duration::ZERO, None, High).unwrap_err();
        assert!(matches!(err, SessionError::InvalidInterval));
        assert_eq!(s.status(), RecordingStatus::Idle);
    }

    #[test]
    fn target_must_have_a_known_extension() {
        let timeline = Timeline::new();
        let input = ScriptedInput::constant(17, Low, &timeline);
        let err = RecordingSession::from_parts(
            FakeSink::new(&timeline),
            input,
            Some(PathBuf::from("clip.mp4")),
        )
        .err()
        .unwrap();

        match err {
            SessionError::InvalidTarget(name, allowed) => {
                assert_eq!(name, "clip.mp4");
                assert!(allowed.contains("mjpeg"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(timeline.events().is_empty());
    }

    #[test]
    fn missing_target_gets_a_timestamped_name() {
        let timeline = Timeline::new();
        let input = ScriptedInput::constant(17, Low, &timeline);
        let s = RecordingSession::from_parts(FakeSink::new(&timeline), input, None).unwrap();

        assert_eq!(VideoFormat::from_path(s.target()), Some(VideoFormat::H264));
        let name = s.target().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("mov-"), "{name}");
    }

    #[test]
    fn formats_the_sink_cannot_write_are_rejected() {
        let timeline = Timeline::new();
        let input = ScriptedInput::constant(17, Low, &timeline);
        let err = RecordingSession::from_parts(
            FakeSink::new(&timeline).with_rpicam_formats(),
            input,
            Some(PathBuf::from("frames.rgba")),
        )
        .err()
        .unwrap();

        assert!(matches!(err, SessionError::Device(DeviceError::UnsupportedFormat(_))));
    }

    #[test]
    fn level_reads_the_pin_directly() {
        let timeline = Timeline::new();
        let s = session(vec![Low, High], FakeSink::new(&timeline), &timeline);
        assert!(!s.is_high().unwrap());
        assert_eq!(s.level().unwrap(), High);
        assert_eq!(timeline.reads(), 2);
    }
}
