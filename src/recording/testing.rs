// In-memory stand-ins for the camera and GPIO, used by the recording tests

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::devices::camera::codec_for;
use crate::devices::{DeviceError, DigitalInput, PinLevel, VideoSink};
use crate::encoding::VideoFormat;

/// One observable device interaction
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Read(PinLevel),
    Start(PathBuf),
    Wait(Duration),
    Stop,
    Release,
}

/// Ordered log of device interactions shared by the fakes
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<Event>>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn reads(&self) -> usize {
        self.count(|e| matches!(e, Event::Read(_)))
    }

    pub fn starts(&self) -> usize {
        self.count(|e| matches!(e, Event::Start(_)))
    }

    pub fn waits(&self) -> usize {
        self.count(|e| matches!(e, Event::Wait(_)))
    }

    pub fn stops(&self) -> usize {
        self.count(|e| matches!(e, Event::Stop))
    }

    pub fn releases(&self) -> usize {
        self.count(|e| matches!(e, Event::Release))
    }

    /// Number of pin reads before the first capture start
    pub fn reads_before_start(&self) -> Option<usize> {
        let events = self.0.lock();
        let start = events.iter().position(|e| matches!(e, Event::Start(_)))?;
        Some(events[..start].iter().filter(|e| matches!(e, Event::Read(_))).count())
    }
}

/// Input pin that plays back a fixed sequence of levels, then holds the last one
pub struct ScriptedInput {
    pin: u8,
    levels: Vec<PinLevel>,
    next: AtomicUsize,
    timeline: Timeline,
}

impl ScriptedInput {
    pub fn new(pin: u8, levels: Vec<PinLevel>, timeline: &Timeline) -> Self {
        assert!(!levels.is_empty());
        Self {
            pin,
            levels,
            next: AtomicUsize::new(0),
            timeline: timeline.clone(),
        }
    }

    pub fn constant(pin: u8, level: PinLevel, timeline: &Timeline) -> Self {
        Self::new(pin, vec![level], timeline)
    }
}

impl DigitalInput for ScriptedInput {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read_level(&self) -> PinLevel {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        let level = self.levels[i.min(self.levels.len() - 1)];
        self.timeline.push(Event::Read(level));
        level
    }
}

/// Sink that records calls and can be told to misbehave
pub struct FakeSink {
    timeline: Timeline,
    sleep_on_wait: bool,
    fail_start: bool,
    fail_wait_after: Option<usize>,
    end_after: Option<usize>,
    panic_on_wait: bool,
    rpicam_formats: bool,
    waits: usize,
}

impl FakeSink {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            timeline: timeline.clone(),
            sleep_on_wait: false,
            fail_start: false,
            fail_wait_after: None,
            end_after: None,
            panic_on_wait: false,
            rpicam_formats: false,
            waits: 0,
        }
    }

    /// Block for the full requested time on each wait
    pub fn sleeping(mut self) -> Self {
        self.sleep_on_wait = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Succeed `n` waits, then fail
    pub fn failing_wait_after(mut self, n: usize) -> Self {
        self.fail_wait_after = Some(n);
        self
    }

    /// Succeed `n` waits, then report capture ended
    pub fn ending_after(mut self, n: usize) -> Self {
        self.end_after = Some(n);
        self
    }

    pub fn panicking_wait(mut self) -> Self {
        self.panic_on_wait = true;
        self
    }

    /// Accept only the formats `rpicam-vid` can write
    pub fn with_rpicam_formats(mut self) -> Self {
        self.rpicam_formats = true;
        self
    }
}

impl VideoSink for FakeSink {
    fn supports(&self, format: VideoFormat) -> bool {
        !self.rpicam_formats || codec_for(format).is_some()
    }

    fn start_capture(&mut self, target: &Path) -> Result<(), DeviceError> {
        if self.fail_start {
            return Err(DeviceError::Camera("camera busy".to_string()));
        }
        self.timeline.push(Event::Start(target.to_path_buf()));
        Ok(())
    }

    fn wait_capturing(&mut self, max: Duration) -> Result<bool, DeviceError> {
        self.timeline.push(Event::Wait(max));
        let completed = self.waits;
        self.waits += 1;

        if self.panic_on_wait {
            panic!("camera driver crashed");
        }
        if self.fail_wait_after == Some(completed) {
            return Err(DeviceError::CaptureExited("exit status: 1".to_string()));
        }
        if self.end_after == Some(completed) {
            return Ok(false);
        }
        if self.sleep_on_wait {
            std::thread::sleep(max);
        }
        Ok(true)
    }

    fn stop_capture(&mut self) -> Result<(), DeviceError> {
        self.timeline.push(Event::Stop);
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.timeline.push(Event::Release);
        Ok(())
    }
}
