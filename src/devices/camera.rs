// Camera capture through the rpicam-vid program
//
// Each capture is one rpicam-vid child process writing straight to the target
// file. The process runs in keypress mode so it can be asked to quit over stdin,
// which lets it flush the encoder before exiting. If it does not exit within the
// grace period it is killed.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use super::{DeviceError, Resolution, VideoSink};
use crate::encoding::VideoFormat;

/// How often a running capture is checked for unexpected exit
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Camera program settings (the `[camera]` table of the config file)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Program used to record video
    pub program: String,

    /// Requested frame rate
    pub framerate: u32,

    /// How long to wait for the program to exit after asking it to quit
    pub stop_grace_ms: u64,

    /// Additional arguments passed through to the program
    pub extra_args: Vec<String>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            program: "rpicam-vid".to_string(),
            framerate: 30,
            stop_grace_ms: 2000,
            extra_args: Vec::new(),
        }
    }
}

/// Codec argument for a format, or `None` if rpicam-vid cannot write it.
/// rpicam-vid has no packed RGB video output.
pub fn codec_for(format: VideoFormat) -> Option<&'static str> {
    match format {
        VideoFormat::H264 => Some("h264"),
        VideoFormat::Mjpeg => Some("mjpeg"),
        VideoFormat::Yuv => Some("yuv420"),
        VideoFormat::Rgb | VideoFormat::Rgba | VideoFormat::Bgr | VideoFormat::Bgra => None,
    }
}

/// Video sink backed by an rpicam-vid child process
pub struct RpicamSink {
    resolution: Resolution,
    settings: CameraSettings,
    child: Option<Child>,
}

impl RpicamSink {
    /// Check that the camera program can be run and prepare a sink for it
    pub fn open(resolution: Resolution, settings: CameraSettings) -> Result<Self, DeviceError> {
        let output = Command::new(&settings.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DeviceError::Camera(format!("Failed to run {}: {}", settings.program, e)))?;

        if !output.status.success() {
            return Err(DeviceError::Camera(format!(
                "{} --version failed: {}",
                settings.program, output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        log::info!(
            "Camera ready: {} ({}) at {}",
            settings.program,
            version.lines().next().unwrap_or("unknown version").trim(),
            resolution
        );

        Ok(Self {
            resolution,
            settings,
            child: None,
        })
    }

    /// Build the command that records to `target`
    pub fn capture_command(&self, target: &Path) -> Result<Command, DeviceError> {
        let format = VideoFormat::from_path(target).unwrap_or(VideoFormat::DEFAULT);
        let codec = codec_for(format)
            .ok_or_else(|| DeviceError::UnsupportedFormat(format.to_string()))?;

        let mut cmd = Command::new(&self.settings.program);
        cmd.args(["--timeout", "0", "--nopreview", "--keypress", "--verbose", "0"])
            .arg("--width")
            .arg(self.resolution.width.to_string())
            .arg("--height")
            .arg(self.resolution.height.to_string())
            .arg("--framerate")
            .arg(self.settings.framerate.to_string())
            .arg("--codec")
            .arg(codec)
            .args(&self.settings.extra_args)
            .arg("--output")
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::null());
        Ok(cmd)
    }

    /// Ask the running program to quit, killing it after the grace period
    fn shutdown_child(&self, mut child: Child) -> Result<ExitStatus, DeviceError> {
        if let Some(mut stdin) = child.stdin.take() {
            // The process may already be gone; a broken pipe here is not an error
            if let Err(e) = stdin.write_all(b"x\n").and_then(|_| stdin.flush()) {
                log::debug!("Could not send quit to {}: {}", self.settings.program, e);
            }
        }

        let deadline = Instant::now().checked_add(Duration::from_millis(self.settings.stop_grace_ms));
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::warn!(
                    "{} did not exit within {} ms, killing it",
                    self.settings.program,
                    self.settings.stop_grace_ms
                );
                child.kill()?;
                return Ok(child.wait()?);
            }
            std::thread::sleep(CHILD_POLL_INTERVAL);
        }
    }
}

impl VideoSink for RpicamSink {
    fn supports(&self, format: VideoFormat) -> bool {
        codec_for(format).is_some()
    }

    fn start_capture(&mut self, target: &Path) -> Result<(), DeviceError> {
        if self.child.is_some() {
            return Err(DeviceError::Camera("Capture already running".to_string()));
        }

        let mut cmd = self.capture_command(target)?;
        log::debug!("Spawning camera: {:?}", cmd);

        let child = cmd
            .spawn()
            .map_err(|e| DeviceError::Camera(format!("Failed to start {}: {}", self.settings.program, e)))?;
        self.child = Some(child);
        Ok(())
    }

    fn wait_capturing(&mut self, max: Duration) -> Result<bool, DeviceError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        // A wait too long to represent never expires
        let deadline = Instant::now().checked_add(max);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            let mut pause = CHILD_POLL_INTERVAL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(true);
                }
                pause = pause.min(deadline - now);
            }
            std::thread::sleep(pause);
        };

        self.child = None;
        if status.success() {
            Ok(false)
        } else {
            Err(DeviceError::CaptureExited(status.to_string()))
        }
    }

    fn stop_capture(&mut self) -> Result<(), DeviceError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };

        let status = self.shutdown_child(child)?;
        if status.success() {
            log::debug!("{} exited cleanly", self.settings.program);
        } else {
            log::warn!("{} exited with {}", self.settings.program, status);
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.stop_capture()
    }
}

impl Drop for RpicamSink {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
