// Output formats and target naming
//
// This module defines the video formats a recording can be written as.
// The format is chosen by the target's file extension. To add a new format:
// 1. Add variant to VideoFormat enum
// 2. Add extension mapping in extension() and from_extension()
// 3. Add camera codec mapping in devices/camera.rs

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Tag prepended to synthesized target names
pub const DEFAULT_TARGET_TAG: &str = "mov";

/// Timestamp layout used in synthesized target names
pub const TARGET_TIMESTAMP_FORMAT: &str = "%y%m%d-%H:%M:%S";

/// Supported video output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// H.264/AVC elementary stream
    H264,
    /// Motion JPEG - each frame is a complete JPEG image
    Mjpeg,
    /// Raw planar YUV 4:2:0
    Yuv,
    /// Raw packed 24-bit RGB
    Rgb,
    /// Raw packed 32-bit RGBA
    Rgba,
    /// Raw packed 24-bit BGR
    Bgr,
    /// Raw packed 32-bit BGRA
    Bgra,
}

impl VideoFormat {
    /// All supported formats (for iteration)
    pub const ALL: &'static [VideoFormat] = &[
        VideoFormat::H264,
        VideoFormat::Mjpeg,
        VideoFormat::Yuv,
        VideoFormat::Rgb,
        VideoFormat::Rgba,
        VideoFormat::Bgr,
        VideoFormat::Bgra,
    ];

    /// Format used when no target name is supplied
    pub const DEFAULT: VideoFormat = VideoFormat::H264;

    /// Get the file extension for this format (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::H264 => "h264",
            VideoFormat::Mjpeg => "mjpeg",
            VideoFormat::Yuv => "yuv",
            VideoFormat::Rgb => "rgb",
            VideoFormat::Rgba => "rgba",
            VideoFormat::Bgr => "bgr",
            VideoFormat::Bgra => "bgra",
        }
    }

    /// Parse a format from a bare extension. Matching is exact: `H264` is not `h264`.
    pub fn from_extension(ext: &str) -> Option<VideoFormat> {
        Self::ALL.iter().copied().find(|f| f.extension() == ext)
    }

    /// Detect the format of a target path from its extension
    pub fn from_path(path: &Path) -> Option<VideoFormat> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Check whether a target name carries one of the supported extensions
pub fn is_valid_target(path: &Path) -> bool {
    VideoFormat::from_path(path).is_some()
}

/// Comma-separated list of supported extensions, for error messages
pub fn supported_extensions() -> String {
    VideoFormat::ALL
        .iter()
        .map(|f| f.extension())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a `<tag>-<timestamp>.<ext>` name for the given instant.
/// Empty tags are omitted.
pub fn timestamped_name(tag: &str, format: VideoFormat, at: DateTime<Local>) -> String {
    let timestamp = at.format(TARGET_TIMESTAMP_FORMAT).to_string();
    if tag.is_empty() {
        format!("{}.{}", timestamp, format.extension())
    } else {
        format!("{}-{}.{}", tag, timestamp, format.extension())
    }
}

/// Synthesize a default target in `dir` named after the current local time
pub fn default_target(dir: &Path) -> PathBuf {
    dir.join(timestamped_name(DEFAULT_TARGET_TAG, VideoFormat::DEFAULT, Local::now()))
}
