//! Capture configuration

use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::StreamId;
use crate::retry::RetryPolicy;

/// Configuration for one camera stream
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Stream identifier used in frames, logs and health
    pub stream: StreamId,

    /// Source URL (rtsp://, http://, file path; anything ffmpeg opens)
    pub url: Option<String>,

    /// Generate synthetic frames when no URL is configured
    pub synthetic_fallback: bool,

    /// Output frame width
    pub width: u32,

    /// Output frame height
    pub height: u32,

    /// Output frame rate
    pub fps: u32,

    /// Consecutive read failures before the source is reopened
    pub failure_threshold: u32,

    /// Upper bound for a single frame read
    pub read_timeout: Duration,

    /// How long `disconnect()` waits for the loop before aborting it
    pub stop_timeout: Duration,

    /// Reconnect backoff
    pub retry: RetryPolicy,

    /// ffmpeg executable
    pub ffmpeg_path: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stream: StreamId::new("camera"),
            url: None,
            synthetic_fallback: false,
            width: 640,
            height: 480,
            fps: 5,
            failure_threshold: 5,
            read_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            ffmpeg_path: "ffmpeg".into(),
        }
    }
}

impl CaptureConfig {
    /// Create a config for a named stream
    pub fn new(stream: impl AsRef<str>) -> Self {
        Self {
            stream: StreamId::new(stream),
            ..Default::default()
        }
    }

    /// Set the source URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Allow synthetic frames when no URL is set
    pub fn synthetic_fallback(mut self, enabled: bool) -> Self {
        self.synthetic_fallback = enabled;
        self
    }

    /// Set output resolution
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set output frame rate
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the consecutive failure threshold (minimum 1)
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the per-read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the ffmpeg executable
    pub fn ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Whether a real source is configured
    pub fn has_source(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Interval between frames at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Check dimensions and rate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(ConfigError::InvalidGeometry {
                width: self.width,
                height: self.height,
                fps: self.fps,
            });
        }
        Ok(())
    }
}
