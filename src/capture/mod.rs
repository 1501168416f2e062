//! Camera capture
//!
//! One [`CaptureService`] per camera stream. Each service runs a background
//! task that keeps the stream's [`FrameSlot`] filled with the latest frame and
//! reconnects with backoff when the source fails.

pub mod config;
pub mod service;
pub mod slot;
pub mod source;
pub mod synthetic;

pub use config::CaptureConfig;
pub use service::{CaptureService, CaptureStatus};
pub use slot::FrameSlot;
pub use source::{redact_url, FfmpegSource, FrameSource};
pub use synthetic::SyntheticSource;
