//! Per-stream pipeline
//!
//! Wires one [`CaptureService`] to its [`ScreenshotBuffer`] feeder and
//! [`MotionEngine`], and starts and stops them together.
//!
//! ```text
//! CaptureService ──► FrameSlot ──┬──► ScreenshotBuffer (feeder task)
//!                                └──► MotionEngine (engine task) ──► handlers
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::{CaptureService, CaptureStatus};
use crate::error::{ConfigError, Result};
use crate::frame::StreamId;
use crate::motion::MotionEngine;
use crate::screenshot::ScreenshotBuffer;
use crate::stats::{MotionCounters, MotionStats};

struct Running {
    shutdown: watch::Sender<bool>,
    feeder: JoinHandle<()>,
    engine: JoinHandle<MotionEngine>,
}

/// Capture, ring buffer and motion detection for one stream
pub struct StreamPipeline {
    capture: CaptureService,
    buffer: Arc<ScreenshotBuffer>,
    engine: Option<MotionEngine>,
    motion: Arc<MotionCounters>,
    running: Option<Running>,
}

impl StreamPipeline {
    /// Fails if the engine belongs to a different stream than the capture
    pub fn new(
        capture: CaptureService,
        buffer: Arc<ScreenshotBuffer>,
        engine: MotionEngine,
    ) -> std::result::Result<Self, ConfigError> {
        if engine.stream() != capture.stream() {
            return Err(ConfigError::Invalid(format!(
                "motion engine for stream {} attached to capture of stream {}",
                engine.stream(),
                capture.stream()
            )));
        }

        Ok(Self {
            motion: engine.counters(),
            capture,
            buffer,
            engine: Some(engine),
            running: None,
        })
    }

    pub fn stream(&self) -> &StreamId {
        self.capture.stream()
    }

    pub fn capture(&self) -> &CaptureService {
        &self.capture
    }

    pub fn buffer(&self) -> &Arc<ScreenshotBuffer> {
        &self.buffer
    }

    pub fn camera_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    pub fn motion_stats(&self) -> MotionStats {
        self.motion.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start capture, the ring buffer feeder and the motion engine
    ///
    /// Fails only when the capture configuration is invalid. Calling this
    /// while running is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };

        if let Err(e) = self.capture.connect().await {
            self.engine = Some(engine);
            return Err(e);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let feeder = self
            .buffer
            .spawn_feeder(self.capture.subscribe(), shutdown_rx.clone());
        let engine = engine.spawn(self.capture.subscribe(), shutdown_rx);

        tracing::info!(stream = %self.stream(), "Stream pipeline started");
        self.running = Some(Running {
            shutdown,
            feeder,
            engine,
        });
        Ok(())
    }

    /// Stop all tasks and release the camera
    ///
    /// Safe to call repeatedly. The pipeline can be started again afterwards.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);

        match running.engine.await {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => tracing::warn!(stream = %self.stream(), error = %e, "Motion engine task failed"),
        }
        if let Err(e) = running.feeder.await {
            tracing::warn!(stream = %self.stream(), error = %e, "Ring buffer feeder failed");
        }
        self.capture.disconnect().await;

        tracing::info!(stream = %self.stream(), "Stream pipeline stopped");
    }

    /// Run until `shutdown` completes, then stop
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        tracing::info!(stream = %self.stream(), "Shutdown signal received");
        self.stop().await;
        Ok(())
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}
