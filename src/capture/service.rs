//! Capture service
//!
//! Owns one camera connection. A background task reads frames into a reused
//! buffer, publishes a copy of each into the stream's [`FrameSlot`], and
//! reopens the source with exponential backoff whenever it fails. The task
//! never gives up on its own; only [`CaptureService::disconnect`] stops it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CaptureError, ConfigError, Result};
use crate::frame::{Frame, StreamId};
use crate::retry::{sleep_or_shutdown, Backoff, ReconnectState};
use crate::stats::{CaptureCounters, CaptureStats};

use super::config::CaptureConfig;
use super::slot::FrameSlot;
use super::source::{FfmpegSource, FrameSource};
use super::synthetic::SyntheticSource;

/// Lifecycle of a capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Never connected
    Idle,
    /// Opening the source
    Connecting,
    /// Frames are flowing
    Streaming,
    /// Waiting to reopen after a failure
    Reconnecting,
    /// Stopped by `disconnect()`
    Stopped,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Idle => "idle",
            CaptureStatus::Connecting => "connecting",
            CaptureStatus::Streaming => "streaming",
            CaptureStatus::Reconnecting => "reconnecting",
            CaptureStatus::Stopped => "stopped",
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Box<dyn FrameSource>>,
}

/// One camera stream
pub struct CaptureService {
    config: CaptureConfig,
    slot: FrameSlot,
    status: Arc<watch::Sender<CaptureStatus>>,
    counters: Arc<CaptureCounters>,
    source: Option<Box<dyn FrameSource>>,
    running: Option<Running>,
}

impl CaptureService {
    /// Create a service whose source is chosen from the config at connect time
    pub fn new(config: CaptureConfig) -> Self {
        let (status, _) = watch::channel(CaptureStatus::Idle);
        Self {
            config,
            slot: FrameSlot::new(),
            status: Arc::new(status),
            counters: Arc::new(CaptureCounters::new()),
            source: None,
            running: None,
        }
    }

    /// Create a service around an existing source
    pub fn with_source(config: CaptureConfig, source: Box<dyn FrameSource>) -> Self {
        let mut service = Self::new(config);
        service.source = Some(source);
        service
    }

    /// Stream identifier
    pub fn stream(&self) -> &StreamId {
        &self.config.stream
    }

    /// Configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start the capture loop
    ///
    /// Fails only for configuration problems. Transient failures are handled
    /// by the loop's reconnect logic. Calling this while running is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        self.config.validate()?;
        let source = match self.source.take() {
            Some(source) => source,
            None => build_source(&self.config)?,
        };

        tracing::info!(
            stream = %self.config.stream,
            source = %source.describe(),
            "Starting capture"
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let capture_loop = CaptureLoop {
            config: self.config.clone(),
            slot: self.slot.clone(),
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
        };
        let task = tokio::spawn(capture_loop.run(source, shutdown_rx));

        self.running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Stop the capture loop and release the source
    ///
    /// Waits up to `stop_timeout` for the loop to close the source, then
    /// aborts it. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        let mut task = running.task;

        match tokio::time::timeout(self.config.stop_timeout, &mut task).await {
            Ok(Ok(source)) => self.source = Some(source),
            Ok(Err(e)) => {
                tracing::warn!(stream = %self.config.stream, error = %e, "Capture task failed");
            }
            Err(_) => {
                tracing::warn!(
                    stream = %self.config.stream,
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "Capture task did not stop in time, aborting"
                );
                task.abort();
            }
        }

        self.status.send_replace(CaptureStatus::Stopped);
        tracing::info!(stream = %self.config.stream, "Capture stopped");
    }

    /// Most recent frame, without waiting
    pub fn get_frame(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// Receiver notified on every new frame
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.slot.subscribe()
    }

    /// The stream's latest-frame slot
    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    /// Current loop status
    pub fn status(&self) -> CaptureStatus {
        *self.status.borrow()
    }

    /// Whether the loop is running (in any state)
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Counter snapshot
    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}

fn build_source(config: &CaptureConfig) -> std::result::Result<Box<dyn FrameSource>, ConfigError> {
    if let Some(url) = config.url.as_deref().filter(|_| config.has_source()) {
        let source = FfmpegSource::new(url, config.width, config.height, config.fps)
            .with_ffmpeg_path(config.ffmpeg_path.clone());
        return Ok(Box::new(source));
    }

    if config.synthetic_fallback {
        tracing::warn!(
            stream = %config.stream,
            "No source configured, using synthetic frames"
        );
        return Ok(Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.fps,
        )));
    }

    Err(ConfigError::MissingSource(config.stream.clone()))
}

struct CaptureLoop {
    config: CaptureConfig,
    slot: FrameSlot,
    status: Arc<watch::Sender<CaptureStatus>>,
    counters: Arc<CaptureCounters>,
}

impl CaptureLoop {
    async fn run(
        self,
        mut source: Box<dyn FrameSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Box<dyn FrameSource> {
        let stream = self.config.stream.clone();
        let (width, height) = (self.config.width, self.config.height);
        let mut buf = vec![0u8; Frame::expected_len(width, height)];
        let mut backoff = ReconnectState::new(self.config.retry.clone());
        let mut seq = 0u64;

        'session: loop {
            if *shutdown.borrow() {
                break;
            }
            self.status.send_replace(CaptureStatus::Connecting);

            let opened = tokio::select! {
                res = source.open() => res,
                _ = shutdown.changed() => break 'session,
            };

            if let Err(e) = opened {
                tracing::warn!(
                    stream = %stream,
                    source = %source.describe(),
                    error = %e,
                    "Failed to open capture source"
                );
                if !self.wait_before_retry(&mut backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let mut consecutive_failures = 0u32;
            let mut streaming = false;

            loop {
                let read = tokio::select! {
                    res = tokio::time::timeout(self.config.read_timeout, source.read_frame(&mut buf)) => {
                        res.unwrap_or(Err(CaptureError::Timeout(self.config.read_timeout)))
                    }
                    _ = shutdown.changed() => break 'session,
                };

                match read {
                    Ok(()) => {
                        if !streaming {
                            streaming = true;
                            backoff.reset();
                            self.status.send_replace(CaptureStatus::Streaming);
                            tracing::info!(stream = %stream, "Capture streaming");
                        }
                        consecutive_failures = 0;
                        seq += 1;

                        let frame = Frame::copy_from(
                            stream.clone(),
                            seq,
                            width,
                            height,
                            Instant::now(),
                            &buf,
                        );
                        self.counters.record_frame(frame.size());
                        self.slot.publish(frame);
                    }
                    Err(e) if e.is_unavailable() => {
                        self.counters.record_failure();
                        tracing::warn!(stream = %stream, error = %e, "Capture source unavailable");
                        break;
                    }
                    Err(e) => {
                        self.counters.record_failure();
                        consecutive_failures += 1;
                        tracing::debug!(
                            stream = %stream,
                            error = %e,
                            consecutive_failures,
                            "Frame read failed"
                        );
                        if consecutive_failures >= self.config.failure_threshold {
                            tracing::warn!(
                                stream = %stream,
                                consecutive_failures,
                                "Too many consecutive read failures"
                            );
                            break;
                        }
                    }
                }
            }

            source.close().await;
            self.counters.record_reconnect();
            if !self.wait_before_retry(&mut backoff, &mut shutdown).await {
                break;
            }
        }

        source.close().await;
        self.status.send_replace(CaptureStatus::Stopped);
        source
    }

    async fn wait_before_retry(
        &self,
        backoff: &mut ReconnectState,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        self.status.send_replace(CaptureStatus::Reconnecting);

        let delay = match backoff.next_backoff() {
            Backoff::Retry(delay) => {
                tracing::info!(
                    stream = %self.config.stream,
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting capture source"
                );
                delay
            }
            Backoff::Exhausted(pause) => {
                tracing::error!(
                    stream = %self.config.stream,
                    pause_secs = pause.as_secs(),
                    "Capture reconnect attempts exhausted, pausing before next cycle"
                );
                pause
            }
        };

        sleep_or_shutdown(delay, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;
    use crate::retry::RetryPolicy;

    /// Source whose first opens fail and whose reads fail after a number of
    /// good frames per session
    struct ScriptedSource {
        opens: Arc<AtomicU32>,
        fail_first_opens: u32,
        good_reads_per_session: Option<u64>,
        session_reads: u64,
        value: u8,
    }

    impl ScriptedSource {
        fn new(opens: Arc<AtomicU32>) -> Self {
            Self {
                opens,
                fail_first_opens: 0,
                good_reads_per_session: None,
                session_reads: 0,
                value: 0,
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn open(&mut self) -> std::result::Result<(), CaptureError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            self.session_reads = 0;
            if n < self.fail_first_opens {
                Err(CaptureError::Open("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn read_frame(&mut self, buf: &mut [u8]) -> std::result::Result<(), CaptureError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.session_reads += 1;
            if let Some(limit) = self.good_reads_per_session {
                if self.session_reads > limit {
                    return Err(CaptureError::Read("corrupt packet".into()));
                }
            }
            self.value = self.value.wrapping_add(1);
            buf.fill(self.value);
            Ok(())
        }

        async fn close(&mut self) {}

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig::new("cam")
            .resolution(4, 4)
            .fps(10)
            .retry(
                RetryPolicy::default()
                    .initial_delay(Duration::from_millis(100))
                    .max_delay(Duration::from_secs(1))
                    .max_attempts(5),
            )
    }

    #[tokio::test]
    async fn test_missing_source_is_config_error() {
        let mut service = CaptureService::new(CaptureConfig::new("front"));

        let err = service.connect().await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingSource(_))));
        assert_eq!(service.status(), CaptureStatus::Idle);
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_fallback_produces_frames() {
        let mut service = CaptureService::new(config().synthetic_fallback(true));
        assert!(service.get_frame().is_none());

        service.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let frame = service.get_frame().expect("frame after one second");
        assert!(frame.is_well_formed());
        assert_eq!(service.status(), CaptureStatus::Streaming);
        assert!(service.stats().frames_captured >= 5);

        service.disconnect().await;
        service.disconnect().await;
        assert_eq!(service.status(), CaptureStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returned_frames_are_isolated() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut service =
            CaptureService::with_source(config(), Box::new(ScriptedSource::new(opens)));
        service.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(55)).await;
        let first = service.get_frame().unwrap();
        let snapshot = first.to_vec();

        let mut copy = first.to_vec();
        copy.fill(0xEE);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let next = service.get_frame().unwrap();

        assert!(next.seq > first.seq);
        assert_eq!(first.to_vec(), snapshot);
        assert!(next.data.iter().all(|&b| b != 0xEE));
        assert_ne!(next.data, first.data);

        service.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failures_back_off_then_stream() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut source = ScriptedSource::new(Arc::clone(&opens));
        source.fail_first_opens = 3;

        let start = Instant::now();
        let mut service = CaptureService::with_source(config(), Box::new(source));
        service.connect().await.unwrap();

        let mut rx = service.subscribe();
        rx.changed().await.unwrap();

        // 100ms + 200ms + 400ms of backoff before the fourth open succeeds
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(opens.load(Ordering::SeqCst), 4);
        assert_eq!(service.status(), CaptureStatus::Streaming);

        service.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_read_failures_reopen_source() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut source = ScriptedSource::new(Arc::clone(&opens));
        source.good_reads_per_session = Some(2);

        let mut service = CaptureService::with_source(config(), Box::new(source));
        service.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        let stats = service.stats();
        assert!(opens.load(Ordering::SeqCst) >= 2);
        assert!(stats.reconnects >= 1);
        assert!(stats.read_failures >= 5);
        assert!(stats.frames_captured >= 4);

        service.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_reconnect_wait() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut source = ScriptedSource::new(Arc::clone(&opens));
        source.fail_first_opens = u32::MAX;

        let config = config().retry(RetryPolicy::default().initial_delay(Duration::from_secs(3600)));
        let mut service = CaptureService::with_source(config, Box::new(source));
        service.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.status(), CaptureStatus::Reconnecting);

        let start = Instant::now();
        service.disconnect().await;

        assert!(start.elapsed() < service.config().stop_timeout);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(service.status(), CaptureStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect_reuses_source() {
        let opens = Arc::new(AtomicU32::new(0));
        let mut service = CaptureService::with_source(
            config(),
            Box::new(ScriptedSource::new(Arc::clone(&opens))),
        );

        service.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.disconnect().await;

        service.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(service.status(), CaptureStatus::Streaming);
        service.disconnect().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_timeout_does_not_misalign_ffmpeg_frames() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let ffmpeg = tmp.path().join("ffmpeg");
        std::fs::write(
            &ffmpeg,
            "#!/bin/sh\n\
             printf '\\001\\001\\001\\001\\001\\001'\n\
             sleep 1\n\
             printf '\\001\\001\\001\\001\\001\\001'\n\
             i=0\n\
             while [ $i -lt 15 ]; do\n\
             printf '\\002\\002\\002\\002\\002\\002\\002\\002\\002\\002\\002\\002'\n\
             sleep 0.1\n\
             i=$((i+1))\n\
             done\n\
             sleep 5\n",
        )
        .unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = CaptureConfig::new("cam")
            .url("rtsp://cam/stream")
            .ffmpeg_path(ffmpeg.to_string_lossy())
            .resolution(2, 2)
            .read_timeout(Duration::from_millis(300));
        let mut service = CaptureService::new(config);
        let mut frames = service.subscribe();
        service.connect().await.unwrap();

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(2500);
        while let Ok(Ok(())) = tokio::time::timeout_at(deadline, frames.changed()).await {
            if let Some(frame) = frames.borrow_and_update().clone() {
                seen.push(frame.to_vec());
            }
        }

        assert!(seen.contains(&vec![1u8; 12]));
        assert!(seen.contains(&vec![2u8; 12]));
        for frame in &seen {
            assert!(frame.iter().all(|&b| b == frame[0]), "mixed frame {:?}", frame);
        }
        let stats = service.stats();
        assert!(stats.read_failures >= 1);
        assert_eq!(stats.reconnects, 0);

        service.disconnect().await;
    }
}
