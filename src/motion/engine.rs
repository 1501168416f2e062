//! Motion engine
//!
//! Evaluates frames from one stream and dispatches [`MotionEvent`]s to the
//! registered handlers. Per frame:
//!
//! ```text
//! frame ──► rate limit ──► load check ──► detector ──► armed? ──► cooldown ──► handlers
//!              │               │              │           │           │
//!          Throttled        Skipped         Quiet     Disarmed    Suppressed
//! ```
//!
//! The cooldown clock starts when a dispatch finishes, so continuous motion
//! over `T` with cooldown `C` produces `floor(T / C) + 1` dispatches.

use std::error::Error as StdError;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::control::ArmState;
use crate::frame::{Frame, StreamId};
use crate::stats::{MotionCounters, MotionStats};

use super::config::MotionConfig;
use super::detector::{Detector, MotionDetector};
use super::event::MotionEvent;
use super::load::{LoadProbe, LoadShedder, SystemLoad};

/// Error returned by a motion handler
pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// Receives motion events
///
/// Handlers are called synchronously on the engine task and should return
/// quickly. Use [`spawn_handler`] for work that needs to await.
pub trait MotionHandler: Send + Sync {
    fn handle(&self, event: &MotionEvent) -> Result<(), HandlerError>;
}

impl<F> MotionHandler for F
where
    F: Fn(&MotionEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &MotionEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Handler that runs an async closure on the runtime for every event
pub struct SpawnHandler<F> {
    f: F,
}

/// Adapt an async closure into a [`MotionHandler`]
///
/// Each event is cloned into a spawned task; the engine does not wait for it.
pub fn spawn_handler<F, Fut>(f: F) -> SpawnHandler<F>
where
    F: Fn(MotionEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    SpawnHandler { f }
}

impl<F, Fut> MotionHandler for SpawnHandler<F>
where
    F: Fn(MotionEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, event: &MotionEvent) -> Result<(), HandlerError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        runtime.spawn((self.f)(event.clone()));
        Ok(())
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No frame evaluated yet
    Idle,
    /// Running the detector
    Evaluating,
    /// Last evaluation found nothing to dispatch
    Quiet,
    /// An event was dispatched and the cooldown window is open
    MotionCooldown,
}

/// Outcome of one [`MotionEngine::process_frame`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Arrived faster than `max_fps`
    Throttled,
    /// Dropped by load shedding
    Skipped,
    /// No motion
    Quiet,
    /// Motion while disarmed
    Disarmed,
    /// Motion within the cooldown window
    Suppressed,
    /// Handlers invoked
    Dispatched { handlers: usize, failures: usize },
}

/// Motion detection for one stream
pub struct MotionEngine {
    stream: StreamId,
    config: MotionConfig,
    detector: Box<dyn Detector>,
    shedder: LoadShedder,
    handlers: Vec<Arc<dyn MotionHandler>>,
    arm: ArmState,
    queue_depth: Option<Arc<AtomicUsize>>,
    state: EngineState,
    last_eval: Option<Instant>,
    last_motion: Option<Instant>,
    counters: Arc<MotionCounters>,
}

impl MotionEngine {
    /// Engine with the background-subtraction detector and system CPU probe
    pub fn new(stream: StreamId, config: MotionConfig, arm: ArmState) -> Self {
        let detector = Box::new(MotionDetector::new(&config));
        let shedder = LoadShedder::new(
            Box::new(SystemLoad::new()),
            config.cpu_threshold,
            config.queue_threshold,
            config.cpu_sample_interval,
        );

        Self {
            stream,
            config,
            detector,
            shedder,
            handlers: Vec::new(),
            arm,
            queue_depth: None,
            state: EngineState::Idle,
            last_eval: None,
            last_motion: None,
            counters: Arc::new(MotionCounters::new()),
        }
    }

    /// Replace the detector
    pub fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the CPU probe
    pub fn with_load_probe(mut self, probe: Box<dyn LoadProbe>) -> Self {
        self.shedder = LoadShedder::new(
            probe,
            self.config.cpu_threshold,
            self.config.queue_threshold,
            self.config.cpu_sample_interval,
        );
        self
    }

    /// Read downstream queue depth from a shared gauge
    pub fn with_queue_gauge(mut self, gauge: Arc<AtomicUsize>) -> Self {
        self.queue_depth = Some(gauge);
        self
    }

    /// Register a handler
    pub fn add_handler(&mut self, handler: Arc<dyn MotionHandler>) {
        self.handlers.push(handler);
    }

    /// Register a handler (builder form)
    pub fn on_motion(mut self, handler: impl MotionHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Shared counters, readable while the engine task runs
    pub fn counters(&self) -> Arc<MotionCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> MotionStats {
        self.counters.snapshot()
    }

    /// Evaluate one frame observed at `now`
    pub fn process_frame(&mut self, frame: &Frame, now: Instant) -> Evaluation {
        if let (Some(min), Some(last)) = (self.config.min_interval(), self.last_eval) {
            if now.saturating_duration_since(last) < min {
                return Evaluation::Throttled;
            }
        }

        let depth = self
            .queue_depth
            .as_ref()
            .map_or(0, |gauge| gauge.load(Ordering::Relaxed));
        if let Some(reason) = self.shedder.check(now, depth) {
            self.counters.record_skipped();
            tracing::debug!(stream = %self.stream, seq = frame.seq, ?reason, "Frame skipped under load");
            return Evaluation::Skipped;
        }

        self.last_eval = Some(now);
        self.state = EngineState::Evaluating;
        self.counters.record_evaluated();

        let regions = self.detector.detect(frame);
        let in_cooldown = self
            .last_motion
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.cooldown);

        if regions.is_empty() {
            self.state = if in_cooldown {
                EngineState::MotionCooldown
            } else {
                EngineState::Quiet
            };
            return Evaluation::Quiet;
        }

        if !self.arm.is_armed() {
            self.state = EngineState::Quiet;
            tracing::debug!(stream = %self.stream, "Motion ignored while disarmed");
            return Evaluation::Disarmed;
        }

        if in_cooldown {
            self.state = EngineState::MotionCooldown;
            self.counters.record_suppressed();
            return Evaluation::Suppressed;
        }

        let event = MotionEvent::new(frame.clone(), regions, now);
        let failures = self.dispatch(&event);

        self.last_motion = Some(now);
        self.state = EngineState::MotionCooldown;
        self.counters.record_dispatched();

        tracing::info!(
            stream = %self.stream,
            seq = frame.seq,
            regions = event.regions.len(),
            area = event.total_area(),
            "Motion detected"
        );

        Evaluation::Dispatched {
            handlers: self.handlers.len(),
            failures,
        }
    }

    fn dispatch(&self, event: &MotionEvent) -> usize {
        let mut failures = 0;

        for (index, handler) in self.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    self.counters.record_handler_failure();
                    tracing::warn!(stream = %self.stream, handler = index, error = %e, "Motion handler failed");
                }
                Err(_) => {
                    failures += 1;
                    self.counters.record_handler_failure();
                    tracing::error!(stream = %self.stream, handler = index, "Motion handler panicked");
                }
            }
        }

        failures
    }

    /// Evaluate every frame published to `frames` until shutdown
    ///
    /// Returns the engine when the loop ends so it can be inspected or
    /// restarted.
    pub fn spawn(
        mut self,
        mut frames: watch::Receiver<Option<Frame>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<MotionEngine> {
        tokio::spawn(async move {
            tracing::info!(stream = %self.stream, handlers = self.handlers.len(), "Motion engine started");

            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let frame = frames.borrow_and_update().clone();
                        if let Some(frame) = frame {
                            self.process_frame(&frame, Instant::now());
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            tracing::info!(stream = %self.stream, "Motion engine stopped");
            self
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;
    use crate::motion::event::Region;

    /// Detector reporting motion on every frame whose first byte is non-zero
    struct ScriptedDetector;

    impl Detector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Vec<Region> {
            if frame.data.first().copied().unwrap_or(0) > 0 {
                vec![Region {
                    x: 0,
                    y: 0,
                    width: 1,
                    height: 1,
                    area: 1,
                }]
            } else {
                Vec::new()
            }
        }

        fn reset(&mut self) {}
    }

    struct IdleLoad;

    impl LoadProbe for IdleLoad {
        fn cpu_usage(&mut self) -> f32 {
            1.0
        }
    }

    fn frame(seq: u64, motion: bool) -> Frame {
        let v = if motion { 255 } else { 0 };
        Frame::copy_from(StreamId::new("cam"), seq, 1, 1, Instant::now(), &[v, v, v])
    }

    fn engine(cooldown: Duration, arm: ArmState) -> (MotionEngine, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let config = MotionConfig::default().cooldown(cooldown).max_fps(None);

        let engine = MotionEngine::new(StreamId::new("cam"), config, arm)
            .with_detector(Box::new(ScriptedDetector))
            .with_load_probe(Box::new(IdleLoad))
            .on_motion(move |_: &MotionEvent| -> Result<(), HandlerError> {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        (engine, calls)
    }

    #[test]
    fn test_cooldown_scenario() {
        let (mut engine, calls) = engine(Duration::from_secs(5), ArmState::default());
        let start = Instant::now();

        let at = |secs| start + Duration::from_secs(secs);
        assert!(matches!(engine.process_frame(&frame(1, true), at(0)), Evaluation::Dispatched { .. }));
        assert_eq!(engine.process_frame(&frame(2, true), at(2)), Evaluation::Suppressed);
        assert!(matches!(engine.process_frame(&frame(3, true), at(6)), Evaluation::Dispatched { .. }));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats().events_suppressed, 1);
    }

    #[test]
    fn test_continuous_motion_dispatch_count() {
        for (window, cooldown) in [(20u64, 5u64), (23, 5), (9, 3), (4, 10)] {
            let (mut engine, calls) = engine(Duration::from_secs(cooldown), ArmState::default());
            let start = Instant::now();

            for t in 0..=window {
                engine.process_frame(&frame(t, true), start + Duration::from_secs(t));
            }

            let expected = (window / cooldown + 1) as u32;
            assert_eq!(calls.load(Ordering::SeqCst), expected, "T={} C={}", window, cooldown);
        }
    }

    #[test]
    fn test_first_event_fires_immediately() {
        let (mut engine, calls) = engine(Duration::from_secs(60), ArmState::default());
        assert_eq!(engine.state(), EngineState::Idle);

        engine.process_frame(&frame(1, true), Instant::now());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), EngineState::MotionCooldown);
    }

    #[test]
    fn test_quiet_frames_do_not_dispatch() {
        let (mut engine, calls) = engine(Duration::from_secs(5), ArmState::default());
        assert_eq!(engine.process_frame(&frame(1, false), Instant::now()), Evaluation::Quiet);
        assert_eq!(engine.state(), EngineState::Quiet);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disarmed_does_not_dispatch_or_start_cooldown() {
        let arm = ArmState::new(false);
        let (mut engine, calls) = engine(Duration::from_secs(5), arm.clone());
        let start = Instant::now();

        assert_eq!(engine.process_frame(&frame(1, true), start), Evaluation::Disarmed);

        arm.arm();
        let result = engine.process_frame(&frame(2, true), start + Duration::from_secs(1));
        assert!(matches!(result, Evaluation::Dispatched { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_failures_are_isolated() {
        let (engine, calls) = engine(Duration::from_secs(5), ArmState::default());
        let mut engine = engine
            .on_motion(|_: &MotionEvent| -> Result<(), HandlerError> { panic!("handler bug") })
            .on_motion(|_: &MotionEvent| -> Result<(), HandlerError> { Err("channel closed".into()) });

        let calls_after = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls_after);
        engine.add_handler(Arc::new(move |_: &MotionEvent| -> Result<(), HandlerError> {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let result = engine.process_frame(&frame(1, true), Instant::now());

        assert_eq!(result, Evaluation::Dispatched { handlers: 4, failures: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(calls_after.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().handler_failures, 2);
    }

    #[test]
    fn test_queue_depth_skips_frames() {
        let gauge = Arc::new(AtomicUsize::new(10));
        let (engine, calls) = engine(Duration::from_secs(5), ArmState::default());
        let mut engine = engine.with_queue_gauge(Arc::clone(&gauge));

        assert_eq!(engine.process_frame(&frame(1, true), Instant::now()), Evaluation::Skipped);
        assert_eq!(engine.stats().frames_skipped, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        gauge.store(0, Ordering::Relaxed);
        assert!(matches!(
            engine.process_frame(&frame(2, true), Instant::now()),
            Evaluation::Dispatched { .. }
        ));
    }

    #[test]
    fn test_max_fps_throttles_without_counting() {
        let config = MotionConfig::default().max_fps(Some(2));
        let mut engine = MotionEngine::new(StreamId::new("cam"), config, ArmState::default())
            .with_detector(Box::new(ScriptedDetector))
            .with_load_probe(Box::new(IdleLoad));
        let start = Instant::now();

        assert_eq!(engine.process_frame(&frame(1, false), start), Evaluation::Quiet);
        assert_eq!(
            engine.process_frame(&frame(2, false), start + Duration::from_millis(100)),
            Evaluation::Throttled
        );
        assert_eq!(
            engine.process_frame(&frame(3, false), start + Duration::from_millis(500)),
            Evaluation::Quiet
        );

        let stats = engine.stats();
        assert_eq!(stats.frames_evaluated, 2);
        assert_eq!(stats.frames_skipped, 0);
    }

    #[tokio::test]
    async fn test_spawn_handler_runs_async_work() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = spawn_handler(move |event: MotionEvent| {
            let tx = tx.clone();
            async move {
                tokio::task::yield_now().await;
                let _ = tx.send(event.frame.seq);
            }
        });

        let event = MotionEvent::new(frame(7, true), Vec::new(), Instant::now());
        handler.handle(&event).unwrap();

        assert_eq!(rx.recv().await, Some(7));
    }

    #[test]
    fn test_spawn_handler_without_runtime_fails() {
        let handler = spawn_handler(|_: MotionEvent| async {});
        let event = MotionEvent::new(frame(1, true), Vec::new(), Instant::now());
        assert!(handler.handle(&event).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_engine_consumes_slot() {
        let slot = crate::capture::FrameSlot::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (engine, calls) = engine(Duration::from_secs(5), ArmState::default());
        let counters = engine.counters();

        let task = engine.spawn(slot.subscribe(), shutdown_rx);

        slot.publish(frame(1, true));
        tokio::time::sleep(Duration::from_millis(10)).await;
        slot.publish(frame(2, false));
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown_tx.send(true).unwrap();
        let engine = task.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot().frames_evaluated, 2);
        assert_eq!(engine.state(), EngineState::MotionCooldown);
    }
}
