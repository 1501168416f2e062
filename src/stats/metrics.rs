//! Counters and snapshots for pipeline components
//!
//! Each long-running loop owns an `Arc` of its counters and bumps them with
//! relaxed atomics; readers take a plain-struct snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Live counters for one capture loop
#[derive(Debug)]
pub struct CaptureCounters {
    started_at: Instant,
    frames: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    bytes: AtomicU64,
}

impl CaptureCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_frame(&self, bytes: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            bytes_captured: self.bytes.load(Ordering::Relaxed),
            duration: self.started_at.elapsed(),
        }
    }
}

impl Default for CaptureCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture statistics snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    /// Frames published to the latest-frame slot
    pub frames_captured: u64,
    /// Failed reads (including timeouts)
    pub read_failures: u64,
    /// Times the source was closed and reopened
    pub reconnects: u64,
    /// Total pixel bytes captured
    pub bytes_captured: u64,
    /// Time since the counters were created
    pub duration: Duration,
}

impl CaptureStats {
    /// Average frame rate over the counter lifetime
    pub fn calculated_framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_captured as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live counters for one motion engine
#[derive(Debug, Default)]
pub struct MotionCounters {
    evaluated: AtomicU64,
    skipped: AtomicU64,
    suppressed: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

impl MotionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_evaluated(&self) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> MotionStats {
        MotionStats {
            frames_evaluated: self.evaluated.load(Ordering::Relaxed),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            events_suppressed: self.suppressed.load(Ordering::Relaxed),
            events_dispatched: self.dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Motion engine statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionStats {
    /// Frames run through the detector
    pub frames_evaluated: u64,
    /// Frames skipped by load shedding
    pub frames_skipped: u64,
    /// Motion found but held back by the cooldown
    pub events_suppressed: u64,
    /// Dispatches to the handler list
    pub events_dispatched: u64,
    /// Handlers that returned an error or panicked
    pub handler_failures: u64,
}

impl MotionStats {
    /// Fraction of incoming frames dropped by load shedding
    pub fn skip_ratio(&self) -> f64 {
        let total = self.frames_evaluated + self.frames_skipped;
        if total > 0 {
            self.frames_skipped as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Live counters for the orchestrator
#[derive(Debug, Default)]
pub struct OrchestratorCounters {
    received: AtomicU64,
    dropped_disarmed: AtomicU64,
    analysis_failures: AtomicU64,
    notified: AtomicU64,
    channel_failures: AtomicU64,
}

impl OrchestratorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped_disarmed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_analysis_failure(&self) {
        self.analysis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notified(&self) {
        self.notified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_channel_failure(&self) {
        self.channel_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            events_received: self.received.load(Ordering::Relaxed),
            events_dropped_disarmed: self.dropped_disarmed.load(Ordering::Relaxed),
            analysis_failures: self.analysis_failures.load(Ordering::Relaxed),
            events_notified: self.notified.load(Ordering::Relaxed),
            channel_failures: self.channel_failures.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrator statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub events_received: u64,
    pub events_dropped_disarmed: u64,
    pub analysis_failures: u64,
    /// Events where at least one output channel succeeded
    pub events_notified: u64,
    /// Individual broker/notifier failures
    pub channel_failures: u64,
}

/// Ring buffer statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BufferStats {
    /// Entries currently held
    pub size: usize,
    /// Fixed capacity
    pub capacity: usize,
    /// `size / capacity` as a percentage
    pub utilization_pct: f64,
    /// Sum of held frame byte lengths
    pub memory_bytes: usize,
}

impl BufferStats {
    pub(crate) fn new(size: usize, capacity: usize, memory_bytes: usize) -> Self {
        let utilization_pct = if capacity > 0 {
            size as f64 * 100.0 / capacity as f64
        } else {
            0.0
        };
        Self {
            size,
            capacity,
            utilization_pct,
            memory_bytes,
        }
    }
}

/// Live counters for a dual-stream synchronizer
#[derive(Debug, Default)]
pub struct SyncCounters {
    ok: AtomicU64,
    degraded: AtomicU64,
    unmatched: AtomicU64,
    waiting: AtomicU64,
}

impl SyncCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_ok(&self) {
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_waiting(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> SyncStats {
        SyncStats {
            pairs_ok: self.ok.load(Ordering::Relaxed),
            pairs_degraded: self.degraded.load(Ordering::Relaxed),
            pairs_unmatched: self.unmatched.load(Ordering::Relaxed),
            ticks_waiting: self.waiting.load(Ordering::Relaxed),
        }
    }
}

/// Synchronizer statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub pairs_ok: u64,
    pub pairs_degraded: u64,
    pub pairs_unmatched: u64,
    /// Ticks where one side had no frame yet
    pub ticks_waiting: u64,
}
