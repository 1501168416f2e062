//! Load shedding
//!
//! Before each evaluation the engine asks the [`LoadShedder`] whether the
//! system is too busy. CPU usage is sampled at most once per sample interval;
//! the downstream queue depth is read on every check.

use std::time::Duration;

use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::Instant;

/// Source of CPU usage readings
pub trait LoadProbe: Send {
    /// Global CPU usage in percent
    fn cpu_usage(&mut self) -> f32;
}

/// CPU usage from the operating system
pub struct SystemLoad {
    system: System,
}

impl SystemLoad {
    pub fn new() -> Self {
        let kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::everything());
        Self {
            system: System::new_with_specifics(kind),
        }
    }
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemLoad {
    fn cpu_usage(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }
}

/// Why a frame was skipped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// CPU usage above threshold (percent)
    Cpu(f32),
    /// Too many events in flight downstream
    Queue(usize),
}

/// Decides when to drop frames
pub struct LoadShedder {
    probe: Box<dyn LoadProbe>,
    cpu_threshold: f32,
    queue_threshold: usize,
    sample_interval: Duration,
    last_sample: Option<Instant>,
    last_cpu: f32,
}

impl LoadShedder {
    pub fn new(
        probe: Box<dyn LoadProbe>,
        cpu_threshold: f32,
        queue_threshold: usize,
        sample_interval: Duration,
    ) -> Self {
        Self {
            probe,
            cpu_threshold,
            queue_threshold,
            sample_interval,
            last_sample: None,
            last_cpu: 0.0,
        }
    }

    /// Most recent CPU reading
    pub fn last_cpu(&self) -> f32 {
        self.last_cpu
    }

    /// `Some` when the frame at `now` should be skipped
    pub fn check(&mut self, now: Instant, queue_depth: usize) -> Option<SkipReason> {
        let due = self
            .last_sample
            .map_or(true, |last| now.saturating_duration_since(last) >= self.sample_interval);
        if due {
            self.last_cpu = self.probe.cpu_usage();
            self.last_sample = Some(now);
        }

        if self.last_cpu > self.cpu_threshold {
            Some(SkipReason::Cpu(self.last_cpu))
        } else if queue_depth > self.queue_threshold {
            Some(SkipReason::Queue(queue_depth))
        } else {
            None
        }
    }
}
