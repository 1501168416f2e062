//! Dual-stream synchronizer
//!
//! Pairs the latest color and thermal frames and grades how far apart their
//! capture times are. A pair is only emitted when at least one side has a new
//! frame since the last emitted pair.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::capture::FrameSlot;
use crate::error::ConfigError;
use crate::frame::Frame;
use crate::stats::{SyncCounters, SyncStats};

use super::config::SyncConfig;

/// Sync quality of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Ok,
    Degraded,
    Unmatched,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Ok => "ok",
            SyncStatus::Degraded => "degraded",
            SyncStatus::Unmatched => "unmatched",
        }
    }
}

/// Grade a timestamp delta against the two tolerances (both inclusive)
pub fn classify(delta: Duration, soft: Duration, hard: Duration) -> SyncStatus {
    if delta <= soft {
        SyncStatus::Ok
    } else if delta <= hard {
        SyncStatus::Degraded
    } else {
        SyncStatus::Unmatched
    }
}

/// Latest color and thermal frames with their sync grade
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub color_ts: Instant,
    pub thermal_ts: Instant,
    pub delta: Duration,
    pub status: SyncStatus,
    pub color: Frame,
    pub thermal: Frame,
}

impl SyncPair {
    /// Delta in milliseconds
    pub fn delta_ms(&self) -> f64 {
        self.delta.as_secs_f64() * 1000.0
    }
}

/// Pairs two capture slots
pub struct DualStreamSynchronizer {
    config: SyncConfig,
    color: FrameSlot,
    thermal: FrameSlot,
    last_pair: Option<(Instant, Instant)>,
    counters: Arc<SyncCounters>,
}

impl DualStreamSynchronizer {
    pub fn new(color: FrameSlot, thermal: FrameSlot, config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            color,
            thermal,
            last_pair: None,
            counters: Arc::new(SyncCounters::new()),
        })
    }

    pub fn counters(&self) -> Arc<SyncCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    /// Read both slots once
    ///
    /// `None` while either slot is empty or when neither stream produced a
    /// frame since the last pair.
    pub fn tick(&mut self) -> Option<SyncPair> {
        let (Some(color), Some(thermal)) = (self.color.latest(), self.thermal.latest()) else {
            self.counters.record_waiting();
            return None;
        };

        let key = (color.captured_at, thermal.captured_at);
        if self.last_pair == Some(key) {
            return None;
        }
        self.last_pair = Some(key);

        let delta = if key.0 >= key.1 { key.0 - key.1 } else { key.1 - key.0 };
        let status = classify(delta, self.config.soft_tolerance, self.config.hard_tolerance);

        match status {
            SyncStatus::Ok => self.counters.record_ok(),
            SyncStatus::Degraded => self.counters.record_degraded(),
            SyncStatus::Unmatched => {
                self.counters.record_unmatched();
                tracing::debug!(
                    color = %color.stream,
                    thermal = %thermal.stream,
                    delta_ms = delta.as_millis() as u64,
                    "Streams out of sync"
                );
            }
        }

        Some(SyncPair {
            color_ts: key.0,
            thermal_ts: key.1,
            delta,
            status,
            color,
            thermal,
        })
    }

    /// Poll at the configured interval and publish each new pair
    pub fn spawn(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (watch::Receiver<Option<SyncPair>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(pair) = self.tick() {
                            tx.send_replace(Some(pair));
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Synchronizer stopped");
        });

        (rx, task)
    }
}
