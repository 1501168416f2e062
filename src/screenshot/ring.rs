//! Time-indexed screenshot ring buffer
//!
//! Holds the last `capacity` frames of one stream in capture order so the
//! orchestrator can pick evidence frames from before and after an event.
//! Eviction is strictly oldest first. The byte footprint is tracked as
//! frames enter and leave instead of being recomputed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::frame::Frame;
use crate::stats::BufferStats;

/// One buffered frame
#[derive(Debug, Clone)]
pub struct RingEntry {
    pub frame: Frame,
    pub timestamp: Instant,
}

#[derive(Debug, Default)]
struct RingState {
    entries: VecDeque<RingEntry>,
    bytes: usize,
}

impl RingState {
    /// Entry whose timestamp is closest to `target`
    ///
    /// Entries are time ordered, so the answer is one of the two neighbours
    /// of the insertion point. Ties go to the earlier entry.
    fn closest(&self, target: Instant) -> Option<&RingEntry> {
        let idx = self.entries.partition_point(|e| e.timestamp < target);
        let after = self.entries.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.entries.get(i));

        match (before, after) {
            (Some(b), Some(a)) => {
                if target - b.timestamp <= a.timestamp - target {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(b), None) => Some(b),
            (None, a) => a,
        }
    }
}

/// Fixed-capacity frame history for one stream
#[derive(Debug)]
pub struct ScreenshotBuffer {
    capacity: usize,
    state: RwLock<RingState>,
}

impl ScreenshotBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RwLock::new(RingState {
                entries: VecDeque::with_capacity(capacity),
                bytes: 0,
            }),
        }
    }

    /// Create a buffer sized to hold `window` worth of frames at `fps`
    pub fn with_window(fps: u32, window: Duration) -> Self {
        let capacity = (fps as f64 * window.as_secs_f64()).floor() as usize;
        Self::new(capacity)
    }

    /// Append a frame, evicting the oldest entry when full
    pub async fn add_frame(&self, frame: Frame, timestamp: Instant) {
        let mut state = self.state.write().await;

        if state.entries.len() >= self.capacity {
            if let Some(evicted) = state.entries.pop_front() {
                state.bytes -= evicted.frame.size();
            }
        }

        state.bytes += frame.size();
        state.entries.push_back(RingEntry { frame, timestamp });
    }

    /// Frame closest to `reference - offset`
    ///
    /// Returns `None` when the buffer is empty or the target lies before the
    /// oldest entry.
    pub async fn frame_before(&self, reference: Instant, offset: Duration) -> Option<Frame> {
        let target = reference.checked_sub(offset)?;
        let state = self.state.read().await;

        let oldest = state.entries.front()?;
        if target < oldest.timestamp {
            return None;
        }
        state.closest(target).map(|e| e.frame.clone())
    }

    /// Frame closest to `reference + offset`
    ///
    /// Returns `None` when the buffer is empty or the target lies after the
    /// newest entry.
    pub async fn frame_after(&self, reference: Instant, offset: Duration) -> Option<Frame> {
        let target = reference.checked_add(offset)?;
        let state = self.state.read().await;

        let newest = state.entries.back()?;
        if target > newest.timestamp {
            return None;
        }
        state.closest(target).map(|e| e.frame.clone())
    }

    /// Newest frame
    pub async fn latest(&self) -> Option<Frame> {
        self.state.read().await.entries.back().map(|e| e.frame.clone())
    }

    /// Number of buffered frames
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether the buffer is empty
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.bytes = 0;
    }

    /// Size, utilization and memory footprint
    pub async fn stats(&self) -> BufferStats {
        let state = self.state.read().await;
        BufferStats::new(state.entries.len(), self.capacity, state.bytes)
    }

    /// Append every frame published to `frames` until shutdown
    pub fn spawn_feeder(
        self: &Arc<Self>,
        mut frames: watch::Receiver<Option<Frame>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let buffer = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = frames.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Frame source closed, stopping ring buffer feeder");
                            break;
                        }
                        let frame = frames.borrow_and_update().clone();
                        if let Some(frame) = frame {
                            let timestamp = frame.captured_at;
                            buffer.add_frame(frame, timestamp).await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSlot;
    use crate::frame::StreamId;

    fn frame(seq: u64, at: Instant) -> Frame {
        Frame::copy_from(StreamId::new("cam"), seq, 2, 2, at, &[seq as u8; 12])
    }

    async fn filled(capacity: usize, count: u64, step: Duration) -> (ScreenshotBuffer, Instant) {
        let buffer = ScreenshotBuffer::new(capacity);
        let base = Instant::now();
        for i in 0..count {
            let at = base + step * i as u32;
            buffer.add_frame(frame(i, at), at).await;
        }
        (buffer, base)
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let (buffer, _) = filled(5, 12, Duration::from_millis(200)).await;

        assert_eq!(buffer.len().await, 5);
        let stats = buffer.stats().await;
        assert_eq!(stats.size, 5);
        assert_eq!(stats.memory_bytes, 5 * 12);
        assert_eq!(stats.utilization_pct, 100.0);

        let state = buffer.state.read().await;
        let seqs: Vec<u64> = state.entries.iter().map(|e| e.frame.seq).collect();
        assert_eq!(seqs, vec![7, 8, 9, 10, 11]);
    }

    #[tokio::test]
    async fn test_capacity_from_window() {
        assert_eq!(ScreenshotBuffer::with_window(5, Duration::from_secs(10)).capacity(), 50);
        assert_eq!(ScreenshotBuffer::with_window(0, Duration::from_secs(10)).capacity(), 1);
        assert_eq!(ScreenshotBuffer::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_frame_before_outside_history() {
        // 10 s window at 5 fps holding only 2 s of history
        let buffer = ScreenshotBuffer::with_window(5, Duration::from_secs(10));
        let base = Instant::now();
        for i in 0..10u64 {
            let at = base + Duration::from_millis(200 * i);
            buffer.add_frame(frame(i, at), at).await;
        }
        let now = base + Duration::from_millis(1800);

        assert!(buffer.frame_before(now, Duration::from_secs(3)).await.is_none());

        let found = buffer.frame_before(now, Duration::from_secs(1)).await.unwrap();
        assert_eq!(found.seq, 4);
    }

    #[tokio::test]
    async fn test_frame_before_picks_closest() {
        let (buffer, base) = filled(10, 5, Duration::from_millis(200)).await;

        // target 290ms: entries at 200 and 400, 200 is closer
        let found = buffer
            .frame_before(base + Duration::from_millis(790), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(found.seq, 1);

        // target 310ms: 400 is closer
        let found = buffer
            .frame_before(base + Duration::from_millis(810), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(found.seq, 2);
    }

    #[tokio::test]
    async fn test_frame_after_beyond_newest() {
        let (buffer, base) = filled(10, 5, Duration::from_millis(200)).await;

        assert!(buffer
            .frame_after(base + Duration::from_millis(600), Duration::from_secs(1))
            .await
            .is_none());

        let found = buffer
            .frame_after(base + Duration::from_millis(200), Duration::from_millis(400))
            .await
            .unwrap();
        assert_eq!(found.seq, 3);
    }

    #[tokio::test]
    async fn test_empty_buffer_queries() {
        let buffer = ScreenshotBuffer::new(3);
        let now = Instant::now();

        assert!(buffer.is_empty().await);
        assert!(buffer.frame_before(now, Duration::ZERO).await.is_none());
        assert!(buffer.frame_after(now, Duration::ZERO).await.is_none());
        assert!(buffer.latest().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_footprint() {
        let (buffer, _) = filled(4, 4, Duration::from_millis(100)).await;
        buffer.clear().await;

        let stats = buffer.stats().await;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.memory_bytes, 0);
    }

    #[tokio::test]
    async fn test_feeder_appends_published_frames() {
        let buffer = Arc::new(ScreenshotBuffer::new(10));
        let slot = FrameSlot::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = buffer.spawn_feeder(slot.subscribe(), shutdown_rx);

        for i in 1..=3u64 {
            slot.publish(frame(i, Instant::now()));
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(buffer.latest().await.map(|f| f.seq), Some(3));
        assert!(buffer.len().await >= 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
