//! Single-slot latest-frame channel
//!
//! The capture loop overwrites the slot with every new frame; readers either
//! copy out the current value without blocking or wait for the next change.

use std::sync::Arc;

use tokio::sync::watch;

use crate::frame::Frame;

/// Latest-value-wins frame slot for one stream
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current frame
    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// Most recent frame, if any
    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.tx.subscribe()
    }

    /// Forget the current frame
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
