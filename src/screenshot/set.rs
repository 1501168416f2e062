//! Evidence frames for one motion event

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::frame::{Frame, StreamId};

/// Before/now/after frames around a motion event
#[derive(Debug, Clone)]
pub struct ScreenshotSet {
    pub stream: StreamId,
    /// Frame from before the event (the event frame when history is missing)
    pub before: Frame,
    /// The frame that triggered the event
    pub now: Frame,
    /// Frame from after the event, if one arrived in time
    pub after: Option<Frame>,
    /// When the set was assembled
    pub captured_at: Instant,
    /// Wall-clock time the set was assembled
    pub captured_wall: DateTime<Utc>,
}

impl ScreenshotSet {
    pub fn new(stream: StreamId, before: Frame, now: Frame, after: Option<Frame>) -> Self {
        Self {
            stream,
            before,
            now,
            after,
            captured_at: Instant::now(),
            captured_wall: Utc::now(),
        }
    }

    /// Frames in time order, labelled
    pub fn frames(&self) -> impl Iterator<Item = (&'static str, &Frame)> {
        [("before", Some(&self.before)), ("now", Some(&self.now)), ("after", self.after.as_ref())]
            .into_iter()
            .filter_map(|(label, frame)| frame.map(|f| (label, f)))
    }

    /// Whether the before frame is real history rather than the event frame
    pub fn has_history(&self) -> bool {
        self.before.seq != self.now.seq
    }
}
