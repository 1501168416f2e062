//! Motion events

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::frame::{Frame, StreamId};

/// Bounding box of a changed region, in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Changed pixels in the region
    pub area: u32,
}

/// Motion detected on one stream
#[derive(Debug, Clone)]
pub struct MotionEvent {
    pub stream: StreamId,
    /// The evaluated frame
    pub frame: Frame,
    /// Regions that passed the area filter, largest first
    pub regions: Vec<Region>,
    pub detected_at: Instant,
    pub detected_wall: DateTime<Utc>,
}

impl MotionEvent {
    pub fn new(frame: Frame, regions: Vec<Region>, detected_at: Instant) -> Self {
        Self {
            stream: frame.stream.clone(),
            frame,
            regions,
            detected_at,
            detected_wall: Utc::now(),
        }
    }

    /// Sum of region areas
    pub fn total_area(&self) -> u64 {
        self.regions.iter().map(|r| r.area as u64).sum()
    }
}
