//! Frame types shared by every pipeline stage
//!
//! A [`Frame`] is produced by a capture loop from its reused read buffer.
//! The pixel data is copied into a fresh `Bytes` at publish time, so a frame
//! held by any consumer is never touched by the next capture cycle. Cloning a
//! `Frame` afterwards is cheap since `Bytes` is reference counted and
//! immutable; consumers that need to modify pixels take an owned copy with
//! [`Frame::to_rgb_image`] or [`Frame::to_vec`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbImage;
use tokio::time::Instant;

/// Identifier of a camera stream (e.g. "front_door", "thermal")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    /// Create a new stream identifier
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Bytes per pixel of the packed RGB24 layout every source produces
pub const BYTES_PER_PIXEL: usize = 3;

/// A captured video frame (packed RGB24)
#[derive(Debug, Clone)]
pub struct Frame {
    /// Stream that produced the frame
    pub stream: StreamId,
    /// Capture sequence number, monotonically increasing per stream
    pub seq: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Capture time on the monotonic clock
    pub captured_at: Instant,
    /// Pixel data, `width * height * 3` bytes
    pub data: Bytes,
}

impl Frame {
    /// Create a frame from already-owned pixel data
    pub fn new(
        stream: StreamId,
        seq: u64,
        width: u32,
        height: u32,
        captured_at: Instant,
        data: Bytes,
    ) -> Self {
        Self {
            stream,
            seq,
            width,
            height,
            captured_at,
            data,
        }
    }

    /// Create a frame by copying pixels out of a buffer that the caller will reuse
    pub fn copy_from(
        stream: StreamId,
        seq: u64,
        width: u32,
        height: u32,
        captured_at: Instant,
        pixels: &[u8],
    ) -> Self {
        Self::new(
            stream,
            seq,
            width,
            height,
            captured_at,
            Bytes::copy_from_slice(pixels),
        )
    }

    /// Expected byte length for the given dimensions
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Size of the pixel data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the data length matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }

    /// Owned, mutable copy of the pixel data
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Owned image copy, or `None` if the buffer does not match the dimensions
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.to_vec())
    }
}
