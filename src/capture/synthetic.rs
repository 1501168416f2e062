//! Synthetic frame generator
//!
//! Used when no camera is configured so the downstream stages can run without
//! hardware. Frames show a static gradient with a bright block sweeping
//! across it, which the motion detector picks up as movement.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

use crate::error::CaptureError;
use crate::frame::BYTES_PER_PIXEL;

use super::source::FrameSource;

/// Deterministic animated frame source
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    ticker: Option<Interval>,
    frame_no: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / fps.max(1),
            ticker: None,
            frame_no: 0,
        }
    }

    /// Render frame `n` into `buf`
    pub fn render(width: u32, height: u32, n: u64, buf: &mut [u8]) {
        let (w, h) = (width as usize, height as usize);
        let block_w = (w / 8).max(1);
        let block_h = (h / 8).max(1);

        // Sweep left to right, then back.
        let travel = (w - block_w).max(1) as u64;
        let step = (w as u64 / 40).max(1);
        let pos = (n * step) % (2 * travel);
        let block_x = (if pos < travel { pos } else { 2 * travel - pos }) as usize;
        let block_y = (h - block_h) / 2;

        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * BYTES_PER_PIXEL;
                if i + 2 >= buf.len() {
                    return;
                }
                let in_block = x >= block_x
                    && x < block_x + block_w
                    && y >= block_y
                    && y < block_y + block_h;

                if in_block {
                    buf[i..i + 3].copy_from_slice(&[250, 250, 250]);
                } else {
                    buf[i] = (x * 120 / w) as u8;
                    buf[i + 1] = (y * 120 / h) as u8;
                    buf[i + 2] = 60;
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&mut self) -> Result<(), CaptureError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn read_frame(&mut self, buf: &mut [u8]) -> Result<(), CaptureError> {
        let ticker = self
            .ticker
            .as_mut()
            .ok_or_else(|| CaptureError::Unavailable("generator not started".into()))?;
        ticker.tick().await;

        Self::render(self.width, self.height, self.frame_no, buf);
        self.frame_no += 1;
        Ok(())
    }

    async fn close(&mut self) {
        self.ticker = None;
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let mut a = vec![0u8; 64 * 48 * 3];
        let mut b = vec![0u8; 64 * 48 * 3];
        SyntheticSource::render(64, 48, 7, &mut a);
        SyntheticSource::render(64, 48, 7, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_block_moves_between_frames() {
        let mut a = vec![0u8; 64 * 48 * 3];
        let mut b = vec![0u8; 64 * 48 * 3];
        SyntheticSource::render(64, 48, 0, &mut a);
        SyntheticSource::render(64, 48, 5, &mut b);
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_requires_open() {
        let mut source = SyntheticSource::new(8, 8, 5);
        let mut buf = vec![0u8; 8 * 8 * 3];

        assert!(source.read_frame(&mut buf).await.is_err());

        source.open().await.unwrap();
        assert!(source.read_frame(&mut buf).await.is_ok());
        assert!(buf.iter().any(|&p| p == 250));
    }
}
