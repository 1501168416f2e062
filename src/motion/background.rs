//! Running-average background model

use image::GrayImage;

/// Per-pixel running average of recent grayscale frames
///
/// The model buffer is allocated once per geometry and updated in place.
#[derive(Debug, Default)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    model: Vec<f32>,
}

impl BackgroundModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame has been seen at the current geometry
    pub fn is_seeded(&self) -> bool {
        !self.model.is_empty()
    }

    /// Forget the background; the next frame seeds it again
    pub fn reset(&mut self) {
        self.model.clear();
    }

    /// Write `|frame - background|` into `diff` and blend the frame in
    ///
    /// Returns `false` without touching `diff` when the frame only seeds the
    /// model (first frame, or the geometry changed).
    pub fn apply(&mut self, frame: &GrayImage, alpha: f32, diff: &mut GrayImage) -> bool {
        let (width, height) = frame.dimensions();

        if !self.is_seeded() || (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.model.clear();
            self.model.extend(frame.as_raw().iter().map(|&p| p as f32));
            return false;
        }

        if diff.dimensions() != (width, height) {
            *diff = GrayImage::new(width, height);
        }

        let keep = 1.0 - alpha;
        for ((bg, &px), out) in self
            .model
            .iter_mut()
            .zip(frame.as_raw().iter())
            .zip(diff.iter_mut())
        {
            let px = px as f32;
            *out = (px - *bg).abs().min(255.0) as u8;
            *bg = px * alpha + *bg * keep;
        }
        true
    }
}
