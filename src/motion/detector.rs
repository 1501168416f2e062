//! Frame-difference motion detector
//!
//! Per frame: downscale to grayscale, difference against the background
//! model, blur, threshold, label 8-connected regions and drop the small ones.
//! The grayscale, difference, blur and mask buffers live in the detector and
//! are reused for every frame of the same geometry. Only the label image from
//! `connected_components` is allocated per frame.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::frame::{Frame, BYTES_PER_PIXEL};

use super::background::BackgroundModel;
use super::config::MotionConfig;
use super::event::Region;

/// Finds changed regions in a stream of frames
pub trait Detector: Send {
    /// Regions of motion in `frame` (empty when quiet or still learning)
    fn detect(&mut self, frame: &Frame) -> Vec<Region>;

    /// Drop learned state
    fn reset(&mut self);
}

/// Background-subtraction detector
pub struct MotionDetector {
    threshold: u8,
    min_area_ratio: f32,
    analysis_width: u32,
    alpha: f32,
    background: BackgroundModel,
    kernel: Vec<f32>,
    gray: GrayImage,
    diff: GrayImage,
    scratch: Vec<f32>,
    blurred: GrayImage,
    mask: GrayImage,
    bounds: Vec<Option<Bounds>>,
}

/// Normalized 1-D gaussian, radius 3 sigma; empty when blurring is off
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma.is_nan() || sigma <= 0.0 {
        return Vec::new();
    }
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
}

impl Bounds {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
    }
}

impl MotionDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            threshold: config.sensitivity.difference_threshold(),
            min_area_ratio: config.sensitivity.min_area_ratio(),
            analysis_width: config.analysis_width,
            alpha: config.background_alpha,
            background: BackgroundModel::new(),
            kernel: gaussian_kernel(config.blur_sigma),
            gray: GrayImage::new(0, 0),
            diff: GrayImage::new(0, 0),
            scratch: Vec::new(),
            blurred: GrayImage::new(0, 0),
            mask: GrayImage::new(0, 0),
            bounds: Vec::new(),
        }
    }

    fn analysis_size(&self, frame: &Frame) -> (u32, u32) {
        let width = self.analysis_width.min(frame.width).max(1);
        let height = ((frame.height as u64 * width as u64) / frame.width.max(1) as u64).max(1) as u32;
        (width, height)
    }

    /// Nearest-neighbour downscale and luma conversion into the reused buffer
    fn load_gray(&mut self, frame: &Frame) {
        let (width, height) = self.analysis_size(frame);
        if self.gray.dimensions() != (width, height) {
            self.gray = GrayImage::new(width, height);
        }

        let src = &frame.data;
        let stride = frame.width as usize * BYTES_PER_PIXEL;
        for y in 0..height {
            let sy = (y as u64 * frame.height as u64 / height as u64) as usize;
            for x in 0..width {
                let sx = (x as u64 * frame.width as u64 / width as u64) as usize;
                let i = sy * stride + sx * BYTES_PER_PIXEL;
                let (r, g, b) = (src[i] as u32, src[i + 1] as u32, src[i + 2] as u32);
                let luma = (r * 299 + g * 587 + b * 114) / 1000;
                self.gray.put_pixel(x, y, Luma([luma as u8]));
            }
        }
    }

    /// Separable gaussian blur of `diff` into `blurred`, clamped at the edges
    fn blur(&mut self) {
        let (width, height) = self.diff.dimensions();
        if self.blurred.dimensions() != (width, height) {
            self.blurred = GrayImage::new(width, height);
        }
        if self.kernel.is_empty() {
            self.blurred.copy_from_slice(&self.diff);
            return;
        }
        self.scratch.resize(width as usize * height as usize, 0.0);

        let (w, h) = (width as i64, height as i64);
        let radius = (self.kernel.len() / 2) as i64;
        let src = self.diff.as_raw();

        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0;
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sx = (x + k as i64 - radius).clamp(0, w - 1);
                    acc += weight * src[(y * w + sx) as usize] as f32;
                }
                self.scratch[(y * w + x) as usize] = acc;
            }
        }

        let out: &mut [u8] = &mut self.blurred;
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0;
                for (k, weight) in self.kernel.iter().enumerate() {
                    let sy = (y + k as i64 - radius).clamp(0, h - 1);
                    acc += weight * self.scratch[(sy * w + x) as usize];
                }
                out[(y * w + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    fn threshold_mask(&mut self) {
        if self.mask.dimensions() != self.blurred.dimensions() {
            self.mask = GrayImage::new(self.blurred.width(), self.blurred.height());
        }
        let threshold = self.threshold;
        for (out, &px) in self.mask.iter_mut().zip(self.blurred.iter()) {
            *out = if px > threshold { 255 } else { 0 };
        }
    }

    fn regions(&mut self, frame: &Frame) -> Vec<Region> {
        let labels = connected_components(&self.mask, Connectivity::Eight, Luma([0u8]));

        self.bounds.clear();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0] as usize;
            if label == 0 {
                continue;
            }
            if self.bounds.len() < label {
                self.bounds.resize(label, None);
            }
            self.bounds[label - 1]
                .get_or_insert_with(|| Bounds::new(x, y))
                .include(x, y);
        }

        let (aw, ah) = self.mask.dimensions();
        let min_area = ((aw * ah) as f32 * self.min_area_ratio).round().max(1.0) as u32;
        let sx = frame.width as f32 / aw as f32;
        let sy = frame.height as f32 / ah as f32;

        let mut regions: Vec<Region> = self
            .bounds
            .iter()
            .flatten()
            .filter(|b| b.area >= min_area)
            .map(|b| Region {
                x: (b.min_x as f32 * sx) as u32,
                y: (b.min_y as f32 * sy) as u32,
                width: (((b.max_x - b.min_x + 1) as f32) * sx).ceil() as u32,
                height: (((b.max_y - b.min_y + 1) as f32) * sy).ceil() as u32,
                area: (b.area as f32 * sx * sy).round() as u32,
            })
            .collect();

        regions.sort_by(|a, b| b.area.cmp(&a.area));
        regions
    }
}

impl Detector for MotionDetector {
    fn detect(&mut self, frame: &Frame) -> Vec<Region> {
        if !frame.is_well_formed() || frame.width == 0 || frame.height == 0 {
            tracing::warn!(
                stream = %frame.stream,
                seq = frame.seq,
                len = frame.size(),
                "Skipping malformed frame"
            );
            return Vec::new();
        }

        self.load_gray(frame);
        if !self.background.apply(&self.gray, self.alpha, &mut self.diff) {
            tracing::debug!(stream = %frame.stream, "Background seeded");
            return Vec::new();
        }

        self.blur();
        self.threshold_mask();

        let regions = self.regions(frame);
        if !regions.is_empty() {
            tracing::debug!(
                stream = %frame.stream,
                seq = frame.seq,
                regions = regions.len(),
                largest = regions[0].area,
                "Motion regions found"
            );
        }
        regions
    }

    fn reset(&mut self) {
        self.background.reset();
    }
}
