//! Motion detection configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Detection sensitivity, 1 (least sensitive) to 10 (most sensitive)
///
/// Higher sensitivity lowers both the per-pixel difference threshold and the
/// minimum region area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sensitivity(u8);

impl Sensitivity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self, ConfigError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidSensitivity(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Gray-level difference a pixel needs to count as changed (50 down to 14)
    pub fn difference_threshold(&self) -> u8 {
        50 - 4 * (self.0 - 1)
    }

    /// Minimum region area as a fraction of the analysis frame (2% down to 0.2%)
    pub fn min_area_ratio(&self) -> f32 {
        0.02 - 0.002 * (self.0 - 1) as f32
    }

    /// Minimum region area in pixels for an analysis frame of the given size
    pub fn min_area(&self, width: u32, height: u32) -> u32 {
        ((width * height) as f32 * self.min_area_ratio()).round().max(1.0) as u32
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u8> for Sensitivity {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Motion engine configuration
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Detection sensitivity
    pub sensitivity: Sensitivity,

    /// Minimum time between dispatches for one stream
    pub cooldown: Duration,

    /// Width frames are downscaled to before analysis (height keeps aspect)
    pub analysis_width: u32,

    /// Gaussian blur sigma applied to the difference image
    pub blur_sigma: f32,

    /// Background running-average weight of each new frame
    pub background_alpha: f32,

    /// Skip frames while global CPU usage is above this percentage
    pub cpu_threshold: f32,

    /// Skip frames while this many events are in flight downstream
    pub queue_threshold: usize,

    /// Minimum time between CPU samples
    pub cpu_sample_interval: Duration,

    /// Maximum evaluation rate (`None` = every frame)
    pub max_fps: Option<u32>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::default(),
            cooldown: Duration::from_secs(5),
            analysis_width: 320,
            blur_sigma: 1.5,
            background_alpha: 0.05,
            cpu_threshold: 85.0,
            queue_threshold: 4,
            cpu_sample_interval: Duration::from_secs(2),
            max_fps: Some(5),
        }
    }
}

impl MotionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set sensitivity from a raw 1-10 value
    pub fn sensitivity(mut self, value: u8) -> Result<Self, ConfigError> {
        self.sensitivity = Sensitivity::new(value)?;
        Ok(self)
    }

    /// Set the dispatch cooldown
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the analysis width (minimum 16)
    pub fn analysis_width(mut self, width: u32) -> Self {
        self.analysis_width = width.max(16);
        self
    }

    /// Set the blur sigma
    pub fn blur_sigma(mut self, sigma: f32) -> Self {
        self.blur_sigma = sigma;
        self
    }

    /// Set the background learning rate (clamped to 0.0..=1.0)
    pub fn background_alpha(mut self, alpha: f32) -> Self {
        self.background_alpha = alpha.clamp(0.0, 1.0);
        self
    }

    /// Set the CPU skip threshold in percent
    pub fn cpu_threshold(mut self, percent: f32) -> Self {
        self.cpu_threshold = percent;
        self
    }

    /// Set the in-flight event skip threshold
    pub fn queue_threshold(mut self, depth: usize) -> Self {
        self.queue_threshold = depth;
        self
    }

    /// Set the CPU sampling interval
    pub fn cpu_sample_interval(mut self, interval: Duration) -> Self {
        self.cpu_sample_interval = interval;
        self
    }

    /// Limit evaluation rate
    pub fn max_fps(mut self, fps: Option<u32>) -> Self {
        self.max_fps = fps.filter(|&f| f > 0);
        self
    }

    /// Minimum interval between evaluations
    pub fn min_interval(&self) -> Option<Duration> {
        self.max_fps.map(|fps| Duration::from_secs(1) / fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MotionConfig::default();

        assert_eq!(config.sensitivity.value(), 5);
        assert_eq!(config.cooldown, Duration::from_secs(5));
        assert_eq!(config.min_interval(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_sensitivity_range() {
        assert_eq!(Sensitivity::new(0), Err(ConfigError::InvalidSensitivity(0)));
        assert_eq!(Sensitivity::new(11), Err(ConfigError::InvalidSensitivity(11)));
        assert!(Sensitivity::new(1).is_ok());
        assert!(Sensitivity::new(10).is_ok());
        assert!(MotionConfig::new().sensitivity(42).is_err());
    }

    #[test]
    fn test_sensitivity_is_monotonic() {
        let levels: Vec<Sensitivity> = (1..=10).map(|v| Sensitivity::new(v).unwrap()).collect();

        for pair in levels.windows(2) {
            assert!(pair[1].difference_threshold() < pair[0].difference_threshold());
            assert!(pair[1].min_area(320, 240) < pair[0].min_area(320, 240));
        }
        assert_eq!(levels[0].difference_threshold(), 50);
        assert_eq!(levels[9].difference_threshold(), 14);
    }

    #[test]
    fn test_builder_chaining() {
        let config = MotionConfig::new()
            .sensitivity(8)
            .unwrap()
            .cooldown(Duration::from_secs(2))
            .analysis_width(4)
            .background_alpha(3.0)
            .max_fps(Some(0));

        assert_eq!(config.sensitivity.value(), 8);
        assert_eq!(config.analysis_width, 16);
        assert_eq!(config.background_alpha, 1.0);
        assert_eq!(config.min_interval(), None);
    }
}
