//! Synchronizer configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Timestamp tolerances for pairing two streams
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Deltas up to this are in sync
    pub soft_tolerance: Duration,
    /// Deltas up to this are degraded; beyond it the pair is unmatched
    pub hard_tolerance: Duration,
    /// How often the spawned loop polls the two slots
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            soft_tolerance: Duration::from_millis(100),
            hard_tolerance: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both tolerances
    pub fn tolerances(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_tolerance = soft;
        self.hard_tolerance = hard;
        self
    }

    /// Set the poll interval (minimum 1ms)
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_tolerance > self.hard_tolerance {
            return Err(ConfigError::InvalidTolerance {
                soft: self.soft_tolerance,
                hard: self.hard_tolerance,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.soft_tolerance < config.hard_tolerance);
    }

    #[test]
    fn test_inverted_tolerances_rejected() {
        let config = SyncConfig::new().tolerances(Duration::from_secs(1), Duration::from_millis(10));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTolerance { .. })
        ));
    }
}
