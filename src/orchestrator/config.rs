//! Orchestrator configuration

use std::time::Duration;

/// Event handling configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How far before the event frame the "before" screenshot is taken
    pub before_offset: Duration,

    /// How long to wait after the event before taking the "after" screenshot
    pub after_wait: Duration,

    /// Upper bound for each classifier, analyzer, broker and notifier call
    pub collaborator_timeout: Duration,

    /// Minimum interval between broker state publishes
    pub broker_interval: Duration,

    /// Minimum interval between notifier alerts
    pub notifier_interval: Duration,

    /// Drop an output instead of waiting longer than this for its rate limiter
    pub rate_limit_max_wait: Option<Duration>,

    /// Number of recent event summaries kept for the health report
    pub history_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            before_offset: Duration::from_secs(2),
            after_wait: Duration::from_secs(2),
            collaborator_timeout: Duration::from_secs(30),
            broker_interval: Duration::from_secs(1),
            notifier_interval: Duration::from_secs(10),
            rate_limit_max_wait: Some(Duration::from_secs(15)),
            history_size: 20,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_offset(mut self, offset: Duration) -> Self {
        self.before_offset = offset;
        self
    }

    pub fn after_wait(mut self, wait: Duration) -> Self {
        self.after_wait = wait;
        self
    }

    pub fn collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn broker_interval(mut self, interval: Duration) -> Self {
        self.broker_interval = interval;
        self
    }

    pub fn notifier_interval(mut self, interval: Duration) -> Self {
        self.notifier_interval = interval;
        self
    }

    pub fn rate_limit_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.rate_limit_max_wait = max_wait;
        self
    }

    /// Set the history size (minimum 1)
    pub fn history_size(mut self, size: usize) -> Self {
        self.history_size = size.max(1);
        self
    }
}
