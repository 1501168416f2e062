//! Reconnect backoff shared by the capture and broker loops
//!
//! A [`RetryPolicy`] describes the schedule; a [`ReconnectState`] is owned by
//! exactly one reconnecting loop and walks that schedule. Delays grow by
//! `multiplier` from `initial_delay` and are capped at `max_delay`. Once
//! `max_attempts` delays have been handed out the cycle is exhausted: the loop
//! logs it, waits `cycle_pause` and starts a fresh cycle. Loops never give up
//! while their component is running.

use std::time::Duration;

use tokio::sync::watch;

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after each attempt (values below 1.0 are treated as 1.0)
    pub multiplier: f64,
    /// Attempts per cycle (`None` = unbounded)
    pub max_attempts: Option<u32>,
    /// Pause after an exhausted cycle
    pub cycle_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(10),
            cycle_pause: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Set the initial delay
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set attempts per cycle
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry forever without cycle pauses
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the pause after an exhausted cycle
    pub fn cycle_pause(mut self, pause: Duration) -> Self {
        self.cycle_pause = pause;
        self
    }
}

/// What the reconnecting loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then attempt again
    Retry(Duration),
    /// The cycle is exhausted; wait this long, then start over
    Exhausted(Duration),
}

impl Backoff {
    /// The wait before the next attempt, whichever variant this is
    pub fn delay(&self) -> Duration {
        match *self {
            Backoff::Retry(d) | Backoff::Exhausted(d) => d,
        }
    }
}

/// Per-loop backoff state
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: RetryPolicy,
    attempt: u32,
    current_delay: Duration,
}

impl ReconnectState {
    /// Create fresh state for a policy
    pub fn new(policy: RetryPolicy) -> Self {
        let current_delay = policy.initial_delay.min(policy.max_delay);
        Self {
            policy,
            attempt: 0,
            current_delay,
        }
    }

    /// Attempts made in the current cycle
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next retry will use
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// The policy this state walks
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Advance the schedule
    ///
    /// Exhausting a cycle resets the state, so the call after an
    /// [`Backoff::Exhausted`] starts again from `initial_delay`.
    pub fn next_backoff(&mut self) -> Backoff {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                self.reset();
                return Backoff::Exhausted(self.policy.cycle_pause);
            }
        }

        let delay = self.current_delay;
        self.attempt += 1;

        let factor = self.policy.multiplier.max(1.0);
        let grown = self.current_delay.as_nanos() as f64 * factor;
        let cap = self.policy.max_delay.as_nanos() as f64;
        self.current_delay = Duration::from_nanos(grown.min(cap) as u64);

        Backoff::Retry(delay)
    }

    /// Return to the initial schedule (after a successful connect)
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.policy.initial_delay.min(self.policy.max_delay);
    }
}

/// Sleep for `delay` unless shutdown is signalled first
///
/// Returns `false` when the loop should stop. A dropped sender counts as a
/// shutdown signal.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => !*shutdown.borrow(),
        res = shutdown.changed() => res.is_ok() && !*shutdown.borrow(),
    }
}
