//! Minimum-interval rate limiter
//!
//! Each call reserves the next free slot; slots are `min_interval` apart.
//! Callers whose slot is further away than `max_wait` are refused instead
//! of queued.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::CollaboratorError;

/// Spaces calls to one output channel
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    min_interval: Duration,
    max_wait: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            max_wait: None,
            next_slot: Mutex::new(None),
        }
    }

    /// Refuse callers that would wait longer than `max_wait`
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the next slot
    pub async fn acquire(&self) -> Result<(), CollaboratorError> {
        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |next| next.max(now));
            let wait = slot - now;

            if let Some(max_wait) = self.max_wait {
                if wait > max_wait {
                    tracing::debug!(
                        limiter = self.name,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit exceeded"
                    );
                    return Err(CollaboratorError::RateLimited(wait));
                }
            }

            *next_slot = Some(slot + self.min_interval);
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let limiter = RateLimiter::new("test", Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_wait() {
        let limiter = RateLimiter::new("test", Duration::from_secs(1));
        limiter.acquire().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_refuses() {
        let limiter = RateLimiter::new("test", Duration::from_secs(10))
            .with_max_wait(Some(Duration::from_secs(5)));

        assert_ok!(limiter.acquire().await);
        let err = assert_err!(limiter.acquire().await);
        assert_eq!(err, CollaboratorError::RateLimited(Duration::from_secs(10)));

        // a refused call does not reserve a slot
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_ok!(limiter.acquire().await);
    }
}
