//! Retry policy for transient agent failures
//!
//! Exponential backoff with jitter, applied by the standard executor around
//! agent calls. Only transient errors are retried; refusals and validation
//! failures are not.

use rand::Rng;
use std::time::Duration;

/// Backoff policy: `delay = initial × factor^attempt`, capped, with optional
/// jitter in `[0.5, 1.5)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy retrying `max_attempts` times beyond the first attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_secs_f64());
        let final_secs = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_secs)
    }
}
