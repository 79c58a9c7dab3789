//! Retry policy for transient delivery failures.
//!
//! Exponential backoff with jitter: attempt `n` (1-based) that fails waits
//! roughly `base_delay * 2^(n-1)`, capped at `max_delay`, randomized by
//! ±`jitter_factor` so that workers retrying the same outage spread out.

use rand::Rng;
use std::time::Duration;

use super::DeliveryError;

/// How many times to try an event and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Jitter fraction in `0.0..=1.0`
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure on `attempt` (1-based) should be followed by another.
    pub fn should_retry(&self, attempt: u32, error: &DeliveryError) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Delay before the attempt following the failed `attempt`.
    ///
    /// A `Retry-After` from the downstream takes precedence over the
    /// computed backoff, still capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, error: &DeliveryError) -> Duration {
        if let Some(secs) = error.retry_after_secs() {
            return Duration::from_secs(secs).min(self.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay);

        apply_jitter(delay, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomize `duration` by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let range = duration.as_secs_f64() * jitter_factor.min(1.0);
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
