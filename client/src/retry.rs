//! Backoff schedule for repeated login attempts
//!
//! The gate keeps no state across restarts, so a client that times out simply
//! asks again. Delays grow exponentially and carry random jitter so that a
//! crowd of clients cut off together does not return together.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay, 0.0 to 1.0, that is randomised.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (starting at 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max_delay);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || capped.is_zero() {
            return capped;
        }

        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        capped.mul_f64(factor)
    }
}
