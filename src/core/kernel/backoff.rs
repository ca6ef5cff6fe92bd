use rand::Rng;
use std::time::Duration;

/// Exponential reconnect delay with symmetric jitter
///
/// `min(max_delay, base * 2^attempt)` plus up to `jitter_factor` of that
/// delay in either direction.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.2)
    }
}

impl ExponentialBackoff {
    /// Negative jitter is clamped to zero, values above one to one.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt.min(31)));
        let capped = exp_delay.min(self.max_delay);

        let jitter_range = capped.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    /// Call once a connection has stayed up long enough to count as stable.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
