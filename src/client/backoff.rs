//! Exponential backoff with jitter for connect retries.

use std::time::Duration;

use rand::Rng;

use crate::config::ClientSettings;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// `jitter` is a fraction in `0.0..=1.0`, applied as `±jitter`.
    pub fn new(base: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            max,
            factor,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_base_ms),
            Duration::from_millis(settings.backoff_max_ms),
            2.0,
            0.1,
        )
    }

    /// `min(base * factor^attempt, max)`, jittered.
    pub fn next_delay(&mut self) -> Duration {
        let multiplier = self.factor.powi(self.attempt.min(63) as i32);
        let delay = self.base.mul_f64(multiplier).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.1)
    }
}
