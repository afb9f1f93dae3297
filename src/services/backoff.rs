//! Retry backoff policy.
//!
//! Backoff grows exponentially with each retry: 10s → 20s → 40s → 80s →
//! 160s → 300s (cap) with the default settings, randomized by the jitter
//! factor. Jitter never takes a delay below the initial interval or above
//! the cap. The delay is data: the coordinator stores it as the task's
//! `next_eligible_at` instead of sleeping.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::models::RetryConfig;

/// Past this many steps the interval has long been clamped to the cap.
const MAX_STEPS: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
            config.jitter,
        )
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// Delay before retry number `retry_count` (1-based), between the
    /// initial interval and the cap.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_max_interval(self.max)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            .with_max_elapsed_time(None)
            .build();

        let mut delay = self.initial;
        for _ in 0..retry_count.clamp(1, MAX_STEPS) {
            delay = backoff.next_backoff().unwrap_or(self.max);
        }
        delay.clamp(self.initial, self.max)
    }

    /// Earliest time retry number `retry_count` may run.
    pub fn next_eligible_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(retry_count)).unwrap_or_else(|_| chrono::Duration::zero());
        now + delay
    }
}
