//! Retry policies with capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of dispatch attempts, first attempt included.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub min_backoff: Duration,
    /// Cap on the backoff between attempts.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Policy for forward steps: a few quick attempts.
    pub fn forward() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }

    /// Policy for compensating steps: more attempts, longer cap, since a
    /// skipped compensation means real inconsistency.
    pub fn compensation() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Returns the delay before the given attempt (2-based: the first
    /// retry), doubling per attempt up to the cap.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(31);
        let delay = self.min_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}
