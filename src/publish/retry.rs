//! Exponential backoff for transient publish failures.
//!
//! Attempt 1 runs immediately; attempt `n > 1` waits
//! `min(base * factor^(n-2), max_delay)`, or the server's `Retry-After`
//! when that is longer, still capped at `max_delay`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `failed_attempt` (1-based).
    pub fn delay_for(&self, failed_attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(self.factor.max(1).saturating_pow(exponent));
        let delay = match retry_after {
            Some(server) if server > backoff => server,
            _ => backoff,
        };
        delay.min(self.max_delay)
    }

    /// Whether `err` on attempt `attempt` (1-based) earns another try.
    pub fn should_retry(&self, attempt: u32, err: &PipelineError) -> bool {
        err.is_transient() && attempt < self.max_attempts
    }
}
