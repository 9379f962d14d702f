//! Retry/backoff policy.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound applied to any computed delay (100 years).
///
/// `base_delay ^ attempts` overflows quickly for large retry ceilings; delays
/// saturate here so that the resulting timestamp always stays representable.
pub const MAX_BACKOFF_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Exponential backoff: a failed job waits `base_delay ^ attempts` seconds
/// before it becomes eligible again, optionally capped by `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base of the exponent, in seconds.
    pub base_delay_secs: u64,
    /// Optional ceiling for a single delay, in seconds.
    pub max_delay_secs: Option<u64>,
}

impl RetryPolicy {
    pub fn exponential(base_delay_secs: u64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay_secs: Option<u64>) -> Self {
        self.max_delay_secs = max_delay_secs;
        self
    }

    /// Delay before the next attempt after `attempts` failures (1-indexed).
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let secs = self
            .base_delay_secs
            .checked_pow(attempts)
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_SECS);
        let secs = match self.max_delay_secs {
            Some(cap) => secs.min(cap),
            None => secs,
        };

        Duration::from_secs(secs)
    }

    /// Timestamp at which a job that has failed `attempts` times becomes
    /// eligible again.
    pub fn next_run_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.delay_for_attempt(attempts)).unwrap_or(TimeDelta::zero());
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
