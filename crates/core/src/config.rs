//! Queue configuration values.
//!
//! Only the values and their validation live here; loading and persisting
//! the configuration document is an infrastructure concern.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueueError, QueueResult};
use crate::retry::RetryPolicy;

/// Tunables read by the queue manager and the workers.
///
/// Missing keys in a persisted document fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backoff base, in seconds.
    pub base_delay: u64,
    /// Retry ceiling for jobs enqueued without one.
    pub max_retries: u32,
    /// Idle wait between polls, in milliseconds.
    pub poll_interval: u64,
    /// Optional ceiling for a single backoff delay, in seconds.
    pub max_delay: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: 2,
            max_retries: 3,
            poll_interval: 2000,
            max_delay: None,
        }
    }
}

impl QueueConfig {
    /// Keys accepted by [`QueueConfig::get`] and [`QueueConfig::set`].
    pub const KEYS: [&'static str; 4] = ["base_delay", "max_retries", "poll_interval", "max_delay"];

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.base_delay).with_max_delay(self.max_delay)
    }

    /// Idle wait between polls. A zero in a hand-edited file is read as 1ms
    /// so an idle worker never spins.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval.max(1))
    }

    /// Read a single key as JSON.
    pub fn get(&self, key: &str) -> QueueResult<Value> {
        let value = match key {
            "base_delay" => Value::from(self.base_delay),
            "max_retries" => Value::from(self.max_retries),
            "poll_interval" => Value::from(self.poll_interval),
            "max_delay" => self.max_delay.map(Value::from).unwrap_or(Value::Null),
            _ => return Err(unknown_key(key)),
        };
        Ok(value)
    }

    /// Set a single key from its textual form.
    ///
    /// `max_delay` additionally accepts `none`/`null` to remove the ceiling.
    pub fn set(&mut self, key: &str, value: &str) -> QueueResult<()> {
        let value = value.trim();
        match key {
            "base_delay" => self.base_delay = parse(key, value)?,
            "max_retries" => self.max_retries = parse(key, value)?,
            "poll_interval" => self.poll_interval = parse_positive(key, value)?,
            "max_delay" => {
                self.max_delay = match value.to_ascii_lowercase().as_str() {
                    "none" | "null" | "" => None,
                    _ => Some(parse(key, value)?),
                }
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn parse<T: core::str::FromStr>(key: &str, value: &str) -> QueueResult<T> {
    value.parse().map_err(|_| QueueError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_positive(key: &str, value: &str) -> QueueResult<u64> {
    match parse(key, value)? {
        0 => Err(QueueError::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn unknown_key(key: &str) -> QueueError {
    QueueError::UnknownConfigKey {
        key: key.to_string(),
        valid: QueueConfig::KEYS.join(", "),
    }
}
