//! Domain error model.

use thiserror::Error;

use crate::job::JobState;

/// Result type used across the domain layer.
pub type QueueResult<T> = Result<T, QueueError>;

/// Domain-level error.
///
/// These are caller mistakes (bad input, unknown keys, illegal transitions).
/// They are surfaced as-is and never retried. Storage failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A value failed validation (e.g. an enqueue request without a command).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A caller-supplied job identifier was rejected.
    #[error("invalid job id: {0}")]
    InvalidId(String),

    /// A job was asked to move along an edge the state machine does not have.
    #[error("illegal job transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// `config get/set` was given a key that does not exist.
    #[error("unknown config key \"{key}\"; valid keys: {valid}")]
    UnknownConfigKey { key: String, valid: String },

    /// `config set` was given a value that does not parse for its key.
    #[error("invalid value {value:?} for config key \"{key}\"")]
    InvalidConfigValue { key: String, value: String },
}

impl QueueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
