//! Job identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Longest identifier a caller may supply.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Identifier of a job.
///
/// Opaque to the engine. Generated ids are UUIDv7 strings (time-ordered);
/// callers may also supply their own, which are validated by [`JobId::parse`].
/// Deserialization is unchecked so that any previously persisted record stays
/// readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a fresh, unique identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate a caller-supplied identifier.
    ///
    /// Accepts 1..=128 characters drawn from ASCII alphanumerics and `-_.:`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, QueueError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(QueueError::invalid_id("id must not be empty"));
        }
        if raw.len() > MAX_JOB_ID_LEN {
            return Err(QueueError::invalid_id(format!(
                "id is longer than {MAX_JOB_ID_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(QueueError::invalid_id(format!(
                "{raw:?} contains unsupported character {bad:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
