//! Job record and lifecycle state machine.
//!
//! ```text
//! pending ──claim──▶ processing ──ok──▶ completed
//!    ▲                   │
//!    └──fail, retries────┤
//!       remaining        └──fail, exhausted──▶ dead
//! ```
//!
//! `completed` and `dead` are terminal. Every accepted transition stamps
//! `updated_at` and bumps `version`, which stores use as the optimistic
//! concurrency token.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::id::JobId;
use crate::retry::RetryPolicy;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (possibly delayed by `next_run_at`).
    Pending,
    /// Claimed by exactly one worker, command in flight.
    Processing,
    /// Command succeeded.
    Completed,
    /// Retries exhausted (dead-lettered).
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    fn can_transition_to(self, to: JobState) -> bool {
        matches!(
            (self, to),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Pending)
                | (JobState::Processing, JobState::Dead)
        )
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| QueueError::validation(format!("unknown job state {s:?}")))
    }
}

/// A unit of work: an opaque shell command plus its lifecycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// Failed execution attempts so far.
    pub attempts: u32,
    pub max_retries: u32,
    /// Earliest time a pending job may be claimed. `None` means immediately.
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Revision counter, bumped on every transition.
    #[serde(default)]
    pub version: u64,
    /// Diagnostic from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(id: JobId, command: impl Into<String>, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            next_run_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
            last_error: None,
        }
    }

    /// Pending and not delayed past `now`.
    ///
    /// A missing `next_run_at` and one in the past are treated the same.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// `pending -> processing`.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.transition(JobState::Processing, now)?;
        self.next_run_at = None;
        Ok(())
    }

    /// `processing -> completed`.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.transition(JobState::Completed, now)?;
        self.next_run_at = None;
        self.last_error = None;
        Ok(())
    }

    /// `processing -> pending` (with backoff) or `processing -> dead`.
    ///
    /// Counts the failed attempt; the job is dead-lettered once `attempts`
    /// reaches `max_retries`. Returns the state the job ended up in.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> QueueResult<JobState> {
        let attempts = self.attempts.saturating_add(1);

        if attempts < self.max_retries {
            self.transition(JobState::Pending, now)?;
            self.next_run_at = Some(policy.next_run_at(now, attempts));
        } else {
            self.transition(JobState::Dead, now)?;
            self.next_run_at = None;
        }

        self.attempts = attempts;
        self.last_error = Some(error.into());
        Ok(self.state)
    }

    fn transition(&mut self, to: JobState, now: DateTime<Utc>) -> QueueResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        self.version = self.version.saturating_add(1);
        Ok(())
    }
}
