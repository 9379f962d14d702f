//! Job queue manager: enqueueing and read-only queries.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use queuectl_core::{Job, JobId, JobState, QueueConfig, QueueError};

use super::store::{JobStore, StoreError};
use crate::workers::{ProcessSupervisor, WorkerPool, WorkerRegistry};

/// Input to [`JobQueue::enqueue`], usually parsed from the CLI's JSON
/// argument. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnqueueRequest {
    pub id: Option<String>,
    pub command: Option<String>,
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Parse a JSON object such as `{"id":"job1","command":"sleep 2"}`.
    pub fn from_json(raw: &str) -> Result<Self, QueueError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| QueueError::validation(format!("job is not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(QueueError::validation("job must be a JSON object"));
        }
        serde_json::from_value(value).map_err(|e| QueueError::validation(format!("invalid job: {e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Validation(#[from] QueueError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EnqueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(id) => {
                EnqueueError::Validation(QueueError::validation(format!("job already exists: {id}")))
            }
            other => EnqueueError::Store(other),
        }
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub dead: usize,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> usize {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Dead => self.dead,
        }
    }

    fn bump(&mut self, state: JobState) {
        let slot = match state {
            JobState::Pending => &mut self.pending,
            JobState::Processing => &mut self.processing,
            JobState::Completed => &mut self.completed,
            JobState::Dead => &mut self.dead,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.dead
    }
}

/// Aggregate view returned by [`JobQueue::get_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub counts_by_state: JobCounts,
    pub active_worker_count: usize,
    /// Process ids of the running workers.
    pub active_worker_ids: Vec<u32>,
}

/// Creates jobs and answers queries about them. Never mutates an existing job.
pub struct JobQueue<S> {
    store: S,
    default_max_retries: u32,
}

impl<S: JobStore> JobQueue<S> {
    pub fn new(store: S, config: &QueueConfig) -> Self {
        Self {
            store,
            default_max_retries: config.max_retries,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate `request` and persist it as a new pending job.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<Job, EnqueueError> {
        let command = request
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| QueueError::validation("job command is required"))?;

        let id = match request.id {
            Some(raw) => JobId::parse(raw)?,
            None => JobId::new(),
        };
        let max_retries = request.max_retries.unwrap_or(self.default_max_retries);

        let job = Job::new(id, command, max_retries, Utc::now());
        self.store.insert(job.clone())?;

        info!(job_id = %job.id, command = %job.command, max_retries, "job enqueued");
        Ok(job)
    }

    pub fn enqueue_json(&self, raw: &str) -> Result<Job, EnqueueError> {
        self.enqueue(EnqueueRequest::from_json(raw)?)
    }

    /// All jobs in store order, optionally restricted to one state name.
    ///
    /// A filter that names no state matches nothing.
    pub fn list_jobs(&self, state_filter: Option<&str>) -> Vec<Job> {
        let jobs = self.store.load_or_empty();
        match state_filter {
            None => jobs,
            Some(filter) => jobs.into_iter().filter(|job| job.state.as_str() == filter).collect(),
        }
    }

    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        self.store.get(id).unwrap_or_else(|error| {
            warn!(job_id = %id, %error, "failed to load jobs; treating store as empty");
            None
        })
    }

    /// Job counts per state plus the workers currently running.
    pub fn get_status<G, P>(&self, pool: &WorkerPool<G, P>) -> QueueStatus
    where
        G: WorkerRegistry,
        P: ProcessSupervisor,
    {
        let mut counts = JobCounts::default();
        for job in self.store.load_or_empty() {
            counts.bump(job.state);
        }

        let workers = pool.active().unwrap_or_else(|error| {
            warn!(%error, "failed to load worker registry; reporting no workers");
            Vec::new()
        });

        QueueStatus {
            counts_by_state: counts,
            active_worker_count: workers.len(),
            active_worker_ids: workers.iter().map(|w| w.pid).collect(),
        }
    }
}
