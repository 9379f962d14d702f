//! Job storage abstraction and the in-memory implementation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use queuectl_core::{Job, JobId};

/// Job store abstraction.
///
/// The persisted unit is the whole, ordered collection: `save` replaces it
/// atomically and `load` returns it in insertion order. `insert` and
/// `compare_and_swap` are read-modify-write operations that implementations
/// must make atomic with respect to every other writer, including writers in
/// other processes.
pub trait JobStore: Send + Sync {
    /// Load the full collection. A store that does not exist yet is empty.
    fn load(&self) -> Result<Vec<Job>, StoreError>;

    /// Replace the full collection.
    fn save(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Append a new job. Fails with [`StoreError::Duplicate`] if the id is taken.
    fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Replace the stored job with `next.id`, but only if its `version` is
    /// still `expected_version`.
    ///
    /// This is the ownership primitive of the claim protocol: of several
    /// writers that observed the same version, exactly one succeeds and the
    /// rest get [`StoreError::Conflict`].
    fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError>;

    /// Look a job up by id.
    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.load()?.into_iter().find(|job| &job.id == id))
    }

    /// Load for read-only callers: an unreadable store is logged and treated
    /// as empty for this operation.
    fn load_or_empty(&self) -> Vec<Job> {
        self.load().unwrap_or_else(|error| {
            warn!(%error, "failed to load jobs; treating store as empty");
            Vec::new()
        })
    }
}

/// Job store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job store i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job store at {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    Duplicate(JobId),
    #[error("job {id} changed concurrently (expected version {expected}, found {found})")]
    Conflict { id: JobId, expected: u64, found: u64 },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Apply an insert to an in-memory collection.
pub(crate) fn insert_into(jobs: &mut Vec<Job>, job: Job) -> Result<(), StoreError> {
    if jobs.iter().any(|existing| existing.id == job.id) {
        return Err(StoreError::Duplicate(job.id));
    }
    jobs.push(job);
    Ok(())
}

/// Apply a compare-and-swap to an in-memory collection.
pub(crate) fn swap_in(jobs: &mut [Job], next: Job, expected_version: u64) -> Result<(), StoreError> {
    let slot = jobs
        .iter_mut()
        .find(|job| job.id == next.id)
        .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;

    if slot.version != expected_version {
        return Err(StoreError::Conflict {
            id: next.id,
            expected: expected_version,
            found: slot.version,
        });
    }

    *slot = next;
    Ok(())
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with_jobs<T>(&self, f: impl FnOnce(&mut Vec<Job>) -> T) -> T {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut jobs)
    }
}

impl JobStore for InMemoryJobStore {
    fn load(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.with_jobs(|jobs| jobs.clone()))
    }

    fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        self.with_jobs(|stored| *stored = jobs.to_vec());
        Ok(())
    }

    fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.with_jobs(|jobs| insert_into(jobs, job))
    }

    fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError> {
        self.with_jobs(|jobs| swap_in(jobs, next, expected_version))
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn load(&self) -> Result<Vec<Job>, StoreError> {
        (**self).load()
    }

    fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        (**self).save(jobs)
    }

    fn insert(&self, job: Job) -> Result<(), StoreError> {
        (**self).insert(job)
    }

    fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError> {
        (**self).compare_and_swap(next, expected_version)
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id)
    }
}
