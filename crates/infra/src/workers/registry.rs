//! Tracking record of started worker processes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil::{read_if_exists, remove_if_exists, write_json_atomic};

/// One started worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Small ordinal, unique among the tracked workers.
    pub worker_id: u32,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Persistent record of worker handles, so that a later invocation can
/// signal workers started by an earlier one.
pub trait WorkerRegistry: Send + Sync {
    /// Tracked handles; an absent record is empty.
    fn load(&self) -> Result<Vec<WorkerHandle>, RegistryError>;

    fn save(&self, handles: &[WorkerHandle]) -> Result<(), RegistryError>;

    /// Remove the record entirely.
    fn clear(&self) -> Result<(), RegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("worker registry i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worker registry at {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Registry persisted as a JSON array.
#[derive(Debug, Clone)]
pub struct FileWorkerRegistry {
    path: PathBuf,
}

impl FileWorkerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl WorkerRegistry for FileWorkerRegistry {
    fn load(&self) -> Result<Vec<WorkerHandle>, RegistryError> {
        let Some(bytes) = read_if_exists(&self.path).map_err(|e| self.io_error(e))? else {
            return Ok(Vec::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, handles: &[WorkerHandle]) -> Result<(), RegistryError> {
        write_json_atomic(&self.path, handles).map_err(|e| self.io_error(e))
    }

    fn clear(&self) -> Result<(), RegistryError> {
        remove_if_exists(&self.path).map_err(|e| self.io_error(e))
    }
}

/// In-memory registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWorkerRegistry {
    handles: Mutex<Option<Vec<WorkerHandle>>>,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record currently exists (distinguishes "cleared" from "empty").
    pub fn exists(&self) -> bool {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl WorkerRegistry for InMemoryWorkerRegistry {
    fn load(&self) -> Result<Vec<WorkerHandle>, RegistryError> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(handles.clone().unwrap_or_default())
    }

    fn save(&self, handles: &[WorkerHandle]) -> Result<(), RegistryError> {
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = Some(handles.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), RegistryError> {
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
