//! File-backed job store shared by every worker process.
//!
//! The collection lives in one JSON document. Whole-document replacement is
//! atomic (temp file + rename), and every read-modify-write runs under an
//! exclusive `flock(2)` on a sidecar lock file, which is what makes
//! `compare_and_swap` safe across processes.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use queuectl_core::Job;

use super::store::{JobStore, StoreError, insert_into, swap_in};
use crate::fsutil::{parent_dir, read_if_exists, write_json_atomic};

/// Job store persisted as a JSON array at `path`.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read(&self) -> Result<Vec<Job>, StoreError> {
        let Some(bytes) = read_if_exists(&self.path).map_err(|e| self.io_error(&self.path, e))? else {
            return Ok(Vec::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, jobs: &[Job]) -> Result<(), StoreError> {
        write_json_atomic(&self.path, jobs).map_err(|e| self.io_error(&self.path, e))
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.lock_path).map_err(|e| self.io_error(&self.lock_path, e))
    }

    /// Run `f` against the current collection under the exclusive lock and
    /// persist the result. Nothing is written if loading or `f` fails.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut Vec<Job>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let mut jobs = self.read()?;
        let out = f(&mut jobs)?;
        self.write(&jobs)?;
        trace!(path = %self.path.display(), jobs = jobs.len(), "job store written");
        Ok(out)
    }
}

impl JobStore for FileJobStore {
    fn load(&self) -> Result<Vec<Job>, StoreError> {
        self.read()
    }

    fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.write(jobs)
    }

    fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.modify(|jobs| insert_into(jobs, job))
    }

    fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError> {
        self.modify(|jobs| swap_in(jobs, next, expected_version))
    }
}

/// Exclusive advisory lock, released when the file handle is dropped.
struct StoreLock {
    _file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(parent_dir(path))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        // SAFETY: the descriptor is owned by `file`, which outlives this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

// TODO: use LockFileEx on Windows. Until then the store refuses every
// read-modify-write there rather than running without mutual exclusion.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "exclusive file locks are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use queuectl_core::{JobId, JobState};
    use std::sync::Arc;
    use std::thread;

    fn job(id: &str) -> Job {
        Job::new(JobId::parse(id).unwrap(), "exit 0", 3, Utc::now())
    }

    fn store_in(dir: &tempfile::TempDir) -> FileJobStore {
        FileJobStore::new(dir.path().join("jobs.json"))
    }

    #[test]
    fn missing_or_blank_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_empty());

        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported_and_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        assert!(store.load_or_empty().is_empty());
        assert!(matches!(store.insert(job("a")), Err(StoreError::Corrupt { .. })));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut claimed = job("b");
        claimed.mark_processing(Utc::now()).unwrap();
        store.save(&[job("a"), claimed]).unwrap();

        let loaded = store.load().unwrap();
        let before = std::fs::read(store.path()).unwrap();
        store.save(&loaded).unwrap();

        assert_eq!(store.load().unwrap(), loaded);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
        assert_eq!(loaded[1].state, JobState::Processing);
    }

    #[test]
    fn document_uses_documented_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.insert(job("a")).unwrap();

        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        let record = &doc[0];
        assert_eq!(record["id"], "a");
        assert_eq!(record["state"], "pending");
        assert_eq!(record["attempts"], 0);
        assert_eq!(record["max_retries"], 3);
        assert!(record["next_run_at"].is_null());
        assert!(record.get("last_error").is_none());
    }

    #[test]
    fn separate_handles_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let a = store_in(&dir);
        let b = store_in(&dir);

        a.insert(job("x")).unwrap();
        assert!(matches!(b.insert(job("x")), Err(StoreError::Duplicate(_))));
        assert_eq!(b.load().unwrap().len(), 1);
    }

    #[cfg(not(unix))]
    #[test]
    fn writes_fail_without_a_file_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let err = store.insert(job("a")).unwrap_err();
        assert!(
            matches!(err, StoreError::Io { ref source, .. } if source.kind() == io::ErrorKind::Unsupported),
            "{err}"
        );
        assert!(!store.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_claims_on_one_job_have_a_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        store_in(&dir).insert(job("contested")).unwrap();
        let snapshot = store_in(&dir).load().unwrap().remove(0);
        let snapshot = Arc::new(snapshot);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store_in(&dir);
                let snapshot = snapshot.clone();
                thread::spawn(move || {
                    let mut claimed = (*snapshot).clone();
                    claimed.mark_processing(Utc::now()).unwrap();
                    store.compare_and_swap(claimed, snapshot.version)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store_in(&dir).load().unwrap()[0].version, 1);
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_inserts_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store_in(&dir);
                thread::spawn(move || {
                    for n in 0..10 {
                        store.insert(job(&format!("job-{i}-{n}"))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store_in(&dir).load().unwrap().len(), 80);
    }
}
