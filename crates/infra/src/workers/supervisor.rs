//! Spawning and signalling worker processes.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use sysinfo::{Pid, System};
use tracing::debug;

use super::registry::WorkerHandle;
use crate::paths::DataDir;

/// How much later than its recorded start a process may have started and
/// still be the tracked worker. Covers clock rounding between the recorded
/// timestamp and the kernel's start time.
const START_TIME_SLACK_SECS: i64 = 5;

/// OS process control used by the worker pool.
pub trait ProcessSupervisor: Send + Sync {
    /// Start worker `worker_id` in the background and return its pid.
    fn spawn(&self, worker_id: u32) -> Result<u32, SpawnError>;

    /// Ask the process to stop gracefully.
    fn signal_stop(&self, pid: u32) -> Result<(), SignalError>;

    /// Whether the tracked worker is still running. A live process that was
    /// started after the worker was recorded holds a reused pid and does not
    /// count.
    fn is_alive(&self, handle: &WorkerHandle) -> bool;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to spawn worker {worker_id}: {source}")]
pub struct SpawnError {
    pub worker_id: u32,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("process {0} no longer exists")]
    Gone(u32),
    #[error("failed to signal process {pid}: {source}")]
    Os {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Runs workers as `<program> --data-dir <dir> worker run --id <n>`.
///
/// Workers get no stdin; their stdout and stderr are appended to
/// `<data_dir>/logs/worker-<n>.log`. On unix each worker leads its own
/// process group so terminal signals sent to the parent do not reach it.
#[derive(Debug, Clone)]
pub struct OsProcessSupervisor {
    program: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
}

impl OsProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>, data_dir: &DataDir) -> Self {
        Self {
            program: program.into(),
            data_dir: data_dir.root().to_path_buf(),
            log_dir: data_dir.logs_dir(),
        }
    }

    /// Supervisor that re-executes the running binary.
    pub fn current_exe(data_dir: &DataDir) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, data_dir))
    }

    pub fn log_path(&self, worker_id: u32) -> PathBuf {
        self.log_dir.join(format!("worker-{worker_id}.log"))
    }

    fn command(&self, worker_id: u32, log: &Path) -> io::Result<Command> {
        std::fs::create_dir_all(&self.log_dir)?;
        let stdout = OpenOptions::new().create(true).append(true).open(log)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--data-dir")
            .arg(&self.data_dir)
            .args(["worker", "run", "--id"])
            .arg(worker_id.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        Ok(cmd)
    }
}

impl ProcessSupervisor for OsProcessSupervisor {
    fn spawn(&self, worker_id: u32) -> Result<u32, SpawnError> {
        let log = self.log_path(worker_id);
        let child = self
            .command(worker_id, &log)
            .and_then(|mut cmd| cmd.spawn())
            .map_err(|source| SpawnError { worker_id, source })?;

        debug!(worker_id, pid = child.id(), log = %log.display(), "worker process spawned");
        // The child is not waited on; it outlives this invocation.
        Ok(child.id())
    }

    fn signal_stop(&self, pid: u32) -> Result<(), SignalError> {
        os::terminate(pid)
    }

    fn is_alive(&self, handle: &WorkerHandle) -> bool {
        os::is_alive(handle.pid) && !pid_reused(handle.pid, handle.started_at)
    }
}

/// True when `pid` now belongs to a process started after `recorded`.
///
/// A process the system table cannot describe gives no evidence of reuse.
fn pid_reused(pid: u32, recorded: DateTime<Utc>) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    let Some(process) = system.process(pid) else {
        return false;
    };
    let started = i64::try_from(process.start_time()).unwrap_or(i64::MAX);
    let reused = started > recorded.timestamp() + START_TIME_SLACK_SECS;
    if reused {
        debug!(%pid, started, recorded = %recorded, "pid belongs to a newer process");
    }
    reused
}

#[cfg(unix)]
mod os {
    use std::io;

    use super::SignalError;

    /// A pid that can be addressed individually; 0 and negative values would
    /// target process groups.
    fn target(pid: u32) -> Option<libc::pid_t> {
        libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 0)
    }

    pub(super) fn terminate(pid: u32) -> Result<(), SignalError> {
        let Some(target) = target(pid) else {
            return Err(SignalError::Gone(pid));
        };
        // SAFETY: plain syscall with a validated, positive pid.
        if unsafe { libc::kill(target, libc::SIGTERM) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(SignalError::Gone(pid)),
            _ => Err(SignalError::Os { pid, source: err }),
        }
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        let Some(target) = target(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs the permission and existence checks only.
        if unsafe { libc::kill(target, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

// TODO: implement liveness and graceful stop on Windows (OpenProcess /
// GenerateConsoleCtrlEvent); workers can be started but not supervised there.
#[cfg(not(unix))]
mod os {
    use std::io;

    use super::SignalError;

    pub(super) fn terminate(pid: u32) -> Result<(), SignalError> {
        Err(SignalError::Os {
            pid,
            source: io::Error::new(io::ErrorKind::Unsupported, "process signals are not supported"),
        })
    }

    pub(super) fn is_alive(_pid: u32) -> bool {
        false
    }
}
