//! Worker pool manager: starts, tracks and stops worker processes.
//!
//! The pool never touches job state. A worker stopped mid-job finishes its
//! current command before exiting.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use queuectl_core::QueueError;

use super::registry::{RegistryError, WorkerHandle, WorkerRegistry};
use super::supervisor::{ProcessSupervisor, SignalError, SpawnError};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Validation(#[from] QueueError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Outcome of [`WorkerPool::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Workers that were sent a graceful stop.
    pub signalled: Vec<WorkerHandle>,
    /// Tracked workers that had already exited.
    pub already_gone: Vec<WorkerHandle>,
}

pub struct WorkerPool<G, P> {
    registry: G,
    supervisor: P,
}

impl<G: WorkerRegistry, P: ProcessSupervisor> WorkerPool<G, P> {
    pub fn new(registry: G, supervisor: P) -> Self {
        Self {
            registry,
            supervisor,
        }
    }

    /// Start `count` workers and add them to the tracking record.
    ///
    /// Tracked workers that are still alive stay in the record and keep their
    /// ordinals; new ordinals continue after the highest of them. If a spawn
    /// fails, the workers already started are still recorded.
    pub fn start(&self, count: u32) -> Result<Vec<WorkerHandle>, PoolError> {
        if count == 0 {
            return Err(QueueError::validation("worker count must be at least 1").into());
        }

        let mut tracked = self.active()?;
        let first_id = tracked.iter().map(|h| h.worker_id).max().unwrap_or(0) + 1;

        let mut started = Vec::with_capacity(count as usize);
        let mut failure = None;
        for worker_id in first_id..first_id.saturating_add(count) {
            match self.supervisor.spawn(worker_id) {
                Ok(pid) => {
                    info!(worker_id, pid, "worker started");
                    started.push(WorkerHandle {
                        worker_id,
                        pid,
                        started_at: Utc::now(),
                    });
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        tracked.extend(started.iter().cloned());
        self.registry.save(&tracked)?;

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(started),
        }
    }

    /// Signal every tracked worker to stop and delete the tracking record.
    ///
    /// Idempotent: with no record this does nothing and reports no handles.
    pub fn stop(&self) -> Result<StopReport, PoolError> {
        let mut report = StopReport::default();

        for handle in self.registry.load()? {
            let worker_id = handle.worker_id;
            let pid = handle.pid;

            if !self.supervisor.is_alive(&handle) {
                warn!(worker_id, pid, "worker already exited");
                report.already_gone.push(handle);
                continue;
            }

            match self.supervisor.signal_stop(pid) {
                Ok(()) => {
                    info!(worker_id, pid, "stop signal sent");
                    report.signalled.push(handle);
                }
                Err(SignalError::Gone(_)) => {
                    warn!(worker_id, pid, "worker already exited");
                    report.already_gone.push(handle);
                }
                Err(e) => error!(worker_id, pid, error = %e, "failed to stop worker"),
            }
        }

        self.registry.clear()?;
        Ok(report)
    }

    /// Tracked workers whose process is still running.
    pub fn active(&self) -> Result<Vec<WorkerHandle>, RegistryError> {
        let mut handles = self.registry.load()?;
        handles.retain(|h| self.supervisor.is_alive(h));
        Ok(handles)
    }
}
