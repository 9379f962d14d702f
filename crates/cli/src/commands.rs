//! Command handlers. Each writes its result to `out`; errors carry context
//! and are printed by `main`.

use std::io::Write;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use queuectl_core::{JobState, QueueConfig};
use queuectl_infra::jobs::{FileJobStore, JobQueue, ShellRunner, Worker, WorkerConfig};
use queuectl_infra::workers::{FileWorkerRegistry, OsProcessSupervisor, WorkerPool};
use queuectl_infra::{ConfigStore, DataDir};

use crate::cli::{Cli, Command, ConfigCommand, WorkerCommand};
use crate::output;

pub async fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let app = App::new(DataDir::new(cli.data_dir));

    match cli.command {
        Command::Enqueue { job_json } => app.enqueue(&job_json, out),
        Command::List { state, json } => app.list(state.as_deref(), json, out),
        Command::Status { json } => app.status(json, out),
        Command::Worker { action } => match action {
            WorkerCommand::Start { count } => app.start_workers(count, out),
            WorkerCommand::Stop => app.stop_workers(out),
            WorkerCommand::Run { id } => {
                let shutdown = CancellationToken::new();
                tokio::spawn(cancel_on_signal(shutdown.clone()));
                app.run_worker(id, shutdown).await
            }
        },
        Command::Config { action } => match action {
            ConfigCommand::Get { key } => app.config_get(key.as_deref(), out),
            ConfigCommand::Set { key, value } => app.config_set(&key, &value, out),
        },
    }
}

struct App {
    data_dir: DataDir,
}

impl App {
    fn new(data_dir: DataDir) -> Self {
        Self { data_dir }
    }

    fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.data_dir.config_file())
    }

    fn config(&self) -> Result<QueueConfig> {
        let store = self.config_store();
        store
            .load()
            .with_context(|| format!("failed to load configuration from {}", store.path().display()))
    }

    fn store(&self) -> FileJobStore {
        FileJobStore::new(self.data_dir.jobs_file())
    }

    fn queue(&self) -> Result<JobQueue<FileJobStore>> {
        Ok(JobQueue::new(self.store(), &self.config()?))
    }

    fn pool(&self) -> Result<WorkerPool<FileWorkerRegistry, OsProcessSupervisor>> {
        let supervisor = OsProcessSupervisor::current_exe(&self.data_dir)
            .context("failed to locate the queuectl executable")?;
        let registry = FileWorkerRegistry::new(self.data_dir.worker_registry_file());
        Ok(WorkerPool::new(registry, supervisor))
    }

    fn enqueue(&self, raw: &str, out: &mut impl Write) -> Result<()> {
        let job = self.queue()?.enqueue_json(raw).context("failed to enqueue job")?;
        writeln!(out, "Job enqueued: {}", job.id)?;
        Ok(())
    }

    fn list(&self, state: Option<&str>, json: bool, out: &mut impl Write) -> Result<()> {
        if let Some(state) = state {
            if state.parse::<JobState>().is_err() {
                warn!(state, "unknown state filter; valid states are pending, processing, completed, dead");
            }
        }

        let jobs = self.queue()?.list_jobs(state);
        if json {
            serde_json::to_writer_pretty(&mut *out, &jobs)?;
            writeln!(out)?;
        } else {
            write!(out, "{}", output::job_table(&jobs))?;
        }
        Ok(())
    }

    fn status(&self, json: bool, out: &mut impl Write) -> Result<()> {
        let status = self.queue()?.get_status(&self.pool()?);
        if json {
            serde_json::to_writer_pretty(&mut *out, &status)?;
            writeln!(out)?;
        } else {
            write!(out, "{}", output::status(&status))?;
        }
        Ok(())
    }

    fn start_workers(&self, count: u32, out: &mut impl Write) -> Result<()> {
        let started = self.pool()?.start(count).context("failed to start workers")?;
        write!(out, "{}", output::started(&started))?;
        Ok(())
    }

    fn stop_workers(&self, out: &mut impl Write) -> Result<()> {
        let report = self.pool()?.stop().context("failed to stop workers")?;
        write!(out, "{}", output::stopped(&report))?;
        Ok(())
    }

    /// Foreground worker loop; returns once `shutdown` is cancelled.
    async fn run_worker(&self, worker_id: u32, shutdown: CancellationToken) -> Result<()> {
        let config = self.config()?;
        let worker = Worker::new(
            self.store(),
            ShellRunner,
            WorkerConfig::from_queue_config(worker_id, &config),
        );

        info!(
            worker_id,
            pid = std::process::id(),
            data_dir = %self.data_dir.root().display(),
            poll_interval_ms = config.poll_interval,
            "worker process starting"
        );
        let stats = worker.run(shutdown).await;
        info!(worker_id, ?stats, "worker process exiting");
        Ok(())
    }

    fn config_get(&self, key: Option<&str>, out: &mut impl Write) -> Result<()> {
        match key {
            None => {
                serde_json::to_writer_pretty(&mut *out, &self.config()?)?;
                writeln!(out)?;
            }
            Some(key) => {
                let value = self.config_store().get(key).context("failed to read configuration")?;
                writeln!(out, "{value}")?;
            }
        }
        Ok(())
    }

    fn config_set(&self, key: &str, value: &str, out: &mut impl Write) -> Result<()> {
        let config = self
            .config_store()
            .set(key, value)
            .context("failed to update configuration")?;
        writeln!(out, "{key} = {}", config.get(key)?)?;
        Ok(())
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = interrupt() => info!("received Ctrl+C"),
        _ = terminate() => info!("received SIGTERM"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

async fn interrupt() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(error) => {
            warn!(%error, "failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
