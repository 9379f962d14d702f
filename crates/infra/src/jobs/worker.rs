//! Worker task: the claim → execute → reconcile loop.
//!
//! A worker is the only component that mutates a job after it was enqueued.
//! Many workers (usually in separate processes) may poll the same store;
//! ownership of a job is decided by [`JobStore::compare_and_swap`] on the
//! job's `version`, so of two workers that picked the same job only one ever
//! runs its command. The loser simply selects again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use queuectl_core::{Job, JobId, JobState, QueueConfig, RetryPolicy};

use super::runner::CommandRunner;
use super::store::{JobStore, StoreError};

/// Per-worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Small human-readable ordinal, used in logs.
    pub worker_id: u32,
    /// Idle wait when no job is eligible.
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl WorkerConfig {
    pub fn from_queue_config(worker_id: u32, config: &QueueConfig) -> Self {
        Self {
            worker_id,
            poll_interval: config.poll_interval(),
            retry_policy: config.retry_policy(),
        }
    }
}

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    /// Failed attempts, including the ones that dead-lettered their job.
    pub failed: u64,
    pub dead_lettered: u64,
    pub claim_conflicts: u64,
}

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// No eligible job (or the store was unreadable).
    Idle,
    /// Another worker claimed the selected job first.
    Contended,
    /// A job was executed and its outcome written back.
    Finished { job_id: JobId, state: JobState },
    /// A job was executed but its outcome could not be written back.
    Unreconciled { job_id: JobId },
}

enum Claim {
    Won(Job),
    Lost,
    Nothing,
}

/// One claim-execute-reconcile loop over a shared store.
pub struct Worker<S, R> {
    store: S,
    runner: R,
    config: WorkerConfig,
    stats: WorkerStats,
}

impl<S: JobStore, R: CommandRunner> Worker<S, R> {
    pub fn new(store: S, runner: R, config: WorkerConfig) -> Self {
        Self {
            store,
            runner,
            config,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Loop until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between iterations and during the idle wait;
    /// a command that is already running is always allowed to finish and be
    /// reconciled.
    pub async fn run(mut self, shutdown: CancellationToken) -> WorkerStats {
        let worker_id = self.config.worker_id;
        info!(worker_id, "worker started");

        while !shutdown.is_cancelled() {
            if self.tick().await == Tick::Idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(worker_id, stats = ?self.stats, "worker stopped");
        self.stats
    }

    /// Run a single iteration of the loop.
    pub async fn tick(&mut self) -> Tick {
        let job = match self.claim(Utc::now()) {
            Claim::Won(job) => job,
            Claim::Lost => return Tick::Contended,
            Claim::Nothing => return Tick::Idle,
        };

        let worker_id = self.config.worker_id;
        info!(worker_id, job_id = %job.id, command = %job.command, "processing job");

        let outcome = self.runner.run(&job.command).await;
        self.reconcile(job, outcome, Utc::now()).await
    }

    /// Select the first eligible job in store order and take ownership of it.
    fn claim(&mut self, now: DateTime<Utc>) -> Claim {
        let worker_id = self.config.worker_id;

        let jobs = match self.store.load() {
            Ok(jobs) => jobs,
            Err(error) => {
                warn!(worker_id, %error, "failed to load jobs; treating store as empty");
                return Claim::Nothing;
            }
        };

        let Some(candidate) = jobs.into_iter().find(|job| job.is_eligible(now)) else {
            return Claim::Nothing;
        };

        let observed_version = candidate.version;
        let mut claimed = candidate;
        if let Err(error) = claimed.mark_processing(now) {
            error!(worker_id, job_id = %claimed.id, %error, "eligible job refused claim");
            return Claim::Nothing;
        }

        match self.store.compare_and_swap(claimed.clone(), observed_version) {
            Ok(()) => Claim::Won(claimed),
            Err(error @ (StoreError::Conflict { .. } | StoreError::NotFound(_))) => {
                self.stats.claim_conflicts += 1;
                debug!(worker_id, job_id = %claimed.id, %error, "lost claim race; reselecting");
                Claim::Lost
            }
            Err(error) => {
                warn!(worker_id, job_id = %claimed.id, %error, "failed to persist claim");
                Claim::Nothing
            }
        }
    }

    /// Fold the command outcome into the job and write it back, provided the
    /// stored job is still exactly the one this worker claimed.
    async fn reconcile(&mut self, claimed: Job, outcome: Result<String, String>, now: DateTime<Utc>) -> Tick {
        let worker_id = self.config.worker_id;
        let claimed_version = claimed.version;
        let mut next = claimed;
        self.stats.processed += 1;

        let applied = match outcome {
            Ok(output) => {
                info!(worker_id, job_id = %next.id, %output, "job completed");
                next.mark_completed(now).map(|()| JobState::Completed)
            }
            Err(diagnostic) => next.mark_failed(diagnostic.clone(), &self.config.retry_policy, now).inspect(|state| {
                warn!(
                    worker_id,
                    job_id = %next.id,
                    error = %diagnostic,
                    attempts = next.attempts,
                    max_retries = next.max_retries,
                    next_state = %state,
                    "job failed"
                );
            }),
        };

        let state = match applied {
            Ok(state) => state,
            Err(error) => {
                error!(worker_id, job_id = %next.id, %error, "claimed job refused outcome");
                return Tick::Unreconciled { job_id: next.id };
            }
        };

        let job_id = next.id.clone();
        if let Err(error) = self.record(next, claimed_version).await {
            error!(worker_id, %job_id, %error, "job outcome discarded; job is owned elsewhere");
            return Tick::Unreconciled { job_id };
        }

        match state {
            JobState::Completed => self.stats.succeeded += 1,
            JobState::Pending => self.stats.failed += 1,
            JobState::Dead => {
                self.stats.failed += 1;
                self.stats.dead_lettered += 1;
                warn!(worker_id, %job_id, "job moved to dead-letter state");
            }
            JobState::Processing => {}
        }

        Tick::Finished { job_id, state }
    }

    /// Write an outcome back, retrying store failures every `poll_interval`.
    ///
    /// The command has already run, so giving up would leave the job in
    /// `processing` for good. Only `Conflict` and `NotFound` end the attempt:
    /// the stored job is no longer the one this worker claimed.
    async fn record(&self, next: Job, claimed_version: u64) -> Result<(), StoreError> {
        let worker_id = self.config.worker_id;
        loop {
            match self.store.compare_and_swap(next.clone(), claimed_version) {
                Err(error @ (StoreError::Io { .. } | StoreError::Corrupt { .. })) => {
                    warn!(worker_id, job_id = %next.id, %error, "failed to record job outcome; retrying");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use crate::jobs::store::InMemoryJobStore;

    /// Scripted runner: succeeds unless the command is `fail`, records calls.
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str) -> Result<String, String> {
            self.calls.lock().unwrap().push(command.to_string());
            if command == "fail" {
                Err("scripted failure".to_string())
            } else {
                Ok(format!("ran {command}"))
            }
        }
    }

    fn config(base_delay: u64) -> WorkerConfig {
        WorkerConfig {
            worker_id: 1,
            poll_interval: Duration::from_millis(10),
            retry_policy: RetryPolicy::exponential(base_delay),
        }
    }

    fn enqueue(store: &InMemoryJobStore, id: &str, command: &str, max_retries: u32) {
        store
            .insert(Job::new(JobId::parse(id).unwrap(), command, max_retries, Utc::now()))
            .unwrap();
    }

    fn stored(store: &InMemoryJobStore, id: &str) -> Job {
        store.get(&JobId::parse(id).unwrap()).unwrap().unwrap()
    }

    #[tokio::test]
    async fn idle_when_nothing_is_eligible() {
        let store = InMemoryJobStore::arc();
        let runner = Arc::new(ScriptedRunner::default());
        let mut worker = Worker::new(store.clone(), runner.clone(), config(2));

        assert_eq!(worker.tick().await, Tick::Idle);

        let mut delayed = Job::new(JobId::parse("later").unwrap(), "echo", 3, Utc::now());
        delayed.next_run_at = Some(Utc::now() + TimeDelta::hours(1));
        store.insert(delayed).unwrap();

        assert_eq!(worker.tick().await, Tick::Idle);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_completes_job_without_counting_an_attempt() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "ok", "echo hi", 3);
        let mut worker = Worker::new(store.clone(), Arc::new(ScriptedRunner::default()), config(2));

        let tick = worker.tick().await;
        assert_eq!(
            tick,
            Tick::Finished {
                job_id: JobId::parse("ok").unwrap(),
                state: JobState::Completed
            }
        );

        let job = stored(&store, "ok");
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.version, 2);
        assert!(job.next_run_at.is_none());
        assert_eq!(worker.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn failure_backs_off_exponentially_then_dead_letters() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "flaky", "fail", 3);
        let mut worker = Worker::new(store.clone(), Arc::new(ScriptedRunner::default()), config(2));

        for (attempt, expected_delay) in [(1, 2), (2, 4)] {
            let before = Utc::now();
            worker.tick().await;
            let job = stored(&store, "flaky");
            assert_eq!(job.state, JobState::Pending);
            assert_eq!(job.attempts, attempt);
            assert_eq!(job.last_error.as_deref(), Some("scripted failure"));

            let delay = job.next_run_at.unwrap() - before;
            assert!(delay >= TimeDelta::seconds(expected_delay));
            assert!(delay < TimeDelta::seconds(expected_delay + 1));

            // Not eligible until the backoff expires.
            assert_eq!(worker.tick().await, Tick::Idle);
            let mut due = job.clone();
            due.next_run_at = Some(Utc::now() - TimeDelta::seconds(1));
            store.compare_and_swap(due, job.version).unwrap();
        }

        worker.tick().await;
        let job = stored(&store, "flaky");
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 3);
        assert!(job.next_run_at.is_none());
        assert_eq!(worker.stats().failed, 3);
        assert_eq!(worker.stats().dead_lettered, 1);
    }

    #[tokio::test]
    async fn claims_in_insertion_order() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "first", "one", 3);
        enqueue(&store, "second", "two", 3);
        let runner = Arc::new(ScriptedRunner::default());
        let mut worker = Worker::new(store.clone(), runner.clone(), config(2));

        worker.tick().await;
        worker.tick().await;
        assert_eq!(*runner.calls.lock().unwrap(), vec!["one", "two"]);
    }

    /// Store whose first `load` returns a snapshot taken before another
    /// worker claimed the job, reproducing the read/read/write/write race.
    struct RacingStore {
        inner: Arc<InMemoryJobStore>,
        stale: Mutex<Option<Vec<Job>>>,
    }

    impl JobStore for RacingStore {
        fn load(&self) -> Result<Vec<Job>, StoreError> {
            match self.stale.lock().unwrap().take() {
                Some(snapshot) => Ok(snapshot),
                None => self.inner.load(),
            }
        }

        fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
            self.inner.save(jobs)
        }

        fn insert(&self, job: Job) -> Result<(), StoreError> {
            self.inner.insert(job)
        }

        fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError> {
            self.inner.compare_and_swap(next, expected_version)
        }
    }

    #[tokio::test]
    async fn losing_a_claim_race_never_executes_the_command() {
        let inner = InMemoryJobStore::arc();
        enqueue(&inner, "contested", "echo once", 3);
        let snapshot = inner.load().unwrap();

        // The other worker wins the claim after our snapshot was taken.
        let mut theirs = snapshot[0].clone();
        theirs.mark_processing(Utc::now()).unwrap();
        inner.compare_and_swap(theirs, 0).unwrap();

        let racing = RacingStore {
            inner: inner.clone(),
            stale: Mutex::new(Some(snapshot)),
        };
        let runner = Arc::new(ScriptedRunner::default());
        let mut worker = Worker::new(racing, runner.clone(), config(2));

        assert_eq!(worker.tick().await, Tick::Contended);
        assert_eq!(worker.stats().claim_conflicts, 1);
        assert!(runner.calls.lock().unwrap().is_empty());

        // Next iteration sees the fresh store: nothing left to claim.
        assert_eq!(worker.tick().await, Tick::Idle);
        assert_eq!(stored(&inner, "contested").state, JobState::Processing);
    }

    #[tokio::test]
    async fn outcome_is_dropped_if_job_changed_underneath() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "moved", "echo", 3);
        let mut worker = Worker::new(store.clone(), Arc::new(ScriptedRunner::default()), config(2));

        let Claim::Won(claimed) = worker.claim(Utc::now()) else {
            panic!("expected to win the claim");
        };

        // Somebody rewrites the record while the command runs.
        let mut tampered = claimed.clone();
        tampered.version += 1;
        store.compare_and_swap(tampered.clone(), claimed.version).unwrap();

        let tick = worker.reconcile(claimed, Ok(String::new()), Utc::now()).await;
        assert!(matches!(tick, Tick::Unreconciled { .. }));
        assert_eq!(stored(&store, "moved"), tampered);
    }

    /// Store whose `compare_and_swap` fails with an i/o error on chosen calls.
    struct FlakyStore {
        inner: Arc<InMemoryJobStore>,
        swaps: Mutex<u32>,
        failing_swaps: Vec<u32>,
    }

    impl JobStore for FlakyStore {
        fn load(&self) -> Result<Vec<Job>, StoreError> {
            self.inner.load()
        }

        fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
            self.inner.save(jobs)
        }

        fn insert(&self, job: Job) -> Result<(), StoreError> {
            self.inner.insert(job)
        }

        fn compare_and_swap(&self, next: Job, expected_version: u64) -> Result<(), StoreError> {
            let call = {
                let mut swaps = self.swaps.lock().unwrap();
                *swaps += 1;
                *swaps
            };
            if self.failing_swaps.contains(&call) {
                return Err(StoreError::Io {
                    path: "jobs.json".into(),
                    source: std::io::Error::other("no space left on device"),
                });
            }
            self.inner.compare_and_swap(next, expected_version)
        }
    }

    #[tokio::test]
    async fn outcome_write_is_retried_after_store_failure() {
        let inner = InMemoryJobStore::arc();
        enqueue(&inner, "j", "echo", 3);
        // Call 1 is the claim; calls 2 and 3 are the first outcome writes.
        let flaky = FlakyStore {
            inner: inner.clone(),
            swaps: Mutex::new(0),
            failing_swaps: vec![2, 3],
        };
        let runner = Arc::new(ScriptedRunner::default());
        let mut worker = Worker::new(flaky, runner.clone(), config(2));

        assert_eq!(
            worker.tick().await,
            Tick::Finished {
                job_id: JobId::parse("j").unwrap(),
                state: JobState::Completed
            }
        );
        assert_eq!(stored(&inner, "j").state, JobState::Completed);
        assert_eq!(*worker.store.swaps.lock().unwrap(), 4);
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
        assert_eq!(worker.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn failed_attempt_survives_store_failure_too() {
        let inner = InMemoryJobStore::arc();
        enqueue(&inner, "j", "fail", 1);
        let flaky = FlakyStore {
            inner: inner.clone(),
            swaps: Mutex::new(0),
            failing_swaps: vec![2],
        };
        let mut worker = Worker::new(flaky, Arc::new(ScriptedRunner::default()), config(2));

        worker.tick().await;
        let job = stored(&inner, "j");
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 1);
    }

    /// Runner whose commands take a while, so cancellation can land mid-run.
    struct SlowRunner {
        delay: Duration,
    }

    #[async_trait]
    impl CommandRunner for SlowRunner {
        async fn run(&self, command: &str) -> Result<String, String> {
            tokio::time::sleep(self.delay).await;
            Ok(command.to_string())
        }
    }

    #[tokio::test]
    async fn cancellation_lets_the_running_command_finish() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "running", "echo one", 3);
        enqueue(&store, "queued", "echo two", 3);
        let runner = SlowRunner {
            delay: Duration::from_millis(300),
        };
        let worker = Worker::new(store.clone(), runner, config(2));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        for _ in 0..200 {
            if stored(&store, "running").state == JobState::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored(&store, "running").state, JobState::Processing);
        shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored(&store, "running").state, JobState::Completed);
        assert_eq!(stored(&store, "queued").state, JobState::Pending);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "a", "echo a", 3);
        let worker = Worker::new(store.clone(), Arc::new(ScriptedRunner::default()), config(2));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        for _ in 0..200 {
            if stored(&store, "a").state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stored(&store, "a").state, JobState::Completed);
    }

    #[tokio::test]
    async fn already_cancelled_worker_claims_nothing() {
        let store = InMemoryJobStore::arc();
        enqueue(&store, "a", "echo a", 3);
        let runner = Arc::new(ScriptedRunner::default());
        let worker = Worker::new(store.clone(), runner.clone(), config(2));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = worker.run(shutdown).await;

        assert_eq!(stats, WorkerStats::default());
        assert_eq!(stored(&store, "a").state, JobState::Pending);
        assert!(runner.calls.lock().unwrap().is_empty());
    }
}
