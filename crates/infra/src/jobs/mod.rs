//! Job lifecycle: storage, enqueueing, and the worker loop.
//!
//! ## Components
//!
//! - `JobStore`: whole-collection persistence plus atomic insert and
//!   compare-and-swap (file-backed or in-memory)
//! - `JobQueue`: creates jobs and answers read-only queries
//! - `Worker`: claim → execute → reconcile, with retry/backoff and dead-lettering
//! - `CommandRunner`: how a job's command is executed

pub mod file_store;
pub mod queue;
pub mod runner;
pub mod store;
pub mod worker;

pub use file_store::FileJobStore;
pub use queue::{EnqueueError, EnqueueRequest, JobCounts, JobQueue, QueueStatus};
pub use runner::{CommandRunner, ShellRunner};
pub use store::{InMemoryJobStore, JobStore, StoreError};
pub use worker::{Tick, Worker, WorkerConfig, WorkerStats};
