//! `queuectl-core`: job lifecycle building blocks.
//!
//! This crate contains **pure domain** types (no I/O): job records, the job
//! state machine, the retry/backoff policy and the queue configuration values.

pub mod config;
pub mod error;
pub mod id;
pub mod job;
pub mod retry;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use id::JobId;
pub use job::{Job, JobState};
pub use retry::RetryPolicy;
