//! Infrastructure layer: file-backed job store, queue manager, worker loop,
//! worker process supervision, and the persisted configuration.

pub mod config;
pub mod jobs;
pub mod paths;
pub mod workers;

mod fsutil;

pub use config::{ConfigStore, ConfigStoreError};
pub use paths::DataDir;
