//! Worker process supervision.
//!
//! - `WorkerRegistry`: persisted record of started workers
//! - `ProcessSupervisor`: spawn / signal / liveness of OS processes
//! - `WorkerPool`: start and stop a set of workers through both

pub mod pool;
pub mod registry;
pub mod supervisor;

pub use pool::{PoolError, StopReport, WorkerPool};
pub use registry::{FileWorkerRegistry, InMemoryWorkerRegistry, RegistryError, WorkerHandle, WorkerRegistry};
pub use supervisor::{OsProcessSupervisor, ProcessSupervisor, SignalError, SpawnError};
