//! Process-wide logging setup shared by the CLI and the worker processes.

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use self::tracing::LogProfile;

/// Initialize logging for an interactive command (human-readable, `warn`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogProfile::Interactive);
}

/// Initialize logging for a background worker process (JSON, `info`).
pub fn init_worker() {
    tracing::init(LogProfile::Worker);
}
