//! Tracing/logging initialization.
//!
//! Everything is written to stderr so that command output on stdout stays
//! machine-readable. `RUST_LOG` overrides the default level.

use tracing_subscriber::EnvFilter;

/// Which kind of process is logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProfile {
    /// Short-lived CLI invocation: only warnings and errors by default.
    Interactive,
    /// Long-running worker whose stderr goes to a log file.
    Worker,
}

impl LogProfile {
    pub fn default_directive(self) -> &'static str {
        match self {
            LogProfile::Interactive => "warn",
            LogProfile::Worker => "info",
        }
    }
}

fn filter(profile: LogProfile) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(profile.default_directive()))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(profile: LogProfile) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(profile))
        .with_writer(std::io::stderr);

    let _ = match profile {
        LogProfile::Interactive => builder.with_target(false).without_time().try_init(),
        // JSON logs + timestamps.
        LogProfile::Worker => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
    };
}
