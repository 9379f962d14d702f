use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "queuectl", version, about = "Local job queue with retries and a dead-letter state")]
pub struct Cli {
    /// Directory holding jobs.json, config.json and worker logs
    #[arg(long, global = true, env = "QUEUECTL_HOME", default_value = ".")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Whether this invocation is a background worker process.
    pub fn is_worker_process(&self) -> bool {
        matches!(
            self.command,
            Command::Worker {
                action: WorkerCommand::Run { .. }
            }
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new job, e.g. '{"id":"job1","command":"sleep 2"}'
    Enqueue {
        /// Job JSON: `command` is required, `id` and `max_retries` optional
        job_json: String,
    },
    /// List jobs, optionally only those in one state
    List {
        /// pending, processing, completed or dead
        #[arg(long)]
        state: Option<String>,
        /// Print the job records as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Start, stop or run workers
    Worker {
        #[command(subcommand)]
        action: WorkerCommand,
    },
    /// Show job counts per state and running workers
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Read or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start background worker processes
    Start {
        #[arg(long, short, default_value_t = 1)]
        count: u32,
    },
    /// Gracefully stop all running workers
    Stop,
    /// Run one worker in the foreground (used by `worker start`)
    #[command(hide = true)]
    Run {
        #[arg(long)]
        id: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print one key, or the whole configuration
    Get { key: Option<String> },
    /// Set a key: base_delay, max_retries, poll_interval or max_delay
    Set { key: String, value: String },
}
