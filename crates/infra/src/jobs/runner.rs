//! Execution environment for job commands.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

/// Runs a job's command.
///
/// `Ok` carries captured standard output, `Err` a diagnostic. Failures are
/// folded into the job's state by the worker, never propagated further.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, String>;
}

#[async_trait]
impl<R> CommandRunner for Arc<R>
where
    R: CommandRunner + ?Sized,
{
    async fn run(&self, command: &str) -> Result<String, String> {
        (**self).run(command).await
    }
}

/// Runs commands through the platform shell (`sh -c` / `cmd /C`).
///
/// No timeout is applied: a hung command blocks its worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<String, String> {
        let output = shell(command)
            .output()
            .await
            .map_err(|e| format!("failed to spawn command: {e}"))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(format!("command failed with {}", output.status))
        } else {
            Err(stderr)
        }
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
