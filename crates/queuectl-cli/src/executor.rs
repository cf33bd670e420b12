//! The production `Executor`: runs a job's command through the shell.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use queuectl_core::{ExecutionOutcome, Executor};
use tokio::process::Command;

pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: e.to_string(),
                };
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecutionOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(e)) => ExecutionOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: e.to_string(),
            },
            Err(_) => ExecutionOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("Command timed out after {} seconds", timeout.as_secs()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_exit_zero() {
        let outcome = ShellExecutor.execute("true", Duration::from_secs(5)).await;
        assert!(outcome.succeeded());
    }

    #[tokio::test]
    async fn captures_nonzero_exit() {
        let outcome = ShellExecutor.execute("exit 7", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_code, 7);
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let outcome = ShellExecutor
            .execute("sleep 5", Duration::from_millis(200))
            .await;
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn captures_stderr_on_spawn_failure_path() {
        let outcome = ShellExecutor
            .execute("nonexistent_xyz_command", Duration::from_secs(5))
            .await;
        assert_ne!(outcome.exit_code, 0);
    }
}
