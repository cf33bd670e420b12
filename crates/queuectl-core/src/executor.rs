//! The `Executor` external collaborator: runs a job's shell command.

use async_trait::async_trait;
use std::time::Duration;

/// Result of running a command to completion (or to its timeout).
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `command` through a shell, bounded by `timeout`. On timeout,
    /// returns exit code -1 and a `"Command timed out after {N}
    /// seconds"` stderr. On spawn failure, returns exit code -1 and the
    /// spawn error's message as stderr.
    async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome;
}
