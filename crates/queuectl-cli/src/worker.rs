//! The worker loop: lease, execute, report, heartbeat, and shut down
//! cleanly on signal or idle timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use queuectl_core::{Config, FailureDecision, JobState, Queue};
use tokio_util::sync::CancellationToken;

use crate::executor::ShellExecutor;

const MAX_STDERR_CHARS: usize = 500;

pub struct WorkerOptions {
    pub worker_id: String,
    pub exit_on_idle: bool,
    pub max_idle_seconds: i64,
}

/// Run a single worker to completion. Returns once the loop has
/// gracefully exited (signal, idle timeout, or cancellation).
pub async fn run(queue: Arc<Queue>, config: &Config, options: WorkerOptions, cancel: CancellationToken) {
    let worker_id = options.worker_id;
    let pid = std::process::id();

    if let Err(e) = queue.store().register_worker(&worker_id, pid, Utc::now()).await {
        tracing::error!(worker_id, error = %e, "failed to register worker");
    }
    tracing::info!(worker_id, pid, "worker started");

    let poll_interval = Duration::from_secs(config.worker_poll_interval.max(0) as u64);
    let heartbeat_interval = Duration::from_secs(config.worker_heartbeat_interval.max(0) as u64);
    let job_timeout = Duration::from_secs(config.job_timeout.max(0) as u64);

    let executor = ShellExecutor;
    let mut last_heartbeat = tokio::time::Instant::now();
    let mut idle_since: Option<tokio::time::Instant> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if last_heartbeat.elapsed() >= heartbeat_interval {
            if let Err(e) = queue.store().heartbeat_worker(&worker_id, Utc::now()).await {
                tracing::error!(worker_id, error = %e, "heartbeat failed");
            }
            last_heartbeat = tokio::time::Instant::now();
        }

        let leased = match queue.lease(&worker_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "lease failed, continuing after a brief pause");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }
        };

        match leased {
            Some(job) => {
                idle_since = None;
                process_job(&queue, &executor, &worker_id, &job.id, &job.command, job_timeout).await;
            }
            None => {
                if options.exit_on_idle {
                    let since = idle_since.get_or_insert_with(tokio::time::Instant::now);
                    let idle_elapsed = since.elapsed().as_secs() as i64;
                    if idle_elapsed >= options.max_idle_seconds {
                        let pending = queue
                            .store()
                            .job_counts_by_state()
                            .await
                            .map(|c| c.get(JobState::Pending))
                            .unwrap_or(0);
                        if pending == 0 {
                            tracing::info!(worker_id, idle_elapsed, "exiting after idle timeout");
                            break;
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }

    tracing::info!(worker_id, "worker shutting down");
    if let Err(e) = queue.store().reclaim_worker(&worker_id, Utc::now()).await {
        tracing::error!(worker_id, error = %e, "reclaim on shutdown failed");
    }
    if let Err(e) = queue.store().deregister_worker(&worker_id).await {
        tracing::error!(worker_id, error = %e, "deregister on shutdown failed");
    }
}

async fn process_job(
    queue: &Arc<Queue>,
    executor: &ShellExecutor,
    worker_id: &str,
    job_id: &str,
    command: &str,
    timeout: Duration,
) {
    use queuectl_core::Executor;

    tracing::info!(worker_id, job_id, command, "processing job");
    let outcome = executor.execute(command, timeout).await;

    if outcome.succeeded() {
        tracing::info!(worker_id, job_id, "job completed successfully");
        if let Err(e) = queue.complete(job_id).await {
            tracing::error!(worker_id, job_id, error = %e, "failed to mark job completed");
        }
        return;
    }

    let truncated_stderr: String = outcome.stderr.chars().take(MAX_STDERR_CHARS).collect();
    let error_message = format!("Exit code {}: {}", outcome.exit_code, truncated_stderr);

    match queue.fail(job_id, &error_message).await {
        Ok(result) => match result.action {
            FailureDecision::Retry => {
                tracing::warn!(
                    worker_id,
                    job_id,
                    attempts = result.attempts,
                    max_retries = result.max_retries,
                    next_retry_at = ?result.next_retry_at,
                    "job failed, scheduled for retry"
                );
            }
            FailureDecision::Dlq => {
                tracing::warn!(
                    worker_id,
                    job_id,
                    attempts = result.attempts,
                    "job failed, moved to dead-letter queue"
                );
            }
        },
        Err(e) => {
            tracing::error!(worker_id, job_id, error = %e, "failed to record job failure");
        }
    }
}
