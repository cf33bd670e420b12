//! The transactional orchestrator: combines `Store` operations with
//! `Policy` decisions. Owns the job state machine described in the
//! workspace spec, nothing outside `Store` and `Queue` writes job rows.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::job::{CreateOutcome, Job, JobCounts, JobState, NewJob, WorkerRecord};
use crate::policy::{backoff_seconds, decide_after_failure, FailureDecision};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),
    #[error("job '{0}' not found")]
    NotFound(String),
    #[error("job '{id}' is in state '{state}' and cannot be retried")]
    IllegalTransition { id: String, state: JobState },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created,
    Duplicate,
}

/// Result of `Queue::fail`.
#[derive(Debug, Clone)]
pub struct FailOutcome {
    pub action: FailureDecision,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub max_retries: i64,
}

/// Aggregate job + worker statistics for the `status` surface.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub jobs: JobCounts,
    pub workers_active: usize,
    pub workers_total: usize,
}

const RESERVED_FIELDS: [&str; 3] = ["id", "command", "max_retries"];

pub struct Queue {
    store: Arc<dyn Store>,
    config: Config,
}

impl Queue {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Queue { store, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate and enqueue a job submitted as a JSON object:
    /// `{id, command, max_retries?, ...metadata}`.
    pub async fn enqueue(&self, job_data: &Value) -> Result<EnqueueOutcome, QueueError> {
        let obj = job_data
            .as_object()
            .ok_or_else(|| QueueError::Validation("job data must be a JSON object".to_string()))?;

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| QueueError::Validation("job must have a non-empty \"id\" field".to_string()))?
            .to_string();

        let command = obj
            .get("command")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                QueueError::Validation("job must have a non-empty \"command\" field".to_string())
            })?
            .to_string();

        let max_retries = match obj.get("max_retries") {
            Some(v) => v
                .as_i64()
                .filter(|n| *n > 0)
                .ok_or_else(|| QueueError::Validation("max_retries must be a positive integer".to_string()))?,
            None => self.config.max_retries,
        };

        let metadata: serde_json::Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let metadata = if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        };

        let new_job = NewJob {
            id,
            command,
            max_retries,
            metadata,
        };

        match self.store.create_job(new_job, Utc::now()).await? {
            CreateOutcome::Created => Ok(EnqueueOutcome::Created),
            CreateOutcome::Duplicate => Ok(EnqueueOutcome::Duplicate),
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, QueueError> {
        self.store
            .read_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub async fn list(&self, state: Option<JobState>, limit: i64) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_jobs(state, limit).await?)
    }

    pub async fn dlq_list(&self, limit: i64) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_jobs(Some(JobState::Dlq), limit).await?)
    }

    /// Thin passthrough to the atomic lease.
    pub async fn lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.store.lease_one(worker_id, Utc::now()).await?)
    }

    pub async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.store.mark_completed(id, Utc::now()).await?;
        Ok(())
    }

    /// Record a failed attempt and decide retry vs DLQ via `Policy`.
    pub async fn fail(&self, id: &str, error: &str) -> Result<FailOutcome, QueueError> {
        let job = self.get_job(id).await?;
        let attempts_after = job.attempts + 1;
        let now = Utc::now();

        match decide_after_failure(attempts_after, job.max_retries) {
            FailureDecision::Retry => {
                let delay = backoff_seconds(attempts_after, self.config.backoff_base, self.config.backoff_max_delay);
                let next_retry_at = now + ChronoDuration::seconds(delay);
                self.store
                    .mark_failed_for_retry(id, next_retry_at, error, now)
                    .await?;
                Ok(FailOutcome {
                    action: FailureDecision::Retry,
                    next_retry_at: Some(next_retry_at),
                    attempts: attempts_after,
                    max_retries: job.max_retries,
                })
            }
            FailureDecision::Dlq => {
                self.store.mark_dlq(id, error, now).await?;
                Ok(FailOutcome {
                    action: FailureDecision::Dlq,
                    next_retry_at: None,
                    attempts: attempts_after,
                    max_retries: job.max_retries,
                })
            }
        }
    }

    /// Manual retry: permitted only from `failed` or `dlq`. Refuses (as
    /// an `IllegalTransition`, not a state change) from any other state.
    pub async fn retry(&self, id: &str) -> Result<(), QueueError> {
        let job = self.get_job(id).await?;
        if !matches!(job.state, JobState::Failed | JobState::Dlq) {
            return Err(QueueError::IllegalTransition { id: id.to_string(), state: job.state });
        }
        self.store.reset_job(id, Utc::now()).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.store.job_counts_by_state().await?;
        let workers: Vec<WorkerRecord> = self.store.list_workers().await?;
        let workers_active = workers.iter().filter(|w| w.status == "active").count();
        Ok(QueueStats {
            jobs,
            workers_active,
            workers_total: workers.len(),
        })
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }
}
