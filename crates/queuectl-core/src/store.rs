//! The `Store` trait: durable, crash-safe record storage with
//! per-row atomic conditional updates. Concrete backends (e.g.
//! `queuectl-sqlite`) implement this trait; `Queue` is the only caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{CreateOutcome, Job, JobCounts, JobState, NewJob, WorkerRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("failed to (de)serialize metadata: {0}")]
    Serialization(String),
    #[error("job '{0}' not found")]
    NotFound(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new job row. Returns `Duplicate` (not an error) if `id`
    /// already exists.
    async fn create_job(&self, job: NewJob, now: DateTime<Utc>) -> Result<CreateOutcome, StoreError>;

    /// Read a job by id.
    async fn read_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// List jobs, optionally filtered by state, newest first, capped at
    /// `limit`.
    async fn list_jobs(&self, state: Option<JobState>, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Atomically claim the single oldest eligible row (pending, or
    /// failed with `next_retry_at <= now`) that has no owner, and bind it
    /// to `worker_id`. Returns `None` if nothing is eligible right now or
    /// if a racing caller won the row.
    async fn lease_one(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Terminal success transition.
    async fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Failure transition that still has retry budget: increments
    /// `attempts`, schedules `next_retry_at`, clears ownership.
    async fn mark_failed_for_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Failure transition that exhausted the retry budget. Increments
    /// `attempts` for this final attempt, the same way
    /// `mark_failed_for_retry` does, so a DLQ'd job always ends with
    /// `attempts == max_retries`.
    async fn mark_dlq(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Manual-retry transition: back to pending, clearing error and
    /// ownership.
    async fn reset_job(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Return every `processing` row owned by `worker_id` to `pending`,
    /// clearing ownership. Used on graceful shutdown and crash recovery.
    /// Returns the number of rows reclaimed.
    async fn reclaim_worker(&self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Zero-filled counts by state.
    async fn job_counts_by_state(&self) -> Result<JobCounts, StoreError>;

    /// Idempotent worker registration: calling this twice with the same
    /// id leaves exactly one worker row.
    async fn register_worker(&self, worker_id: &str, pid: u32, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn heartbeat_worker(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn deregister_worker(&self, worker_id: &str) -> Result<(), StoreError>;

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError>;
}
