//! SQLite implementation of QueueCTL's job/worker store.
//!
//! This crate provides the durable, crash-safe [`Store`] implementation
//! backed by an embedded SQLite database, the equivalent role
//! `seesaw-job-postgres` plays for Postgres in the Seesaw framework, but
//! for a single-node, file-based deployment.
//!
//! # Features
//!
//! - Single conditional `UPDATE ... RETURNING` for leasing, so at most
//!   one caller can ever observe a given row transitioning into
//!   `processing`.
//! - Exponential backoff retry scheduling and a dead-letter queue,
//!   driven by `queuectl_core::policy`.
//! - Worker heartbeats and crash reclaim.
//! - WAL journal mode and a busy timeout so concurrent worker processes
//!   attached to the same file wait out `SQLITE_BUSY` instead of
//!   failing.
//!
//! # Database schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id TEXT PRIMARY KEY,
//!     command TEXT NOT NULL,
//!     state TEXT NOT NULL,
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     started_at TEXT,
//!     completed_at TEXT,
//!     next_retry_at TEXT,
//!     error_message TEXT,
//!     worker_id TEXT,
//!     metadata TEXT
//! );
//! CREATE INDEX idx_jobs_state ON jobs(state);
//! CREATE INDEX idx_jobs_next_retry ON jobs(next_retry_at);
//!
//! CREATE TABLE workers (
//!     worker_id TEXT PRIMARY KEY,
//!     pid INTEGER NOT NULL,
//!     started_at TEXT NOT NULL,
//!     last_heartbeat TEXT NOT NULL,
//!     status TEXT NOT NULL
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queuectl_sqlite::SqliteStore;
//!
//! let store = SqliteStore::connect("queuectl.db").await?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_core::{CreateOutcome, Job, JobCounts, JobState, NewJob, Store, StoreError, WorkerRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

/// SQLite-backed job/worker store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the SQLite database at `path`, run
    /// schema setup, and return a ready-to-use store.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = SqliteStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Build a store from an already-open pool. Useful for tests that
    /// want an in-memory shared-cache database.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = SqliteStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                next_retry_at TEXT,
                error_message TEXT,
                worker_id TEXT,
                metadata TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_next_retry ON jobs(next_retry_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                worker_id TEXT PRIMARY KEY,
                pid INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    worker_id: Option<String>,
    metadata: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = JobState::from_str(&row.state)
            .map_err(|e| StoreError::Serialization(format!("invalid state in row: {e}")))?;
        let metadata = row
            .metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Job {
            id: row.id,
            command: row.command,
            state,
            attempts: row.attempts,
            max_retries: row.max_retries,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            worker_id: row.worker_id,
            metadata,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_job(&self, job: NewJob, now: DateTime<Utc>) -> Result<CreateOutcome, StoreError> {
        let metadata = job
            .metadata
            .map(|v| serde_json::to_string(&v))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, metadata)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?5)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.max_retries)
        .bind(now)
        .bind(metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Ok(CreateOutcome::Duplicate)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn read_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at DESC LIMIT ?2",
                )
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Single conditional `UPDATE ... RETURNING`: the row selection (the
    /// oldest eligible, unowned job) and the ownership transfer happen in
    /// one statement, so at most one caller wins a given row even when
    /// multiple worker processes race against the same database file.
    async fn lease_one(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'processing',
                worker_id = ?1,
                started_at = COALESCE(started_at, ?2),
                updated_at = ?2
            WHERE id = (
                SELECT id FROM jobs
                WHERE (state = 'pending' OR (state = 'failed' AND next_retry_at <= ?2))
                  AND worker_id IS NULL
                ORDER BY created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Job::try_from).transpose()
    }

    async fn mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', attempts = attempts + 1, completed_at = ?2, updated_at = ?2,
                worker_id = NULL, error_message = NULL
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed_for_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed',
                attempts = attempts + 1,
                next_retry_at = ?2,
                error_message = ?3,
                worker_id = NULL,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_dlq(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'dlq', attempts = attempts + 1, error_message = ?2, worker_id = NULL, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn reset_job(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', worker_id = NULL, error_message = NULL, next_retry_at = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn reclaim_worker(&self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending', worker_id = NULL, updated_at = ?2
            WHERE worker_id = ?1 AND state = 'processing'
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn job_counts_by_state(&self) -> Result<JobCounts, StoreError> {
        let rows = sqlx::query("SELECT state, COUNT(*) as count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(db_err)?;
            let count: i64 = row.try_get("count").map_err(db_err)?;
            match JobState::from_str(&state) {
                Ok(JobState::Pending) => counts.pending = count,
                Ok(JobState::Processing) => counts.processing = count,
                Ok(JobState::Completed) => counts.completed = count,
                Ok(JobState::Failed) => counts.failed = count,
                Ok(JobState::Dlq) => counts.dlq = count,
                Err(_) => {}
            }
        }
        Ok(counts)
    }

    async fn register_worker(&self, worker_id: &str, pid: u32, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workers (worker_id, pid, started_at, last_heartbeat, status)
            VALUES (?1, ?2, ?3, ?3, 'active')
            ON CONFLICT(worker_id) DO UPDATE SET
                pid = excluded.pid,
                last_heartbeat = excluded.last_heartbeat,
                status = 'active'
            "#,
        )
        .bind(worker_id)
        .bind(pid as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn heartbeat_worker(&self, worker_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE workers SET last_heartbeat = ?2 WHERE worker_id = ?1")
            .bind(worker_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn deregister_worker(&self, worker_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM workers WHERE worker_id = ?1")
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let rows = sqlx::query("SELECT worker_id, pid, started_at, last_heartbeat, status FROM workers ORDER BY started_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkerRecord {
                    worker_id: row.try_get("worker_id").map_err(db_err)?,
                    pid: row.try_get("pid").map_err(db_err)?,
                    started_at: row.try_get("started_at").map_err(db_err)?,
                    last_heartbeat: row.try_get("last_heartbeat").map_err(db_err)?,
                    status: row.try_get("status").map_err(db_err)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_core::{Config, EnqueueOutcome, FailureDecision, JobState, Queue};
    use std::sync::Arc;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.db");
        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    fn job(id: &str, command: &str) -> serde_json::Value {
        serde_json::json!({"id": id, "command": command})
    }

    #[tokio::test]
    async fn duplicate_job_id_is_rejected() {
        let (store, _dir) = temp_store().await;
        let queue = Queue::new(Arc::new(store), Config::default());

        assert_eq!(queue.enqueue(&job("a", "true")).await.unwrap(), EnqueueOutcome::Created);
        assert_eq!(queue.enqueue(&job("a", "true")).await.unwrap(), EnqueueOutcome::Duplicate);
    }

    // S3: two workers racing to lease the same pending set never both win
    // the same row.
    #[tokio::test]
    async fn concurrent_leases_never_double_assign_a_row() {
        let (store, _dir) = temp_store().await;
        let store = Arc::new(store);
        let queue = Queue::new(Arc::clone(&store) as Arc<dyn queuectl_core::Store>, Config::default());

        for i in 0..20 {
            queue.enqueue(&job(&format!("job-{i}"), "true")).await.unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut won = Vec::new();
                while let Some(job) = store.lease_one(&format!("worker-{w}"), Utc::now()).await.unwrap() {
                    won.push(job.id);
                }
                won
            }));
        }

        let mut all_won = Vec::new();
        for handle in handles {
            all_won.extend(handle.await.unwrap());
        }

        all_won.sort();
        let mut deduped = all_won.clone();
        deduped.dedup();
        assert_eq!(all_won.len(), 20, "every job should be leased exactly once across workers");
        assert_eq!(deduped.len(), 20, "no job id should be leased twice");
    }

    // S5: state survives closing and reopening the database file.
    #[tokio::test]
    async fn state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queuectl.db");

        {
            let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
            let queue = Queue::new(Arc::new(store), Config::default());
            queue.enqueue(&job("persisted", "echo hi")).await.unwrap();
        }

        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        let reopened = store.read_job("persisted").await.unwrap().unwrap();
        assert_eq!(reopened.state, JobState::Pending);
        assert_eq!(reopened.command, "echo hi");
    }

    #[tokio::test]
    async fn reclaim_returns_owned_processing_rows_to_pending() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        queuectl_core::Store::create_job(
            &store,
            queuectl_core::NewJob { id: "r1".into(), command: "true".into(), max_retries: 3, metadata: None },
            now,
        )
        .await
        .unwrap();

        let leased = store.lease_one("stale-worker", now).await.unwrap().unwrap();
        assert_eq!(leased.state, JobState::Processing);

        let reclaimed = store.reclaim_worker("stale-worker", now).await.unwrap();
        assert_eq!(reclaimed, 1);

        let row = store.read_job("r1").await.unwrap().unwrap();
        assert_eq!(row.state, JobState::Pending);
        assert!(row.worker_id.is_none());
    }

    #[tokio::test]
    async fn registering_the_same_worker_twice_is_idempotent() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();
        store.register_worker("w1", 111, now).await.unwrap();
        store.register_worker("w1", 222, now).await.unwrap();

        let workers = store.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].pid, 222);
    }

    // S2: a command that always fails exhausts retries and lands in the DLQ.
    #[tokio::test]
    async fn exhausted_retries_land_in_dlq() {
        let (store, _dir) = temp_store().await;
        let config = Config { max_retries: 2, ..Config::default() };
        let queue = Queue::new(Arc::new(store), config);

        queue.enqueue(&job("flaky", "false")).await.unwrap();

        let outcome = queue.fail("flaky", "boom").await.unwrap();
        assert!(matches!(outcome.action, FailureDecision::Retry));
        assert_eq!(outcome.attempts, 1);

        let outcome = queue.fail("flaky", "boom").await.unwrap();
        assert!(matches!(outcome.action, FailureDecision::Dlq));
        assert_eq!(outcome.attempts, 2);

        let job = queue.get_job("flaky").await.unwrap();
        assert_eq!(job.state, JobState::Dlq);
        assert_eq!(job.attempts, job.max_retries);
    }

    // S6: an operator can requeue a DLQ job for another attempt.
    #[tokio::test]
    async fn dlq_job_can_be_manually_retried() {
        let (store, _dir) = temp_store().await;
        let queue = Queue::new(Arc::new(store), Config::default());
        queue.enqueue(&job("requeue-me", "false")).await.unwrap();

        for _ in 0..4 {
            let _ = queue.fail("requeue-me", "boom").await.unwrap();
        }
        assert_eq!(queue.get_job("requeue-me").await.unwrap().state, JobState::Dlq);

        queue.retry("requeue-me").await.unwrap();
        let job = queue.get_job("requeue-me").await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn retry_from_pending_is_an_illegal_transition() {
        let (store, _dir) = temp_store().await;
        let queue = Queue::new(Arc::new(store), Config::default());
        queue.enqueue(&job("still-pending", "true")).await.unwrap();

        let err = queue.retry("still-pending").await.unwrap_err();
        assert!(matches!(err, queuectl_core::QueueError::IllegalTransition { .. }));
    }

    // S1: a job that succeeds on its first lease lands in `completed`
    // with a single recorded attempt.
    #[tokio::test]
    async fn successful_completion_records_one_attempt() {
        let (store, _dir) = temp_store().await;
        let queue = Queue::new(Arc::new(store), Config::default());
        queue.enqueue(&job("a", "true")).await.unwrap();

        let leased = queue.lease("worker-1").await.unwrap().unwrap();
        queue.complete(&leased.id).await.unwrap();

        let job = queue.get_job("a").await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 1);
        assert!(job.worker_id.is_none());
    }
}
