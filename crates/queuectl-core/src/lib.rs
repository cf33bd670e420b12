//! # QueueCTL core
//!
//! The coordination kernel for a durable, single-node, shell-command job
//! queue: the durable job state machine, the atomic lease protocol,
//! retry/backoff/DLQ policy, and the `Store`/`Executor` contracts a
//! concrete backend and a concrete shell runner must satisfy.
//!
//! ## Architecture
//!
//! ```text
//! Producer ──enqueue()──▶ Queue ──create_job()──▶ Store ──▶ pending
//!                            │
//! Worker ──lease()───────────┤
//!                            ▼
//!                       Store.lease_one() ──▶ processing (one worker owns it)
//!                            │
//!                 Executor.execute() (external, arbitrary duration)
//!                            │
//!              ┌─────────────┴─────────────┐
//!         complete()                    fail()
//!              │                             │
//!              ▼                        Policy.decide_after_failure()
//!         completed                    ┌─────┴─────┐
//!                                   retry          dlq
//! ```
//!
//! ## Key invariants
//!
//! 1. `state == processing` ⇔ `worker_id` is set.
//! 2. `attempts <= max_retries` always; DLQ is reached exactly when the
//!    failing attempt would exceed the budget.
//! 3. The lease is the single atomicity-critical operation: for any pair
//!    of concurrent callers, at most one observes a given row
//!    transitioning into `processing`.
//! 4. Reclaim returns every row owned by a dead/stopped worker to
//!    `pending`, clearing ownership.
//!
//! Concrete backends live in sibling crates (e.g. `queuectl-sqlite`);
//! this crate has no I/O of its own beyond `Config`'s file load/save.

mod config;
mod executor;
mod job;
mod policy;
mod queue;
mod store;

pub use config::{Config, ConfigError};
pub use executor::{ExecutionOutcome, Executor};
pub use job::{CreateOutcome, Job, JobCounts, JobState, NewJob, WorkerRecord};
pub use policy::{backoff_seconds, decide_after_failure, FailureDecision};
pub use queue::{EnqueueOutcome, FailOutcome, Queue, QueueError, QueueStats};
pub use store::{Store, StoreError};
