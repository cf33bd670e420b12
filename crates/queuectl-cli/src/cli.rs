//! Operator command surface: one `clap` subcommand per row of the
//! table in the workspace spec's external-interfaces section.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "queuectl", about = "A durable, local, shell-command job queue", version)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "queuectl.config.json")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new job to the queue (JSON: {"id", "command", "max_retries"?, ...}).
    Enqueue { job_json: String },

    /// Manage workers.
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Show queue and worker status.
    Status,

    /// List jobs.
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Manage the Dead Letter Queue.
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Start worker processes in the background.
    Start {
        #[arg(long, default_value_t = 1)]
        count: i64,
    },
    /// Stop all running worker processes.
    Stop,
    /// Show which supervised worker processes are still alive.
    Status,
    /// Run a single worker in the foreground (blocking).
    Run {
        #[arg(long = "id")]
        worker_id: Option<String>,
        #[arg(long = "exit-when-idle")]
        exit_when_idle: bool,
        #[arg(long = "max-idle", default_value_t = 10)]
        max_idle: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List jobs in the Dead Letter Queue.
    List {
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Retry a job from the Dead Letter Queue (or from `failed`).
    Retry { job_id: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Get a configuration value, or all values if `key` is omitted.
    Get { key: Option<String> },
    /// Set a configuration value.
    Set { key: String, value: String },
    /// Reset a configuration value (or all values) to its default.
    Reset { key: Option<String> },
}
