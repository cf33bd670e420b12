mod cli;
mod executor;
mod logging;
mod output;
mod supervisor;
mod worker;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command, ConfigCommand, DlqCommand, WorkerCommand};
use queuectl_core::{Config, EnqueueOutcome, JobState, Queue, QueueError};
use queuectl_sqlite::SqliteStore;
use supervisor::Supervisor;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let config = Config::load(Path::new(&config_path));
    logging::init(&config.log_level);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.clone();

    match cli.command {
        Command::Config(sub) => return handle_config(&config_path, config, sub),
        Command::Worker(WorkerCommand::Start { count }) => {
            let supervisor = Supervisor::new(config_path);
            let pids = supervisor.start(count)?;
            println!("✓ started {} worker(s): {:?}", pids.len(), pids);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Worker(WorkerCommand::Stop) => {
            let store = Arc::new(SqliteStore::connect(&config.db_path).await?);
            let supervisor = Supervisor::new(config_path);
            let stopped = supervisor.stop(store.as_ref(), Supervisor::default_stop_grace()).await?;
            println!("✓ stopped {stopped} worker(s)");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Worker(WorkerCommand::Status) => {
            let store = Arc::new(SqliteStore::connect(&config.db_path).await?);
            let supervisor = Supervisor::new(config_path);
            let status = supervisor.status(store.as_ref()).await?;
            println!("{}", output::render_supervisor_status(&status));
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let store = Arc::new(SqliteStore::connect(&config.db_path).await?);
    let queue = Arc::new(Queue::new(store, config.clone()));

    let result = match cli.command {
        Command::Enqueue { job_json } => handle_enqueue(&queue, &job_json).await,
        Command::Status => handle_status(&queue).await,
        Command::List { state, limit } => handle_list(&queue, state, limit).await,
        Command::Dlq(sub) => handle_dlq(&queue, sub).await,
        Command::Worker(WorkerCommand::Run { worker_id, exit_when_idle, max_idle }) => {
            handle_worker_run(queue, &config, worker_id, exit_when_idle, max_idle).await
        }
        Command::Worker(_) | Command::Config(_) => unreachable!("handled above"),
    };

    result
}

async fn handle_enqueue(queue: &Queue, job_json: &str) -> anyhow::Result<ExitCode> {
    let value: serde_json::Value = match serde_json::from_str(job_json) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: invalid JSON: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    match queue.enqueue(&value).await {
        Ok(EnqueueOutcome::Created) => {
            println!("✓ job enqueued");
            Ok(ExitCode::SUCCESS)
        }
        Ok(EnqueueOutcome::Duplicate) => {
            println!("✗ job already exists");
            Ok(ExitCode::from(1))
        }
        Err(QueueError::Validation(msg)) => {
            eprintln!("Error: {msg}");
            Ok(ExitCode::from(1))
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(ExitCode::from(1))
        }
    }
}

async fn handle_status(queue: &Queue) -> anyhow::Result<ExitCode> {
    let stats = queue.stats().await?;
    println!("{}", output::render_stats(&stats));
    Ok(ExitCode::SUCCESS)
}

async fn handle_list(queue: &Queue, state: Option<String>, limit: i64) -> anyhow::Result<ExitCode> {
    let state = match state {
        Some(s) => match s.parse::<JobState>() {
            Ok(state) => Some(state),
            Err(e) => {
                eprintln!("Error: {e}");
                return Ok(ExitCode::from(1));
            }
        },
        None => None,
    };

    let jobs = queue.list(state, limit).await?;
    println!("{}", output::render_jobs(&jobs));
    Ok(ExitCode::SUCCESS)
}

async fn handle_dlq(queue: &Queue, sub: DlqCommand) -> anyhow::Result<ExitCode> {
    match sub {
        DlqCommand::List { limit } => {
            let jobs = queue.dlq_list(limit).await?;
            println!("{}", output::render_jobs(&jobs));
            Ok(ExitCode::SUCCESS)
        }
        DlqCommand::Retry { job_id } => match queue.retry(&job_id).await {
            Ok(()) => {
                println!("✓ job '{job_id}' requeued");
                Ok(ExitCode::SUCCESS)
            }
            Err(QueueError::NotFound(id)) => {
                eprintln!("Error: job '{id}' not found");
                Ok(ExitCode::from(1))
            }
            Err(QueueError::IllegalTransition { id, state }) => {
                eprintln!("Error: job '{id}' is in state '{state}' and cannot be retried");
                Ok(ExitCode::from(1))
            }
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(ExitCode::from(1))
            }
        },
    }
}

async fn handle_worker_run(
    queue: Arc<Queue>,
    config: &Config,
    worker_id: Option<String>,
    exit_when_idle: bool,
    max_idle: i64,
) -> anyhow::Result<ExitCode> {
    let worker_id = worker_id.unwrap_or_else(|| format!("worker-{}", std::process::id()));
    let cancel = CancellationToken::new();

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    let options = worker::WorkerOptions {
        worker_id,
        exit_on_idle: exit_when_idle,
        max_idle_seconds: max_idle,
    };

    worker::run(queue, config, options, cancel).await;
    Ok(ExitCode::SUCCESS)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn handle_config(config_path: &str, mut config: Config, sub: ConfigCommand) -> anyhow::Result<ExitCode> {
    let path = Path::new(config_path);
    match sub {
        ConfigCommand::Get { key: Some(key) } => match config.get(&key) {
            Some(value) => {
                println!("{key} = {value}");
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Error: unknown configuration key '{key}'");
                Ok(ExitCode::from(1))
            }
        },
        ConfigCommand::Get { key: None } => {
            println!("{}", output::render_config(&config.get_all()));
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Set { key, value } => {
            let value = parse_config_value(&value);
            match config.set(path, &key, value) {
                Ok(()) => {
                    println!("✓ {key} set");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    Ok(ExitCode::from(1))
                }
            }
        }
        ConfigCommand::Reset { key } => match config.reset(path, key.as_deref()) {
            Ok(()) => {
                println!("✓ configuration reset");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("Error: {e}");
                Ok(ExitCode::from(1))
            }
        },
    }
}

/// Config values arrive on the CLI as plain strings; parse numeric-looking
/// ones to integers so `Config::set`'s numeric-key validation applies.
fn parse_config_value(raw: &str) -> serde_json::Value {
    if let Ok(n) = raw.parse::<i64>() {
        serde_json::Value::from(n)
    } else {
        serde_json::Value::from(raw)
    }
}
