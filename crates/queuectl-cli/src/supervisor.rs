//! Spawns, stops, and monitors a pool of Worker processes, persisting
//! their PIDs to a side file so `stop`/`status` can find them again
//! after the launching `queuectl` process has exited.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use queuectl_core::{Store, WorkerRecord};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

pub struct Supervisor {
    config_path: String,
    pid_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub tracked_pids: Vec<u32>,
    pub active_pids: Vec<u32>,
    pub workers: Vec<WorkerRecord>,
}

impl Supervisor {
    pub fn new(config_path: String) -> Self {
        Supervisor {
            config_path,
            pid_file: PathBuf::from("queuectl.pid"),
        }
    }

    /// Spawn `count` detached worker processes, each re-invoking the
    /// current `queuectl` binary as `worker run --id <id>`. Does not wait
    /// on the children; they are daemons the OS keeps running after this
    /// process exits.
    pub fn start(&self, count: i64) -> Result<Vec<u32>> {
        if !(1..=100).contains(&count) {
            bail!("Worker count must be between 1 and 100");
        }

        let exe = std::env::current_exe().context("resolving current executable path")?;
        let mut pids = Vec::with_capacity(count as usize);

        for i in 1..=count {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let worker_id = format!("worker-{i}-{ts}");

            let child = std::process::Command::new(&exe)
                .arg("--config")
                .arg(&self.config_path)
                .arg("worker")
                .arg("run")
                .arg("--id")
                .arg(&worker_id)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("spawning worker process {worker_id}"))?;

            pids.push(child.id());
            // Intentionally drop `child` without waiting: the process
            // keeps running as a daemon, tracked only by PID from here on.
        }

        self.save_pids(&pids)?;
        Ok(pids)
    }

    /// Signal every tracked, still-live PID with SIGTERM, wait up to
    /// `grace` for exit, then SIGKILL stragglers. Performs an
    /// unconditional reclaim sweep afterward so no row is left owned by
    /// a worker that was hard-killed before it could reclaim itself.
    pub async fn stop(&self, store: &dyn Store, grace: Duration) -> Result<usize> {
        let pids = self.load_pids()?;
        if pids.is_empty() {
            return Ok(0);
        }

        for pid in &pids {
            if is_running(*pid) {
                let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM);
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        let mut stopped = 0usize;
        for pid in &pids {
            loop {
                if !is_running(*pid) {
                    stopped += 1;
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
                    stopped += 1;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        // Unconditional sweep: reclaim and deregister any worker row
        // whose pid we just stopped, regardless of whether that worker's
        // own graceful-shutdown path already ran.
        let workers = store.list_workers().await.unwrap_or_default();
        for worker in workers {
            if pids.contains(&(worker.pid as u32)) {
                let _ = store.reclaim_worker(&worker.worker_id, Utc::now()).await;
                let _ = store.deregister_worker(&worker.worker_id).await;
            }
        }

        self.clear_pids()?;
        Ok(stopped)
    }

    pub async fn status(&self, store: &dyn Store) -> Result<SupervisorStatus> {
        let pids = self.load_pids()?;
        let active_pids: Vec<u32> = pids.iter().copied().filter(|p| is_running(*p)).collect();
        let workers = store.list_workers().await?;
        Ok(SupervisorStatus {
            tracked_pids: pids,
            active_pids,
            workers,
        })
    }

    pub fn default_stop_grace() -> Duration {
        DEFAULT_STOP_GRACE
    }

    fn save_pids(&self, pids: &[u32]) -> Result<()> {
        let contents = pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(&self.pid_file, contents).context("writing worker PID file")
    }

    fn load_pids(&self) -> Result<Vec<u32>> {
        match std::fs::read_to_string(&self.pid_file) {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| l.trim().parse::<u32>().ok())
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).context("reading worker PID file"),
        }
    }

    fn clear_pids(&self) -> Result<()> {
        match std::fs::remove_file(&self.pid_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("clearing worker PID file"),
        }
    }
}

fn is_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
