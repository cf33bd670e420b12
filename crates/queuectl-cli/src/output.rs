//! Table rendering for the operator CLI's human-readable output.

use comfy_table::{presets::UTF8_FULL, Table};
use queuectl_core::{Job, JobState, QueueStats};
use serde_json::Value;

use crate::supervisor::SupervisorStatus;

pub fn render_stats(stats: &QueueStats) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["metric", "value"]);

    for state in JobState::all() {
        table.add_row(vec![state.as_str().to_string(), stats.jobs.get(state).to_string()]);
    }
    table.add_row(vec!["jobs_total".to_string(), stats.jobs.total().to_string()]);
    table.add_row(vec!["workers_active".to_string(), stats.workers_active.to_string()]);
    table.add_row(vec!["workers_total".to_string(), stats.workers_total.to_string()]);

    table
}

pub fn render_jobs(jobs: &[Job]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id",
        "state",
        "attempts/max",
        "command",
        "worker",
        "updated_at",
        "error",
    ]);

    for job in jobs {
        table.add_row(vec![
            job.id.clone(),
            job.state.as_str().to_string(),
            format!("{}/{}", job.attempts, job.max_retries),
            truncate(&job.command, 40),
            job.worker_id.clone().unwrap_or_default(),
            job.updated_at.to_rfc3339(),
            job.error_message.clone().map(|e| truncate(&e, 60)).unwrap_or_default(),
        ]);
    }

    table
}

pub fn render_config(entries: &[(String, Value)]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["key", "value"]);
    for (key, value) in entries {
        table.add_row(vec![key.clone(), value.to_string()]);
    }
    table
}

pub fn render_supervisor_status(status: &SupervisorStatus) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["pid", "tracked", "alive", "worker_id", "status"]);

    for pid in &status.tracked_pids {
        let alive = status.active_pids.contains(pid);
        let worker = status.workers.iter().find(|w| w.pid as u32 == *pid);
        table.add_row(vec![
            pid.to_string(),
            "yes".to_string(),
            if alive { "yes".to_string() } else { "no".to_string() },
            worker.map(|w| w.worker_id.clone()).unwrap_or_default(),
            worker.map(|w| w.status.clone()).unwrap_or_default(),
        ]);
    }

    table
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_noop_under_the_limit() {
        assert_eq!(truncate("short", 40), "short");
    }

    #[test]
    fn truncate_cuts_on_char_boundaries_not_bytes() {
        let s = "é".repeat(41);
        let truncated = truncate(&s, 40);
        assert_eq!(truncated.chars().count(), 41);
        assert!(truncated.ends_with('…'));
    }
}
