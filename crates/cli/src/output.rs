//! Human-readable rendering of command results.

use std::fmt::Write as _;

use chrono::SecondsFormat;

use queuectl_core::{Job, JobState};
use queuectl_infra::jobs::QueueStatus;
use queuectl_infra::workers::{StopReport, WorkerHandle};

const COMMAND_WIDTH: usize = 40;

pub fn job_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs found.\n".to_string();
    }

    let rows: Vec<[String; 5]> = jobs
        .iter()
        .map(|job| {
            [
                job.id.to_string(),
                job.state.to_string(),
                format!("{}/{}", job.attempts, job.max_retries),
                job.next_run_at
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| "-".to_string()),
                truncate(&job.command, COMMAND_WIDTH),
            ]
        })
        .collect();

    let header = ["ID", "STATE", "ATTEMPTS", "NEXT RUN", "COMMAND"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header.map(str::to_string), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let last = cells.len() - 1;
    for (i, (cell, width)) in cells.iter().zip(widths.iter().copied()).enumerate() {
        if i == last {
            out.push_str(cell);
        } else {
            let _ = write!(out, "{cell:<width$}  ");
        }
    }
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

pub fn status(status: &QueueStatus) -> String {
    let mut out = String::from("Jobs:\n");
    for state in JobState::ALL {
        let _ = writeln!(out, "  {:<11} {}", state.as_str(), status.counts_by_state.get(state));
    }

    let _ = write!(out, "Workers: {} active", status.active_worker_count);
    if !status.active_worker_ids.is_empty() {
        let pids: Vec<String> = status.active_worker_ids.iter().map(u32::to_string).collect();
        let _ = write!(out, " (pids {})", pids.join(", "));
    }
    out.push('\n');
    out
}

pub fn started(handles: &[WorkerHandle]) -> String {
    let mut out = format!("Started {} worker(s)\n", handles.len());
    for h in handles {
        let _ = writeln!(out, "  worker {} (pid {})", h.worker_id, h.pid);
    }
    out
}

pub fn stopped(report: &StopReport) -> String {
    if report.signalled.is_empty() && report.already_gone.is_empty() {
        return "No workers running.\n".to_string();
    }
    let mut out = format!("Sent stop signal to {} worker(s)\n", report.signalled.len());
    if !report.already_gone.is_empty() {
        let _ = writeln!(out, "{} worker(s) had already exited", report.already_gone.len());
    }
    out
}
