//! Plain-text renderings of job records, shared by chat replies and the CLI.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::core::scheduler::JobStatus;
use crate::core::storage::{JobRecord, PluginKind};

pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Records grouped by kind with an enabled/disabled marker.
pub fn format_listing(records: &[JobRecord]) -> String {
    if records.is_empty() {
        return "No plugins registered.".to_string();
    }

    let mut out = String::from("REGISTERED PLUGINS:\n\n");
    for (kind, heading) in [
        (PluginKind::Outgoing, "OUTGOING (Scheduled):"),
        (PluginKind::Incoming, "INCOMING (Handlers):"),
        (PluginKind::Hybrid, "HYBRID (Both):"),
    ] {
        let lines: Vec<String> = records
            .iter()
            .filter(|r| r.plugin_kind == kind)
            .map(|r| {
                let icon = if r.is_active() { "✓" } else { "✗" };
                let description = if r.metadata.description.is_empty() {
                    "No description"
                } else {
                    r.metadata.description.as_str()
                };
                format!("{} {}\n   {}", icon, r.job_id, description)
            })
            .collect();
        if !lines.is_empty() {
            let _ = writeln!(out, "{}", heading);
            let _ = write!(out, "{}\n\n", lines.join("\n"));
        }
    }
    out.push_str("\nUse /plugins status <job_id> for details");
    out
}

pub fn format_status(status: &JobStatus) -> String {
    let record = &status.record;
    let meta = &record.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "PLUGIN STATUS: {}\n", record.job_id);
    let _ = writeln!(
        out,
        "Status: {}",
        if meta.active { "ENABLED" } else { "DISABLED" }
    );
    let _ = writeln!(out, "Type: {}", record.plugin_kind.as_str().to_uppercase());
    let _ = writeln!(out, "Class: {}", record.plugin_class);
    let _ = writeln!(out, "Module: {}", record.plugin_group);
    let _ = writeln!(out, "Description: {}\n", meta.description);
    let _ = writeln!(out, "Created: {}", format_time(&meta.created_at));
    let _ = writeln!(out, "Executions: {}", meta.execution_count);
    let _ = writeln!(
        out,
        "Last run: {}",
        meta.last_execution
            .as_ref()
            .map(format_time)
            .unwrap_or_else(|| "Never".to_string())
    );
    let _ = writeln!(out, "Errors: {}", meta.error_count);
    if let Some(err) = &meta.last_error {
        let _ = writeln!(
            out,
            "Last error: {} ({}, {})",
            err.message,
            err.context,
            format_time(&err.timestamp)
        );
    }

    if record.plugin_kind.has_timer() {
        let _ = write!(out, "\nSchedule: {}", record.schedule);
        match &status.timer {
            Some(timer) => {
                let next = timer
                    .next_fire_time
                    .as_ref()
                    .map(format_time)
                    .unwrap_or_else(|| "Not scheduled".to_string());
                let _ = write!(out, "\nNext run: {}", next);
            }
            None => out.push_str("\nScheduler: Not running"),
        }
    }
    out.trim_end().to_string()
}

/// Summary counts across all records.
pub fn format_digest(records: &[JobRecord]) -> String {
    let enabled = records.iter().filter(|r| r.is_active()).count();
    let disabled = records.len() - enabled;
    let executions: u64 = records.iter().map(|r| r.metadata.execution_count).sum();
    let errors: u64 = records.iter().map(|r| r.metadata.error_count).sum();

    let mut out = String::from("PLUGIN DIGEST\n\n");
    let _ = writeln!(out, "Plugins: {} enabled, {} disabled", enabled, disabled);
    let _ = writeln!(out, "Executions: {}", executions);
    let _ = write!(out, "Errors: {}", errors);

    let failing: Vec<&JobRecord> = records
        .iter()
        .filter(|r| r.metadata.last_error.is_some() && r.metadata.error_count > 0)
        .collect();
    if !failing.is_empty() {
        out.push_str("\n\nWith errors:");
        for r in failing {
            let _ = write!(out, "\n✗ {} ({} errors)", r.job_id, r.metadata.error_count);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::TimerState;
    use crate::core::storage::{LastError, TriggerSpec};

    fn record(job_id: &str, kind: PluginKind, active: bool) -> JobRecord {
        let schedule = if kind.has_timer() {
            TriggerSpec::every_minutes(5)
        } else {
            TriggerSpec::Unscheduled
        };
        JobRecord::new(job_id, kind, "g", "C", schedule, format!("{} desc", job_id), active)
    }

    #[test]
    fn listing_groups_by_kind() {
        let text = format_listing(&[
            record("A_job", PluginKind::Outgoing, true),
            record("B_handler", PluginKind::Incoming, false),
        ]);
        assert!(text.starts_with("REGISTERED PLUGINS:"));
        assert!(text.contains("OUTGOING (Scheduled):\n✓ A_job\n   A_job desc"));
        assert!(text.contains("INCOMING (Handlers):\n✗ B_handler"));
        assert!(!text.contains("HYBRID"));
        assert!(text.ends_with("Use /plugins status <job_id> for details"));
    }

    #[test]
    fn empty_listing() {
        assert_eq!(format_listing(&[]), "No plugins registered.");
    }

    #[test]
    fn status_of_unscheduled_timer() {
        let status = JobStatus {
            record: record("A_job", PluginKind::Outgoing, true),
            loaded: false,
            timer: None,
        };
        let text = format_status(&status);
        assert!(text.contains("Status: ENABLED"));
        assert!(text.contains("Type: OUTGOING"));
        assert!(text.contains("Last run: Never"));
        assert!(text.contains("Schedule: interval (every 5 minutes)"));
        assert!(text.ends_with("Scheduler: Not running"));
    }

    #[test]
    fn status_of_paused_timer() {
        let status = JobStatus {
            record: record("A_job", PluginKind::Outgoing, false),
            loaded: true,
            timer: Some(TimerState {
                next_fire_time: None,
            }),
        };
        let text = format_status(&status);
        assert!(text.contains("Status: DISABLED"));
        assert!(text.ends_with("Next run: Not scheduled"));
    }

    #[test]
    fn handler_status_has_no_schedule() {
        let status = JobStatus {
            record: record("B_handler", PluginKind::Incoming, true),
            loaded: true,
            timer: None,
        };
        assert!(!format_status(&status).contains("Schedule:"));
    }

    #[test]
    fn digest_counts() {
        let mut failing = record("A_job", PluginKind::Outgoing, true);
        failing.metadata.execution_count = 3;
        failing.metadata.error_count = 2;
        failing.metadata.last_error = Some(LastError::new("boom", "sending"));
        let text = format_digest(&[failing, record("B_handler", PluginKind::Incoming, false)]);
        assert!(text.contains("Plugins: 1 enabled, 1 disabled"));
        assert!(text.contains("Executions: 3"));
        assert!(text.contains("✗ A_job (2 errors)"));
    }
}
