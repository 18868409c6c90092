//! Text summaries for CLI output.
//!
//! This module formats human-readable lines; JSON output goes straight
//! through serde in `cli`.

use crate::cleanup::CleanupReport;
use crate::inventory::Inventory;
use crate::metrics;
use crate::model::{
    RunRegistryEntry, RunState, StatusFile, ARTIFACT_BENCHMARK, ARTIFACT_MANIFEST, ARTIFACT_REPORT,
    ARTIFACT_VIDEO,
};
use crate::storage::format_timestamp;
use std::time::Duration;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn format_ms(ms: u64) -> String {
    // Whole seconds keep the output short; sub-second runs show as 0s.
    humantime::format_duration(Duration::from_secs(ms / 1000)).to_string()
}

/// One-line progress for a run, as shown by `--status --watch`.
pub(crate) fn run_line(run: &RunState) -> String {
    let mut line = format!("[{}] {} {}", run.status, run.id, run.label());
    if let (Some(step), Some(total)) = (run.current_step, run.total_steps) {
        line.push_str(&format!(" step {step}/{total}"));
    }
    if let Some(name) = run.current_step_name.as_deref() {
        line.push_str(&format!(" ({name})"));
    }
    if let Some(p) = run.progress_percent {
        line.push_str(&format!(" {p:.0}%"));
    }
    if let Some(ms) = run.duration_ms {
        line.push_str(&format!(" in {}", format_ms(ms)));
    }
    if let Some(err) = run.error_message.as_deref() {
        line.push_str(&format!(" - {err}"));
    }
    line
}

pub(crate) fn build_status_summary(status: &StatusFile, recent_events: usize) -> TextSummary {
    let mut lines = Vec::new();
    let Some(run) = status.run.as_ref() else {
        lines.push("No run recorded.".to_string());
        return TextSummary { lines };
    };
    lines.push(run_line(run));
    lines.push(format!("Started: {}", format_timestamp(run.started_at)));
    if let Some(finished) = run.finished_at {
        lines.push(format!("Finished: {}", format_timestamp(finished)));
    }
    if let Some(pid) = run.pid {
        lines.push(format!("PID: {pid}"));
    }
    let skip = run.events.len().saturating_sub(recent_events);
    for ev in &run.events[skip..] {
        lines.push(format!(
            "  {} {:?} {}",
            format_timestamp(ev.timestamp),
            ev.kind,
            ev.message
        ));
    }
    TextSummary { lines }
}

pub(crate) fn build_run_summary(entry: &RunRegistryEntry) -> TextSummary {
    let mut lines = vec![run_line(&entry.run)];
    // Well-known kinds first, in pipeline order, then anything else.
    let known = [ARTIFACT_VIDEO, ARTIFACT_MANIFEST, ARTIFACT_BENCHMARK, ARTIFACT_REPORT];
    let ordered = known
        .iter()
        .filter_map(|k| entry.artifacts.get_key_value(*k))
        .chain(entry.artifacts.iter().filter(|(k, _)| !known.contains(&k.as_str())));
    for (kind, path) in ordered {
        lines.push(format!("  {kind}: {}", path.display()));
    }
    for w in &entry.warnings {
        lines.push(format!("  warning: {w}"));
    }
    TextSummary { lines }
}

pub(crate) fn build_list_summary(
    inventory: &Inventory,
    entries: &[RunRegistryEntry],
    limit: usize,
) -> TextSummary {
    let mut lines = Vec::new();
    let join = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };
    lines.push(format!("Pipelines: {}", join(&inventory.pipelines)));
    lines.push(format!("Samples:   {}", join(&inventory.samples)));
    lines.push(format!("Scripts:   {}", join(&inventory.scripts)));

    lines.push(format!("Recent runs ({} total):", entries.len()));
    if entries.is_empty() {
        lines.push("  (none)".to_string());
    }
    for e in entries.iter().take(limit) {
        let mut line = format!("  {} {}", format_timestamp(e.run.started_at), run_line(&e.run));
        if !e.warnings.is_empty() {
            line.push_str(&format!(" [{} warning(s)]", e.warnings.len()));
        }
        lines.push(line);
    }

    let stats = metrics::run_stats(entries);
    if let Some(rate) = stats.success_rate() {
        lines.push(format!(
            "Finished: {} (succeeded {}, failed {}, cancelled {}; {:.0}% success)",
            stats.finished,
            stats.succeeded,
            stats.failed,
            stats.cancelled,
            rate * 100.0
        ));
    }
    if let Some((mean, median, p25, p75)) = stats.duration_secs {
        lines.push(format!(
            "Duration (succeeded): avg {:.1}s med {:.1}s p25 {:.1}s p75 {:.1}s",
            mean, median, p25, p75
        ));
    }
    TextSummary { lines }
}

pub(crate) fn build_cleanup_summary(report: &CleanupReport) -> TextSummary {
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    let mut lines = vec![format!(
        "{verb} {} run(s), {} file(s), {} run dir(s), {:.1} MB",
        report.removed_runs.len(),
        report.deleted_files,
        report.deleted_dirs,
        report.bytes_freed as f64 / 1_000_000.0
    )];
    if report.missing_files > 0 {
        lines.push(format!("{} artifact file(s) were already gone", report.missing_files));
    }
    if !report.skipped_files.is_empty() {
        lines.push(format!(
            "Left {} artifact file(s) outside the output directory in place:",
            report.skipped_files.len()
        ));
        lines.extend(report.skipped_files.iter().map(|p| format!("  {}", p.display())));
    }
    lines.extend(report.removed_runs.iter().map(|id| format!("  {id}")));
    TextSummary { lines }
}
