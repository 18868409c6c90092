//! Registry pruning: drop old runs together with the files they produced.

use crate::config::Config;
use crate::error::ControllerError;
use crate::model::RunRegistryEntry;
use crate::registry::{self, RunRegistry};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupCriteria {
    pub keep_last: Option<usize>,
    pub older_than: Option<OffsetDateTime>,
}

impl CleanupCriteria {
    pub fn is_empty(&self) -> bool {
        self.keep_last.is_none() && self.older_than.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupPlan {
    pub runs: Vec<RunRegistryEntry>,
    /// Artifact files inside the output directory, resolved.
    pub files: Vec<PathBuf>,
    /// Artifact paths pointing elsewhere (inputs, shared assets). Never deleted.
    pub skipped: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub removed_runs: Vec<String>,
    pub deleted_files: usize,
    pub deleted_dirs: usize,
    pub missing_files: usize,
    pub skipped_files: Vec<PathBuf>,
    pub bytes_freed: u64,
}

/// Parse `--older-than`: a humantime duration (`7d`, `12h`) measured back from
/// `now`, an RFC 3339 timestamp, or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_cutoff(input: &str, now: OffsetDateTime) -> Result<OffsetDateTime> {
    let input = input.trim();
    if let Ok(d) = humantime::parse_duration(input) {
        let d = time::Duration::try_from(d).context("duration out of range")?;
        return Ok(now - d);
    }
    if let Ok(ts) = OffsetDateTime::parse(input, &Rfc3339) {
        return Ok(ts);
    }
    let date = Date::parse(input, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid --older-than value '{input}' (try 7d or 2025-01-31)"))?;
    Ok(date.midnight().assume_utc())
}

/// Run ids become directory names; refuse anything that could escape the
/// output directory.
fn safe_run_dir(output_dir: &Path, run_id: &str) -> Option<PathBuf> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && run_id != "."
        && run_id != "..";
    ok.then(|| output_dir.join(run_id))
}

fn resolve_artifact(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// The artifact's real path if it lies inside `output_dir`. Existing files are
/// judged after symlinks are resolved; missing ones by their lexical path.
fn owned_artifact(root: &Path, output_dir: &Path, artifact: &Path) -> Option<PathBuf> {
    let path = resolve_artifact(root, artifact);
    match path.canonicalize() {
        Ok(real) => {
            let out = output_dir.canonicalize().ok()?;
            real.starts_with(&out).then_some(real)
        }
        Err(_) => {
            let lexical_ok = !path.components().any(|c| matches!(c, Component::ParentDir));
            (lexical_ok && path.starts_with(output_dir)).then_some(path)
        }
    }
}

/// Select the runs to prune. Active runs are never selected. Only artifact
/// files under `output_dir` are scheduled for deletion.
pub fn plan(
    entries: &[RunRegistryEntry],
    criteria: &CleanupCriteria,
    root: &Path,
    output_dir: &Path,
) -> CleanupPlan {
    let mut selected: HashSet<&str> = HashSet::new();
    if let Some(keep) = criteria.keep_last {
        selected.extend(registry::beyond_most_recent(entries, keep).iter().map(|e| e.id()));
    }
    if let Some(cutoff) = criteria.older_than {
        selected.extend(registry::older_than(entries, cutoff).iter().map(|e| e.id()));
    }

    let mut out = CleanupPlan::default();
    for entry in entries.iter().filter(|e| selected.contains(e.id())) {
        if entry.run.is_active() {
            tracing::warn!(run_id = %entry.id(), "skipping active run during cleanup");
            continue;
        }
        for artifact in entry.artifacts.values() {
            match owned_artifact(root, output_dir, artifact) {
                Some(path) => out.files.push(path),
                None => {
                    tracing::warn!(
                        run_id = %entry.id(),
                        path = %artifact.display(),
                        "artifact lies outside the output directory; leaving it in place"
                    );
                    out.skipped.push(artifact.clone());
                }
            }
        }
        if let Some(dir) = safe_run_dir(output_dir, entry.id()) {
            out.dirs.push(dir);
        }
        out.runs.push(entry.clone());
    }
    out
}

pub fn run_cleanup(
    cfg: &Config,
    registry: &RunRegistry,
    criteria: &CleanupCriteria,
    dry_run: bool,
) -> Result<CleanupReport> {
    if criteria.is_empty() {
        return Err(ControllerError::NoCleanupCriteria.into());
    }
    let entries = registry.load()?;
    let plan = plan(&entries, criteria, &cfg.root, &cfg.output_dir);
    let mut report = CleanupReport {
        dry_run,
        removed_runs: plan.runs.iter().map(|e| e.id().to_string()).collect(),
        skipped_files: plan.skipped.clone(),
        ..Default::default()
    };

    for path in &plan.files {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                report.bytes_freed += meta.len();
                if !dry_run {
                    std::fs::remove_file(path)
                        .with_context(|| format!("remove {}", path.display()))?;
                }
                report.deleted_files += 1;
            }
            Ok(_) => {}
            Err(_) => report.missing_files += 1,
        }
    }
    for dir in &plan.dirs {
        if dir.is_dir() {
            if !dry_run {
                std::fs::remove_dir_all(dir)
                    .with_context(|| format!("remove {}", dir.display()))?;
            }
            report.deleted_dirs += 1;
        }
    }

    if !dry_run && !report.removed_runs.is_empty() {
        let ids: HashSet<String> = report.removed_runs.iter().cloned().collect();
        registry.remove(&ids)?;
    }
    tracing::info!(
        dry_run,
        runs = report.removed_runs.len(),
        files = report.deleted_files,
        "cleanup finished"
    );
    Ok(report)
}
