//! Post-run processing.
//!
//! Reads the summary file the pipeline was asked to write, folds its
//! artifacts and warnings into the registry entry, and patches the registry
//! (which re-exports history).

use super::RunContext;
use crate::model::{RunRegistryEntry, RunStatus};
use crate::storage;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PipelineSummary {
    pub artifacts: BTreeMap<String, PathBuf>,
    pub warnings: Vec<String>,
}

/// Pull artifacts and warnings out of a pipeline summary.
///
/// `artifacts` (kind → path) and `warnings` (strings) are read when present.
/// Top-level string fields named `<kind>Path` (`videoPath`, `reportPath`) are
/// accepted as artifacts too, without overriding explicit entries.
pub(crate) fn parse_summary(value: &Value) -> PipelineSummary {
    let mut summary = PipelineSummary::default();
    let Some(obj) = value.as_object() else {
        return summary;
    };
    if let Some(artifacts) = obj.get("artifacts").and_then(Value::as_object) {
        for (kind, path) in artifacts {
            if let Some(path) = path.as_str().filter(|p| !p.is_empty()) {
                summary.artifacts.insert(kind.clone(), PathBuf::from(path));
            }
        }
    }
    for (key, val) in obj {
        let (Some(kind), Some(path)) = (key.strip_suffix("Path"), val.as_str()) else {
            continue;
        };
        if !kind.is_empty() && !path.is_empty() {
            summary
                .artifacts
                .entry(kind.to_string())
                .or_insert_with(|| PathBuf::from(path));
        }
    }
    if let Some(warnings) = obj.get("warnings").and_then(Value::as_array) {
        summary.warnings = warnings
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    summary
}

pub(crate) fn read_summary(path: &Path) -> Result<Option<PipelineSummary>> {
    let value: Option<Value> = storage::read_json(path)?;
    Ok(value.as_ref().map(parse_summary))
}

/// Finalize the registry entry of a finished run.
pub(crate) fn process_run_completion(
    ctx: &RunContext,
    mut entry: RunRegistryEntry,
) -> Result<RunRegistryEntry> {
    let summary_path = ctx.config.summary_path(entry.id());
    match read_summary(&summary_path) {
        Ok(Some(summary)) => {
            for (kind, path) in summary.artifacts {
                entry.artifacts.entry(kind).or_insert(path);
            }
            for w in summary.warnings {
                entry.add_warning(w);
            }
        }
        Ok(None) if entry.run.status == RunStatus::Succeeded => {
            entry.add_warning(format!(
                "pipeline did not write a summary file at {}",
                summary_path.display()
            ));
        }
        Ok(None) => {}
        Err(e) => entry.add_warning(format!("unreadable summary file: {e:#}")),
    }

    let stored = entry.clone();
    let found = ctx.registry.patch(entry.id(), move |e| *e = stored)?;
    if !found {
        tracing::warn!(run_id = %entry.id(), "run vanished from registry; re-recording it");
        ctx.registry.record_start(entry.clone())?;
    }
    tracing::info!(
        run_id = %entry.id(),
        status = %entry.run.status,
        artifacts = entry.artifacts.len(),
        warnings = entry.warnings.len(),
        "run recorded"
    );
    Ok(entry)
}
