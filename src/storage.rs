//! File plumbing shared by the status, registry and history writers.
//!
//! Every JSON document the UI may read is written to a sibling temp file and
//! renamed over the target, so a poller never observes a partial write.

use crate::model::RunRegistryEntry;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "-".into())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state");
    path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()))
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = temp_sibling(path);
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("write {}", path.display()));
    }
    Ok(())
}

pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

/// Read a JSON document; a missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

pub fn export_json(path: &Path, entries: &[RunRegistryEntry]) -> Result<()> {
    atomic_write_json(path, entries).context("export json")
}

pub fn export_csv(path: &Path, entries: &[RunRegistryEntry]) -> Result<()> {
    let mut out = String::from(
        "id,pipeline_type,label,status,started_at,finished_at,duration_ms,exit_code,error_message,video,warnings\n",
    );
    for e in entries {
        let run = &e.run;
        let row = [
            run.id.clone(),
            run.pipeline_type.to_string(),
            run.label(),
            run.status.to_string(),
            format_timestamp(run.started_at),
            run.finished_at.map(format_timestamp).unwrap_or_default(),
            run.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
            run.exit_code.map(|c| c.to_string()).unwrap_or_default(),
            run.error_message.clone().unwrap_or_default(),
            e.artifacts
                .get(crate::model::ARTIFACT_VIDEO)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            e.warnings.join("; "),
        ];
        let cells: Vec<String> = row.iter().map(|c| csv_escape(c)).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    atomic_write_bytes(path, out.as_bytes()).context("export csv")
}

fn csv_escape(s: &str) -> String {
    if s.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
