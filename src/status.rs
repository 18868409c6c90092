//! The polled run-status file and the cancel-request marker beside it.

use crate::model::{RunState, StatusFile};
use crate::storage::{self, now_utc};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Current status document; a missing file reads as "no run".
    pub fn read(&self) -> Result<StatusFile> {
        Ok(storage::read_json(&self.path)?.unwrap_or_else(|| StatusFile::empty(now_utc())))
    }

    pub fn active_run(&self) -> Result<Option<RunState>> {
        Ok(self.read()?.active_run().cloned())
    }

    pub fn write_run(&self, run: &RunState) -> Result<()> {
        storage::atomic_write_json(&self.path, &StatusFile::with_run(run.clone(), now_utc()))
    }
}

/// Request written by `--cancel` and picked up by the controller that owns
/// the active run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub run_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    pub reason: String,
}

pub struct CancelMarker {
    path: PathBuf,
}

impl CancelMarker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn request(&self, run_id: &str, reason: &str) -> Result<()> {
        let req = CancelRequest {
            run_id: run_id.to_string(),
            requested_at: now_utc(),
            reason: reason.to_string(),
        };
        storage::atomic_write_json(&self.path, &req)
    }

    /// Pending request for `run_id`, if any. Requests aimed at another run
    /// are left untouched.
    pub fn pending_for(&self, run_id: &str) -> Result<Option<CancelRequest>> {
        let req: Option<CancelRequest> = storage::read_json(&self.path)?;
        Ok(req.filter(|r| r.run_id == run_id))
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunOptions, RunRequest, RunStatus};

    fn run(id: &str) -> RunState {
        RunState::new(
            id.into(),
            &RunRequest::Narrative {
                script_path: "demo.json".into(),
                options: RunOptions::default(),
            },
            now_utc(),
        )
    }

    #[test]
    fn missing_status_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("run-status.json"));
        let status = store.read().unwrap();
        assert!(status.run.is_none());
        assert!(store.active_run().unwrap().is_none());
    }

    #[test]
    fn finished_run_is_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("run-status.json"));
        let mut r = run("run-1");
        store.write_run(&r).unwrap();
        assert_eq!(store.active_run().unwrap().map(|r| r.id), Some("run-1".into()));

        r.finish(RunStatus::Succeeded, None, Some(0), now_utc());
        store.write_run(&r).unwrap();
        assert!(store.active_run().unwrap().is_none());
        assert_eq!(
            store.read().unwrap().run.map(|r| r.status),
            Some(RunStatus::Succeeded)
        );
    }

    #[test]
    fn cancel_marker_targets_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = CancelMarker::new(dir.path().join("run-cancel.json"));
        assert!(marker.pending_for("run-1").unwrap().is_none());

        marker.request("run-1", "user requested").unwrap();
        assert!(marker.pending_for("run-2").unwrap().is_none());
        let req = marker.pending_for("run-1").unwrap().unwrap();
        assert_eq!(req.reason, "user requested");

        marker.clear().unwrap();
        marker.clear().unwrap();
        assert!(marker.pending_for("run-1").unwrap().is_none());
    }
}
