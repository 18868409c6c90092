use crate::model::{RunStatus, StatusFile};
use crate::status::StatusStore;
use anyhow::Result;
use std::time::Duration;

/// What has to change in the status file for a watcher to print again.
#[derive(Debug, Clone, PartialEq)]
struct Fingerprint {
    run_id: Option<String>,
    status: Option<RunStatus>,
    events: usize,
    progress: Option<u32>,
}

fn fingerprint(status: &StatusFile) -> Fingerprint {
    let run = status.run.as_ref();
    Fingerprint {
        run_id: run.map(|r| r.id.clone()),
        status: run.map(|r| r.status),
        events: run.map(|r| r.events.len()).unwrap_or(0),
        progress: run.and_then(|r| r.progress_percent).map(|p| p.round() as u32),
    }
}

/// Poll the status file until there is no active run, calling `on_change`
/// for the first reading and every reading that differs from the last one.
/// Returns the final reading.
pub(crate) async fn watch_status<F>(store: &StatusStore, interval: Duration, mut on_change: F) -> Result<StatusFile>
where
    F: FnMut(&StatusFile),
{
    let mut last: Option<Fingerprint> = None;
    loop {
        let status = store.read()?;
        let fp = fingerprint(&status);
        if last.as_ref() != Some(&fp) {
            on_change(&status);
            last = Some(fp);
        }
        if status.active_run().is_none() {
            return Ok(status);
        }
        tokio::time::sleep(interval).await;
    }
}
