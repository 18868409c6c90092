//! Application-level orchestration.
//!
//! This module owns the run lifecycle (validate, start, track, cancel) and the
//! post-run processing that folds pipeline summaries into the registry. CLI
//! code calls into here and only formats the results.

mod cancel;
mod controller;
mod post_process;
mod validate;
mod watch;

pub(crate) use cancel::{cancel_active_run, CancelOutcome};
pub(crate) use controller::{launch, ControlCommand, LaunchOutcome, LaunchSettings};
pub(crate) use watch::watch_status;

use crate::config::Config;
use crate::registry::RunRegistry;
use crate::status::{CancelMarker, StatusStore};
use rand::RngCore;
use time::macros::format_description;
use time::OffsetDateTime;

/// Everything a controller needs to find its state files.
pub(crate) struct RunContext {
    pub config: Config,
    pub status: StatusStore,
    pub registry: RunRegistry,
    pub cancel_marker: CancelMarker,
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        Self {
            status: StatusStore::new(config.status_path()),
            registry: RunRegistry::from_config(&config),
            cancel_marker: CancelMarker::new(config.cancel_path()),
            config,
        }
    }
}

/// Generate a sortable run id, e.g. `run-20250101-120000-3fa2`.
pub(crate) fn gen_run_id(now: OffsetDateTime) -> String {
    let stamp = now
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let suffix = rand::thread_rng().next_u32() & 0xffff;
    format!("run-{stamp}-{suffix:04x}")
}
