//! `--cancel` from a second invocation.
//!
//! The controller that owns the run watches for the cancel marker; this side
//! drops the marker and waits for the status file to turn terminal. If
//! nothing answers within the grace period the owning controller is assumed
//! dead: its pipeline is signalled directly and the run is closed out here.

use super::RunContext;
use crate::error::ControllerError;
use crate::model::{RunState, RunStatus};
use crate::pipeline::signal::{self, Signal};
use crate::storage::now_utc;
use anyhow::Result;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) enum CancelOutcome {
    /// The owning controller stopped the run.
    Acknowledged(RunState),
    /// No controller responded; the run was marked cancelled in place.
    MarkedStale(RunState),
}

pub(crate) async fn cancel_active_run(ctx: &RunContext, reason: &str) -> Result<CancelOutcome> {
    let Some(active) = ctx.status.active_run()? else {
        return Err(ControllerError::NothingToCancel.into());
    };
    tracing::info!(run_id = %active.id, "requesting cancel");
    ctx.cancel_marker.request(&active.id, reason)?;

    let deadline = Instant::now() + ctx.config.cancel_grace;
    loop {
        tokio::time::sleep(ctx.config.poll_interval).await;
        match ctx.status.read()?.run {
            Some(run) if run.id == active.id && run.is_active() => {}
            Some(run) if run.id == active.id => {
                ctx.cancel_marker.clear()?;
                return Ok(CancelOutcome::Acknowledged(run));
            }
            // Status now belongs to something else; ours is gone.
            _ => {
                ctx.cancel_marker.clear()?;
                return Ok(CancelOutcome::Acknowledged(active));
            }
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    tracing::warn!(run_id = %active.id, "controller did not respond; marking run cancelled");
    let mut run = ctx
        .status
        .read()?
        .run
        .filter(|r| r.id == active.id)
        .unwrap_or(active);
    if let Some(pid) = run.pid {
        stop_orphan(&run.id, pid, ctx.config.cancel_grace / 2).await;
    }
    run.finish(
        RunStatus::Cancelled,
        Some(format!("{reason} (controller did not respond)")),
        None,
        now_utc(),
    );
    ctx.status.write_run(&run)?;
    let stored = run.clone();
    ctx.registry.patch(&run.id, move |e| e.run = stored)?;
    ctx.cancel_marker.clear()?;
    Ok(CancelOutcome::MarkedStale(run))
}

/// SIGTERM the pipeline a dead controller left behind, then SIGKILL it if it
/// is still there after `grace`.
async fn stop_orphan(run_id: &str, pid: u32, grace: Duration) {
    match signal::signal_tree(pid, Signal::Term) {
        Ok(true) => tracing::info!(run_id, pid, "sent SIGTERM to orphaned pipeline"),
        Ok(false) => {
            tracing::debug!(run_id, pid, "pipeline process already gone");
            return;
        }
        Err(e) => {
            tracing::warn!(run_id, pid, error = %e, "could not signal orphaned pipeline");
            return;
        }
    }
    tokio::time::sleep(grace).await;
    if signal::is_alive(pid) {
        if let Err(e) = signal::signal_tree(pid, Signal::Kill) {
            tracing::warn!(run_id, pid, error = %e, "could not kill orphaned pipeline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{RunOptions, RunRegistryEntry, RunRequest};
    use std::time::Duration;

    fn ctx(dir: &std::path::Path) -> RunContext {
        let mut cfg = Config::default().resolve(dir);
        cfg.poll_interval = Duration::from_millis(20);
        cfg.cancel_grace = Duration::from_millis(100);
        RunContext::new(cfg)
    }

    fn running(id: &str) -> RunState {
        let mut run = RunState::new(
            id.into(),
            &RunRequest::Narrative {
                script_path: "demo.json".into(),
                options: RunOptions::default(),
            },
            now_utc(),
        );
        run.mark_running(None, now_utc());
        run
    }

    #[tokio::test]
    async fn nothing_to_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let err = cancel_active_run(&ctx(dir.path()), "stop").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::NothingToCancel)
        ));
    }

    #[tokio::test]
    async fn stale_run_is_closed_out() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let run = running("run-stale");
        ctx.status.write_run(&run).unwrap();
        ctx.registry.record_start(RunRegistryEntry::new(run)).unwrap();

        let outcome = cancel_active_run(&ctx, "cancelled by operator").await.unwrap();
        let CancelOutcome::MarkedStale(run) = outcome else {
            panic!("expected stale outcome");
        };
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(
            ctx.status.read().unwrap().run.unwrap().status,
            RunStatus::Cancelled
        );
        assert_eq!(
            ctx.registry.find("run-stale").unwrap().unwrap().run.status,
            RunStatus::Cancelled
        );
        assert!(ctx.cancel_marker.pending_for("run-stale").unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_run_signals_its_pipeline() {
        use std::os::unix::process::{CommandExt, ExitStatusExt};

        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let mut orphan = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let mut run = running("run-orphan");
        run.pid = Some(orphan.id());
        ctx.status.write_run(&run).unwrap();
        ctx.registry.record_start(RunRegistryEntry::new(run)).unwrap();

        let outcome = cancel_active_run(&ctx, "cancelled by operator").await.unwrap();
        assert!(matches!(outcome, CancelOutcome::MarkedStale(_)));

        let started = std::time::Instant::now();
        let status = loop {
            if let Some(status) = orphan.try_wait().unwrap() {
                break status;
            }
            if started.elapsed() > Duration::from_secs(5) {
                let _ = orphan.kill();
                panic!("orphaned pipeline still running after cancel");
            }
            std::thread::sleep(Duration::from_millis(20));
        };
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn acknowledged_when_controller_finishes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = std::sync::Arc::new(ctx(dir.path()));
        ctx.status.write_run(&running("run-live")).unwrap();

        // Stand-in for the owning controller.
        let owner = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(req) = ctx.cancel_marker.pending_for("run-live").unwrap() {
                        let mut run = ctx.status.read().unwrap().run.unwrap();
                        run.finish(RunStatus::Cancelled, Some(req.reason), None, now_utc());
                        ctx.status.write_run(&run).unwrap();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let outcome = cancel_active_run(&ctx, "cancelled by operator").await.unwrap();
        owner.await.unwrap();
        assert!(matches!(outcome, CancelOutcome::Acknowledged(ref r) if r.status == RunStatus::Cancelled));
    }
}
