//! Run lifecycle controller.
//!
//! `queued → running → {succeeded | failed | cancelled}`. One pipeline
//! process per controller; the status file and registry are the only
//! coordination with the outside world.

use super::{gen_run_id, post_process, validate, RunContext};
use crate::error::{ControllerError, ValidationIssue};
use crate::model::{
    PipelineEvent, PipelineType, RunEventKind, RunRegistryEntry, RunRequest, RunState, RunStatus,
};
use crate::pipeline::{derive_command, PipelineCommand, PipelineControl, PipelineExit, PipelineProcess};
use crate::preflight;
use crate::storage::now_utc;
use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};

/// Commands delivered to a running controller (signal handlers, tests).
#[derive(Debug, Clone)]
pub(crate) enum ControlCommand {
    Cancel { reason: String },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LaunchSettings {
    pub skip_preflight: bool,
}

#[derive(Debug)]
pub(crate) enum LaunchOutcome {
    DryRun { command: PipelineCommand },
    Finished(RunRegistryEntry),
}

/// Refuse to start while another run is queued or running.
pub(crate) fn ensure_idle(ctx: &RunContext) -> Result<()> {
    if let Some(active) = ctx.status.active_run()? {
        return Err(ControllerError::AlreadyActive {
            run_id: active.id,
            status: active.status,
        }
        .into());
    }
    Ok(())
}

/// Validate, check for conflicts, optionally preflight, then run the
/// pipeline to completion. Nothing is written before validation and the
/// conflict check pass.
pub(crate) async fn launch(
    ctx: &RunContext,
    request: RunRequest,
    settings: &LaunchSettings,
    cmd_rx: UnboundedReceiver<ControlCommand>,
) -> Result<LaunchOutcome> {
    let cfg = &ctx.config;
    let request = validate::validate_request(cfg, &request)?;

    if request.options().dry_run {
        let command = derive_command(cfg, &request, "dry-run");
        return Ok(LaunchOutcome::DryRun { command });
    }

    ensure_idle(ctx)?;

    let mut warnings = Vec::new();
    if request.pipeline_type() == PipelineType::Production && !settings.skip_preflight {
        let comfy = preflight::check_comfyui(&cfg.comfy_url, cfg.preflight_timeout).await;
        if !comfy.reachable && cfg.require_comfyui {
            return Err(ControllerError::Validation(vec![ValidationIssue::ComfyUnreachable {
                url: cfg.comfy_url.clone(),
                reason: comfy.error.unwrap_or_default(),
            }])
            .into());
        }
        for w in comfy.warnings(&cfg.comfy_url) {
            tracing::warn!("{w}");
            warnings.push(w);
        }
    }

    let entry = run_to_completion(ctx, request, warnings, cmd_rx).await?;
    Ok(LaunchOutcome::Finished(entry))
}

/// Keeps the in-memory run, the status file and the registry entry in step.
struct RunTracker<'a> {
    ctx: &'a RunContext,
    entry: RunRegistryEntry,
}

impl<'a> RunTracker<'a> {
    fn id(&self) -> &str {
        self.entry.id()
    }

    fn publish_start(&self) -> Result<()> {
        self.ctx.status.write_run(&self.entry.run)?;
        self.ctx.registry.record_start(self.entry.clone())
    }

    fn mark_running(&mut self, pid: Option<u32>) -> Result<()> {
        self.entry.run.mark_running(pid, now_utc());
        self.ctx.status.write_run(&self.entry.run)?;
        let run = self.entry.run.clone();
        self.ctx.registry.patch(self.id(), move |e| e.run = run)?;
        Ok(())
    }

    /// Progress updates are best effort: a failed status write is logged and
    /// the run carries on.
    fn persist_progress(&self) {
        if let Err(e) = self.ctx.status.write_run(&self.entry.run) {
            tracing::warn!(run_id = %self.id(), error = %format!("{e:#}"), "status write failed");
        }
    }

    fn apply(&mut self, event: &PipelineEvent) {
        self.entry.run.apply(event, now_utc());
        match event {
            PipelineEvent::Step { index, total, name } => {
                tracing::info!(run_id = %self.id(), step = index, total, name = ?name, "step");
            }
            PipelineEvent::StepStarted { name } => {
                tracing::info!(run_id = %self.id(), %name, "starting step");
            }
            PipelineEvent::Warning { message } => {
                tracing::warn!(run_id = %self.id(), "{message}");
                self.entry.add_warning(message.clone());
            }
            PipelineEvent::Error { message } => {
                tracing::warn!(run_id = %self.id(), "pipeline reported: {message}");
            }
            PipelineEvent::Artifact { kind, path } => {
                self.entry.artifacts.insert(kind.clone(), path.clone());
            }
            PipelineEvent::Progress { .. } | PipelineEvent::Log { .. } => {}
        }
        self.persist_progress();
    }

    fn note(&mut self, kind: RunEventKind, message: impl Into<String>) {
        self.entry.run.push_event(now_utc(), kind, message);
        self.persist_progress();
    }

    fn finish(&mut self, status: RunStatus, error: Option<String>, exit_code: Option<i32>) -> Result<()> {
        self.entry.run.finish(status, error, exit_code, now_utc());
        self.ctx.status.write_run(&self.entry.run)
    }
}

fn exit_outcome(exit: &Result<PipelineExit>) -> (RunStatus, Option<String>, Option<i32>) {
    match exit {
        Ok(PipelineExit::Exited { code: 0 }) => (RunStatus::Succeeded, None, Some(0)),
        Ok(PipelineExit::Exited { code }) => (
            RunStatus::Failed,
            Some(format!("pipeline exited with code {code}")),
            Some(*code),
        ),
        Ok(PipelineExit::Signaled { signal }) => {
            let msg = match signal {
                Some(sig) => format!("pipeline terminated by signal {sig}"),
                None => "pipeline terminated by a signal".to_string(),
            };
            (RunStatus::Failed, Some(msg), None)
        }
        Ok(PipelineExit::TimedOut { after }) => (
            RunStatus::Failed,
            Some(format!(
                "pipeline timed out after {}",
                humantime::format_duration(*after)
            )),
            None,
        ),
        Ok(PipelineExit::Cancelled { reason }) => (RunStatus::Cancelled, Some(reason.clone()), None),
        Err(e) => (RunStatus::Failed, Some(format!("{e:#}")), None),
    }
}

fn send_cancel(
    ctrl_tx: &UnboundedSender<PipelineControl>,
    tracker: &mut RunTracker<'_>,
    reason: String,
    cancel_deadline: &mut Option<Instant>,
    grace: Duration,
) {
    if cancel_deadline.is_some() {
        return;
    }
    tracing::info!(run_id = %tracker.id(), %reason, "cancel requested");
    tracker.note(RunEventKind::Status, format!("cancel requested: {reason}"));
    let _ = ctrl_tx.send(PipelineControl::Cancel { reason });
    *cancel_deadline = Some(Instant::now() + grace);
}

async fn run_to_completion(
    ctx: &RunContext,
    request: RunRequest,
    warnings: Vec<String>,
    mut cmd_rx: UnboundedReceiver<ControlCommand>,
) -> Result<RunRegistryEntry> {
    let cfg = &ctx.config;
    let now = now_utc();
    let run_id = gen_run_id(now);
    let run_dir = cfg.run_output_dir(&run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("create run directory {}", run_dir.display()))?;

    let mut entry = RunRegistryEntry::new(RunState::new(run_id.clone(), &request, now));
    for w in warnings {
        entry.add_warning(w);
    }
    let mut tracker = RunTracker { ctx, entry };
    tracker.publish_start()?;

    let command = derive_command(cfg, &request, &run_id);
    let options = request.options();
    let timeout = options.timeout().or(cfg.default_timeout);
    tracing::info!(run_id = %run_id, command = %command.display(), ?timeout, "starting pipeline");

    let process = match PipelineProcess::spawn(&command, options.verbose, timeout) {
        // Leave room inside `--cancel`'s own wait for SIGTERM, SIGKILL and the
        // final status write.
        Ok(p) => p.with_kill_grace(cfg.cancel_grace / 2),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %format!("{e:#}"), "pipeline did not start");
            if let Err(write_err) = tracker.finish(RunStatus::Failed, Some(format!("{e:#}")), None) {
                return Err(close_out(ctx, tracker, write_err));
            }
            return post_process::process_run_completion(ctx, tracker.entry);
        }
    };
    if let Err(e) = tracker.mark_running(process.pid()) {
        process.abort().await;
        return Err(close_out(ctx, tracker, e));
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PipelineEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<PipelineControl>();
    let mut handle = Some(tokio::spawn(process.run(event_tx, ctrl_rx)));

    let mut ticker = tokio::time::interval(cfg.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Set once a cancel is sent; if the process outlives it we say so.
    let mut cancel_deadline: Option<Instant> = None;
    let mut commands_open = true;
    let mut events_open = true;

    let exit: Result<PipelineExit> = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(ControlCommand::Cancel { reason }) => {
                        send_cancel(&ctrl_tx, &mut tracker, reason, &mut cancel_deadline, cfg.cancel_grace);
                    }
                    None => commands_open = false,
                }
            }
            ev = event_rx.recv(), if events_open => {
                match ev {
                    Some(ev) => tracker.apply(&ev),
                    None => events_open = false,
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                match handle.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                handle.take();
                break match maybe_done {
                    Ok(res) => res,
                    Err(join) => Err(anyhow::anyhow!("pipeline task failed: {join}")),
                };
            }
            _ = ticker.tick() => {
                match ctx.cancel_marker.pending_for(&run_id) {
                    Ok(Some(req)) => {
                        send_cancel(&ctrl_tx, &mut tracker, req.reason, &mut cancel_deadline, cfg.cancel_grace);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %format!("{e:#}"), "cancel marker unreadable"),
                }
                if let Some(deadline) = cancel_deadline {
                    if Instant::now() >= deadline {
                        tracing::warn!(run_id = %run_id, "still cancelling…");
                        cancel_deadline = Some(Instant::now() + cfg.cancel_grace);
                    }
                }
            }
        }
    };

    while let Ok(ev) = event_rx.try_recv() {
        tracker.apply(&ev);
    }

    let (status, error, exit_code) = exit_outcome(&exit);
    match status {
        RunStatus::Succeeded => tracing::info!(run_id = %run_id, "pipeline succeeded"),
        _ => tracing::warn!(run_id = %run_id, %status, error = ?error, "pipeline did not succeed"),
    }
    if let Err(e) = tracker.finish(status, error, exit_code) {
        return Err(close_out(ctx, tracker, e));
    }

    if matches!(ctx.cancel_marker.pending_for(&run_id), Ok(Some(_))) {
        ctx.cancel_marker.clear()?;
    }
    post_process::process_run_completion(ctx, tracker.entry)
}

/// A state write failed mid-run. Still try to leave the run terminal in both
/// the status file and the registry so later starts are not blocked, then
/// hand back the original error.
fn close_out(ctx: &RunContext, mut tracker: RunTracker<'_>, err: anyhow::Error) -> anyhow::Error {
    let run_id = tracker.id().to_string();
    tracing::error!(run_id = %run_id, error = %format!("{err:#}"), "run state write failed");
    if !tracker.entry.run.status.is_terminal() {
        let message = format!("run state write failed: {err:#}");
        if let Err(e) = tracker.finish(RunStatus::Failed, Some(message), None) {
            tracing::warn!(run_id = %run_id, error = %format!("{e:#}"), "status file still unwritable");
        }
    } else if let Err(e) = ctx.status.write_run(&tracker.entry.run) {
        tracing::warn!(run_id = %run_id, error = %format!("{e:#}"), "status file still unwritable");
    }
    if matches!(ctx.cancel_marker.pending_for(&run_id), Ok(Some(_))) {
        if let Err(e) = ctx.cancel_marker.clear() {
            tracing::debug!(run_id = %run_id, error = %format!("{e:#}"), "cancel marker not cleared");
        }
    }
    if let Err(e) = post_process::process_run_completion(ctx, tracker.entry) {
        tracing::warn!(run_id = %run_id, error = %format!("{e:#}"), "registry not updated");
    }
    err
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{CommandTemplate, Config};
    use crate::model::RunOptions;
    use crate::pipeline::signal;

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: RunContext,
    }

    fn fixture(script: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default().resolve(dir.path());
        cfg.poll_interval = Duration::from_millis(50);
        cfg.cancel_grace = Duration::from_millis(500);
        let sh = CommandTemplate {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into(), "pipeline".into()],
        };
        cfg.production_command = sh.clone();
        cfg.narrative_command = sh;
        std::fs::create_dir_all(cfg.samples_dir.join("sample-001")).unwrap();
        std::fs::create_dir_all(&cfg.output_dir).unwrap();
        Fixture {
            _dir: dir,
            ctx: RunContext::new(cfg),
        }
    }

    fn request(options: RunOptions) -> RunRequest {
        RunRequest::Production {
            pipeline_id: "production".into(),
            sample_id: "sample-001".into(),
            options,
        }
    }

    fn settings() -> LaunchSettings {
        LaunchSettings {
            skip_preflight: true,
        }
    }

    async fn launch_to_end(ctx: &RunContext, req: RunRequest) -> Result<LaunchOutcome> {
        let (_tx, rx) = mpsc::unbounded_channel();
        launch(ctx, req, &settings(), rx).await
    }

    fn finished(outcome: LaunchOutcome) -> RunRegistryEntry {
        match outcome {
            LaunchOutcome::Finished(entry) => entry,
            other => panic!("expected a finished run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_run_is_recorded_with_artifacts() {
        let f = fixture(
            r#"echo 'Step 1/2: keyframes'
echo '{"event":"step","index":2,"total":2,"name":"video"}'
printf '{"artifacts":{"video":"%s/final.mp4"},"warnings":["soft focus"]}' "$DIRECTOR_RUN_DIR" > "$DIRECTOR_SUMMARY_PATH"
exit 0"#,
        );
        let entry = finished(launch_to_end(&f.ctx, request(RunOptions::default())).await.unwrap());

        let status = f.ctx.status.read().unwrap();
        let run = status.run.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.finished_at.is_some());
        assert!(run.duration_ms.is_some());
        assert_eq!(run.current_step, Some(2));
        assert_eq!(run.total_steps, Some(2));
        assert_eq!(run.current_step_name.as_deref(), Some("video"));

        let stored = f.ctx.registry.find(&run.id).unwrap().unwrap();
        assert_eq!(stored, entry);
        assert_eq!(
            stored.artifacts.get("video"),
            Some(&f.ctx.config.run_output_dir(&run.id).join("final.mp4"))
        );
        assert_eq!(stored.warnings, vec!["soft focus".to_string()]);
    }

    #[tokio::test]
    async fn non_zero_exit_marks_failed_with_code() {
        let f = fixture("echo 'Error: no frames rendered'; exit 7");
        let entry = finished(launch_to_end(&f.ctx, request(RunOptions::default())).await.unwrap());
        assert_eq!(entry.run.status, RunStatus::Failed);
        assert_eq!(entry.run.exit_code, Some(7));
        assert!(entry.run.error_message.as_deref().unwrap().contains('7'));

        let run = f.ctx.status.read().unwrap().run.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("7"));
    }

    #[tokio::test]
    async fn missing_sample_writes_nothing() {
        let f = fixture("exit 0");
        let req = RunRequest::Production {
            pipeline_id: "production".into(),
            sample_id: "sample-404".into(),
            options: RunOptions::default(),
        };
        let err = launch_to_end(&f.ctx, req).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::Validation(_))
        ));
        assert!(f.ctx.registry.load().unwrap().is_empty());
        assert!(!f.ctx.config.status_path().exists());
    }

    #[tokio::test]
    async fn missing_script_writes_nothing() {
        let f = fixture("exit 0");
        let req = RunRequest::Narrative {
            script_path: "nowhere.json".into(),
            options: RunOptions::default(),
        };
        assert!(launch_to_end(&f.ctx, req).await.is_err());
        assert!(f.ctx.registry.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_run_blocks_a_new_start() {
        let f = fixture("exit 0");
        let mut existing = RunState::new("run-existing".into(), &request(RunOptions::default()), now_utc());
        existing.mark_running(Some(1), now_utc());
        f.ctx.status.write_run(&existing).unwrap();
        let before = std::fs::read(f.ctx.config.status_path()).unwrap();

        let err = launch_to_end(&f.ctx, request(RunOptions::default())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::AlreadyActive { .. })
        ));
        assert_eq!(std::fs::read(f.ctx.config.status_path()).unwrap(), before);
        assert!(f.ctx.registry.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_spawns_nothing() {
        let f = fixture("exit 1");
        let outcome = launch_to_end(
            &f.ctx,
            request(RunOptions {
                dry_run: true,
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        match outcome {
            LaunchOutcome::DryRun { command } => assert_eq!(command.program, "/bin/sh"),
            other => panic!("expected dry run, got {other:?}"),
        }
        assert!(!f.ctx.config.status_path().exists());
    }

    /// Script that forks a worker the way `npx` does and records its pid.
    const FORKING_PIPELINE: &str = r#"sleep 30 &
echo $! > "$DIRECTOR_RUN_DIR/worker.pid"
wait"#;

    async fn wait_for_worker(ctx: &RunContext, run_id: &str) -> u32 {
        let pid_file = ctx.config.run_output_dir(run_id).join("worker.pid");
        for _ in 0..200 {
            if let Some(pid) = std::fs::read_to_string(&pid_file)
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("worker pid never written");
    }

    async fn wait_for_exit(pid: u32) -> bool {
        for _ in 0..200 {
            if signal::has_exited(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn timeout_marks_failed() {
        let f = fixture("exec sleep 30");
        let entry = finished(
            launch_to_end(
                &f.ctx,
                request(RunOptions {
                    timeout_secs: Some(1),
                    ..Default::default()
                }),
            )
            .await
            .unwrap(),
        );
        assert_eq!(entry.run.status, RunStatus::Failed);
        assert!(entry.run.error_message.unwrap().contains("timed out"));
    }

    async fn wait_until_running(ctx: &RunContext) -> RunState {
        for _ in 0..200 {
            if let Some(run) = ctx.status.read().unwrap().run {
                if run.status == RunStatus::Running {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("run never reached running");
    }

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_command_kills_the_child() {
        let f = fixture("exec sleep 30");
        let ctx = std::sync::Arc::new(f.ctx);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { launch(&ctx, request(RunOptions::default()), &settings(), rx).await })
        };

        let running = wait_until_running(&ctx).await;
        let pid = running.pid.unwrap();
        tx.send(ControlCommand::Cancel {
            reason: "received SIGINT".into(),
        })
        .unwrap();

        let entry = finished(task.await.unwrap().unwrap());
        assert_eq!(entry.run.status, RunStatus::Cancelled);
        assert_eq!(ctx.status.read().unwrap().run.unwrap().status, RunStatus::Cancelled);
        assert!(!process_alive(pid));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_stops_forked_workers() {
        let f = fixture(FORKING_PIPELINE);
        let ctx = std::sync::Arc::new(f.ctx);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { launch(&ctx, request(RunOptions::default()), &settings(), rx).await })
        };

        let running = wait_until_running(&ctx).await;
        let worker = wait_for_worker(&ctx, &running.id).await;
        tx.send(ControlCommand::Cancel {
            reason: "received SIGTERM".into(),
        })
        .unwrap();

        let entry = finished(task.await.unwrap().unwrap());
        assert_eq!(entry.run.status, RunStatus::Cancelled);
        assert!(wait_for_exit(worker).await, "worker {worker} survived the cancel");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_stops_forked_workers() {
        let f = fixture(FORKING_PIPELINE);
        let ctx = std::sync::Arc::new(f.ctx);
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                launch_to_end(
                    &ctx,
                    request(RunOptions {
                        timeout_secs: Some(1),
                        ..Default::default()
                    }),
                )
                .await
            })
        };

        let running = wait_until_running(&ctx).await;
        let worker = wait_for_worker(&ctx, &running.id).await;
        let entry = finished(task.await.unwrap().unwrap());
        assert_eq!(entry.run.status, RunStatus::Failed);
        assert!(wait_for_exit(worker).await, "worker {worker} survived the timeout");
    }

    #[tokio::test]
    async fn unwritable_status_still_closes_the_registry_entry() {
        // The pipeline runs from the project root; replace the status file
        // with a non-empty directory so the final status write fails.
        let f = fixture(
            r#"sleep 0.3
rm -f public/run-status.json
mkdir -p public/run-status.json/blocked
exit 0"#,
        );
        let err = launch_to_end(&f.ctx, request(RunOptions::default())).await.unwrap_err();
        assert!(!err.to_string().is_empty());

        let entries = f.ctx.registry.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run.status, RunStatus::Succeeded);
        assert!(entries[0].run.finished_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_marker_is_honoured() {
        let f = fixture("exec sleep 30");
        let ctx = std::sync::Arc::new(f.ctx);
        let (_tx, rx) = mpsc::unbounded_channel();
        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { launch(&ctx, request(RunOptions::default()), &settings(), rx).await })
        };

        let running = wait_until_running(&ctx).await;
        ctx.cancel_marker.request(&running.id, "cancelled by operator").unwrap();

        let entry = finished(task.await.unwrap().unwrap());
        assert_eq!(entry.run.status, RunStatus::Cancelled);
        assert_eq!(entry.run.error_message.as_deref(), Some("cancelled by operator"));
        assert!(ctx.cancel_marker.pending_for(&running.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn spawn_failure_marks_failed() {
        let mut f = fixture("exit 0");
        f.ctx.config.production_command = CommandTemplate {
            program: "/definitely/not/a/program".into(),
            args: vec![],
        };
        let entry = finished(launch_to_end(&f.ctx, request(RunOptions::default())).await.unwrap());
        assert_eq!(entry.run.status, RunStatus::Failed);
        assert!(entry.run.error_message.unwrap().contains("failed to spawn"));
        assert!(f.ctx.status.active_run().unwrap().is_none());
    }
}
