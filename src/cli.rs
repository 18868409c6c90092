use crate::cleanup::{self, CleanupCriteria};
use crate::config::Config;
use crate::error::{ControllerError, ValidationIssue};
use crate::model::{PipelineType, RunOptions, RunRequest, RunStatus, TemporalMode};
use crate::orchestrator::{self, CancelOutcome, ControlCommand, LaunchOutcome, LaunchSettings, RunContext};
use crate::storage::now_utc;
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Exit code for a run that ended cancelled (128 + SIGINT).
pub const EXIT_CANCELLED: i32 = 130;

const LIST_RECENT_RUNS: usize = 10;
const STATUS_RECENT_EVENTS: usize = 10;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "director-runctl",
    version,
    about = "Start, track, cancel and clean up video pipeline runs"
)]
pub struct Cli {
    /// Pipeline type to run
    #[arg(long = "type", value_enum, default_value_t = PipelineType::Production)]
    pub pipeline_type: PipelineType,

    /// Production pipeline id
    #[arg(long, default_value = "production")]
    pub pipeline: String,

    /// Sample id (a directory under the samples dir); production only
    #[arg(long)]
    pub sample: Option<String>,

    /// Narrative script path; narrative only
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Temporal regularization mode passed through to the pipeline
    #[arg(long, value_enum)]
    pub temporal: Option<TemporalMode>,

    /// Verbose pipeline output and debug logging
    #[arg(long)]
    pub verbose: bool,

    /// Validate and print the pipeline command (or cleanup plan) without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Wall-clock timeout for the pipeline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// List pipelines, samples, scripts and recent runs
    #[arg(long, conflicts_with_all = ["status", "cancel", "cleanup"])]
    pub list: bool,

    /// Print the current run status
    #[arg(long, conflicts_with_all = ["cancel", "cleanup"])]
    pub status: bool,

    /// With --status: keep polling until the run finishes
    #[arg(long, requires = "status")]
    pub watch: bool,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Cancel the active run
    #[arg(long, conflicts_with = "cleanup")]
    pub cancel: bool,

    /// Remove old runs from the registry together with their files
    #[arg(long)]
    pub cleanup: bool,

    /// With --cleanup: keep the N most recent runs
    #[arg(long, requires = "cleanup")]
    pub keep_last: Option<usize>,

    /// With --cleanup: remove runs started before this (e.g. 7d, 2025-01-31, RFC 3339)
    #[arg(long, requires = "cleanup")]
    pub older_than: Option<String>,

    /// Config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project root; relative paths in the config are anchored here
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Skip the ComfyUI reachability check
    #[arg(long)]
    pub skip_preflight: bool,

    /// ComfyUI base URL (overrides config and DIRECTOR_COMFY_URL)
    #[arg(long)]
    pub comfy_url: Option<String>,

    /// Export the run registry as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the run registry as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

/// Build the config from `--root`, `--config`, the environment and flag overrides.
pub fn build_config(args: &Cli) -> Result<Config> {
    let root = match args.root.clone() {
        Some(r) => r,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let mut cfg = Config::load(args.config.as_deref(), &root)?;
    if let Some(url) = args.comfy_url.as_ref() {
        cfg.comfy_url = url.clone();
    }
    Ok(cfg)
}

/// Turn the flat flag set into a typed request.
pub fn build_request(args: &Cli) -> Result<RunRequest, ControllerError> {
    let options = RunOptions {
        temporal: args.temporal,
        verbose: args.verbose,
        dry_run: args.dry_run,
        timeout_secs: args.timeout,
    };
    match args.pipeline_type {
        PipelineType::Production => {
            let sample_id = args.sample.clone().ok_or_else(|| {
                ControllerError::Validation(vec![ValidationIssue::MissingFlag {
                    flag: "sample",
                    pipeline_type: PipelineType::Production,
                }])
            })?;
            Ok(RunRequest::Production {
                pipeline_id: args.pipeline.clone(),
                sample_id,
                options,
            })
        }
        PipelineType::Narrative => {
            let script_path = args.script.clone().ok_or_else(|| {
                ControllerError::Validation(vec![ValidationIssue::MissingFlag {
                    flag: "script",
                    pipeline_type: PipelineType::Narrative,
                }])
            })?;
            Ok(RunRequest::Narrative {
                script_path,
                options,
            })
        }
    }
}

/// Forward SIGINT/SIGTERM to the controller as cancel commands.
fn spawn_signal_forwarder(tx: mpsc::UnboundedSender<ControlCommand>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler not installed");
                None
            }
        };
        loop {
            #[cfg(unix)]
            let reason = tokio::select! {
                r = tokio::signal::ctrl_c() => match r {
                    Ok(()) => "received SIGINT",
                    Err(_) => return,
                },
                _ = async {
                    match term.as_mut() {
                        Some(s) => { s.recv().await; }
                        None => futures::future::pending::<()>().await,
                    }
                } => "received SIGTERM",
            };
            #[cfg(not(unix))]
            let reason = match tokio::signal::ctrl_c().await {
                Ok(()) => "received SIGINT",
                Err(_) => return,
            };
            if tx
                .send(ControlCommand::Cancel {
                    reason: reason.to_string(),
                })
                .is_err()
            {
                return;
            }
        }
    })
}

/// Exit code for a finished run.
pub fn exit_code_for(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::Cancelled => EXIT_CANCELLED,
        RunStatus::Failed | RunStatus::Queued | RunStatus::Running => 1,
    }
}

pub async fn run(args: Cli) -> Result<i32> {
    let cfg = build_config(&args)?;
    let ctx = RunContext::new(cfg);
    let (out_tx, out_handle) = spawn_output_writer();

    let result = dispatch(&args, &ctx, &out_tx).await;
    // Exports run after any command, including a failed run.
    let exported = match &result {
        Ok(_) => handle_exports(&args, &ctx),
        Err(_) => Ok(()),
    };

    drop(out_tx);
    let _ = out_handle.await;
    let code = result?;
    exported?;
    Ok(code)
}

async fn dispatch(
    args: &Cli,
    ctx: &RunContext,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<i32> {
    if args.list {
        return run_list(args, ctx, out_tx);
    }
    if args.status {
        return run_status(args, ctx, out_tx).await;
    }
    if args.cancel {
        return run_cancel(args, ctx, out_tx).await;
    }
    if args.cleanup {
        return run_cleanup(args, ctx, out_tx);
    }
    run_pipeline(args, ctx, out_tx).await
}

fn emit(out_tx: &mpsc::UnboundedSender<OutputLine>, summary: TextSummary) {
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
}

fn emit_json<T: serde::Serialize + ?Sized>(
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    value: &T,
    pretty: bool,
) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    let _ = out_tx.send(OutputLine::Stdout(out));
    Ok(())
}

fn run_list(args: &Cli, ctx: &RunContext, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<i32> {
    let inventory = crate::inventory::gather(&ctx.config)?;
    let entries = ctx.registry.load()?;
    if args.json {
        let history = crate::registry::history_projection(&entries, ctx.config.history_cap, now_utc());
        emit_json(
            out_tx,
            &serde_json::json!({ "inventory": inventory, "history": history }),
            true,
        )?;
    } else {
        emit(
            out_tx,
            text_summary::build_list_summary(&inventory, &entries, LIST_RECENT_RUNS),
        );
    }
    Ok(0)
}

async fn run_status(args: &Cli, ctx: &RunContext, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<i32> {
    if !args.watch {
        let status = ctx.status.read()?;
        if args.json {
            emit_json(out_tx, &status, true)?;
        } else {
            emit(out_tx, text_summary::build_status_summary(&status, STATUS_RECENT_EVENTS));
        }
        return Ok(0);
    }

    let json = args.json;
    let last = orchestrator::watch_status(&ctx.status, ctx.config.poll_interval, |status| {
        if json {
            // One object per line so the stream can be piped.
            if let Ok(line) = serde_json::to_string(status) {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        } else {
            let line = match status.run.as_ref() {
                Some(run) => text_summary::run_line(run),
                None => "No run recorded.".to_string(),
            };
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    })
    .await?;
    Ok(last.run.map(|r| exit_code_for(r.status)).unwrap_or(0))
}

async fn run_cancel(args: &Cli, ctx: &RunContext, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<i32> {
    let outcome = orchestrator::cancel_active_run(ctx, "cancelled via --cancel").await?;
    let (run, note) = match &outcome {
        CancelOutcome::Acknowledged(run) => (run, "cancelled"),
        CancelOutcome::MarkedStale(run) => (run, "marked cancelled (no controller responded)"),
    };
    if args.json {
        emit_json(out_tx, run, true)?;
    } else {
        let _ = out_tx.send(OutputLine::Stdout(format!("{}: {note}", run.id)));
        let _ = out_tx.send(OutputLine::Stdout(text_summary::run_line(run)));
    }
    Ok(0)
}

fn run_cleanup(args: &Cli, ctx: &RunContext, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<i32> {
    let older_than = args
        .older_than
        .as_deref()
        .map(|s| cleanup::parse_cutoff(s, now_utc()))
        .transpose()?;
    let criteria = CleanupCriteria {
        keep_last: args.keep_last,
        older_than,
    };
    let report = cleanup::run_cleanup(&ctx.config, &ctx.registry, &criteria, args.dry_run)?;
    if args.json {
        emit_json(
            out_tx,
            &serde_json::json!({
                "dryRun": report.dry_run,
                "removedRuns": report.removed_runs,
                "deletedFiles": report.deleted_files,
                "deletedDirs": report.deleted_dirs,
                "missingFiles": report.missing_files,
                "skippedFiles": report.skipped_files,
                "bytesFreed": report.bytes_freed,
            }),
            true,
        )?;
    } else {
        emit(out_tx, text_summary::build_cleanup_summary(&report));
    }
    Ok(0)
}

async fn run_pipeline(args: &Cli, ctx: &RunContext, out_tx: &mpsc::UnboundedSender<OutputLine>) -> Result<i32> {
    let request = build_request(args)?;
    let settings = LaunchSettings {
        skip_preflight: args.skip_preflight,
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ControlCommand>();
    let signals = spawn_signal_forwarder(cmd_tx);
    let outcome = orchestrator::launch(ctx, request, &settings, cmd_rx).await;
    signals.abort();

    match outcome? {
        LaunchOutcome::DryRun { command } => {
            if args.json {
                emit_json(
                    out_tx,
                    &serde_json::json!({
                        "program": command.program,
                        "args": command.args,
                        "env": command.env,
                        "cwd": command.cwd,
                    }),
                    true,
                )?;
            } else {
                let _ = out_tx.send(OutputLine::Stderr("Dry run: validation passed".into()));
                let _ = out_tx.send(OutputLine::Stdout(command.display()));
            }
            Ok(0)
        }
        LaunchOutcome::Finished(entry) => {
            if args.json {
                emit_json(out_tx, &entry, true)?;
            } else {
                emit(out_tx, text_summary::build_run_summary(&entry));
            }
            Ok(exit_code_for(entry.run.status))
        }
    }
}

/// Handle export operations (JSON and CSV) after any command.
fn handle_exports(args: &Cli, ctx: &RunContext) -> Result<()> {
    if args.export_json.is_none() && args.export_csv.is_none() {
        return Ok(());
    }
    let entries = ctx.registry.load()?;
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, &entries)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, &entries)?;
    }
    Ok(())
}
