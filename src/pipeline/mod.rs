mod command;
mod output;
mod parser;
pub(crate) mod signal;

pub use command::{derive_command, PipelineCommand};
pub use parser::{LineParser, Stream};

use crate::model::PipelineEvent;
use anyhow::{Context, Result};
use output::OutputLine;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How long to wait for the output pipes to drain once the child is gone.
/// Grandchildren that inherited the pipes can hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Time between SIGTERM and SIGKILL when stopping the process group.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum PipelineControl {
    /// Stop the process group and report the run as cancelled.
    Cancel { reason: String },
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExit {
    Exited { code: i32 },
    Signaled { signal: Option<i32> },
    TimedOut { after: Duration },
    Cancelled { reason: String },
}

pub struct PipelineProcess {
    child: Child,
    pid: Option<u32>,
    lines_rx: mpsc::UnboundedReceiver<OutputLine>,
    readers: Vec<tokio::task::JoinHandle<()>>,
    parser: LineParser,
    timeout: Option<Duration>,
    kill_grace: Duration,
}

impl PipelineProcess {
    /// Spawn the child with piped output, as the leader of a new process
    /// group. The leader is killed if this value is dropped before `run`
    /// completes.
    pub fn spawn(command: &PipelineCommand, verbose: bool, timeout: Option<Duration>) -> Result<Self> {
        let mut cmd = command.to_tokio();
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", command.program))?;

        let (tx, lines_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(output::spawn_reader(Stream::Stdout, out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(output::spawn_reader(Stream::Stderr, err, tx));
        }

        Ok(Self {
            pid: child.id(),
            child,
            lines_rx,
            readers,
            parser: LineParser::new(verbose),
            timeout,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }

    /// How long the group gets to exit after SIGTERM before SIGKILL.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Drive the child to completion, forwarding parsed events.
    pub async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<PipelineEvent>,
        mut control_rx: mpsc::UnboundedReceiver<PipelineControl>,
    ) -> Result<PipelineExit> {
        // A timeout too large to represent is no timeout.
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut control_open = true;
        let mut output_open = true;

        let exit = loop {
            tokio::select! {
                status = self.child.wait() => {
                    let status = status.context("waiting for pipeline process")?;
                    break exit_from_status(status);
                }
                line = self.lines_rx.recv(), if output_open => {
                    match line {
                        Some(line) => self.forward(&line, &event_tx),
                        None => output_open = false,
                    }
                }
                ctrl = control_rx.recv(), if control_open => {
                    match ctrl {
                        Some(PipelineControl::Cancel { reason }) => {
                            tracing::info!(pid = ?self.pid, %reason, "cancelling pipeline");
                            self.terminate().await;
                            break PipelineExit::Cancelled { reason };
                        }
                        // Nobody can cancel any more; keep running to completion.
                        None => control_open = false,
                    }
                }
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => futures::future::pending().await,
                    }
                } => {
                    let after = self.timeout.unwrap_or_default();
                    tracing::warn!(pid = ?self.pid, ?after, "pipeline timed out");
                    self.terminate().await;
                    break PipelineExit::TimedOut { after };
                }
            }
        };

        self.drain(&event_tx).await;
        Ok(exit)
    }

    fn forward(&self, line: &OutputLine, event_tx: &mpsc::UnboundedSender<PipelineEvent>) {
        tracing::trace!(stream = ?line.stream, text = %line.text, "pipeline output");
        if let Some(ev) = self.parser.parse(line.stream, &line.text) {
            let _ = event_tx.send(ev);
        }
    }

    /// Stop the child without waiting for it to finish on its own.
    pub async fn abort(mut self) {
        self.terminate().await;
    }

    /// SIGTERM the whole group, give it `kill_grace` to exit, then SIGKILL
    /// whatever is left. Reaps the leader.
    async fn terminate(&mut self) {
        let Some(pid) = self.pid else {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(error = %e, "failed to kill pipeline process");
            }
            return;
        };
        if let Err(e) = signal::signal_group(pid, signal::Signal::Term) {
            tracing::warn!(pid, error = %e, "failed to signal pipeline process group");
        }
        let exited = tokio::time::timeout(self.kill_grace, self.child.wait())
            .await
            .is_ok();
        if !exited {
            tracing::warn!(pid, grace = ?self.kill_grace, "pipeline ignored SIGTERM; killing");
        }
        // Members that outlived the leader go too.
        if let Err(e) = signal::signal_group(pid, signal::Signal::Kill) {
            tracing::debug!(pid, error = %e, "failed to kill pipeline process group");
        }
        if !exited {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(pid, error = %e, "failed to kill pipeline process");
            }
        }
    }

    /// Collect whatever the readers still hold after the child is gone.
    async fn drain(&mut self, event_tx: &mpsc::UnboundedSender<PipelineEvent>) {
        let readers = std::mem::take(&mut self.readers);
        let joined = tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(readers)).await;
        if joined.is_err() {
            tracing::debug!("pipeline output still open after exit; dropping the rest");
        }
        while let Ok(line) = self.lines_rx.try_recv() {
            self.forward(&line, event_tx);
        }
    }
}

fn exit_from_status(status: ExitStatus) -> PipelineExit {
    if let Some(code) = status.code() {
        return PipelineExit::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        PipelineExit::Signaled {
            signal: status.signal(),
        }
    }
    #[cfg(not(unix))]
    {
        PipelineExit::Signaled { signal: None }
    }
}
