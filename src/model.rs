use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

pub const STATUS_FILE_VERSION: u32 = 1;
pub const HISTORY_FILE_VERSION: u32 = 1;

/// Well-known artifact kinds a pipeline reports in its summary file.
pub const ARTIFACT_VIDEO: &str = "video";
pub const ARTIFACT_MANIFEST: &str = "manifest";
pub const ARTIFACT_BENCHMARK: &str = "benchmark";
pub const ARTIFACT_REPORT: &str = "report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PipelineType {
    Production,
    Narrative,
}

impl PipelineType {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineType::Production => "production",
            PipelineType::Narrative => "narrative",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temporal regularization mode forwarded to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TemporalMode {
    On,
    Off,
    Auto,
}

impl TemporalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TemporalMode::On => "on",
            TemporalMode::Off => "off",
            TemporalMode::Auto => "auto",
        }
    }
}

/// Modifiers shared by every request type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalMode>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RunOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Production {
        pipeline_id: String,
        sample_id: String,
        options: RunOptions,
    },
    Narrative {
        script_path: PathBuf,
        options: RunOptions,
    },
}

impl RunRequest {
    pub fn pipeline_type(&self) -> PipelineType {
        match self {
            RunRequest::Production { .. } => PipelineType::Production,
            RunRequest::Narrative { .. } => PipelineType::Narrative,
        }
    }

    pub fn options(&self) -> &RunOptions {
        match self {
            RunRequest::Production { options, .. } | RunRequest::Narrative { options, .. } => {
                options
            }
        }
    }

    /// Short human label, e.g. `production/sample-001` or `narrative/demo.json`.
    pub fn label(&self) -> String {
        match self {
            RunRequest::Production {
                pipeline_id,
                sample_id,
                ..
            } => format!("{pipeline_id}/{sample_id}"),
            RunRequest::Narrative { script_path, .. } => {
                let name = script_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| script_path.display().to_string());
                format!("narrative/{name}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Queued or running runs block new starts.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    Status,
    Step,
    Log,
    Warning,
    Error,
    Artifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub kind: RunEventKind,
    pub message: String,
}

/// Structured progress emitted by a pipeline process.
///
/// Pipelines that speak the newline-delimited JSON channel print these
/// directly (`{"event":"step","index":2,"total":5}`); legacy text output is
/// translated into the same shape by the line parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Step {
        index: u32,
        total: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    StepStarted {
        name: String,
    },
    Progress {
        percent: f64,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    Log {
        message: String,
    },
    Artifact {
        kind: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: String,
    pub pipeline_type: PipelineType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    pub status: RunStatus,
    #[serde(default)]
    pub options: RunOptions,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub events: Vec<RunEvent>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub current_step: Option<u32>,
    #[serde(default)]
    pub current_step_name: Option<String>,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl RunState {
    /// Create a queued run for `request`.
    pub fn new(id: String, request: &RunRequest, now: OffsetDateTime) -> Self {
        let (pipeline_id, sample_id, script_path) = match request {
            RunRequest::Production {
                pipeline_id,
                sample_id,
                ..
            } => (Some(pipeline_id.clone()), Some(sample_id.clone()), None),
            RunRequest::Narrative { script_path, .. } => (None, None, Some(script_path.clone())),
        };
        let mut state = Self {
            id,
            pipeline_type: request.pipeline_type(),
            pipeline_id,
            sample_id,
            script_path,
            status: RunStatus::Queued,
            options: request.options().clone(),
            started_at: now,
            finished_at: None,
            duration_ms: None,
            events: Vec::new(),
            total_steps: None,
            current_step: None,
            current_step_name: None,
            progress_percent: None,
            error_message: None,
            exit_code: None,
            pid: None,
        };
        state.push_event(
            now,
            RunEventKind::Status,
            format!("queued {}", request.label()),
        );
        state
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn label(&self) -> String {
        match (self.pipeline_type, &self.script_path) {
            (PipelineType::Narrative, Some(path)) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                format!("narrative/{name}")
            }
            _ => format!(
                "{}/{}",
                self.pipeline_id.as_deref().unwrap_or("production"),
                self.sample_id.as_deref().unwrap_or("-")
            ),
        }
    }

    pub fn push_event(&mut self, at: OffsetDateTime, kind: RunEventKind, message: impl Into<String>) {
        self.events.push(RunEvent {
            timestamp: at,
            kind,
            message: message.into(),
        });
    }

    pub fn mark_running(&mut self, pid: Option<u32>, at: OffsetDateTime) {
        self.status = RunStatus::Running;
        self.pid = pid;
        let msg = match pid {
            Some(pid) => format!("running (pid {pid})"),
            None => "running".to_string(),
        };
        self.push_event(at, RunEventKind::Status, msg);
    }

    /// Move the run into a terminal state. Calling this on an already
    /// finished run is a no-op.
    pub fn finish(
        &mut self,
        status: RunStatus,
        error_message: Option<String>,
        exit_code: Option<i32>,
        at: OffsetDateTime,
    ) {
        if self.status.is_terminal() {
            return;
        }
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error_message = error_message;
        self.exit_code = exit_code;
        self.pid = None;
        self.finished_at = Some(at);
        let elapsed = (at - self.started_at).whole_milliseconds().max(0);
        self.duration_ms = Some(u64::try_from(elapsed).unwrap_or(u64::MAX));
        let msg = match &self.error_message {
            Some(err) => format!("{status}: {err}"),
            None => status.to_string(),
        };
        let kind = if status == RunStatus::Failed {
            RunEventKind::Error
        } else {
            RunEventKind::Status
        };
        self.push_event(at, kind, msg);
    }

    /// Fold a pipeline event into the run's progress fields and event log.
    pub fn apply(&mut self, event: &PipelineEvent, at: OffsetDateTime) {
        match event {
            PipelineEvent::Step { index, total, name } => {
                self.current_step = Some(*index);
                self.total_steps = Some(*total);
                if let Some(name) = name {
                    self.current_step_name = Some(name.clone());
                }
                let msg = match name {
                    Some(name) => format!("Step {index}/{total}: {name}"),
                    None => format!("Step {index}/{total}"),
                };
                self.push_event(at, RunEventKind::Step, msg);
            }
            PipelineEvent::StepStarted { name } => {
                self.current_step_name = Some(name.clone());
                self.push_event(at, RunEventKind::Step, format!("Starting step: {name}"));
            }
            // Progress only moves the gauge; it would flood the event log.
            PipelineEvent::Progress { percent } => {
                self.progress_percent = Some(percent.clamp(0.0, 100.0));
            }
            PipelineEvent::Warning { message } => {
                self.push_event(at, RunEventKind::Warning, message.clone());
            }
            PipelineEvent::Error { message } => {
                self.push_event(at, RunEventKind::Error, message.clone());
            }
            PipelineEvent::Log { message } => {
                self.push_event(at, RunEventKind::Log, message.clone());
            }
            PipelineEvent::Artifact { kind, path } => {
                self.push_event(
                    at,
                    RunEventKind::Artifact,
                    format!("{kind}: {}", path.display()),
                );
            }
        }
    }
}

/// The document the UI polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFile {
    pub version: u32,
    pub run: Option<RunState>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl StatusFile {
    pub fn empty(now: OffsetDateTime) -> Self {
        Self {
            version: STATUS_FILE_VERSION,
            run: None,
            last_updated: now,
        }
    }

    pub fn with_run(run: RunState, now: OffsetDateTime) -> Self {
        Self {
            version: STATUS_FILE_VERSION,
            run: Some(run),
            last_updated: now,
        }
    }

    pub fn active_run(&self) -> Option<&RunState> {
        self.run.as_ref().filter(|r| r.is_active())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRegistryEntry {
    #[serde(flatten)]
    pub run: RunState,
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunRegistryEntry {
    pub fn new(run: RunState) -> Self {
        Self {
            run,
            artifacts: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.run.id
    }

    /// Record a warning once, keeping first-seen order.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}

/// Flat row of the UI-facing history export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub pipeline_type: PipelineType,
    pub label: String,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub video_path: Option<PathBuf>,
    pub warning_count: usize,
}

impl From<&RunRegistryEntry> for HistoryEntry {
    fn from(entry: &RunRegistryEntry) -> Self {
        Self {
            id: entry.run.id.clone(),
            pipeline_type: entry.run.pipeline_type,
            label: entry.run.label(),
            status: entry.run.status,
            started_at: entry.run.started_at,
            finished_at: entry.run.finished_at,
            duration_ms: entry.run.duration_ms,
            error_message: entry.run.error_message.clone(),
            video_path: entry.artifacts.get(ARTIFACT_VIDEO).cloned(),
            warning_count: entry.warnings.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFile {
    pub version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    /// Number of runs in the registry, before capping.
    pub total: usize,
    pub runs: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn production() -> RunRequest {
        RunRequest::Production {
            pipeline_id: "production".into(),
            sample_id: "sample-001".into(),
            options: RunOptions::default(),
        }
    }

    #[test]
    fn new_run_is_queued_with_an_event() {
        let run = RunState::new("run-1".into(), &production(), datetime!(2025-01-01 0:00 UTC));
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.is_active());
        assert_eq!(run.events.len(), 1);
        assert_eq!(run.label(), "production/sample-001");
    }

    #[test]
    fn finish_sets_duration_and_is_sticky() {
        let start = datetime!(2025-01-01 0:00 UTC);
        let mut run = RunState::new("run-1".into(), &production(), start);
        run.mark_running(Some(42), start);
        run.finish(
            RunStatus::Failed,
            Some("pipeline exited with code 2".into()),
            Some(2),
            datetime!(2025-01-01 0:00:01.5 UTC),
        );
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.duration_ms, Some(1500));
        assert_eq!(run.pid, None);

        run.finish(RunStatus::Succeeded, None, Some(0), datetime!(2025-01-01 0:01 UTC));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.exit_code, Some(2));
    }

    #[test]
    fn apply_step_updates_counters() {
        let now = datetime!(2025-01-01 0:00 UTC);
        let mut run = RunState::new("run-1".into(), &production(), now);
        run.apply(
            &PipelineEvent::Step {
                index: 2,
                total: 5,
                name: Some("render".into()),
            },
            now,
        );
        run.apply(&PipelineEvent::Progress { percent: 140.0 }, now);
        assert_eq!(run.current_step, Some(2));
        assert_eq!(run.total_steps, Some(5));
        assert_eq!(run.current_step_name.as_deref(), Some("render"));
        assert_eq!(run.progress_percent, Some(100.0));
        assert_eq!(run.events.last().map(|e| e.kind), Some(RunEventKind::Step));
    }

    #[test]
    fn status_file_uses_camel_case_keys() {
        let now = datetime!(2025-01-01 0:00 UTC);
        let mut run = RunState::new("run-1".into(), &production(), now);
        run.finish(RunStatus::Succeeded, None, Some(0), now);
        let value = serde_json::to_value(StatusFile::with_run(run, now)).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["run"]["status"], "succeeded");
        assert_eq!(value["run"]["pipelineType"], "production");
        assert!(value["run"]["finishedAt"].is_string());
        assert_eq!(value["run"]["durationMs"], 0);
        assert!(value["lastUpdated"].is_string());
    }

    #[test]
    fn registry_entry_flattens_run() {
        let now = datetime!(2025-01-01 0:00 UTC);
        let mut entry = RunRegistryEntry::new(RunState::new("run-1".into(), &production(), now));
        entry
            .artifacts
            .insert(ARTIFACT_VIDEO.into(), PathBuf::from("out/run-1/final.mp4"));
        entry.add_warning("low vram");
        entry.add_warning("low vram");

        let json = serde_json::to_string(&entry).unwrap();
        let back: RunRegistryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.warnings.len(), 1);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "run-1");
        assert_eq!(value["artifacts"]["video"], "out/run-1/final.mp4");
    }

    #[test]
    fn structured_event_wire_format() {
        let ev: PipelineEvent =
            serde_json::from_str(r#"{"event":"step","index":2,"total":5}"#).unwrap();
        assert_eq!(
            ev,
            PipelineEvent::Step {
                index: 2,
                total: 5,
                name: None
            }
        );
        let ev: PipelineEvent =
            serde_json::from_str(r#"{"event":"artifact","kind":"video","path":"a.mp4"}"#)
                .unwrap();
        assert!(matches!(ev, PipelineEvent::Artifact { .. }));
    }
}
