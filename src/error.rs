//! Typed errors the CLI maps to exit codes.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! call site.

use crate::model::{PipelineType, RunStatus};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("sample directory not found: {}", .0.display())]
    MissingSample(PathBuf),
    #[error("narrative script not found: {}", .0.display())]
    MissingScript(PathBuf),
    #[error("output directory not found: {}", .0.display())]
    MissingOutputDir(PathBuf),
    #[error("unknown pipeline '{id}' (known: {known})")]
    UnknownPipeline { id: String, known: String },
    #[error("--{flag} is required for --type {pipeline_type}")]
    MissingFlag {
        flag: &'static str,
        pipeline_type: PipelineType,
    },
    #[error("ComfyUI is not reachable at {url}: {reason}")]
    ComfyUnreachable { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("run {run_id} is already {status}; use --cancel to stop it first")]
    AlreadyActive { run_id: String, status: RunStatus },
    #[error("no active run to cancel")]
    NothingToCancel,
    #[error("cleanup needs --keep-last and/or --older-than")]
    NoCleanupCriteria,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    let mut out = String::from("Validation failed:");
    for issue in issues {
        out.push_str("\n  - ");
        out.push_str(&issue.to_string());
    }
    out
}
