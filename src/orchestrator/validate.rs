use crate::config::Config;
use crate::error::{ControllerError, ValidationIssue};
use crate::model::RunRequest;
use std::path::{Path, PathBuf};

/// Locate a narrative script: as given (relative to the project root), then
/// inside the configured scripts directory.
pub(crate) fn resolve_script(cfg: &Config, script: &Path) -> Option<PathBuf> {
    let direct = if script.is_absolute() {
        script.to_path_buf()
    } else {
        cfg.root.join(script)
    };
    if direct.is_file() {
        return Some(direct);
    }
    let in_scripts = cfg.scripts_dir.join(script);
    in_scripts.is_file().then_some(in_scripts)
}

/// Check every on-disk input the request refers to. All problems are
/// reported together. On success the returned request carries the resolved
/// script path.
pub(crate) fn validate_request(cfg: &Config, request: &RunRequest) -> Result<RunRequest, ControllerError> {
    let mut issues = Vec::new();
    let mut resolved = request.clone();

    match &mut resolved {
        RunRequest::Production {
            pipeline_id,
            sample_id,
            ..
        } => {
            if !cfg.pipelines.is_empty() && !cfg.pipelines.iter().any(|p| p.as_str() == pipeline_id.as_str()) {
                issues.push(ValidationIssue::UnknownPipeline {
                    id: pipeline_id.clone(),
                    known: cfg.pipelines.join(", "),
                });
            }
            let sample_dir = cfg.samples_dir.join(sample_id.as_str());
            if sample_id.is_empty() || !sample_dir.is_dir() {
                issues.push(ValidationIssue::MissingSample(sample_dir));
            }
        }
        RunRequest::Narrative { script_path, .. } => match resolve_script(cfg, script_path) {
            Some(found) => *script_path = found,
            None => issues.push(ValidationIssue::MissingScript(script_path.clone())),
        },
    }

    if !cfg.output_dir.is_dir() {
        issues.push(ValidationIssue::MissingOutputDir(cfg.output_dir.clone()));
    }

    if issues.is_empty() {
        Ok(resolved)
    } else {
        Err(ControllerError::Validation(issues))
    }
}
