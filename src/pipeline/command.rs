use crate::config::{CommandTemplate, Config};
use crate::model::{RunOptions, RunRequest};
use std::path::{Path, PathBuf};

/// Fully derived command line for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl PipelineCommand {
    /// Shell-ish rendering for logs and `--dry-run` output.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Append the per-run arguments to the configured template.
pub fn derive_command(cfg: &Config, request: &RunRequest, run_id: &str) -> PipelineCommand {
    let (template, mut args): (&CommandTemplate, Vec<String>) = match request {
        RunRequest::Production {
            pipeline_id,
            sample_id,
            ..
        } => (
            &cfg.production_command,
            vec![
                "--pipeline".into(),
                pipeline_id.clone(),
                "--sample".into(),
                sample_id.clone(),
            ],
        ),
        RunRequest::Narrative { script_path, .. } => (
            &cfg.narrative_command,
            vec!["--script".into(), path_arg(script_path)],
        ),
    };
    push_modifiers(&mut args, request.options());

    let summary = cfg.summary_path(run_id);
    args.push("--summary-out".into());
    args.push(path_arg(&summary));

    let mut full = template.args.clone();
    full.extend(args);

    PipelineCommand {
        program: template.program.clone(),
        args: full,
        env: vec![
            ("DIRECTOR_RUN_ID".into(), run_id.to_string()),
            ("DIRECTOR_EVENT_FORMAT".into(), "ndjson".into()),
            (
                "DIRECTOR_RUN_DIR".into(),
                path_arg(&cfg.run_output_dir(run_id)),
            ),
            ("DIRECTOR_SUMMARY_PATH".into(), path_arg(&summary)),
        ],
        cwd: cfg.root.clone(),
    }
}

fn push_modifiers(args: &mut Vec<String>, options: &RunOptions) {
    if let Some(mode) = options.temporal {
        args.push("--temporal".into());
        args.push(mode.as_str().into());
    }
    if options.verbose {
        args.push("--verbose".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TemporalMode;

    fn cfg() -> Config {
        Config::default().resolve(Path::new("/proj"))
    }

    #[test]
    fn production_arguments() {
        let req = RunRequest::Production {
            pipeline_id: "fast-preview".into(),
            sample_id: "sample-003".into(),
            options: RunOptions {
                temporal: Some(TemporalMode::Auto),
                verbose: true,
                ..Default::default()
            },
        };
        let cmd = derive_command(&cfg(), &req, "run-x");
        assert_eq!(cmd.program, "npx");
        assert_eq!(
            cmd.args,
            vec![
                "tsx",
                "scripts/run-production-pipeline.ts",
                "--pipeline",
                "fast-preview",
                "--sample",
                "sample-003",
                "--temporal",
                "auto",
                "--verbose",
                "--summary-out",
                "/proj/test-results/pipeline-runs/run-x/summary.json",
            ]
        );
        assert_eq!(cmd.cwd, PathBuf::from("/proj"));
        assert!(cmd
            .env
            .contains(&("DIRECTOR_RUN_ID".to_string(), "run-x".to_string())));
    }

    #[test]
    fn narrative_arguments_and_display() {
        let req = RunRequest::Narrative {
            script_path: PathBuf::from("data/narrative scripts/demo.json"),
            options: RunOptions::default(),
        };
        let cmd = derive_command(&cfg(), &req, "run-y");
        assert_eq!(&cmd.args[2..4], &["--script", "data/narrative scripts/demo.json"]);
        assert!(!cmd.args.iter().any(|a| a == "--temporal" || a == "--verbose"));
        assert!(cmd
            .display()
            .starts_with("npx tsx scripts/run-narrative-pipeline.ts --script 'data/narrative scripts/demo.json'"));
    }
}
