//! Controller configuration.
//!
//! Built-in defaults, then an optional JSON file, then environment overrides,
//! then CLI flags (applied by `cli`). Relative paths are resolved against the
//! project root.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "director-runctl.json";

/// Program plus leading arguments; per-run arguments are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    fn npx_tsx(script: &str) -> Self {
        Self {
            program: "npx".into(),
            args: vec!["tsx".into(), script.into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root; every relative path below is joined onto it.
    #[serde(skip)]
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Known production pipeline ids. Empty accepts any id.
    pub pipelines: Vec<String>,
    pub production_command: CommandTemplate,
    pub narrative_command: CommandTemplate,
    pub comfy_url: String,
    pub require_comfyui: bool,
    #[serde(with = "humantime_serde")]
    pub preflight_timeout: Duration,
    pub history_cap: usize,
    pub registry_cap: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub cancel_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            state_dir: PathBuf::from("public"),
            samples_dir: PathBuf::from("data/bookend-golden-samples"),
            scripts_dir: PathBuf::from("data/narrative-scripts"),
            output_dir: PathBuf::from("test-results/pipeline-runs"),
            pipelines: vec![
                "production".into(),
                "production-qa".into(),
                "fast-preview".into(),
                "cinematic-gold".into(),
            ],
            production_command: CommandTemplate::npx_tsx("scripts/run-production-pipeline.ts"),
            narrative_command: CommandTemplate::npx_tsx("scripts/run-narrative-pipeline.ts"),
            comfy_url: "http://127.0.0.1:8188".into(),
            require_comfyui: false,
            preflight_timeout: Duration::from_secs(5),
            history_cap: 50,
            registry_cap: 500,
            poll_interval: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(10),
            default_timeout: None,
        }
    }
}

impl Config {
    /// Load configuration for `root`.
    ///
    /// An explicit `--config` path must exist. Otherwise the first of
    /// `<root>/director-runctl.json` and the per-user config file is used,
    /// falling back to defaults.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => crate::storage::read_json::<Config>(path)?
                .with_context(|| format!("config file not found: {}", path.display()))?,
            None => {
                let candidates = [
                    Some(root.join(CONFIG_FILE_NAME)),
                    dirs::config_dir().map(|d| d.join("director-runctl").join("config.json")),
                ];
                let mut found = None;
                for path in candidates.into_iter().flatten() {
                    if let Some(cfg) = crate::storage::read_json::<Config>(&path)? {
                        tracing::debug!(path = %path.display(), "loaded config");
                        found = Some(cfg);
                        break;
                    }
                }
                found.unwrap_or_default()
            }
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg.resolve(root))
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("DIRECTOR_STATE_DIR").filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("DIRECTOR_COMFY_URL").filter(|v| !v.is_empty()) {
            self.comfy_url = url;
        }
    }

    /// Anchor relative directories at `root`.
    pub fn resolve(mut self, root: &Path) -> Self {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        self.state_dir = join(&self.state_dir);
        self.samples_dir = join(&self.samples_dir);
        self.scripts_dir = join(&self.scripts_dir);
        self.output_dir = join(&self.output_dir);
        self.root = root.to_path_buf();
        self
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("run-status.json")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("run-registry.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("run-history.json")
    }

    pub fn cancel_path(&self) -> PathBuf {
        self.state_dir.join("run-cancel.json")
    }

    pub fn run_output_dir(&self, run_id: &str) -> PathBuf {
        self.output_dir.join(run_id)
    }

    pub fn summary_path(&self, run_id: &str) -> PathBuf {
        self.run_output_dir(run_id).join("summary.json")
    }
}
