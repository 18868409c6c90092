//! What can be run: configured pipelines, sample directories, narrative scripts.

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Inventory {
    pub pipelines: Vec<String>,
    pub samples: Vec<String>,
    pub scripts: Vec<String>,
}

fn list_dir(dir: &Path, want_dirs: bool, ext: Option<&str>) -> Result<Vec<String>> {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };
    let mut names = Vec::new();
    for entry in rd {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() != want_dirs {
            continue;
        }
        if let Some(ext) = ext {
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

pub fn gather(cfg: &Config) -> Result<Inventory> {
    Ok(Inventory {
        pipelines: cfg.pipelines.clone(),
        samples: list_dir(&cfg.samples_dir, true, None)?,
        scripts: list_dir(&cfg.scripts_dir, false, Some("json"))?,
    })
}
