//! Run registry and its UI-facing history export.
//!
//! The registry is a JSON array, newest first. Every mutation is a whole-file
//! read-modify-write followed by a history export, so the two files never
//! drift apart. There is no cross-process locking; one controller at a time
//! is assumed.

use crate::config::Config;
use crate::model::{HistoryEntry, HistoryFile, RunRegistryEntry, HISTORY_FILE_VERSION};
use crate::storage::{self, now_utc};
use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use time::OffsetDateTime;

pub struct RunRegistry {
    registry_path: PathBuf,
    history_path: PathBuf,
    history_cap: usize,
    registry_cap: usize,
}

impl RunRegistry {
    pub fn new(
        registry_path: PathBuf,
        history_path: PathBuf,
        history_cap: usize,
        registry_cap: usize,
    ) -> Self {
        Self {
            registry_path,
            history_path,
            history_cap,
            registry_cap,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.registry_path(),
            cfg.history_path(),
            cfg.history_cap,
            cfg.registry_cap,
        )
    }

    pub fn load(&self) -> Result<Vec<RunRegistryEntry>> {
        let mut entries: Vec<RunRegistryEntry> =
            storage::read_json(&self.registry_path)?.unwrap_or_default();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn save(&self, mut entries: Vec<RunRegistryEntry>) -> Result<HistoryFile> {
        sort_newest_first(&mut entries);
        if self.registry_cap > 0 && entries.len() > self.registry_cap {
            let dropped = entries.len() - self.registry_cap;
            tracing::debug!(dropped, "registry over capacity; dropping oldest entries");
            entries.truncate(self.registry_cap);
        }
        storage::atomic_write_json(&self.registry_path, &entries)?;
        self.export_history(&entries)
    }

    /// Insert a new run at the front. An entry with the same id is replaced.
    pub fn record_start(&self, entry: RunRegistryEntry) -> Result<()> {
        let mut entries = self.load()?;
        entries.retain(|e| e.id() != entry.id());
        entries.insert(0, entry);
        self.save(entries)?;
        Ok(())
    }

    /// Apply `f` to the entry with `id`. Returns false when no such entry
    /// exists; nothing is written in that case.
    pub fn patch<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut RunRegistryEntry),
    {
        let mut entries = self.load()?;
        let Some(entry) = entries.iter_mut().find(|e| e.id() == id) else {
            return Ok(false);
        };
        f(entry);
        self.save(entries)?;
        Ok(true)
    }

    pub fn find(&self, id: &str) -> Result<Option<RunRegistryEntry>> {
        Ok(self.load()?.into_iter().find(|e| e.id() == id))
    }

    /// Remove the entries whose ids are in `ids`, returning them.
    pub fn remove(&self, ids: &HashSet<String>) -> Result<Vec<RunRegistryEntry>> {
        let entries = self.load()?;
        let (removed, kept): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| ids.contains(e.id()));
        if !removed.is_empty() {
            self.save(kept)?;
        }
        Ok(removed)
    }

    pub fn export_history(&self, entries: &[RunRegistryEntry]) -> Result<HistoryFile> {
        let history = history_projection(entries, self.history_cap, now_utc());
        storage::atomic_write_json(&self.history_path, &history)?;
        Ok(history)
    }
}

fn sort_newest_first(entries: &mut [RunRegistryEntry]) {
    // Stable: runs started in the same instant keep insertion order.
    entries.sort_by(|a, b| b.run.started_at.cmp(&a.run.started_at));
}

pub fn history_projection(
    entries: &[RunRegistryEntry],
    cap: usize,
    now: OffsetDateTime,
) -> HistoryFile {
    HistoryFile {
        version: HISTORY_FILE_VERSION,
        generated_at: now,
        total: entries.len(),
        runs: entries.iter().take(cap).map(HistoryEntry::from).collect(),
    }
}

/// Entries that started strictly before `cutoff`. Expects newest-first input.
pub fn older_than(entries: &[RunRegistryEntry], cutoff: OffsetDateTime) -> Vec<&RunRegistryEntry> {
    entries
        .iter()
        .filter(|e| e.run.started_at < cutoff)
        .collect()
}

/// Entries past the `keep` most recent. Expects newest-first input.
pub fn beyond_most_recent(entries: &[RunRegistryEntry], keep: usize) -> Vec<&RunRegistryEntry> {
    entries.iter().skip(keep).collect()
}
