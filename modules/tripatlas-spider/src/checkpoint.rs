//! Durable per-seed progress record.
//!
//! Written after every seed, successfully processed or not, so a crash
//! mid-run costs at most the seed in flight. `completed` lets a resumed run
//! skip seeds even out of index order, e.g. ones finished by an earlier
//! partial pass.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub resume_index: usize,
    pub completed: BTreeSet<String>,
}

impl Checkpoint {
    /// Record a finished seed and advance the resume point past it.
    pub fn complete(&mut self, index: usize, key: &str) {
        self.resume_index = self.resume_index.max(index + 1);
        self.completed.insert(key.to_string());
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.completed.contains(key)
    }
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the checkpoint. A missing file is a fresh start, not an error;
    /// an unreadable one is treated the same way, loudly.
    pub fn load(&self) -> Checkpoint {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cp) => cp,
                Err(e) => {
                    warn!(path = %self.path.display(), "Checkpoint unreadable, starting over: {e}");
                    Checkpoint::default()
                }
            },
            Err(_) => Checkpoint::default(),
        }
    }

    /// Persist via temp-file-then-rename so a crash mid-write never leaves a
    /// truncated checkpoint behind.
    pub fn save(&self, cp: &Checkpoint) -> Result<()> {
        let parent = self
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .with_context(|| format!("creating checkpoint dir {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .context("creating temporary checkpoint file")?;
        serde_json::to_writer_pretty(&mut tmp, cp).context("serializing checkpoint")?;
        tmp.flush().context("flushing checkpoint")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing checkpoint {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_starts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        let cp = store.load();
        assert_eq!(cp.resume_index, 0);
        assert!(cp.completed.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut cp = Checkpoint::default();
        cp.complete(0, "南宁");
        cp.complete(1, "桂林");
        store.save(&cp).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.resume_index, 2);
        assert!(loaded.is_done("南宁"));
        assert!(loaded.is_done("桂林"));
        assert!(!loaded.is_done("柳州"));
    }

    #[test]
    fn corrupt_file_resets_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, "{not json").unwrap();
        let cp = CheckpointStore::new(&path).load();
        assert_eq!(cp.resume_index, 0);
    }

    #[test]
    fn complete_never_moves_resume_index_backwards() {
        let mut cp = Checkpoint::default();
        cp.complete(5, "a");
        cp.complete(2, "b");
        assert_eq!(cp.resume_index, 6);
    }
}
