//! Bounded history of detonated techniques (`history.json`).
//!
//! Stored as a JSON array of technique ids, oldest first.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use super::fsutil::write_json_atomic;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Up to `limit` technique ids, most recent first.
    ///
    /// A missing or unreadable history reads as empty.
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let mut entries = self.load();
        entries.reverse();
        entries.truncate(limit);
        entries
    }

    /// Append a technique id, evicting the oldest entries beyond capacity.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn record(&self, technique_id: &str) -> Result<()> {
        let mut entries = self.load();
        entries.push(technique_id.to_string());
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
        write_json_atomic(&self.path, &entries)
            .with_context(|| format!("write history {}", self.path.display()))?;
        debug!(len = entries.len(), "history updated");
        Ok(())
    }

    fn load(&self) -> Vec<String> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(err = %err, path = %self.path.display(), "history unreadable, treating as empty");
                return Vec::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(err = %err, path = %self.path.display(), "history corrupt, treating as empty");
                Vec::new()
            }
        }
    }
}
