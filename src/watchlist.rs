//! Watchlist store: a JSON-backed list of
//! `{code, name, market, notes?}`, guarded by a single lock since updates
//! are rare admin actions, not hot-path reads.

use crate::models::WatchEntry;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

static CODE_RE_LEN: usize = 6;

fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_RE_LEN && code.chars().all(|c| c.is_ascii_digit())
}

pub enum AddOutcome {
    Added,
    AlreadyExists,
}

pub struct Watchlist {
    path: Option<PathBuf>,
    entries: RwLock<Vec<WatchEntry>>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self {
            path: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Load from `path` if it exists; otherwise start empty and remember
    /// `path` as the save target.
    pub fn load_or_new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    pub fn list(&self) -> Vec<WatchEntry> {
        self.entries.read().clone()
    }

    pub fn codes(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.code.clone()).collect()
    }

    /// Add `entry`, returning whether it was newly added or already present
    ///. Rejects malformed codes.
    pub fn add(&self, entry: WatchEntry) -> anyhow::Result<AddOutcome> {
        if !is_valid_code(&entry.code) {
            anyhow::bail!("invalid stock code '{}': expected 6 digits", entry.code);
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.code == entry.code) {
            return Ok(AddOutcome::AlreadyExists);
        }
        entries.push(entry);
        drop(entries);
        self.persist()?;
        Ok(AddOutcome::Added)
    }

    /// Remove `code`, returning `true` if it was present.
    pub fn remove(&self, code: &str) -> anyhow::Result<bool> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.code != code);
        let removed = entries.len() != before;
        drop(entries);
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let json = serde_json::to_vec_pretty(&*self.entries.read())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl Default for Watchlist {
    fn default() -> Self {
        Self::new()
    }
}
