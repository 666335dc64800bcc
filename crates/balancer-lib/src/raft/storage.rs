//! Durable term and vote
//!
//! The only state that must survive a restart. Saved as JSON under the
//! coordinator's data directory with a write-then-rename so a crash never
//! leaves a torn file. The directory is owned exclusively by the
//! coordinator; no other component touches it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STATE_FILE: &str = "raft-state.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access raft data directory {dir}: {source}")]
    DataDir {
        dir: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read persisted raft state: {0}")]
    Read(#[source] io::Error),

    #[error("persisted raft state is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("failed to write persisted raft state: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub term: u64,
    pub voted_for: Option<String>,
}

#[derive(Debug)]
pub struct StableStore {
    path: PathBuf,
}

impl StableStore {
    /// Open (creating the directory if needed). Errors here are fatal at
    /// startup.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|source| StorageError::DataDir {
            dir: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            path: dir.join(STATE_FILE),
        })
    }

    /// Load persisted state; a missing file is a fresh node.
    pub fn load(&self) -> Result<PersistedState, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::Corrupt),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(err) => Err(StorageError::Read(err)),
        }
    }

    pub fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(state).expect("persisted state serializes");
        fs::write(&tmp, bytes).map_err(StorageError::Write)?;
        fs::rename(&tmp, &self.path).map_err(StorageError::Write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StableStore::open(dir.path()).unwrap();
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StableStore::open(dir.path()).unwrap();

        let state = PersistedState {
            term: 12,
            voted_for: Some("pve2".to_string()),
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);

        // Overwrite with a later term.
        let newer = PersistedState {
            term: 13,
            voted_for: None,
        };
        store.save(&newer).unwrap();
        assert_eq!(store.load().unwrap(), newer);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = StableStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(STATE_FILE), b"not json").unwrap();
        assert!(matches!(store.load(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn nested_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let store = StableStore::open(&nested).unwrap();
        store
            .save(&PersistedState {
                term: 1,
                voted_for: None,
            })
            .unwrap();
        assert!(nested.join(STATE_FILE).exists());
    }
}
