//! Storage layout for studysync
//!
//! All shared state lives in one directory at the workspace root so that
//! every process of the same user sees the same files:
//!
//! ```text
//! .studysync.toml               # Configuration (optional)
//! .studysync/                   # Shared state
//!   tasks.json                  # Task document (tasks, courses, users)
//!   tasks.json.lock             # fs2 lock guarding tasks.json
//!   suppression.json            # Last-fired timestamps by suppression key
//!   suppression.json.lock       # fs2 lock guarding suppression.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};

/// Name of the shared state directory
pub const STATE_DIR: &str = ".studysync";

/// Task document file name
pub const TASKS_FILE: &str = "tasks.json";

/// Suppression map file name
pub const SUPPRESSION_FILE: &str = "suppression.json";

/// Storage manager for studysync state
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    lock_timeout_ms: u64,
}

impl Storage {
    /// Create storage rooted at `root` (the directory holding `.studysync/`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    /// Path to the shared `.studysync/` directory
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Path to the task document
    pub fn tasks_file(&self) -> PathBuf {
        self.state_dir().join(TASKS_FILE)
    }

    /// Path to the suppression map
    pub fn suppression_file(&self) -> PathBuf {
        self.state_dir().join(SUPPRESSION_FILE)
    }

    /// Path to the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.root.join(crate::config::CONFIG_FILE)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Create `.studysync/`. Returns false when it already existed.
    pub fn init(&self) -> Result<bool> {
        let dir = self.state_dir();
        if dir.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;
        Ok(true)
    }

    /// Check if storage has been initialized
    pub fn is_initialized(&self) -> bool {
        self.state_dir().is_dir()
    }

    /// Fail with `NotInitialized` unless `.studysync/` exists.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.state_dir()))
        }
    }

    // =========================================================================
    // Locked JSON I/O
    // =========================================================================

    /// Read a JSON file under its lock; missing files read as `None`.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        // Taking the lock would create the parent directory as a side effect.
        if !path.exists() {
            return Ok(None);
        }
        match lock::read_locked(path, self.lock_timeout_ms)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a JSON document under a single lock acquisition.
    ///
    /// `mutate` returns `(changed, value)`; the document is only rewritten
    /// when `changed` is true.
    pub fn update_json<T, R, F>(&self, path: &Path, mutate: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<(bool, R)>,
    {
        lock::update_locked(path, self.lock_timeout_ms, |current| {
            let mut doc: T = match current {
                Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
                _ => T::default(),
            };
            let (changed, value) = mutate(&mut doc)?;
            if changed {
                Ok((Some(serde_json::to_vec_pretty(&doc)?), value))
            } else {
                Ok((None, value))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn paths_live_under_state_dir() {
        let storage = Storage::new("/work");
        assert_eq!(storage.state_dir(), PathBuf::from("/work/.studysync"));
        assert_eq!(storage.tasks_file(), PathBuf::from("/work/.studysync/tasks.json"));
        assert_eq!(
            storage.suppression_file(),
            PathBuf::from("/work/.studysync/suppression.json")
        );
        assert_eq!(storage.config_file(), PathBuf::from("/work/.studysync.toml"));
    }

    #[test]
    fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        assert!(!storage.is_initialized());
        assert!(matches!(
            storage.ensure_initialized(),
            Err(Error::NotInitialized(_))
        ));

        assert!(storage.init().unwrap());
        assert!(!storage.init().unwrap());
        assert!(storage.ensure_initialized().is_ok());
    }

    #[test]
    fn update_json_creates_and_mutates() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let path = storage.suppression_file();

        let len = storage
            .update_json(&path, |map: &mut BTreeMap<String, i64>| {
                map.insert("a".to_string(), 1);
                Ok((true, map.len()))
            })
            .unwrap();
        assert_eq!(len, 1);

        let read: BTreeMap<String, i64> = storage.read_json(&path).unwrap().unwrap();
        assert_eq!(read.get("a"), Some(&1));

        let missing: Option<BTreeMap<String, i64>> =
            storage.read_json(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
    }
}
