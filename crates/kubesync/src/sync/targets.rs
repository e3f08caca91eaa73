//! Sync targets and the user's persisted sync-target set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::SyncSettings;
use crate::paths::expand_tilde;

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("Failed to read preferences file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write preferences file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preferences file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// A path being watched, with its shape resolved at watch start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
    pub path: PathBuf,
    pub is_directory: bool,
    pub max_file_size: u64,
}

impl SyncTarget {
    pub fn new(path: impl Into<PathBuf>, is_directory: bool, settings: &SyncSettings) -> Self {
        Self {
            path: path.into(),
            is_directory,
            max_file_size: settings.max_file_size(is_directory),
        }
    }
}

/// One user-configured sync entry, as written in the preferences file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub file_path: String,
}

/// Membership change of the sync-target set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTargetChange {
    Added(PathBuf),
    Removed(PathBuf),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferencesFile {
    #[serde(default)]
    sync_kubeconfig_entries: Vec<SyncEntry>,
}

/// Observable set of user-configured sync paths.
///
/// Clones share the same set. Changes are published only when membership
/// actually changes.
#[derive(Clone)]
pub struct SyncTargetSet {
    entries: Arc<RwLock<BTreeMap<PathBuf, SyncEntry>>>,
    sender: broadcast::Sender<SyncTargetChange>,
}

impl SyncTargetSet {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            sender,
        }
    }

    /// Loads the set from a preferences file. A missing file is an empty set.
    pub fn load<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, PreferencesError> {
        let path = path.as_ref();
        let set = Self::new(capacity);

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No preferences file at {:?}, starting empty", path);
                return Ok(set);
            }
            Err(source) => {
                return Err(PreferencesError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(set);
        }

        let file: PreferencesFile =
            serde_yaml::from_str(&content).map_err(|source| PreferencesError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        {
            let mut entries = set.write();
            for entry in file.sync_kubeconfig_entries {
                entries.insert(expand_tilde(&entry.file_path), entry);
            }
            log::debug!("Loaded {} sync entries from {:?}", entries.len(), path);
        }

        Ok(set)
    }

    /// Writes the set to a preferences file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PreferencesError> {
        let path = path.as_ref();
        let file = PreferencesFile {
            sync_kubeconfig_entries: self.read().values().cloned().collect(),
        };
        let content = serde_yaml::to_string(&file)?;

        let write_error = |source: std::io::Error| PreferencesError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncTargetChange> {
        self.sender.subscribe()
    }

    /// Adds a path (a leading `~` is expanded). Returns false if present.
    pub fn insert(&self, file_path: &str) -> bool {
        let path = expand_tilde(file_path);
        {
            let mut entries = self.write();
            if entries.contains_key(&path) {
                return false;
            }
            entries.insert(
                path.clone(),
                SyncEntry {
                    file_path: file_path.to_string(),
                },
            );
        }
        self.send(SyncTargetChange::Added(path));
        true
    }

    /// Removes a path. Returns false if it was not present.
    pub fn remove(&self, path: &Path) -> bool {
        if self.write().remove(path).is_none() {
            return false;
        }
        self.send(SyncTargetChange::Removed(path.to_path_buf()));
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().contains_key(path)
    }

    /// Current member paths, in sorted order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn send(&self, change: SyncTargetChange) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(change);
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<PathBuf, SyncEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Sync target set lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<PathBuf, SyncEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Sync target set lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for SyncTargetSet {
    fn default() -> Self {
        Self::new(64)
    }
}
