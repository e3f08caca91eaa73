use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Read limit for files discovered inside a synced directory.
pub const DIRECTORY_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Read limit for a file registered directly as a sync target.
pub const FILE_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// The implicit default directory that is always synced while running.
    #[serde(default = "default_kubeconfig_directory")]
    pub kubeconfig_directory: PathBuf,
    /// How long a file must stay untouched before a change is reported.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    #[serde(default = "default_directory_max_file_size")]
    pub directory_max_file_size: u64,
    #[serde(default = "default_file_max_file_size")]
    pub file_max_file_size: u64,
    /// Glob patterns for directory members that are never read.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl SyncSettings {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Returns the read limit for a target of the given shape.
    pub fn max_file_size(&self, is_directory: bool) -> u64 {
        if is_directory {
            self.directory_max_file_size
        } else {
            self.file_max_file_size
        }
    }

    /// Settings rooted at a specific default directory, everything else default.
    pub fn with_kubeconfig_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig_directory: directory.into(),
            ..Self::default()
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            kubeconfig_directory: default_kubeconfig_directory(),
            quiet_period_ms: default_quiet_period_ms(),
            directory_max_file_size: default_directory_max_file_size(),
            file_max_file_size: default_file_max_file_size(),
            ignore: default_ignore(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// `<data dir>/kubesync/kubeconfigs`, falling back to the temp dir on
/// platforms without a data directory.
pub fn default_kubeconfig_directory() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kubesync")
        .join("kubeconfigs")
}

fn default_quiet_period_ms() -> u64 {
    1000
}

fn default_directory_max_file_size() -> u64 {
    DIRECTORY_MAX_FILE_SIZE
}

fn default_file_max_file_size() -> u64 {
    FILE_MAX_FILE_SIZE
}

fn default_ignore() -> Vec<String> {
    vec![
        "*.lock".to_string(),
        "*.swp".to_string(),
        ".DS_Store".to_string(),
    ]
}

fn default_event_capacity() -> usize {
    256
}
