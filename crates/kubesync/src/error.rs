use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::kubeconfig::KubeconfigError;
use crate::sync::{PreferencesError, ReadError, WatchError};

#[derive(Error, Debug)]
pub enum KubesyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Preferences error: {0}")]
    Preferences(#[from] PreferencesError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type Result<T> = std::result::Result<T, KubesyncError>;
