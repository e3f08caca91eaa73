//! Kubeconfig parsing errors.

use std::path::PathBuf;
use thiserror::Error;

/// Document-level failures. Any of these discards every context in the file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KubeconfigError {
    #[error("Failed to parse kubeconfig YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Kubeconfig root entry in '{path}' must be a mapping")]
    InvalidRoot { path: PathBuf },

    #[error("Kubeconfig field '{field}' in '{path}' must be a list")]
    InvalidList { path: PathBuf, field: &'static str },
}

/// A single context that could not be resolved. Siblings are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Malformed context entry '{context}': {reason}")]
    MalformedContext { context: String, reason: String },

    #[error("Duplicate context '{context}' in kubeconfig, keeping the first definition")]
    Duplicate { context: String },

    #[error("No valid cluster object provided in kubeconfig for context '{context}'")]
    MissingCluster {
        context: String,
        cluster: Option<String>,
    },

    #[error("Malformed cluster '{cluster}' referenced by context '{context}': {reason}")]
    MalformedCluster {
        context: String,
        cluster: String,
        reason: String,
    },

    #[error("No valid user object provided in kubeconfig for context '{context}'")]
    MissingUser {
        context: String,
        user: Option<String>,
    },

    #[error("Malformed user '{user}' referenced by context '{context}': {reason}")]
    MalformedUser {
        context: String,
        user: String,
        reason: String,
    },
}

impl ContextError {
    /// The name (or positional label) of the rejected context.
    pub fn context_name(&self) -> &str {
        match self {
            ContextError::MalformedContext { context, .. }
            | ContextError::Duplicate { context }
            | ContextError::MissingCluster { context, .. }
            | ContextError::MalformedCluster { context, .. }
            | ContextError::MissingUser { context, .. }
            | ContextError::MalformedUser { context, .. } => context,
        }
    }
}
