//! Cluster identity and the mutable connection model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::kubeconfig::RawContextConfig;

/// Stable identifier of a synced context: the hex SHA-256 digest of
/// `"<source file path>:<context name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn for_context(source_file_path: &Path, context_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", source_file_path.display(), context_name).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection-relevant description of one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModel {
    pub id: ClusterId,
    pub context_name: String,
    pub kubeconfig_path: PathBuf,
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Whether the source file's `current-context` names this context.
    #[serde(default)]
    pub is_current: bool,
    /// Hex SHA-256 of the context's standalone kubeconfig.
    #[serde(default)]
    pub config_digest: String,
}

impl ClusterModel {
    /// Builds the model for a parsed context.
    pub fn from_context(config: &RawContextConfig, labels: BTreeMap<String, String>) -> Self {
        Self {
            id: ClusterId::for_context(&config.source_file_path, &config.context_name),
            context_name: config.context_name.clone(),
            kubeconfig_path: config.source_file_path.clone(),
            cluster_name: config.cluster_name().to_string(),
            server: config.server().map(str::to_string),
            user_name: config.user_name().to_string(),
            namespace: config.namespace().map(str::to_string),
            labels,
            is_current: config.is_current,
            config_digest: config_digest(config),
        }
    }
}

/// Digest of the split config, covering TLS, proxy and credential fields
/// that the model does not carry itself.
fn config_digest(config: &RawContextConfig) -> String {
    let split = config.to_kubeconfig();
    let rendered = split.to_yaml().unwrap_or_else(|_| format!("{:?}", split));
    hex::encode(Sha256::digest(rendered.as_bytes()))
}

/// Live connection state of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A reconciled cluster entity.
///
/// The id is fixed at construction; the model is replaced in place when the
/// backing context changes.
#[derive(Debug)]
pub struct Cluster {
    id: ClusterId,
    model: RwLock<ClusterModel>,
    state: RwLock<ConnectionState>,
}

impl Cluster {
    pub fn new(model: ClusterModel) -> Self {
        Self {
            id: model.id.clone(),
            model: RwLock::new(model),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn id(&self) -> &ClusterId {
        &self.id
    }

    /// Returns a copy of the current model.
    pub fn model(&self) -> ClusterModel {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the model, keeping the id. Returns whether anything changed.
    pub fn update_model(&self, mut model: ClusterModel) -> bool {
        model.id = self.id.clone();

        let mut current = self.model.write().unwrap_or_else(PoisonError::into_inner);
        if *current == model {
            return false;
        }
        *current = model;
        true
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}
