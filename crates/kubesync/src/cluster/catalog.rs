//! Serializable catalog projection of a cluster.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::{Cluster, ConnectionState};

/// Source tag for entities discovered from local kubeconfig files.
pub const LOCAL_SOURCE: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntity {
    pub metadata: CatalogMetadata,
    pub spec: CatalogSpec,
    pub status: CatalogStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMetadata {
    pub uid: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    pub kubeconfig_path: String,
    pub kubeconfig_context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    pub phase: ConnectionState,
    pub active: bool,
}

impl From<&Cluster> for CatalogEntity {
    fn from(cluster: &Cluster) -> Self {
        let model = cluster.model();
        let phase = cluster.connection_state();

        Self {
            metadata: CatalogMetadata {
                uid: cluster.id().to_string(),
                name: model.context_name.clone(),
                source: LOCAL_SOURCE.to_string(),
                labels: model.labels,
            },
            spec: CatalogSpec {
                kubeconfig_path: model.kubeconfig_path.display().to_string(),
                kubeconfig_context: model.context_name,
                server: model.server,
            },
            status: CatalogStatus {
                phase,
                active: phase == ConnectionState::Connected,
            },
        }
    }
}
