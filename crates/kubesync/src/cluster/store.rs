//! Cluster lifecycle collaborator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use super::model::{Cluster, ClusterId, ClusterModel, ConnectionState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Context '{context}' has no server URL")]
    MissingServer { context: String },

    #[error("Context '{context}' has an invalid server URL '{server}': {reason}")]
    InvalidServer {
        context: String,
        server: String,
        reason: String,
    },
}

/// Owns cluster construction, lookup and disconnection on behalf of the
/// sync engine, which only makes reconciliation decisions.
pub trait ClusterLifecycle: Send + Sync {
    fn create_cluster(&self, model: ClusterModel) -> Result<Arc<Cluster>, ClusterError>;

    fn get_cluster_by_id(&self, id: &ClusterId) -> Option<Arc<Cluster>>;

    /// Applies a new model to an existing cluster. Returns whether it changed.
    fn update_cluster(&self, cluster: &Cluster, model: ClusterModel) -> Result<bool, ClusterError>;

    fn disconnect(&self, cluster: &Cluster);
}

/// In-memory cluster registry.
///
/// Clusters are kept after disconnection so a context that disappears and
/// later comes back under the same path resolves to the same object.
#[derive(Debug, Default)]
pub struct ClusterStore {
    clusters: RwLock<HashMap<ClusterId, Arc<Cluster>>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.clusters.read() {
            Ok(clusters) => clusters.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(model: &ClusterModel) -> Result<(), ClusterError> {
        let server = match model.server.as_deref().map(str::trim) {
            Some(server) if !server.is_empty() => server,
            _ => {
                return Err(ClusterError::MissingServer {
                    context: model.context_name.clone(),
                })
            }
        };

        let parsed = url::Url::parse(server).map_err(|e| ClusterError::InvalidServer {
            context: model.context_name.clone(),
            server: server.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ClusterError::InvalidServer {
                context: model.context_name.clone(),
                server: server.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }
}

impl ClusterLifecycle for ClusterStore {
    fn create_cluster(&self, model: ClusterModel) -> Result<Arc<Cluster>, ClusterError> {
        Self::validate(&model)?;

        let mut clusters = match self.clusters.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Cluster store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let cluster = clusters
            .entry(model.id.clone())
            .or_insert_with(|| Arc::new(Cluster::new(model.clone())));
        cluster.update_model(model);

        debug!(id = %cluster.id(), "Cluster registered");
        Ok(Arc::clone(cluster))
    }

    fn get_cluster_by_id(&self, id: &ClusterId) -> Option<Arc<Cluster>> {
        let clusters = match self.clusters.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Cluster store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        clusters.get(id).cloned()
    }

    fn update_cluster(&self, cluster: &Cluster, model: ClusterModel) -> Result<bool, ClusterError> {
        Self::validate(&model)?;
        Ok(cluster.update_model(model))
    }

    fn disconnect(&self, cluster: &Cluster) {
        cluster.set_connection_state(ConnectionState::Disconnected);
        debug!(id = %cluster.id(), "Cluster disconnected");
    }
}
