//! Diff-and-apply of parsed contexts against a file's current clusters.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::broadcast::ClusterCatalog;
use crate::cluster::{Cluster, ClusterId, ClusterLifecycle, ClusterModel};
use crate::kubeconfig::{ContextParse, RawContextConfig};
use crate::paths::abbreviate_home;

/// Label naming the source file of a context synced from outside the
/// default kubeconfig directory.
pub const FILE_LABEL: &str = "file";

/// Clusters materialized from one file, keyed by context name.
pub type ContextMap = HashMap<String, Arc<Cluster>>;

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub added: Vec<ClusterId>,
    pub updated: Vec<ClusterId>,
    pub removed: Vec<ClusterId>,
    /// Contexts excluded because they could not be parsed or constructed.
    pub invalid: Vec<String>,
}

impl ReconcileOutcome {
    /// True if the pass left the map and the catalog untouched.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Applies parsed contexts to per-file context maps.
///
/// Cluster construction and disconnection are delegated to the lifecycle
/// collaborator; every map change is mirrored into the catalog.
pub struct Reconciler<'a> {
    default_directory: &'a Path,
    clusters: &'a dyn ClusterLifecycle,
    catalog: &'a ClusterCatalog,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        default_directory: &'a Path,
        clusters: &'a dyn ClusterLifecycle,
        catalog: &'a ClusterCatalog,
    ) -> Self {
        Self {
            default_directory,
            clusters,
            catalog,
        }
    }

    /// Brings `map` in line with `contexts`.
    ///
    /// Removals are fully applied first, then in-place updates, then
    /// additions. Invalid contexts and rejected constructions are logged and
    /// excluded without affecting their siblings. An update the lifecycle
    /// rejects removes the context from the map.
    pub fn reconcile(&self, map: &mut ContextMap, contexts: Vec<ContextParse>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut incoming: Vec<RawContextConfig> = Vec::with_capacity(contexts.len());

        for parsed in contexts {
            match parsed {
                Ok(config) => incoming.push(config),
                Err(e) => {
                    warn!(context = e.context_name(), "{}", e);
                    outcome.invalid.push(e.context_name().to_string());
                }
            }
        }

        let names: HashSet<&str> = incoming.iter().map(|c| c.context_name.as_str()).collect();

        let stale: Vec<String> = map
            .keys()
            .filter(|name| !names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if let Some(cluster) = map.remove(&name) {
                self.retire(&name, &cluster);
                outcome.removed.push(cluster.id().clone());
            }
        }

        let (existing, new): (Vec<RawContextConfig>, Vec<RawContextConfig>) = incoming
            .into_iter()
            .partition(|config| map.contains_key(&config.context_name));

        for config in existing {
            let Some(cluster) = map.get(&config.context_name).cloned() else {
                continue;
            };
            let model = ClusterModel::from_context(&config, self.labels_for(&config.source_file_path));
            match self.clusters.update_cluster(&cluster, model) {
                Ok(true) => {
                    debug!(context = %config.context_name, id = %cluster.id(), "Cluster updated");
                    self.catalog.touch(&cluster);
                    outcome.updated.push(cluster.id().clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        context = %config.context_name,
                        path = %config.source_file_path.display(),
                        "Failed to update cluster: {}",
                        e
                    );
                    map.remove(&config.context_name);
                    self.retire(&config.context_name, &cluster);
                    outcome.removed.push(cluster.id().clone());
                    outcome.invalid.push(config.context_name);
                }
            }
        }

        for config in new {
            let model = ClusterModel::from_context(&config, self.labels_for(&config.source_file_path));
            let built = match self.clusters.get_cluster_by_id(&model.id) {
                Some(cluster) => self
                    .clusters
                    .update_cluster(&cluster, model)
                    .map(|_| cluster),
                None => self.clusters.create_cluster(model),
            };
            let cluster = match built {
                Ok(cluster) => cluster,
                Err(e) => {
                    warn!(
                        context = %config.context_name,
                        path = %config.source_file_path.display(),
                        "Failed to construct cluster: {}",
                        e
                    );
                    outcome.invalid.push(config.context_name);
                    continue;
                }
            };

            debug!(context = %config.context_name, id = %cluster.id(), "Cluster added");
            outcome.added.push(cluster.id().clone());
            self.catalog.insert(Arc::clone(&cluster));
            map.insert(config.context_name, cluster);
        }

        outcome
    }

    /// Disconnects and drops every cluster in `map`.
    pub fn clear(&self, map: &mut ContextMap) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        for (name, cluster) in map.drain() {
            self.retire(&name, &cluster);
            outcome.removed.push(cluster.id().clone());
        }
        outcome
    }

    /// Labels derived from where a context was synced from.
    pub fn labels_for(&self, source_file_path: &Path) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        if !source_file_path.starts_with(self.default_directory) {
            labels.insert(FILE_LABEL.to_string(), abbreviate_home(source_file_path));
        }
        labels
    }

    fn retire(&self, context: &str, cluster: &Cluster) {
        // The same file may also be mapped through another target.
        if self.catalog.holders(cluster.id()) <= 1 {
            self.clusters.disconnect(cluster);
        }
        self.catalog.release(cluster.id());
        debug!(context, id = %cluster.id(), "Cluster removed");
    }
}
