//! Aggregate catalog of every synced cluster.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::cluster::{CatalogEntity, Cluster, ClusterId};

/// What happened to a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogEventKind {
    Added,
    Updated,
    Removed,
}

/// Delta published whenever the aggregate set changes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEvent {
    pub kind: CatalogEventKind,
    pub entity: CatalogEntity,
    pub timestamp: DateTime<Utc>,
}

impl CatalogEvent {
    fn new(kind: CatalogEventKind, cluster: &Cluster) -> Self {
        Self {
            kind,
            entity: CatalogEntity::from(cluster),
            timestamp: Utc::now(),
        }
    }
}

struct Entry {
    cluster: Arc<Cluster>,
    /// Number of per-file context maps currently holding this cluster.
    holders: usize,
}

/// Read-only view of the union of all per-file context maps.
///
/// Consumers take snapshots or subscribe to deltas; only the sync registry
/// mutates it.
#[derive(Clone)]
pub struct ClusterCatalog {
    entries: Arc<RwLock<HashMap<ClusterId, Entry>>>,
    sender: broadcast::Sender<CatalogEvent>,
}

impl ClusterCatalog {
    /// Creates an empty catalog with the specified event channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.sender.subscribe()
    }

    /// Returns every entity, sorted by name then uid.
    pub fn snapshot(&self) -> Vec<CatalogEntity> {
        let mut entities: Vec<CatalogEntity> = self
            .read()
            .values()
            .map(|entry| CatalogEntity::from(entry.cluster.as_ref()))
            .collect();
        entities.sort_by(|a, b| {
            a.metadata
                .name
                .cmp(&b.metadata.name)
                .then_with(|| a.metadata.uid.cmp(&b.metadata.uid))
        });
        entities
    }

    pub fn get(&self, id: &ClusterId) -> Option<CatalogEntity> {
        self.read()
            .get(id)
            .map(|entry| CatalogEntity::from(entry.cluster.as_ref()))
    }

    pub fn contains(&self, id: &ClusterId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of per-file maps currently holding `id`.
    pub(crate) fn holders(&self, id: &ClusterId) -> usize {
        self.read().get(id).map_or(0, |entry| entry.holders)
    }

    pub(crate) fn insert(&self, cluster: Arc<Cluster>) {
        let event = {
            let mut entries = self.write();
            match entries.get_mut(cluster.id()) {
                Some(entry) => {
                    entry.holders += 1;
                    None
                }
                None => {
                    let event = CatalogEvent::new(CatalogEventKind::Added, &cluster);
                    entries.insert(
                        cluster.id().clone(),
                        Entry {
                            cluster,
                            holders: 1,
                        },
                    );
                    Some(event)
                }
            }
        };

        if let Some(event) = event {
            self.send(event);
        }
    }

    pub(crate) fn touch(&self, cluster: &Cluster) {
        if self.contains(cluster.id()) {
            self.send(CatalogEvent::new(CatalogEventKind::Updated, cluster));
        }
    }

    pub(crate) fn release(&self, id: &ClusterId) {
        let event = {
            let mut entries = self.write();
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders > 0 {
                None
            } else {
                entries
                    .remove(id)
                    .map(|entry| CatalogEvent::new(CatalogEventKind::Removed, &entry.cluster))
            }
        };

        if let Some(event) = event {
            self.send(event);
        }
    }

    fn send(&self, event: CatalogEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClusterId, Entry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Cluster catalog lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClusterId, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Cluster catalog lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for ClusterCatalog {
    fn default() -> Self {
        Self::new(256)
    }
}
