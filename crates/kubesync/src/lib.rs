pub mod broadcast;
pub mod cluster;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod paths;
pub mod sync;

pub use broadcast::{CatalogEvent, CatalogEventKind, ClusterCatalog};
pub use cluster::{
    CatalogEntity, Cluster, ClusterError, ClusterId, ClusterLifecycle, ClusterModel, ClusterStore,
    ConnectionState,
};
pub use config::{load_settings, load_settings_from_str, SyncSettings};
pub use error::{ConfigError, KubesyncError, Result};
pub use kubeconfig::{parse_kubeconfig, ContextError, Kubeconfig, KubeconfigError, RawContextConfig};
pub use sync::{
    read_bounded, KubeconfigSyncManager, PathWatcher, PreferencesError, ReadError, Reconciler,
    SyncTarget, SyncTargetChange, SyncTargetSet, WatchError, WatchEvent, WatchEventKind,
};
