//! Watching, reading and reconciling kubeconfig sync targets.

pub mod reader;
pub mod reconciler;
pub mod registry;
pub mod targets;
pub mod watcher;

pub use reader::{read_bounded, ReadError, Utf8StreamDecoder, READ_CHUNK_SIZE};
pub use reconciler::{ContextMap, ReconcileOutcome, Reconciler, FILE_LABEL};
pub use registry::KubeconfigSyncManager;
pub use targets::{PreferencesError, SyncEntry, SyncTarget, SyncTargetChange, SyncTargetSet};
pub use watcher::{
    FileStat, IgnoreRules, PathWatcher, WatchError, WatchEvent, WatchEventKind, WatchOptions,
};
