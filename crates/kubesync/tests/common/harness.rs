//! Test harness for running a sync manager in isolation.
//!
//! The `SyncHarness` owns:
//! - a temp directory holding the default kubeconfig directory and any
//!   extra sync targets
//! - the cluster store, catalog and sync-target set the manager runs against
//! - settings with a short quiet period so tests settle quickly

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use kubesync::{
    CatalogEntity, ClusterCatalog, ClusterStore, KubeconfigSyncManager, SyncSettings,
    SyncTargetSet,
};

/// How long `wait_until` polls before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SyncHarness {
    temp_dir: TempDir,
    /// The implicit default directory.
    pub kubeconfig_dir: PathBuf,
    pub settings: SyncSettings,
    pub store: Arc<ClusterStore>,
    pub catalog: ClusterCatalog,
    pub targets: SyncTargetSet,
    pub manager: KubeconfigSyncManager,
}

impl SyncHarness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Create a harness, letting the caller adjust the settings first.
    pub fn with_settings(configure: impl FnOnce(&mut SyncSettings)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let kubeconfig_dir = temp_dir.path().join("kubeconfigs");

        let mut settings = SyncSettings::with_kubeconfig_directory(&kubeconfig_dir);
        settings.quiet_period_ms = 100;
        configure(&mut settings);

        let store = Arc::new(ClusterStore::new());
        let catalog = ClusterCatalog::new(settings.event_capacity);
        let targets = SyncTargetSet::new(settings.event_capacity);
        let manager = KubeconfigSyncManager::new(
            settings.clone(),
            targets.clone(),
            store.clone(),
            catalog.clone(),
        );

        Self {
            temp_dir,
            kubeconfig_dir,
            settings,
            store,
            catalog,
            targets,
            manager,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file inside the default kubeconfig directory.
    pub fn write_kubeconfig(&self, filename: &str, content: &str) -> PathBuf {
        std::fs::create_dir_all(&self.kubeconfig_dir).expect("Failed to create kubeconfig dir");
        let path = self.kubeconfig_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write kubeconfig");
        path
    }

    /// Write a file at a path relative to the temp directory.
    pub fn write_external(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Entities currently in the catalog, sorted by name.
    pub fn entities(&self) -> Vec<CatalogEntity> {
        self.catalog.snapshot()
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities()
            .into_iter()
            .map(|entity| entity.metadata.name)
            .collect()
    }

    /// Entities whose kubeconfig path is `path`.
    pub fn entities_from(&self, path: &Path) -> Vec<CatalogEntity> {
        let path = path.display().to_string();
        self.entities()
            .into_iter()
            .filter(|entity| entity.spec.kubeconfig_path == path)
            .collect()
    }

    /// Poll `condition` until it holds or the timeout elapses.
    pub async fn wait_until(&self, mut condition: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        condition(self)
    }

    /// Sleep long enough for any pending watcher event to have been handled.
    pub async fn settle(&self) {
        tokio::time::sleep(self.settings.quiet_period() * 5).await;
    }
}
