//! Sync-target registry.
//!
//! Owns one watcher per sync target and one context map per watched file.
//! Watcher events, read completions and target-set changes all funnel into
//! a single queue drained by one task, which is the only place per-file
//! state changes while syncing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, info_span, warn};

use super::reader::read_bounded;
use super::reconciler::{ContextMap, ReconcileOutcome, Reconciler};
use super::targets::{SyncTarget, SyncTargetChange, SyncTargetSet};
use super::watcher::{PathWatcher, WatchError, WatchEvent, WatchEventKind, WatchOptions};
use crate::broadcast::ClusterCatalog;
use crate::cluster::ClusterLifecycle;
use crate::config::SyncSettings;
use crate::error::KubesyncError;
use crate::kubeconfig::{parse_kubeconfig, ContextParse};

enum Message {
    Watch {
        watch_id: u64,
        event: Result<WatchEvent, WatchError>,
    },
    ReadCompleted {
        target: PathBuf,
        file: PathBuf,
        generation: u64,
        result: Result<Vec<ContextParse>, KubesyncError>,
    },
}

#[derive(Default)]
struct FileState {
    contexts: ContextMap,
    /// Generation of the most recently started read.
    generation: u64,
    in_flight: Option<AbortHandle>,
}

impl FileState {
    fn cancel(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct TargetState {
    /// Resolved once a watcher has started for the path.
    target: Option<SyncTarget>,
    watcher: Option<PathWatcher>,
    /// Events from any other watcher id belong to a dropped watcher.
    watch_id: u64,
    files: HashMap<PathBuf, FileState>,
}

#[derive(Default)]
struct State {
    /// Present while syncing.
    sender: Option<mpsc::UnboundedSender<Message>>,
    pump: Option<JoinHandle<()>>,
    targets: BTreeMap<PathBuf, TargetState>,
    /// Source for both watch ids and read generations.
    counter: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn is_syncing(&self) -> bool {
        self.sender.is_some()
    }
}

struct Shared {
    settings: SyncSettings,
    options: WatchOptions,
    targets: SyncTargetSet,
    clusters: Arc<dyn ClusterLifecycle>,
    catalog: ClusterCatalog,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Sync registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            &self.settings.kubeconfig_directory,
            self.clusters.as_ref(),
            &self.catalog,
        )
    }

    /// The default directory plus every configured target.
    fn desired_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths: BTreeSet<PathBuf> = self.targets.paths().into_iter().collect();
        paths.insert(self.settings.kubeconfig_directory.clone());
        paths
    }

    /// Starts (or restarts) the watcher for `path`.
    fn attach(&self, state: &mut State, path: &Path) {
        let Some(sender) = state.sender.clone() else {
            return;
        };
        let watch_id = state.next_id();

        let started = PathWatcher::start(path, &self.options, move |event| {
            // Ignore errors - the registry has stopped
            let _ = sender.send(Message::Watch { watch_id, event });
        });

        let entry = state.targets.entry(path.to_path_buf()).or_default();
        entry.watch_id = watch_id;

        match started {
            Ok(watcher) => {
                entry.target = Some(SyncTarget::new(path, watcher.is_directory(), &self.settings));
                entry.watcher = Some(watcher);

                // Retained files that disappeared while nothing was watching.
                let gone: Vec<PathBuf> = entry
                    .files
                    .keys()
                    .filter(|file| !file.is_file())
                    .cloned()
                    .collect();
                for file in gone {
                    if let Some(mut stale) = entry.files.remove(&file) {
                        stale.cancel();
                        self.reconciler().clear(&mut stale.contexts);
                    }
                }
            }
            Err(e) => {
                error!(path = %path.display(), "{}", e);
                entry.watcher = None;
                for (_, mut file) in entry.files.drain() {
                    file.cancel();
                    self.reconciler().clear(&mut file.contexts);
                }
            }
        }
    }

    /// Drops the watcher for `path` and every entity it produced.
    fn detach(&self, state: &mut State, path: &Path) {
        let Some(mut target) = state.targets.remove(path) else {
            return;
        };
        target.watcher = None;

        let mut removed = 0;
        for (_, mut file) in target.files.drain() {
            file.cancel();
            removed += self.reconciler().clear(&mut file.contexts).removed.len();
        }
        info!(path = %path.display(), removed, "Stopped syncing target");
    }

    fn resync_targets(&self, state: &mut State) {
        let desired = self.desired_paths();
        let extra: Vec<PathBuf> = state
            .targets
            .keys()
            .filter(|path| !desired.contains(*path))
            .cloned()
            .collect();
        for path in extra {
            self.detach(state, &path);
        }
        for path in desired {
            let watching = state
                .targets
                .get(&path)
                .is_some_and(|target| target.watcher.is_some());
            if !watching {
                self.attach(state, &path);
            }
        }
    }

    fn handle(&self, message: Message) {
        let mut state = self.lock();
        match message {
            Message::Watch {
                watch_id,
                event: Ok(event),
            } => self.on_watch_event(&mut state, watch_id, event),
            Message::Watch { event: Err(e), .. } => error!("{}", e),
            Message::ReadCompleted {
                target,
                file,
                generation,
                result,
            } => self.on_read_completed(&mut state, &target, &file, generation, result),
        }
    }

    fn on_watch_event(&self, state: &mut State, watch_id: u64, event: WatchEvent) {
        let generation = state.next_id();
        let Some(sender) = state.sender.clone() else {
            return;
        };
        let Some(target) = state.targets.get_mut(&event.target) else {
            debug!(path = %event.file_path.display(), "Dropping event for removed target");
            return;
        };
        if target.watch_id != watch_id {
            debug!(path = %event.file_path.display(), "Dropping event from replaced watcher");
            return;
        }

        match event.kind {
            WatchEventKind::Add | WatchEventKind::Change => {
                let Some(max_file_size) = target.target.as_ref().map(|t| t.max_file_size) else {
                    return;
                };
                let file = target.files.entry(event.file_path.clone()).or_default();
                file.cancel();
                file.generation = generation;

                if let Some(stat) = event.stat.filter(|stat| stat.size > max_file_size) {
                    let _span = info_span!("sync", path = %event.file_path.display()).entered();
                    warn!(
                        size = stat.size,
                        limit = max_file_size,
                        "Kubeconfig file is too large, ignoring its contexts"
                    );
                    log_outcome(&self.reconciler().clear(&mut file.contexts));
                    return;
                }

                debug!(path = %event.file_path.display(), kind = ?event.kind, generation, "Reading kubeconfig");
                let handle = tokio::spawn(read_file(
                    event.target,
                    event.file_path,
                    generation,
                    max_file_size,
                    sender,
                ));
                file.in_flight = Some(handle.abort_handle());
            }
            WatchEventKind::Unlink => {
                if let Some(mut file) = target.files.remove(&event.file_path) {
                    let _span = info_span!("sync", path = %event.file_path.display()).entered();
                    file.cancel();
                    info!("Kubeconfig file removed");
                    log_outcome(&self.reconciler().clear(&mut file.contexts));
                }
            }
        }
    }

    fn on_read_completed(
        &self,
        state: &mut State,
        target: &Path,
        file: &Path,
        generation: u64,
        result: Result<Vec<ContextParse>, KubesyncError>,
    ) {
        let Some(file_state) = state
            .targets
            .get_mut(target)
            .and_then(|target| target.files.get_mut(file))
        else {
            debug!(path = %file.display(), "Discarding read for a file no longer tracked");
            return;
        };
        if file_state.generation != generation {
            debug!(path = %file.display(), generation, "Discarding superseded read");
            return;
        }
        file_state.in_flight = None;

        let _span = info_span!("sync", path = %file.display()).entered();
        let reconciler = self.reconciler();
        let outcome = match result {
            Ok(contexts) => reconciler.reconcile(&mut file_state.contexts, contexts),
            Err(e) => {
                warn!("Failed to sync kubeconfig, clearing its contexts: {}", e);
                reconciler.clear(&mut file_state.contexts)
            }
        };
        log_outcome(&outcome);
    }

    fn on_target_change(&self, change: SyncTargetChange) {
        let mut state = self.lock();
        match change {
            SyncTargetChange::Added(path) => {
                if state.targets.get(&path).is_some_and(|t| t.watcher.is_some()) {
                    debug!(path = %path.display(), "Already watching sync target");
                    return;
                }
                self.attach(&mut state, &path);
            }
            SyncTargetChange::Removed(path) => {
                if path == self.settings.kubeconfig_directory {
                    debug!(path = %path.display(), "Default directory is always synced");
                    return;
                }
                if !state.targets.contains_key(&path) {
                    debug!(path = %path.display(), "Not watching sync target");
                    return;
                }
                self.detach(&mut state, &path);
            }
        }
    }
}

fn log_outcome(outcome: &ReconcileOutcome) {
    if !outcome.is_unchanged() || !outcome.invalid.is_empty() {
        info!(
            added = outcome.added.len(),
            updated = outcome.updated.len(),
            removed = outcome.removed.len(),
            invalid = outcome.invalid.len(),
            "Kubeconfig synced"
        );
    }
}

async fn load_contexts(file: &Path, max_file_size: u64) -> Result<Vec<ContextParse>, KubesyncError> {
    let raw = read_bounded(file, max_file_size).await?;
    Ok(parse_kubeconfig(&raw, file)?)
}

async fn read_file(
    target: PathBuf,
    file: PathBuf,
    generation: u64,
    max_file_size: u64,
    sender: mpsc::UnboundedSender<Message>,
) {
    let result = load_contexts(&file, max_file_size).await;
    // Ignore errors - the registry has stopped
    let _ = sender.send(Message::ReadCompleted {
        target,
        file,
        generation,
        result,
    });
}

async fn pump(
    shared: Arc<Shared>,
    mut messages: mpsc::UnboundedReceiver<Message>,
    mut changes: broadcast::Receiver<SyncTargetChange>,
) {
    let mut listening = true;
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => shared.handle(message),
                None => break,
            },
            change = changes.recv(), if listening => match change {
                Ok(change) => shared.on_target_change(change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed sync target changes, resynchronizing");
                    let mut state = shared.lock();
                    shared.resync_targets(&mut state);
                }
                Err(RecvError::Closed) => {
                    debug!("Sync target set closed");
                    listening = false;
                }
            },
        }
    }
}

/// Keeps the cluster catalog in line with the kubeconfig files found in the
/// default directory and every configured sync target.
///
/// `start` and `stop` are idempotent. Stopping releases every watcher but
/// keeps already-synced clusters in the catalog; only removing a target or a
/// failed re-read takes them out.
pub struct KubeconfigSyncManager {
    shared: Arc<Shared>,
}

impl KubeconfigSyncManager {
    pub fn new(
        settings: SyncSettings,
        targets: SyncTargetSet,
        clusters: Arc<dyn ClusterLifecycle>,
        catalog: ClusterCatalog,
    ) -> Self {
        let options = WatchOptions::from_settings(&settings);
        Self {
            shared: Arc::new(Shared {
                settings,
                options,
                targets,
                clusters,
                catalog,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Begins watching. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if state.is_syncing() {
            debug!("Kubeconfig sync already running");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot start kubeconfig sync outside a Tokio runtime: {}", e);
                return;
            }
        };

        let default_directory = &self.shared.settings.kubeconfig_directory;
        if let Err(e) = std::fs::create_dir_all(default_directory) {
            warn!(path = %default_directory.display(), "Failed to create default kubeconfig directory: {}", e);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        // Subscribe before reading the set so no change slips in between.
        let changes = self.shared.targets.subscribe();
        state.sender = Some(sender);
        self.shared.resync_targets(&mut state);

        state.pump = Some(runtime.spawn(pump(Arc::clone(&self.shared), receiver, changes)));
        info!(targets = state.targets.len(), "Kubeconfig sync started");
    }

    /// Stops watching. Reads in flight are abandoned; synced clusters stay.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if !state.is_syncing() {
            debug!("Kubeconfig sync not running");
            return;
        }

        state.sender = None;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        for target in state.targets.values_mut() {
            target.watcher = None;
            for file in target.files.values_mut() {
                file.cancel();
            }
        }
        info!("Kubeconfig sync stopped");
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.lock().is_syncing()
    }

    /// Paths with an active watcher.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.shared
            .lock()
            .targets
            .iter()
            .filter(|(_, target)| target.watcher.is_some())
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Targets with an active watcher, with their resolved shape.
    pub fn sync_targets(&self) -> Vec<SyncTarget> {
        self.shared
            .lock()
            .targets
            .values()
            .filter(|target| target.watcher.is_some())
            .filter_map(|target| target.target.clone())
            .collect()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    pub fn catalog(&self) -> &ClusterCatalog {
        &self.shared.catalog
    }

    pub fn targets(&self) -> &SyncTargetSet {
        &self.shared.targets
    }
}

impl Drop for KubeconfigSyncManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterStore;
    use crate::sync::ReadError;
    use std::time::Duration;
    use tempfile::TempDir;

    const DEV: &str = r#"
clusters:
- name: dev-cluster
  cluster:
    server: https://10.0.0.1
users:
- name: dev-user
  user:
    token: abc
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
"#;

    fn manager(dir: &TempDir) -> KubeconfigSyncManager {
        let mut settings = SyncSettings::with_kubeconfig_directory(dir.path().join("kubeconfigs"));
        settings.quiet_period_ms = 50;
        KubeconfigSyncManager::new(
            settings,
            SyncTargetSet::default(),
            Arc::new(ClusterStore::new()),
            ClusterCatalog::default(),
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    /// Registers a tracked file whose latest read has `generation`.
    fn track(manager: &KubeconfigSyncManager, target: &Path, file: &Path, generation: u64) {
        let mut state = manager.shared.lock();
        let target = state.targets.entry(target.to_path_buf()).or_default();
        target.files.entry(file.to_path_buf()).or_default().generation = generation;
    }

    fn completed(target: &Path, file: &Path, generation: u64, yaml: &str) -> Message {
        Message::ReadCompleted {
            target: target.to_path_buf(),
            file: file.to_path_buf(),
            generation,
            result: Ok(parse_kubeconfig(yaml, file).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let default_directory = manager.settings().kubeconfig_directory.clone();

        manager.start();
        manager.start();
        assert!(manager.is_syncing());
        assert!(default_directory.is_dir());
        assert_eq!(manager.watched_paths(), vec![default_directory.clone()]);
        assert!(manager.sync_targets()[0].is_directory);

        manager.stop();
        manager.stop();
        assert!(!manager.is_syncing());
        assert!(manager.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_is_synced_on_start() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let default_directory = manager.settings().kubeconfig_directory.clone();
        std::fs::create_dir_all(&default_directory).unwrap();
        std::fs::write(default_directory.join("dev.yaml"), DEV).unwrap();

        manager.start();
        let catalog = manager.catalog().clone();
        assert!(wait_until(|| catalog.len() == 1).await);

        let entity = &catalog.snapshot()[0];
        assert_eq!(entity.metadata.name, "dev");
        assert!(entity.metadata.labels.is_empty());
    }

    #[tokio::test]
    async fn test_stop_keeps_synced_clusters() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let default_directory = manager.settings().kubeconfig_directory.clone();
        std::fs::create_dir_all(&default_directory).unwrap();
        std::fs::write(default_directory.join("dev.yaml"), DEV).unwrap();

        manager.start();
        let catalog = manager.catalog().clone();
        assert!(wait_until(|| catalog.len() == 1).await);

        manager.stop();
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_read_is_discarded() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let target = dir.path().join("kubeconfigs");
        let file = target.join("dev.yaml");

        track(&manager, &target, &file, 2);

        manager.shared.handle(completed(&target, &file, 1, DEV));
        assert!(manager.catalog().is_empty());

        manager.shared.handle(completed(&target, &file, 2, DEV));
        assert_eq!(manager.catalog().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_read_clears_file() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let target = dir.path().join("kubeconfigs");
        let file = target.join("dev.yaml");

        track(&manager, &target, &file, 1);
        manager.shared.handle(completed(&target, &file, 1, DEV));
        assert_eq!(manager.catalog().len(), 1);

        track(&manager, &target, &file, 2);
        manager.shared.handle(Message::ReadCompleted {
            target: target.clone(),
            file: file.clone(),
            generation: 2,
            result: Err(KubesyncError::Read(ReadError::TooLarge {
                path: file.clone(),
                size: 3 * 1024 * 1024,
                limit: 2 * 1024 * 1024,
            })),
        });
        assert!(manager.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_completion_for_untracked_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let target = dir.path().join("kubeconfigs");

        manager
            .shared
            .handle(completed(&target, &target.join("dev.yaml"), 1, DEV));
        assert!(manager.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_missing_target_yields_no_watcher() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let missing = dir.path().join("missing");
        manager.targets().insert(&missing.to_string_lossy());

        manager.start();
        assert!(manager.is_syncing());
        assert!(!manager.watched_paths().contains(&missing));
        manager.stop();
    }
}
