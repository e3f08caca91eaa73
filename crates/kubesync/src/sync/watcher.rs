//! File system watcher for a single sync target.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::SyncSettings;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Failed to start watching '{path}': {reason}")]
    Start { path: PathBuf, reason: String },

    #[error("Watcher for '{path}' failed: {message}")]
    Notify { path: PathBuf, message: String },
}

/// The type of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    /// The file was seen for the first time.
    Add,
    /// A known file was modified.
    Change,
    /// A known file no longer exists.
    Unlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// A change to one file belonging to a sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// The registered sync target the file belongs to.
    pub target: PathBuf,
    pub kind: WatchEventKind,
    /// The file path under the registered target: the target itself for a
    /// file target, `target.join(name)` for a directory member.
    pub file_path: PathBuf,
    /// Metadata at event time; absent for unlinks.
    pub stat: Option<FileStat>,
}

/// Names inside a synced directory that are never reported.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// Compiles the patterns, skipping (and logging) invalid ones.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Hidden entries and pattern matches are ignored.
    pub fn is_ignored(&self, file_name: &str) -> bool {
        file_name.starts_with('.') || self.patterns.iter().any(|p| p.matches(file_name))
    }
}

/// Options shared by every watcher started by one registry.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub quiet_period: Duration,
    pub ignore: IgnoreRules,
}

impl WatchOptions {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            quiet_period: settings.quiet_period(),
            ignore: IgnoreRules::new(&settings.ignore),
        }
    }
}

/// Turns raw debounced paths into add/change/unlink events.
struct Tracker<F> {
    target: PathBuf,
    is_directory: bool,
    /// The resolved path actually handed to the OS watcher.
    watch_root: PathBuf,
    /// For file targets, the resolved file path.
    resolved_file: Option<PathBuf>,
    ignore: IgnoreRules,
    known: HashSet<PathBuf>,
    handler: F,
}

impl<F> Tracker<F>
where
    F: FnMut(Result<WatchEvent, WatchError>) + Send + 'static,
{
    /// Maps an OS-reported path back onto the registered target.
    fn member_path(&self, raw: &Path) -> Option<PathBuf> {
        if self.is_directory {
            if raw.parent() != Some(self.watch_root.as_path()) {
                return None;
            }
            let name = raw.file_name()?;
            if self.ignore.is_ignored(&name.to_string_lossy()) {
                return None;
            }
            Some(self.target.join(name))
        } else if self.resolved_file.as_deref() == Some(raw) {
            Some(self.target.clone())
        } else {
            None
        }
    }

    fn observe_raw(&mut self, raw: &Path) {
        if self.is_directory && raw == self.watch_root && !raw.exists() {
            self.unlink_all();
            return;
        }

        if let Some(file_path) = self.member_path(raw) {
            self.observe(file_path);
        }
    }

    fn observe(&mut self, file_path: PathBuf) {
        let event = match std::fs::metadata(&file_path) {
            Ok(metadata) if metadata.is_file() => {
                let kind = if self.known.insert(file_path.clone()) {
                    WatchEventKind::Add
                } else {
                    WatchEventKind::Change
                };
                Some(WatchEvent {
                    target: self.target.clone(),
                    kind,
                    file_path,
                    stat: Some(FileStat::from_metadata(&metadata)),
                })
            }
            // A directory (or other special file) took the name; treat it as gone.
            Ok(_) => self.unlink_event(file_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.unlink_event(file_path),
            Err(e) => {
                // Unreadable but present: let the reader surface the failure.
                debug!(path = %file_path.display(), error = %e, "stat failed");
                let kind = if self.known.insert(file_path.clone()) {
                    WatchEventKind::Add
                } else {
                    WatchEventKind::Change
                };
                Some(WatchEvent {
                    target: self.target.clone(),
                    kind,
                    file_path,
                    stat: None,
                })
            }
        };

        if let Some(event) = event {
            (self.handler)(Ok(event));
        }
    }

    fn unlink_event(&mut self, file_path: PathBuf) -> Option<WatchEvent> {
        if !self.known.remove(&file_path) {
            return None;
        }
        Some(WatchEvent {
            target: self.target.clone(),
            kind: WatchEventKind::Unlink,
            file_path,
            stat: None,
        })
    }

    fn unlink_all(&mut self) {
        let mut known: Vec<PathBuf> = self.known.drain().collect();
        known.sort();
        for file_path in known {
            (self.handler)(Ok(WatchEvent {
                target: self.target.clone(),
                kind: WatchEventKind::Unlink,
                file_path,
                stat: None,
            }));
        }
    }

    fn fail(&mut self, message: String) {
        (self.handler)(Err(WatchError::Notify {
            path: self.target.clone(),
            message,
        }));
    }
}

/// Watches one file, or the direct children of one directory.
///
/// Events are delivered to the handler after the file has been quiet for the
/// configured period. Dropping the watcher releases the OS handle.
pub struct PathWatcher {
    target: PathBuf,
    is_directory: bool,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl PathWatcher {
    /// Starts watching `target` and emits `Add` for every file already present.
    pub fn start<F>(target: &Path, options: &WatchOptions, handler: F) -> Result<Self, WatchError>
    where
        F: FnMut(Result<WatchEvent, WatchError>) + Send + 'static,
    {
        let start_error = |reason: String| WatchError::Start {
            path: target.to_path_buf(),
            reason,
        };

        let metadata = std::fs::metadata(target).map_err(|e| start_error(e.to_string()))?;
        let is_directory = metadata.is_dir();
        let resolved = std::fs::canonicalize(target).map_err(|e| start_error(e.to_string()))?;

        // Files are watched through their parent so atomic replace-by-rename
        // saves keep being observed.
        let (watch_root, resolved_file) = if is_directory {
            (resolved, None)
        } else {
            let parent = resolved
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| start_error("file has no parent directory".to_string()))?;
            (parent, Some(resolved))
        };

        let tracker = Arc::new(Mutex::new(Tracker {
            target: target.to_path_buf(),
            is_directory,
            watch_root: watch_root.clone(),
            resolved_file,
            ignore: options.ignore.clone(),
            known: HashSet::new(),
            handler,
        }));

        let callback_tracker = Arc::clone(&tracker);
        let mut debouncer = new_debouncer(options.quiet_period, move |result: DebounceEventResult| {
            let mut tracker = callback_tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(events) => {
                    // `AnyContinuous` means the path is still being written;
                    // a final `Any` follows once it has been quiet.
                    for event in events {
                        if matches!(event.kind, DebouncedEventKind::Any) {
                            tracker.observe_raw(&event.path);
                        }
                    }
                }
                Err(e) => tracker.fail(e.to_string()),
            }
        })
        .map_err(|e| start_error(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| start_error(e.to_string()))?;

        {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            if is_directory {
                let members: Vec<PathBuf> = WalkDir::new(target)
                    .min_depth(1)
                    .max_depth(1)
                    .follow_links(true)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter(|e| !tracker.ignore.is_ignored(&e.file_name().to_string_lossy()))
                    .map(|e| e.path().to_path_buf())
                    .collect();
                for member in members {
                    tracker.observe(member);
                }
            } else {
                tracker.observe(target.to_path_buf());
            }
        }

        info!(
            path = %target.display(),
            directory = is_directory,
            "Started watching sync target"
        );

        Ok(Self {
            target: target.to_path_buf(),
            is_directory,
            _debouncer: debouncer,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        debug!(path = %self.target.display(), "Stopped watching sync target");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn options() -> WatchOptions {
        WatchOptions {
            quiet_period: Duration::from_millis(100),
            ignore: IgnoreRules::new(&[
                "*.lock".to_string(),
                "*.swp".to_string(),
                ".DS_Store".to_string(),
            ]),
        }
    }

    type Events = mpsc::Receiver<Result<WatchEvent, WatchError>>;

    fn start(target: &Path) -> (PathWatcher, Events) {
        let (tx, rx) = mpsc::channel();
        let watcher = PathWatcher::start(target, &options(), move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
        (watcher, rx)
    }

    fn next_for(rx: &Events, file: &Path) -> WatchEvent {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let event = rx.recv_timeout(remaining).unwrap().unwrap();
            if event.file_path == file {
                return event;
            }
        }
    }

    #[test]
    fn test_ignore_rules() {
        let rules = options().ignore;
        assert!(rules.is_ignored("config.lock"));
        assert!(rules.is_ignored("config.swp"));
        assert!(rules.is_ignored(".DS_Store"));
        assert!(rules.is_ignored(".hidden"));
        assert!(!rules.is_ignored("config"));
        assert!(!rules.is_ignored("dev.yaml"));
    }

    #[test]
    fn test_invalid_ignore_patterns_are_skipped() {
        let rules = IgnoreRules::new(&["[broken".to_string(), "*.bak".to_string()]);
        assert!(rules.is_ignored("x.bak"));
        assert!(!rules.is_ignored("[broken"));
    }

    #[test]
    fn test_start_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let result = PathWatcher::start(&dir.path().join("missing"), &options(), |_| {});
        assert!(matches!(result, Err(WatchError::Start { .. })));
    }

    #[test]
    fn test_initial_scan_of_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "a").unwrap();
        std::fs::write(dir.path().join("b.yaml"), "b").unwrap();
        std::fs::write(dir.path().join("b.yaml.lock"), "").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.yaml"), "c").unwrap();

        let (watcher, rx) = start(dir.path());
        assert!(watcher.is_directory());

        let mut seen = Vec::new();
        while let Ok(Ok(event)) = rx.recv_timeout(Duration::from_millis(300)) {
            assert_eq!(event.kind, WatchEventKind::Add);
            assert_eq!(event.target, dir.path());
            seen.push(event.file_path);
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![dir.path().join("a.yaml"), dir.path().join("b.yaml")]
        );
    }

    #[test]
    fn test_initial_scan_of_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config");
        std::fs::write(&file, "kind: Config\n").unwrap();

        let (watcher, rx) = start(&file);
        assert!(!watcher.is_directory());

        let event = next_for(&rx, &file);
        assert_eq!(event.kind, WatchEventKind::Add);
        assert_eq!(event.stat.map(|s| s.size), Some(13));
    }

    #[test]
    fn test_directory_change_and_unlink() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dev.yaml");

        let (_watcher, rx) = start(dir.path());

        std::fs::write(&file, "one").unwrap();
        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Add);

        std::fs::write(&file, "two").unwrap();
        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Change);

        std::fs::remove_file(&file).unwrap();
        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Unlink);
    }

    #[test]
    fn test_continuous_writes_wait_for_quiet_period() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dev.yaml");
        std::fs::write(&file, "0").unwrap();

        let (_watcher, rx) = start(dir.path());
        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Add);

        for i in 0..40 {
            std::fs::write(&file, i.to_string()).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        let early: Vec<WatchEvent> = rx.try_iter().filter_map(Result::ok).collect();
        assert!(early.is_empty(), "events while writing: {:?}", early);

        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Change);
    }

    #[test]
    fn test_file_target_survives_atomic_replace() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config");
        std::fs::write(&file, "one").unwrap();

        let (_watcher, rx) = start(&file);
        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Add);

        let staged = dir.path().join("config.tmp");
        std::fs::write(&staged, "two").unwrap();
        std::fs::rename(&staged, &file).unwrap();

        assert_eq!(next_for(&rx, &file).kind, WatchEventKind::Change);
    }
}
