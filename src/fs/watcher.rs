use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use notify::Watcher;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{PickerError, Result};
use crate::event::Event;
use crate::fs::loader::{Entry, NodeKind};

/// Default patterns to ignore when watching the filesystem.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "target",
];

/// Default debounce interval in milliseconds. Also the coalescing window:
/// a path created and deleted within one window is never reported.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// One filesystem change below a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created { path: PathBuf, kind: NodeKind },
    Removed { path: PathBuf },
    /// Content or metadata changed; name and kind did not.
    Modified { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf, kind: NodeKind },
}

impl WatchEvent {
    /// The path whose parent directory this event belongs to.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created { path, .. }
            | WatchEvent::Removed { path }
            | WatchEvent::Modified { path } => path,
            WatchEvent::Renamed { to, .. } => to,
        }
    }
}

/// Per-directory watch registration as seen by the tree model.
///
/// Watching is non-recursive: every loaded directory is registered on its own.
pub trait DirWatch {
    /// Start (or re-seed) watching `dir`, whose current children are `snapshot`.
    ///
    /// `None` means `dir` has not been read yet: an existing registration
    /// keeps the children it already knows.
    fn watch(&mut self, dir: &Path, snapshot: Option<&[Entry]>) -> Result<()>;

    /// Stop watching `dir`. Unknown paths are ignored.
    fn unwatch(&mut self, dir: &Path);
}

/// Used when live updates are disabled; everything stays manual-refresh only.
#[derive(Debug, Default)]
pub struct NoWatch;

impl DirWatch for NoWatch {
    fn watch(&mut self, _dir: &Path, _snapshot: Option<&[Entry]>) -> Result<()> {
        Ok(())
    }

    fn unwatch(&mut self, _dir: &Path) {}
}

/// The watch registration set: watched directories and the children each one
/// is known to hold. Shared between the control thread and the notify thread.
#[derive(Debug, Default)]
pub struct Registry {
    dirs: HashMap<PathBuf, HashMap<String, NodeKind>>,
}

/// Intermediate per-path verdict before rename pairing.
enum Change {
    Created(PathBuf, NodeKind),
    Removed(PathBuf, Option<NodeKind>),
    Modified(PathBuf),
}

impl Registry {
    /// Record `dir` as watched. A snapshot replaces the known children;
    /// `None` leaves an existing entry alone.
    pub fn register(&mut self, dir: &Path, snapshot: Option<&[Entry]>) {
        let Some(snapshot) = snapshot else {
            self.dirs.entry(dir.to_path_buf()).or_default();
            return;
        };
        let known = snapshot
            .iter()
            .map(|e| (e.name.clone(), e.kind))
            .collect();
        self.dirs.insert(dir.to_path_buf(), known);
    }

    /// Returns whether `dir` was registered.
    pub fn unregister(&mut self, dir: &Path) -> bool {
        self.dirs.remove(dir).is_some()
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    /// Turn one debounced batch of changed paths into events.
    ///
    /// Each path is compared against the registry's memory of its parent
    /// directory and `probe`d for its current kind. A path that is unknown
    /// and absent (created and removed inside the window) is dropped. One
    /// removal paired with one creation of the same kind in the same
    /// directory is reported as a rename.
    pub fn classify<F>(&mut self, paths: &[PathBuf], probe: F) -> Vec<WatchEvent>
    where
        F: Fn(&Path) -> Option<NodeKind>,
    {
        let mut seen = HashSet::new();
        let mut changes = Vec::new();

        for path in paths {
            if !seen.insert(path.clone()) {
                continue;
            }
            let now = probe(path);

            let parent_known = match (path.parent(), path.file_name()) {
                (Some(parent), Some(name)) => self
                    .dirs
                    .get_mut(parent)
                    .map(|known| (known, name.to_string_lossy().to_string())),
                _ => None,
            };

            match parent_known {
                Some((known, name)) => match (known.get(&name).copied(), now) {
                    (None, None) => trace!(path = %path.display(), "coalesced transient entry"),
                    (None, Some(kind)) => {
                        known.insert(name, kind);
                        changes.push(Change::Created(path.clone(), kind));
                    }
                    (Some(was), None) => {
                        known.remove(&name);
                        changes.push(Change::Removed(path.clone(), Some(was)));
                    }
                    (Some(was), Some(kind)) if was == kind => {
                        changes.push(Change::Modified(path.clone()));
                    }
                    (Some(was), Some(kind)) => {
                        known.insert(name, kind);
                        changes.push(Change::Removed(path.clone(), Some(was)));
                        changes.push(Change::Created(path.clone(), kind));
                    }
                },
                None => {
                    // A watched directory whose own parent is not watched (a root).
                    if now.is_none() && self.dirs.remove(path).is_some() {
                        changes.push(Change::Removed(path.clone(), Some(NodeKind::Directory)));
                    }
                }
            }
        }

        pair_renames(changes)
    }
}

/// Collapse a lone removal + creation of the same kind within one directory
/// into a rename.
fn pair_renames(changes: Vec<Change>) -> Vec<WatchEvent> {
    let mut per_dir: HashMap<PathBuf, (Vec<usize>, Vec<usize>)> = HashMap::new();
    for (i, change) in changes.iter().enumerate() {
        let (path, slot) = match change {
            Change::Removed(p, _) => (p, 0),
            Change::Created(p, _) => (p, 1),
            Change::Modified(_) => continue,
        };
        if let Some(parent) = path.parent() {
            let entry = per_dir.entry(parent.to_path_buf()).or_default();
            if slot == 0 {
                entry.0.push(i);
            } else {
                entry.1.push(i);
            }
        }
    }

    let mut renamed_into: HashMap<usize, usize> = HashMap::new();
    for (removed, created) in per_dir.values() {
        if let ([r], [c]) = (removed.as_slice(), created.as_slice()) {
            let same_kind = match (&changes[*r], &changes[*c]) {
                (Change::Removed(from, Some(a)), Change::Created(to, b)) => a == b && from != to,
                _ => false,
            };
            if same_kind {
                renamed_into.insert(*r, *c);
            }
        }
    }
    let consumed: HashSet<usize> = renamed_into.values().copied().collect();

    let mut events = Vec::with_capacity(changes.len());
    for (i, change) in changes.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        let event = match change {
            Change::Removed(from, _) => match renamed_into.get(&i) {
                Some(&c) => match &changes[c] {
                    Change::Created(to, kind) => WatchEvent::Renamed {
                        from: from.clone(),
                        to: to.clone(),
                        kind: *kind,
                    },
                    _ => WatchEvent::Removed { path: from.clone() },
                },
                None => WatchEvent::Removed { path: from.clone() },
            },
            Change::Created(path, kind) => WatchEvent::Created {
                path: path.clone(),
                kind: *kind,
            },
            Change::Modified(path) => WatchEvent::Modified { path: path.clone() },
        };
        events.push(event);
    }
    events
}

/// Filesystem watcher backed by a debounced OS watcher.
///
/// Directories are registered one by one (non-recursive). Classified changes
/// are sent to the control thread as [`Event::Fs`]; a watch that fails during
/// delivery is dropped and reported as [`Event::WatchLost`].
pub struct FsWatcher {
    registry: Arc<Mutex<Registry>>,
    debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl FsWatcher {
    /// Create a new FsWatcher.
    ///
    /// Events are debounced by `debounce_duration` and sent via `event_tx`.
    /// Paths matching any of `ignore_patterns` are silently dropped.
    pub fn new(
        debounce_duration: Duration,
        ignore_patterns: Vec<String>,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self> {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let shared = registry.clone();

        let debouncer = new_debouncer(
            debounce_duration,
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| match result {
                Ok(events) => {
                    let mut registry = lock(&shared);
                    // A watched directory is never ignored, whatever its name.
                    let paths: Vec<PathBuf> = events
                        .into_iter()
                        .filter(|e| e.kind == DebouncedEventKind::Any)
                        .map(|e| e.path)
                        .filter(|p| {
                            registry.is_watched(p) || !should_ignore(p, &ignore_patterns)
                        })
                        .collect();
                    if paths.is_empty() {
                        return;
                    }

                    let changes = registry.classify(&paths, NodeKind::probe);
                    drop(registry);
                    if !changes.is_empty() {
                        let _ = event_tx.send(Event::Fs(changes));
                    }
                }
                Err(err) => {
                    warn!(error = %err, "watcher delivery failed");
                    let mut registry = lock(&shared);
                    for path in &err.paths {
                        if registry.unregister(path) {
                            let _ = event_tx.send(Event::WatchLost(path.clone()));
                        }
                    }
                }
            },
        )
        .map_err(|e| PickerError::Unknown(format!("cannot start watcher: {}", e)))?;

        Ok(Self {
            registry,
            debouncer,
        })
    }
}

impl DirWatch for FsWatcher {
    fn watch(&mut self, dir: &Path, snapshot: Option<&[Entry]>) -> Result<()> {
        let already = lock(&self.registry).is_watched(dir);
        if !already {
            self.debouncer
                .watcher()
                .watch(dir, notify::RecursiveMode::NonRecursive)
                .map_err(|e| PickerError::from_notify(&e, dir))?;
            debug!(dir = %dir.display(), "watching");
        }
        lock(&self.registry).register(dir, snapshot);
        Ok(())
    }

    fn unwatch(&mut self, dir: &Path) {
        lock(&self.registry).unregister(dir);
        if let Err(e) = self.debouncer.watcher().unwatch(dir) {
            trace!(dir = %dir.display(), error = %e, "unwatch of inactive path");
        } else {
            debug!(dir = %dir.display(), "unwatched");
        }
    }
}

/// The registry holds plain data, so a poisoned lock is still usable.
fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Check if a changed path should be ignored based on ignore patterns.
///
/// Watches are non-recursive, so only the entry's own name is matched; the
/// folders above a watched directory never count.
pub fn should_ignore(path: &Path, patterns: &[String]) -> bool {
    path.file_name().is_some_and(|name| {
        let name = name.to_string_lossy();
        patterns.iter().any(|p| name == p.as_str())
    })
}
