use std::path::Path;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{PickerError, Result};
use crate::event::{Event, EventChannel};
use crate::fs::tree::{Changes, Forest, LoadRequest, NodeId};
use crate::fs::watcher::{DirWatch, FsWatcher, NoWatch};
use crate::projection::{self, Row};
use crate::prompt::PromptBuilder;
use crate::selection::{CheckState, Selection};

/// Control-thread state: tree model, selection and the queues feeding them.
///
/// Everything here runs on one task. Directory reads are pushed to the
/// blocking pool and their results, like watcher events, come back through
/// the event channel. Methods that start a read must be called from within
/// a tokio runtime.
pub struct App {
    forest: Forest,
    selection: Selection,
    events: EventChannel,
    refresh: watch::Sender<u64>,
    generation: u64,
    /// Whether live filesystem updates are available.
    pub watcher_active: bool,
}

impl App {
    /// Build the app from configuration, starting the filesystem watcher
    /// unless it is disabled or unavailable.
    pub fn new(config: &AppConfig) -> Self {
        let events = EventChannel::new();
        let watcher: Option<Box<dyn DirWatch>> = if config.watcher_enabled() {
            match FsWatcher::new(
                Duration::from_millis(config.debounce_ms()),
                config.ignore_patterns(),
                events.sender(),
            ) {
                Ok(watcher) => Some(Box::new(watcher) as Box<dyn DirWatch>),
                Err(e) => {
                    warn!(error = %e, "watcher unavailable, live updates disabled");
                    None
                }
            }
        } else {
            None
        };

        let watcher_active = watcher.is_some();
        let watcher = watcher.unwrap_or_else(|| Box::new(NoWatch) as Box<dyn DirWatch>);
        let mut app = Self::with_watcher(watcher, events);
        app.watcher_active = watcher_active;
        app
    }

    /// Build the app around an explicit watcher. `events` must be the channel
    /// the watcher sends to.
    pub fn with_watcher(watcher: Box<dyn DirWatch>, events: EventChannel) -> Self {
        let (refresh, _) = watch::channel(0);
        Self {
            forest: Forest::new(watcher),
            selection: Selection::new(),
            events,
            refresh,
            generation: 0,
            watcher_active: true,
        }
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Display-refresh notifications. The value is a change counter; re-pull
    /// [`App::rows`] whenever it moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.refresh.subscribe()
    }

    /// The current display list.
    pub fn rows(&self) -> Vec<Row> {
        projection::project(&self.forest, self.forest.expansion(), &self.selection)
    }

    // ── UI gestures ──────────────────────────────────────────────────────────

    /// "Add Folder": create a root and start loading its first level.
    pub fn add_folder(&mut self, path: &Path) -> Result<NodeId> {
        let root = self.forest.add_root(path)?;
        self.expand(root)?;
        Ok(root)
    }

    pub fn remove_root(&mut self, id: NodeId) -> Result<()> {
        let changes = self.forest.remove_root(id)?;
        self.apply(changes);
        Ok(())
    }

    pub fn expand(&mut self, id: NodeId) -> Result<()> {
        if let Some(req) = self.forest.expand(id)? {
            self.dispatch(req);
        }
        self.notify();
        Ok(())
    }

    pub fn collapse(&mut self, id: NodeId) -> Result<()> {
        self.forest.collapse(id)?;
        self.notify();
        Ok(())
    }

    /// Re-read a directory from disk.
    pub fn refresh(&mut self, id: NodeId) -> Result<()> {
        if let Some(req) = self.forest.refresh(id)? {
            self.dispatch(req);
        }
        Ok(())
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> Result<()> {
        self.selection.set_checked(&self.forest, id, checked)?;
        self.notify();
        Ok(())
    }

    pub fn state(&self, id: NodeId) -> Option<CheckState> {
        self.selection.state(&self.forest, id)
    }

    /// Collect the checked files for prompt building.
    pub fn prompt(&self) -> PromptBuilder {
        PromptBuilder::from_selection(&self.forest, &self.selection)
    }

    // ── Event loop ───────────────────────────────────────────────────────────

    /// Apply one message from the background.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Loaded(done) => {
                let changes = self.forest.apply_load(done);
                self.apply(changes);
            }
            Event::Fs(batch) => {
                debug!(events = batch.len(), "reconciling");
                let mut visible = false;
                for event in batch {
                    let step = self.forest.reconcile(event);
                    // Selection must see each step before the next one can
                    // destroy the nodes it refers to.
                    self.selection.apply(&self.forest, &step);
                    visible |= step.visible;
                }
                if visible {
                    self.notify();
                }
            }
            Event::WatchLost(path) => self.forest.watch_lost(&path),
        }
    }

    /// Wait for and apply the next background message.
    pub async fn next_event(&mut self) -> Result<()> {
        let event = self.events.next().await?;
        self.handle(event);
        Ok(())
    }

    /// Process messages until no directory read is outstanding, then drain
    /// whatever else is already queued.
    pub async fn settle(&mut self) -> Result<()> {
        while self.forest.in_flight() > 0 {
            self.next_event().await?;
        }
        while let Some(event) = self.events.try_next() {
            self.handle(event);
        }
        Ok(())
    }

    /// Expand every directory down to `depth` levels below the roots.
    pub async fn expand_to_depth(&mut self, depth: usize) -> Result<()> {
        self.settle().await?;
        for level in 0..depth {
            let dirs: Vec<NodeId> = self
                .rows()
                .into_iter()
                .filter(|r| r.depth == level && r.kind.is_dir())
                .map(|r| r.id)
                .collect();
            for id in dirs {
                self.expand(id)?;
            }
            self.settle().await?;
        }
        Ok(())
    }

    /// Expand the way from the enclosing root down to `path` and return its node.
    pub async fn reveal(&mut self, path: &Path) -> Result<NodeId> {
        let (root, root_path) = self
            .forest
            .roots()
            .iter()
            .filter_map(|r| self.forest.node(*r).map(|n| (*r, n.path.clone())))
            .find(|(_, p)| path.starts_with(p))
            .ok_or_else(|| PickerError::NotFound(path.to_path_buf()))?;

        let relative = path
            .strip_prefix(&root_path)
            .map_err(|_| PickerError::NotFound(path.to_path_buf()))?;
        let mut current = root;
        for component in relative.components() {
            self.expand(current)?;
            self.settle().await?;
            let name = component.as_os_str().to_string_lossy();
            current = self
                .forest
                .child_named(current, &name)
                .ok_or_else(|| PickerError::NotFound(path.to_path_buf()))?;
        }
        Ok(current)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn dispatch(&self, req: LoadRequest) {
        let tx = self.events.sender();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(Event::Loaded(req.run()));
        });
    }

    fn apply(&mut self, changes: Changes) {
        self.selection.apply(&self.forest, &changes);
        if changes.visible {
            self.notify();
        }
    }

    fn notify(&mut self) {
        self.generation += 1;
        self.refresh.send_replace(self.generation);
    }
}
