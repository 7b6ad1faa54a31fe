use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::error::{PickerError, Result};
use crate::fs::loader::{self, compare_names, display_name, Entry, NodeKind};
use crate::fs::watcher::{DirWatch, WatchEvent};

/// Arena key for a node. Ids are never reused, so a completion or UI action
/// carrying the id of a destroyed node simply misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Load state of a directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Error(PickerError),
}

/// A node in the forest.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// `None` until loaded; `Some(vec![])` is an empty directory.
    children: Option<Vec<NodeId>>,
    /// `None` for anything that is not a directory.
    load: Option<LoadState>,
    /// Registered with the watcher and believed current.
    watching: bool,
    /// Ticket of the in-flight load, if any.
    ticket: Option<u64>,
}

impl Node {
    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }

    pub fn load_state(&self) -> Option<&LoadState> {
        self.load.as_ref()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_loading(&self) -> bool {
        self.ticket.is_some()
    }

    /// Whether live updates are active for this directory.
    pub fn is_live(&self) -> bool {
        self.watching
    }
}

/// A directory read to be run off the control thread.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub node: NodeId,
    pub path: PathBuf,
    ticket: u64,
}

impl LoadRequest {
    /// Perform the (blocking) read.
    pub fn run(self) -> LoadCompletion {
        let result = loader::load(&self.path);
        LoadCompletion {
            node: self.node,
            path: self.path,
            ticket: self.ticket,
            result,
        }
    }
}

/// Result of a [`LoadRequest`], delivered back to the control thread.
#[derive(Debug, Clone)]
pub struct LoadCompletion {
    pub node: NodeId,
    pub path: PathBuf,
    ticket: u64,
    pub result: Result<Vec<Entry>>,
}

/// What a mutation did, for the selection tracker and the display.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
    /// Newly created nodes.
    pub inserted: Vec<NodeId>,
    /// Every destroyed node, descendants included.
    pub removed: Vec<NodeId>,
    /// Surviving directories whose child set changed.
    pub touched: Vec<NodeId>,
    /// The change lies in the displayed part of the forest.
    pub visible: bool,
}

impl Changes {
    fn merge(&mut self, other: Changes) {
        self.inserted.extend(other.inserted);
        self.removed.extend(other.removed);
        for id in other.touched {
            if !self.touched.contains(&id) {
                self.touched.push(id);
            }
        }
        self.visible |= other.visible;
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && self.touched.is_empty() && !self.visible
    }
}

/// The tree model: one lazily loaded tree per added root folder.
///
/// Only the control thread touches a `Forest`. Directory reads leave as
/// [`LoadRequest`]s and come back through [`Forest::apply_load`]; watcher
/// events come in through [`Forest::reconcile`].
pub struct Forest {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
    by_path: HashMap<PathBuf, Vec<NodeId>>,
    expanded: HashSet<NodeId>,
    /// Events that arrived while their directory was loading.
    deferred: HashMap<NodeId, Vec<WatchEvent>>,
    watcher: Box<dyn DirWatch>,
    next_id: u64,
    next_ticket: u64,
}

impl Forest {
    pub fn new(watcher: Box<dyn DirWatch>) -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            by_path: HashMap::new(),
            expanded: HashSet::new(),
            deferred: HashMap::new(),
            watcher,
            next_id: 0,
            next_ticket: 0,
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn expansion(&self) -> &HashSet<NodeId> {
        &self.expanded
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.expanded.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All live nodes at `path` (more than one when roots overlap).
    pub fn find(&self, path: &Path) -> &[NodeId] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The child of `dir` called `name`, if `dir` is loaded.
    pub fn child_named(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(&dir)?
            .children()?
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes.get(&p).and_then(|n| n.parent);
        }
        out
    }

    /// Whether the row for `id` is part of the projection.
    pub fn is_displayed(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id) && self.ancestors(id).iter().all(|a| self.expanded.contains(a))
    }

    /// Number of loads issued and not yet applied for live nodes.
    pub fn in_flight(&self) -> usize {
        self.nodes.values().filter(|n| n.ticket.is_some()).count()
    }

    // ── User operations ──────────────────────────────────────────────────────

    /// Add `path` as a new root in the `Unloaded` state and start watching it.
    pub fn add_root(&mut self, path: &Path) -> Result<NodeId> {
        if self.roots.iter().any(|r| self.nodes[r].path == path) {
            return Err(PickerError::AlreadyExists(path.to_path_buf()));
        }
        let meta = fs::metadata(path).map_err(|e| PickerError::from_io(&e, path))?;
        if !meta.is_dir() {
            return Err(PickerError::NotADirectory(path.to_path_buf()));
        }

        let id = self.alloc(path.to_path_buf(), display_name(path), NodeKind::Directory, None);
        self.roots.push(id);
        self.register_watch(id, None);
        info!(root = %path.display(), %id, "root added");
        Ok(id)
    }

    /// Destroy a root and everything below it, releasing its watches.
    pub fn remove_root(&mut self, id: NodeId) -> Result<Changes> {
        if !self.roots.contains(&id) {
            return Err(PickerError::UnknownNode(id));
        }
        self.roots.retain(|r| *r != id);
        let removed = self.destroy_subtree(id);
        info!(%id, nodes = removed.len(), "root removed");
        Ok(Changes {
            removed,
            visible: true,
            ..Changes::default()
        })
    }

    /// Mark a directory expanded, loading it if needed.
    ///
    /// Returns the read to perform, if any. A loaded directory whose watch
    /// was lost is re-read rather than trusted.
    pub fn expand(&mut self, id: NodeId) -> Result<Option<LoadRequest>> {
        let node = self.nodes.get(&id).ok_or(PickerError::UnknownNode(id))?;
        if !node.is_dir() {
            return Err(PickerError::NotADirectory(node.path.clone()));
        }
        let busy = node.ticket.is_some();
        let fresh = node.load == Some(LoadState::Loaded) && node.watching;
        self.expanded.insert(id);

        if busy || fresh {
            return Ok(None);
        }
        Ok(self.issue(id))
    }

    /// Hide a directory's children. Loaded children and watches are kept.
    pub fn collapse(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(PickerError::UnknownNode(id));
        }
        self.expanded.remove(&id);
        Ok(())
    }

    /// Re-read a directory regardless of its watch state.
    pub fn refresh(&mut self, id: NodeId) -> Result<Option<LoadRequest>> {
        let node = self.nodes.get(&id).ok_or(PickerError::UnknownNode(id))?;
        if !node.is_dir() {
            return Err(PickerError::NotADirectory(node.path.clone()));
        }
        if node.ticket.is_some() {
            return Ok(None);
        }
        Ok(self.issue(id))
    }

    fn issue(&mut self, id: NodeId) -> Option<LoadRequest> {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let node = self.nodes.get_mut(&id)?;
        node.ticket = Some(ticket);
        if node.load != Some(LoadState::Loaded) {
            node.load = Some(LoadState::Loading);
        }
        debug!(%id, path = %node.path.display(), "load issued");
        Some(LoadRequest {
            node: id,
            path: node.path.clone(),
            ticket,
        })
    }

    // ── Async results ────────────────────────────────────────────────────────

    /// Apply a finished directory read. Results for destroyed nodes or
    /// superseded requests are discarded.
    pub fn apply_load(&mut self, done: LoadCompletion) -> Changes {
        let Some(node) = self.nodes.get_mut(&done.node) else {
            trace!(id = %done.node, path = %done.path.display(), "discarding load for removed node");
            return Changes::default();
        };
        if node.ticket != Some(done.ticket) {
            trace!(id = %done.node, "discarding superseded load");
            return Changes::default();
        }
        node.ticket = None;

        let id = done.node;
        let mut changes = match done.result {
            Ok(entries) => {
                let changes = self.merge_snapshot(id, &entries);
                self.register_watch(id, Some(&entries));
                debug!(%id, children = entries.len(), "load applied");
                changes
            }
            Err(err) => {
                warn!(%id, error = %err, "load failed");
                self.deferred.remove(&id);
                self.fail(id, err)
            }
        };

        for event in self.deferred.remove(&id).unwrap_or_default() {
            let replayed = self.reconcile(event);
            changes.merge(replayed);
        }
        changes.visible |= self.is_displayed(id);
        changes
    }

    /// Install `entries` as the children of `dir`, keeping surviving nodes.
    fn merge_snapshot(&mut self, dir: NodeId, entries: &[Entry]) -> Changes {
        let mut changes = Changes {
            touched: vec![dir],
            ..Changes::default()
        };
        let previous = self.nodes[&dir].children.clone().unwrap_or_default();
        let mut existing: HashMap<(String, NodeKind), NodeId> = previous
            .iter()
            .filter_map(|c| self.nodes.get(c).map(|n| ((n.name.clone(), n.kind), *c)))
            .collect();

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            match existing.remove(&(entry.name.clone(), entry.kind)) {
                Some(kept) => children.push(kept),
                None => {
                    let child = self.alloc(entry.path.clone(), entry.name.clone(), entry.kind, Some(dir));
                    changes.inserted.push(child);
                    children.push(child);
                }
            }
        }
        for gone in existing.into_values() {
            changes.removed.extend(self.destroy_subtree(gone));
        }

        if let Some(node) = self.nodes.get_mut(&dir) {
            node.children = Some(children);
            node.load = Some(LoadState::Loaded);
        }
        changes
    }

    /// Move `dir` to `Error`, dropping whatever it had loaded.
    fn fail(&mut self, dir: NodeId, err: PickerError) -> Changes {
        let mut changes = Changes {
            touched: vec![dir],
            ..Changes::default()
        };
        let previous = self
            .nodes
            .get_mut(&dir)
            .and_then(|n| n.children.take())
            .unwrap_or_default();
        for child in previous {
            changes.removed.extend(self.destroy_subtree(child));
        }
        if let Some(node) = self.nodes.get_mut(&dir) {
            node.load = Some(LoadState::Error(err));
            node.ticket = None;
        }
        changes
    }

    /// Merge one watcher event into the forest.
    ///
    /// Applies to every loaded directory whose path is the event's parent.
    /// Directories still loading queue the event for replay; unloaded or
    /// unknown directories drop it.
    pub fn reconcile(&mut self, event: WatchEvent) -> Changes {
        if let WatchEvent::Renamed { from, to, kind } = event {
            let mut changes = self.reconcile(WatchEvent::Removed { path: from });
            changes.merge(self.reconcile(WatchEvent::Created { path: to, kind }));
            return changes;
        }

        let ready = self.parents_ready(&event);
        let mut changes = Changes::default();
        match event {
            WatchEvent::Created { path, kind } => {
                let name = display_name(&path);
                for dir in ready {
                    if self.child_named(dir, &name).is_some() {
                        continue;
                    }
                    let child = self.alloc(path.clone(), name.clone(), kind, Some(dir));
                    self.insert_sorted(dir, child);
                    changes.inserted.push(child);
                    changes.touched.push(dir);
                    changes.visible |= self.is_displayed(child);
                }
            }
            WatchEvent::Removed { path } => {
                changes.merge(self.root_vanished(&path));
                let name = display_name(&path);
                for dir in ready {
                    let Some(child) = self.child_named(dir, &name) else {
                        continue;
                    };
                    changes.visible |= self.is_displayed(child);
                    if let Some(children) = self.nodes.get_mut(&dir).and_then(|n| n.children.as_mut()) {
                        children.retain(|c| *c != child);
                    }
                    changes.removed.extend(self.destroy_subtree(child));
                    changes.touched.push(dir);
                }
            }
            WatchEvent::Modified { path } => {
                let name = display_name(&path);
                for dir in ready {
                    if let Some(child) = self.child_named(dir, &name) {
                        changes.visible |= self.is_displayed(child);
                    }
                }
            }
            WatchEvent::Renamed { .. } => {}
        }
        changes
    }

    /// Loaded directories the event applies to now. Events for directories
    /// with a read in flight are parked until the read lands.
    fn parents_ready(&mut self, event: &WatchEvent) -> Vec<NodeId> {
        let Some(parent) = event.path().parent() else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        for dir in self.find(parent).to_vec() {
            let node = &self.nodes[&dir];
            if node.ticket.is_some() {
                self.deferred.entry(dir).or_default().push(event.clone());
            } else if node.load == Some(LoadState::Loaded) {
                ready.push(dir);
            } else {
                trace!(dir = %parent.display(), "dropping event for unloaded directory");
            }
        }
        ready
    }

    /// A root directory itself disappeared.
    fn root_vanished(&mut self, path: &Path) -> Changes {
        let mut changes = Changes::default();
        let roots: Vec<NodeId> = self
            .roots
            .iter()
            .copied()
            .filter(|r| self.nodes[r].path == path)
            .collect();
        for root in roots {
            warn!(root = %path.display(), "root folder vanished");
            self.release_watch(root);
            changes.merge(self.fail(root, PickerError::NotFound(path.to_path_buf())));
            changes.visible = true;
        }
        changes
    }

    /// The watcher dropped `path`; affected directories become stale and are
    /// re-read on next expansion.
    pub fn watch_lost(&mut self, path: &Path) {
        let mut any = false;
        for id in self.find(path).to_vec() {
            if let Some(node) = self.nodes.get_mut(&id) {
                any |= node.watching;
                node.watching = false;
            }
        }
        if any {
            warn!(dir = %path.display(), "live updates lost, manual refresh only");
            self.watcher.unwatch(path);
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn alloc(&mut self, path: PathBuf, name: String, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.by_path.entry(path.clone()).or_default().push(id);
        self.nodes.insert(
            id,
            Node {
                name,
                path,
                kind,
                parent,
                children: None,
                load: kind.is_dir().then_some(LoadState::Unloaded),
                watching: false,
                ticket: None,
            },
        );
        id
    }

    fn insert_sorted(&mut self, dir: NodeId, child: NodeId) {
        let name = self.nodes[&child].name.clone();
        let nodes = &self.nodes;
        let pos = nodes[&dir].children().map_or(0, |children| {
            children.partition_point(|c| compare_names(&nodes[c].name, &name) == Ordering::Less)
        });
        if let Some(children) = self.nodes.get_mut(&dir).and_then(|n| n.children.as_mut()) {
            children.insert(pos, child);
        }
    }

    fn register_watch(&mut self, id: NodeId, snapshot: Option<&[Entry]>) {
        let path = self.nodes[&id].path.clone();
        let watching = match self.watcher.watch(&path, snapshot) {
            Ok(()) => true,
            Err(err) => {
                warn!(dir = %path.display(), error = %err, "watch registration failed, manual refresh only");
                false
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.watching = watching;
        }
    }

    /// Stop watching `id`'s path unless another live node still needs it.
    fn release_watch(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if !std::mem::take(&mut node.watching) {
            return;
        }
        let path = node.path.clone();
        let shared = self
            .find(&path)
            .iter()
            .any(|other| *other != id && self.nodes[other].watching);
        if !shared {
            self.watcher.unwatch(&path);
        }
    }

    /// Remove `id` and all its descendants from every index.
    fn destroy_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            self.release_watch(cur);
            let Some(node) = self.nodes.remove(&cur) else {
                continue;
            };
            if let Some(children) = node.children {
                stack.extend(children);
            }
            if let Some(ids) = self.by_path.get_mut(&node.path) {
                ids.retain(|i| *i != cur);
                if ids.is_empty() {
                    self.by_path.remove(&node.path);
                }
            }
            self.expanded.remove(&cur);
            self.deferred.remove(&cur);
            removed.push(cur);
        }
        removed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::selection::{CheckState, Selection};
    use std::cell::RefCell;
    use std::fs::File;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Watcher that records calls and can be told to refuse paths.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        pub calls: Rc<RefCell<Vec<(bool, PathBuf)>>>,
        pub refuse: Rc<RefCell<HashSet<PathBuf>>>,
    }

    impl Recorder {
        pub fn watched(&self) -> HashSet<PathBuf> {
            let mut set = HashSet::new();
            for (on, path) in self.calls.borrow().iter() {
                if *on {
                    set.insert(path.clone());
                } else {
                    set.remove(path);
                }
            }
            set
        }
    }

    impl DirWatch for Recorder {
        fn watch(&mut self, dir: &Path, _snapshot: Option<&[Entry]>) -> Result<()> {
            if self.refuse.borrow().contains(dir) {
                return Err(PickerError::PermissionDenied(dir.to_path_buf()));
            }
            self.calls.borrow_mut().push((true, dir.to_path_buf()));
            Ok(())
        }

        fn unwatch(&mut self, dir: &Path) {
            self.calls.borrow_mut().push((false, dir.to_path_buf()));
        }
    }

    /// root/{a.txt, b/ (empty), c/{d.txt}}
    pub(crate) fn setup_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("a.txt")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();
        File::create(dir.path().join("c").join("d.txt")).unwrap();
        dir
    }

    fn forest() -> (Forest, Recorder) {
        let rec = Recorder::default();
        (Forest::new(Box::new(rec.clone())), rec)
    }

    /// Expand and run the load synchronously.
    pub(crate) fn expand_now(forest: &mut Forest, id: NodeId) -> Changes {
        match forest.expand(id).unwrap() {
            Some(req) => forest.apply_load(req.run()),
            None => Changes::default(),
        }
    }

    fn names(forest: &Forest, id: NodeId) -> Vec<String> {
        forest.node(id).unwrap().children().unwrap()
            .iter()
            .map(|c| forest.node(*c).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn add_root_starts_unloaded_and_watched() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        let node = forest.node(root).unwrap();
        assert_eq!(node.load_state(), Some(&LoadState::Unloaded));
        assert!(node.children().is_none());
        assert!(rec.watched().contains(dir.path()));
    }

    #[test]
    fn add_root_twice_fails_and_keeps_subtree() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let before = forest.len();

        let err = forest.add_root(dir.path()).unwrap_err();
        assert_eq!(err, PickerError::AlreadyExists(dir.path().to_path_buf()));
        assert_eq!(forest.len(), before);
        assert_eq!(names(&forest, root), vec!["a.txt", "b", "c"]);
    }

    #[test]
    fn add_root_rejects_files_and_missing_paths() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let file = dir.path().join("a.txt");
        assert_eq!(forest.add_root(&file), Err(PickerError::NotADirectory(file)));
        let missing = dir.path().join("zzz");
        assert_eq!(forest.add_root(&missing), Err(PickerError::NotFound(missing)));
        assert!(forest.roots().is_empty());
    }

    #[test]
    fn expand_loads_children_and_watches() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        let root = forest.add_root(dir.path()).unwrap();

        let req = forest.expand(root).unwrap().expect("load issued");
        assert_eq!(forest.node(root).unwrap().load_state(), Some(&LoadState::Loading));
        assert_eq!(forest.in_flight(), 1);

        let changes = forest.apply_load(req.run());
        assert_eq!(changes.inserted.len(), 3);
        assert!(changes.visible);
        assert_eq!(forest.node(root).unwrap().load_state(), Some(&LoadState::Loaded));
        assert_eq!(names(&forest, root), vec!["a.txt", "b", "c"]);

        let b = forest.child_named(root, "b").unwrap();
        expand_now(&mut forest, b);
        assert_eq!(forest.node(b).unwrap().children(), Some(&[][..]));
        assert!(rec.watched().contains(&dir.path().join("b")));
    }

    #[test]
    fn files_cannot_be_expanded() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let a = forest.child_named(root, "a.txt").unwrap();
        assert!(matches!(forest.expand(a), Err(PickerError::NotADirectory(_))));
        assert!(forest.node(a).unwrap().load_state().is_none());
    }

    #[test]
    fn expand_collapse_expand_is_idempotent() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        let mut sel = Selection::new();
        let changes = expand_now(&mut forest, root);
        sel.apply(&forest, &changes);
        let a = forest.child_named(root, "a.txt").unwrap();
        sel.set_checked(&forest, a, true).unwrap();

        let first = forest.node(root).unwrap().children().unwrap().to_vec();
        let states = |forest: &Forest, sel: &Selection| -> Vec<Option<CheckState>> {
            std::iter::once(root)
                .chain(first.iter().copied())
                .map(|id| sel.state(forest, id))
                .collect()
        };
        let before = states(&forest, &sel);
        assert_eq!(before[0], Some(CheckState::Partial));

        forest.collapse(root).unwrap();
        assert!(!forest.is_expanded(root));
        assert!(forest.expand(root).unwrap().is_none(), "cached snapshot reused");
        assert_eq!(forest.node(root).unwrap().children().unwrap(), &first[..]);
        assert_eq!(states(&forest, &sel), before);
    }

    #[test]
    fn collapse_does_not_cancel_inflight_load() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        let req = forest.expand(root).unwrap().unwrap();
        forest.collapse(root).unwrap();
        let changes = forest.apply_load(req.run());
        assert_eq!(changes.inserted.len(), 3);
        assert!(!forest.is_expanded(root));
        assert!(forest.expand(root).unwrap().is_none());
    }

    #[test]
    fn load_error_is_per_node_and_retryable() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let b = forest.child_named(root, "b").unwrap();
        let c = forest.child_named(root, "c").unwrap();

        fs::remove_dir(dir.path().join("b")).unwrap();
        expand_now(&mut forest, b);
        assert!(matches!(
            forest.node(b).unwrap().load_state(),
            Some(LoadState::Error(PickerError::NotFound(_)))
        ));

        // Sibling unaffected.
        expand_now(&mut forest, c);
        assert_eq!(names(&forest, c), vec!["d.txt"]);

        fs::create_dir(dir.path().join("b")).unwrap();
        expand_now(&mut forest, b);
        assert_eq!(forest.node(b).unwrap().load_state(), Some(&LoadState::Loaded));
    }

    #[test]
    fn remove_root_during_inflight_grandchild_load() {
        let dir = setup_test_dir();
        fs::create_dir(dir.path().join("c").join("e")).unwrap();
        let (mut forest, rec) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let c = forest.child_named(root, "c").unwrap();
        expand_now(&mut forest, c);
        let e = forest.child_named(c, "e").unwrap();

        let req = forest.expand(e).unwrap().unwrap();
        let changes = forest.remove_root(root).unwrap();
        assert!(changes.removed.contains(&e));

        let late = forest.apply_load(req.run());
        assert!(late.is_empty());
        assert!(forest.is_empty());
        assert!(forest.find(&dir.path().join("c").join("e")).is_empty());
        assert!(rec.watched().is_empty());
    }

    #[test]
    fn duplicate_completion_is_discarded() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let first = forest.refresh(root).unwrap().unwrap();
        let stale = first.clone().run();
        let applied = forest.apply_load(first.run());
        assert!(applied.inserted.is_empty());
        assert!(forest.apply_load(stale).is_empty());
    }

    #[test]
    fn created_event_inserts_sorted() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);

        let changes = forest.reconcile(WatchEvent::Created {
            path: dir.path().join("B2.txt"),
            kind: NodeKind::File,
        });
        assert_eq!(changes.inserted.len(), 1);
        assert!(changes.visible);
        assert_eq!(names(&forest, root), vec!["a.txt", "b", "B2.txt", "c"]);

        // Duplicate creation is a no-op.
        let again = forest.reconcile(WatchEvent::Created {
            path: dir.path().join("B2.txt"),
            kind: NodeKind::File,
        });
        assert!(again.inserted.is_empty());
    }

    #[test]
    fn removed_event_destroys_subtree() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let c = forest.child_named(root, "c").unwrap();
        expand_now(&mut forest, c);
        let d = forest.child_named(c, "d.txt").unwrap();

        let changes = forest.reconcile(WatchEvent::Removed {
            path: dir.path().join("c"),
        });
        assert!(changes.removed.contains(&c));
        assert!(changes.removed.contains(&d));
        assert_eq!(changes.touched, vec![root]);
        assert!(forest.node(c).is_none());
        assert!(!rec.watched().contains(&dir.path().join("c")));
        assert_eq!(names(&forest, root), vec!["a.txt", "b"]);
    }

    #[test]
    fn renamed_event_is_remove_then_create() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let a = forest.child_named(root, "a.txt").unwrap();

        let changes = forest.reconcile(WatchEvent::Renamed {
            from: dir.path().join("a.txt"),
            to: dir.path().join("z.txt"),
            kind: NodeKind::File,
        });
        assert_eq!(changes.removed, vec![a]);
        assert_eq!(changes.inserted.len(), 1);
        assert_eq!(names(&forest, root), vec!["b", "c", "z.txt"]);
    }

    #[test]
    fn modified_event_only_signals_refresh() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let changes = forest.reconcile(WatchEvent::Modified {
            path: dir.path().join("a.txt"),
        });
        assert!(changes.visible);
        assert!(changes.inserted.is_empty() && changes.removed.is_empty());
    }

    #[test]
    fn events_for_unloaded_dirs_are_dropped() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let changes = forest.reconcile(WatchEvent::Created {
            path: dir.path().join("c").join("new.txt"),
            kind: NodeKind::File,
        });
        assert!(changes.is_empty());
        let gone = forest.reconcile(WatchEvent::Removed {
            path: PathBuf::from("/nowhere/x"),
        });
        assert!(gone.is_empty());
    }

    #[test]
    fn events_during_loading_are_replayed() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        let req = forest.expand(root).unwrap().unwrap();
        let done = req.run();

        // Arrives before the (older) snapshot lands.
        File::create(dir.path().join("late.txt")).unwrap();
        let parked = forest.reconcile(WatchEvent::Created {
            path: dir.path().join("late.txt"),
            kind: NodeKind::File,
        });
        assert!(parked.is_empty());

        let changes = forest.apply_load(done);
        assert_eq!(changes.inserted.len(), 4);
        assert_eq!(names(&forest, root), vec!["a.txt", "b", "c", "late.txt"]);
    }

    #[test]
    fn refresh_keeps_surviving_nodes() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let c = forest.child_named(root, "c").unwrap();
        expand_now(&mut forest, c);
        let a = forest.child_named(root, "a.txt").unwrap();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        File::create(dir.path().join("e.txt")).unwrap();
        let req = forest.refresh(root).unwrap().unwrap();
        assert_eq!(forest.node(root).unwrap().load_state(), Some(&LoadState::Loaded));
        let changes = forest.apply_load(req.run());

        assert_eq!(changes.removed, vec![a]);
        assert_eq!(changes.inserted.len(), 1);
        assert_eq!(forest.child_named(root, "c"), Some(c));
        assert_eq!(names(&forest, c), vec!["d.txt"]);
        assert_eq!(names(&forest, root), vec!["b", "c", "e.txt"]);
    }

    #[test]
    fn lost_watch_forces_reload_on_expand() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        forest.collapse(root).unwrap();

        forest.watch_lost(dir.path());
        assert!(!forest.node(root).unwrap().is_live());
        assert!(!rec.watched().contains(dir.path()));

        File::create(dir.path().join("missed.txt")).unwrap();
        expand_now(&mut forest, root);
        assert!(forest.child_named(root, "missed.txt").is_some());
        assert!(forest.node(root).unwrap().is_live());
    }

    #[test]
    fn refused_watch_degrades_to_manual_refresh() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        rec.refuse.borrow_mut().insert(dir.path().join("c"));
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let c = forest.child_named(root, "c").unwrap();
        expand_now(&mut forest, c);
        assert_eq!(forest.node(c).unwrap().load_state(), Some(&LoadState::Loaded));
        assert!(!forest.node(c).unwrap().is_live());
        assert!(forest.node(root).unwrap().is_live());
    }

    #[test]
    fn vanished_root_moves_to_error() {
        let dir = setup_test_dir();
        let (mut forest, _) = forest();
        let root = forest.add_root(dir.path()).unwrap();
        expand_now(&mut forest, root);
        let changes = forest.reconcile(WatchEvent::Removed {
            path: dir.path().to_path_buf(),
        });
        assert_eq!(changes.removed.len(), 3);
        assert!(matches!(
            forest.node(root).unwrap().load_state(),
            Some(LoadState::Error(PickerError::NotFound(_)))
        ));
        assert!(forest.node(root).unwrap().children().is_none());
    }

    #[test]
    fn overlapping_roots_share_watches() {
        let dir = setup_test_dir();
        let (mut forest, rec) = forest();
        let outer = forest.add_root(dir.path()).unwrap();
        let inner = forest.add_root(&dir.path().join("c")).unwrap();
        expand_now(&mut forest, outer);
        let c = forest.child_named(outer, "c").unwrap();
        expand_now(&mut forest, c);
        expand_now(&mut forest, inner);
        assert_eq!(forest.find(&dir.path().join("c")).len(), 2);

        let changes = forest.reconcile(WatchEvent::Created {
            path: dir.path().join("c").join("x.txt"),
            kind: NodeKind::File,
        });
        assert_eq!(changes.inserted.len(), 2);

        forest.remove_root(inner).unwrap();
        assert!(rec.watched().contains(&dir.path().join("c")));
        assert_eq!(names(&forest, c), vec!["d.txt", "x.txt"]);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (mut forest, _) = forest();
        let ghost = NodeId(42);
        assert_eq!(forest.expand(ghost).unwrap_err(), PickerError::UnknownNode(ghost));
        assert_eq!(forest.collapse(ghost).unwrap_err(), PickerError::UnknownNode(ghost));
        assert!(forest.remove_root(ghost).is_err());
    }
}
