//! Tri-state checkbox tracking across the whole forest.
//!
//! Leaves carry the state the user set. A loaded directory's state is derived
//! from its children; an unloaded (or empty) directory keeps the state last
//! set on it, which its children inherit when they are loaded.

use std::collections::HashMap;

use crate::error::{PickerError, Result};
use crate::fs::tree::{Changes, Forest, NodeId};

/// Checkbox state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckState {
    #[default]
    Unchecked,
    Checked,
    /// Directory whose children are mixed. Never set directly.
    Partial,
}

impl CheckState {
    fn from_bool(checked: bool) -> Self {
        if checked {
            CheckState::Checked
        } else {
            CheckState::Unchecked
        }
    }

    /// Derive a directory's state from its children's states.
    fn combine(states: impl IntoIterator<Item = CheckState>) -> Option<Self> {
        let mut all_checked = true;
        let mut all_unchecked = true;
        let mut any = false;
        for s in states {
            any = true;
            all_checked &= s == CheckState::Checked;
            all_unchecked &= s == CheckState::Unchecked;
        }
        match (any, all_checked, all_unchecked) {
            (false, _, _) => None,
            (true, true, _) => Some(CheckState::Checked),
            (true, _, true) => Some(CheckState::Unchecked),
            _ => Some(CheckState::Partial),
        }
    }
}

/// Selection tracker. Entries are created lazily; a missing entry is
/// `Unchecked`.
#[derive(Debug, Default)]
pub struct Selection {
    states: HashMap<NodeId, CheckState>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `id`, or `None` if the node no longer exists.
    pub fn state(&self, forest: &Forest, id: NodeId) -> Option<CheckState> {
        forest.node(id).map(|_| self.get(id))
    }

    fn get(&self, id: NodeId) -> CheckState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    fn set(&mut self, id: NodeId, state: CheckState) {
        if state == CheckState::Unchecked {
            self.states.remove(&id);
        } else {
            self.states.insert(id, state);
        }
    }

    /// Number of nodes with a non-default state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Check or uncheck a node.
    ///
    /// For a directory this sets every loaded descendant; unloaded
    /// directories below it keep the target as a pending state for their
    /// children. Ancestors are re-derived on the way up.
    pub fn set_checked(&mut self, forest: &Forest, id: NodeId, checked: bool) -> Result<()> {
        if forest.node(id).is_none() {
            return Err(PickerError::UnknownNode(id));
        }
        let target = CheckState::from_bool(checked);

        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            self.set(cur, target);
            if let Some(children) = forest.node(cur).and_then(|n| n.children()) {
                stack.extend_from_slice(children);
            }
        }

        self.recompute_ancestors(forest, id);
        Ok(())
    }

    /// Bring the tracker in line with a structural change.
    ///
    /// New nodes inherit a fully checked parent's state, destroyed nodes are
    /// forgotten, and touched directories are re-derived up to their root.
    pub fn apply(&mut self, forest: &Forest, changes: &Changes) {
        for id in &changes.removed {
            self.states.remove(id);
        }
        for &id in &changes.inserted {
            let Some(parent) = forest.node(id).and_then(|n| n.parent) else {
                continue;
            };
            if self.get(parent) == CheckState::Checked {
                self.set(id, CheckState::Checked);
            }
        }
        for &dir in &changes.touched {
            if forest.node(dir).is_none() {
                continue;
            }
            self.recompute(forest, dir);
            self.recompute_ancestors(forest, dir);
        }
    }

    fn recompute_ancestors(&mut self, forest: &Forest, id: NodeId) {
        for ancestor in forest.ancestors(id) {
            self.recompute(forest, ancestor);
        }
    }

    fn recompute(&mut self, forest: &Forest, dir: NodeId) {
        let children = forest.node(dir).and_then(|n| n.children()).unwrap_or(&[]);
        match CheckState::combine(children.iter().map(|c| self.get(*c))) {
            Some(state) => self.set(dir, state),
            // No children to derive from: keep the last explicit state, but
            // a mix of nothing is not a mix.
            None if self.get(dir) == CheckState::Partial => self.set(dir, CheckState::Unchecked),
            None => {}
        }
    }
}
