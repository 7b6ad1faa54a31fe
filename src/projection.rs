//! Flattening of the visible forest into display rows.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::fs::loader::NodeKind;
use crate::fs::tree::{Forest, LoadState, NodeId};
use crate::selection::{CheckState, Selection};

/// A flattened, render-ready tree row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: NodeId,
    pub path: PathBuf,
    pub name: String,
    pub kind: NodeKind,
    pub depth: usize,
    pub expanded: bool,
    pub selection: CheckState,
    /// `None` for non-directories.
    pub load: Option<LoadState>,
    pub is_last_sibling: bool,
}

/// Project every root and, below each expanded directory, its loaded
/// children in stored order (depth-first, pre-order).
///
/// Pure: the output depends only on the three inputs.
pub fn project(forest: &Forest, expansion: &HashSet<NodeId>, selection: &Selection) -> Vec<Row> {
    let mut rows = Vec::new();
    // (id, depth, is_last)
    let mut stack: Vec<(NodeId, usize, bool)> = Vec::new();
    push_siblings(&mut stack, forest.roots(), 0);

    while let Some((id, depth, is_last)) = stack.pop() {
        let Some(node) = forest.node(id) else {
            continue;
        };
        let expanded = node.is_dir() && expansion.contains(&id);
        rows.push(Row {
            id,
            path: node.path.clone(),
            name: node.name.clone(),
            kind: node.kind,
            depth,
            expanded,
            selection: selection.state(forest, id).unwrap_or_default(),
            load: node.load_state().cloned(),
            is_last_sibling: is_last,
        });

        if expanded {
            if let Some(children) = node.children() {
                push_siblings(&mut stack, children, depth + 1);
            }
        }
    }
    rows
}

/// Push in reverse so the first sibling pops first.
fn push_siblings(stack: &mut Vec<(NodeId, usize, bool)>, ids: &[NodeId], depth: usize) {
    let last = ids.len().saturating_sub(1);
    for (i, id) in ids.iter().enumerate().rev() {
        stack.push((*id, depth, i == last));
    }
}

/// Checkbox glyph for a state.
pub fn check_glyph(state: CheckState) -> &'static str {
    match state {
        CheckState::Checked => "[x]",
        CheckState::Partial => "[-]",
        CheckState::Unchecked => "[ ]",
    }
}

/// Build the prefix string for tree indentation using box-drawing characters.
fn build_prefix(row: &Row, rows: &[Row], index: usize) -> String {
    if row.depth == 0 {
        return String::new();
    }

    let mut prefix = String::new();
    for d in 1..row.depth {
        // Find the ancestor at depth d by walking back.
        let mut ancestor_is_last = false;
        for prev in rows[..index].iter().rev() {
            if prev.depth == d {
                ancestor_is_last = prev.is_last_sibling;
                break;
            }
            if prev.depth < d {
                break;
            }
        }
        prefix.push_str(if ancestor_is_last { "   " } else { "│  " });
    }
    prefix.push_str(if row.is_last_sibling { "└──" } else { "├──" });
    prefix
}

/// Render rows as plain text, one line per row.
pub fn render_text(rows: &[Row]) -> String {
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let marker = match row.kind {
            NodeKind::Directory if row.expanded => "▾ ",
            NodeKind::Directory => "▸ ",
            NodeKind::Symlink => "@ ",
            NodeKind::File | NodeKind::Other => "",
        };
        let status = match &row.load {
            Some(LoadState::Loading) => " (loading…)".to_string(),
            Some(LoadState::Error(err)) => format!(" ⚠ {}", err),
            _ => String::new(),
        };
        let name = if row.depth == 0 {
            row.path.display().to_string()
        } else {
            row.name.clone()
        };
        let _ = writeln!(
            out,
            "{}{} {}{}{}",
            build_prefix(row, rows, i),
            check_glyph(row.selection),
            marker,
            name,
            status
        );
    }
    out
}
