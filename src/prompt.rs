//! Prompt assembly from the checked files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::fs::loader::{compare_names, NodeKind};
use crate::fs::tree::{Forest, NodeId};
use crate::selection::{CheckState, Selection};

/// A file chosen for the prompt. Content is read only when building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub path: PathBuf,
    /// Path relative to its root folder.
    pub label: String,
}

/// Counts shown next to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PromptSummary {
    pub total: usize,
    pub readable: usize,
    pub unreadable: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    files: Vec<FileReference>,
}

impl PromptBuilder {
    /// Collect every checked regular file, in tree order, without duplicates.
    ///
    /// Checked directories that were never loaded are walked on disk
    /// (symlinks are not followed).
    pub fn from_selection(forest: &Forest, selection: &Selection) -> Self {
        let mut builder = Self::default();
        let mut seen = HashSet::new();

        for &root in forest.roots() {
            let Some(root_node) = forest.node(root) else {
                continue;
            };
            let base = root_node.path.clone();

            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let Some(node) = forest.node(id) else {
                    continue;
                };
                let state = selection.state(forest, id).unwrap_or_default();
                if state == CheckState::Unchecked {
                    continue;
                }
                match (node.kind, node.children()) {
                    (NodeKind::File, _) => builder.push(&node.path, &base, &mut seen),
                    (NodeKind::Directory, Some(children)) => {
                        stack.extend(children.iter().rev().copied());
                    }
                    (NodeKind::Directory, None) if state == CheckState::Checked => {
                        builder.walk(&node.path, &base, &mut seen);
                    }
                    _ => {}
                }
            }
        }
        builder
    }

    fn push(&mut self, path: &Path, base: &Path, seen: &mut HashSet<PathBuf>) {
        if !seen.insert(path.to_path_buf()) {
            return;
        }
        let label = path
            .strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();
        self.files.push(FileReference {
            path: path.to_path_buf(),
            label,
        });
    }

    fn walk(&mut self, dir: &Path, base: &Path, seen: &mut HashSet<PathBuf>) {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by(|a, b| {
                compare_names(&a.file_name().to_string_lossy(), &b.file_name().to_string_lossy())
            });
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => self.push(entry.path(), base, seen),
                Ok(_) => {}
                Err(e) => debug!(dir = %dir.display(), error = %e, "skipping during prompt walk"),
            }
        }
    }

    pub fn files(&self) -> &[FileReference] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read every file and concatenate them under `=== File: <label> ===`
    /// headers. Unreadable files get an inline error instead of content.
    pub fn build(&self) -> String {
        let mut prompt = String::new();
        for file in &self.files {
            prompt.push_str(&format!("=== File: {} ===\n", file.label));
            match fs::read_to_string(&file.path) {
                Ok(content) => {
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                Err(e) => prompt.push_str(&format!("Error reading file: {}\n\n", e)),
            }
        }
        prompt
    }

    pub fn summary(&self) -> PromptSummary {
        let readable = self.files.iter().filter(|f| f.path.is_file()).count();
        PromptSummary {
            total: self.files.len(),
            readable,
            unreadable: self.files.len() - readable,
        }
    }
}
