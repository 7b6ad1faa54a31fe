//! Directory snapshot loader: one `read_dir` of one directory, classified and
//! sorted. Never follows symlinks below the listed directory.

use std::cmp::Ordering;
use std::fs::{self, FileType};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{PickerError, Result};

/// Type of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs, device nodes.
    Other,
}

impl NodeKind {
    /// Classify without following symlinks.
    pub fn from_file_type(ft: FileType) -> Self {
        if ft.is_symlink() {
            NodeKind::Symlink
        } else if ft.is_dir() {
            NodeKind::Directory
        } else if ft.is_file() {
            NodeKind::File
        } else {
            NodeKind::Other
        }
    }

    /// Probe `path` on disk. `None` if it does not exist (or cannot be stat'ed).
    pub fn probe(path: &Path) -> Option<Self> {
        fs::symlink_metadata(path)
            .ok()
            .map(|m| NodeKind::from_file_type(m.file_type()))
    }

    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }
}

/// One immediate child of a loaded directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
    pub kind: NodeKind,
}

/// Case-insensitive name order, ties broken by the raw name so the order is total.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Final path component for display, falling back to the whole path for `/`.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Read the immediate children of `dir`.
///
/// Entries that vanish or fail to stat between `read_dir` and classification
/// are skipped. Directories and files are not segregated.
pub fn load(dir: &Path) -> Result<Vec<Entry>> {
    let meta = fs::metadata(dir).map_err(|e| PickerError::from_io(&e, dir))?;
    if !meta.is_dir() {
        return Err(PickerError::NotADirectory(dir.to_path_buf()));
    }

    let read = fs::read_dir(dir).map_err(|e| PickerError::from_io(&e, dir))?;
    let mut entries = Vec::new();
    for entry in read {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                trace!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let kind = match entry.file_type() {
            Ok(ft) => NodeKind::from_file_type(ft),
            Err(_) => continue,
        };
        entries.push(Entry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path(),
            kind,
        });
    }

    entries.sort_by(|a, b| compare_names(&a.name, &b.name));
    Ok(entries)
}
