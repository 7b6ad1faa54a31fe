use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fs::tree::NodeId;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, PickerError>;

/// Error taxonomy for loading, watching and root management.
///
/// Errors are stored on nodes in the `Error` load state and rendered inline,
/// so the type is cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickerError {
    /// The path no longer exists.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The path exists but cannot be read.
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// A directory operation was attempted on something else.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The folder is already present as a root.
    #[error("already added: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The UI referenced a node that has since been destroyed.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Anything else, mostly watcher-internal failures.
    #[error("{0}")]
    Unknown(String),
}

impl PickerError {
    /// Map an I/O error for `path` onto the taxonomy.
    pub fn from_io(err: &io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => PickerError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => PickerError::PermissionDenied(path.to_path_buf()),
            io::ErrorKind::NotADirectory => PickerError::NotADirectory(path.to_path_buf()),
            _ => PickerError::Unknown(format!("{}: {}", path.display(), err)),
        }
    }

    /// Map a watcher error for `path` onto the taxonomy.
    pub fn from_notify(err: &notify::Error, path: &Path) -> Self {
        match &err.kind {
            notify::ErrorKind::PathNotFound => PickerError::NotFound(path.to_path_buf()),
            notify::ErrorKind::Io(io_err) => PickerError::from_io(io_err, path),
            _ => PickerError::Unknown(format!("{}: {}", path.display(), err)),
        }
    }
}
