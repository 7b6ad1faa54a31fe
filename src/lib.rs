//! **folder_picker**: the model behind a multi-root folder picker.
//!
//! Folders added by the user become roots of a forest that loads lazily, one
//! directory level per expansion, and stays current through a non-recursive
//! filesystem watcher. A tri-state selection spans the whole forest and the
//! visible part is flattened into rows for whatever draws them.
//!
//! # Architecture
//!
//! * [`fs::loader`] reads one directory level.
//! * [`fs::watcher`] turns OS notifications into [`fs::watcher::WatchEvent`]s.
//! * [`fs::tree::Forest`] owns the nodes; reads and events reach it as
//!   messages, never from another thread.
//! * [`selection::Selection`] tracks checkboxes.
//! * [`projection::project`] builds the display list.
//! * [`app::App`] is the control loop tying them together.

pub mod app;
pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod logging;
pub mod projection;
pub mod prompt;
pub mod selection;
