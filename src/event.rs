use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::{PickerError, Result};
use crate::fs::tree::LoadCompletion;
use crate::fs::watcher::WatchEvent;

/// Messages delivered to the control thread from background work.
#[derive(Debug)]
pub enum Event {
    /// A directory read finished.
    Loaded(LoadCompletion),
    /// The watcher classified a batch of filesystem changes.
    Fs(Vec<WatchEvent>),
    /// The watcher stopped delivering events for a directory.
    WatchLost(PathBuf),
}

/// Completion/event queue feeding the control thread.
pub struct EventChannel {
    rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { rx, tx }
    }

    /// Get a sender clone for background tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Receive the next event (waits until one is available).
    pub async fn next(&mut self) -> Result<Event> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| PickerError::Unknown("event channel closed".into()))
    }

    /// Take an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}
