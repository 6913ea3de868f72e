//! Directory subscriptions backed by `notify`.

use std::any::Any;
use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{Result, WatcherError};
use crate::event::ChangeEvent;

/// Default capacity of a subscription's event channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Something that can deliver change events for a directory tree.
///
/// The mirror engine only depends on this trait, so tests can feed events
/// through a plain channel instead of the real file system.
pub trait Watch: Send + Sync {
    /// Start watching `path` and return the stream of changes under it.
    fn subscribe(&self, path: &Path, recursive: bool) -> Result<Subscription>;
}

/// An active watch: the event stream plus the guard keeping it alive.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    guard: WatchGuard,
}

impl Subscription {
    /// Create a subscription from its parts.
    pub fn new(events: mpsc::Receiver<ChangeEvent>, guard: WatchGuard) -> Self {
        Self { events, guard }
    }

    /// Split into the event receiver and the guard that stops the watch.
    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, WatchGuard) {
        (self.events, self.guard)
    }
}

/// Keeps an underlying watch running until stopped or dropped.
pub struct WatchGuard {
    path: PathBuf,
    inner: Option<Box<dyn Any + Send>>,
}

impl WatchGuard {
    /// Guard owning a backend watcher handle.
    pub fn new(path: impl Into<PathBuf>, inner: impl Any + Send) -> Self {
        Self {
            path: path.into(),
            inner: Some(Box::new(inner)),
        }
    }

    /// Guard with nothing to release, for event sources without a backend.
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: None,
        }
    }

    /// Stop the watch. Calling this more than once is harmless.
    pub fn stop(&mut self) {
        if self.inner.take().is_some() {
            debug!("Stopped watching: {}", self.path.display());
        }
    }

    /// Whether the watch is still running.
    #[cfg(test)]
    fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

/// [`Watch`] implementation using the platform's recommended notify backend.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    channel_capacity: usize,
}

impl DirectoryWatcher {
    /// Create a new directory watcher.
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Default for DirectoryWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watch for DirectoryWatcher {
    fn subscribe(&self, path: &Path, recursive: bool) -> Result<Subscription> {
        if !path.exists() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WatcherError::NotADirectory(path.display().to_string()));
        }

        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in ChangeEvent::from_notify(event) {
                        if event_tx.blocking_send(change).is_err() {
                            // Receiver is gone, the subscription is shutting down.
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(path, mode)?;
        debug!("Started watching: {}", path.display());

        Ok(Subscription::new(event_rx, WatchGuard::new(path, watcher)))
    }
}
