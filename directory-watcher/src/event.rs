//! Change events delivered by a directory subscription.

use std::fmt;
use std::path::PathBuf;

use notify::event::{CreateKind, ModifyKind, RemoveKind};

/// A file system change observed under a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    /// The kind of change.
    pub kind: ChangeKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// Whether the affected path is a directory.
    pub is_directory: bool,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory,
        }
    }

    /// Shorthand for a file event.
    pub fn file(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self::new(kind, path, false)
    }

    /// Shorthand for a directory event.
    pub fn directory(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self::new(kind, path, true)
    }

    /// Convert a raw notify event into change events, one per affected path.
    ///
    /// Access notifications and events notify cannot classify are dropped:
    /// reading the tree (which the copy tool does on every run) must never
    /// look like a change.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let Some(kind) = ChangeKind::from_notify(&event.kind) else {
            return Vec::new();
        };
        let hint = directory_hint(&event.kind);

        event
            .paths
            .into_iter()
            .map(|path| {
                let is_directory = hint.unwrap_or_else(|| path.is_dir());
                Self::new(kind, path, is_directory)
            })
            .collect()
    }
}

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Path was created.
    Created,

    /// Contents or metadata were modified.
    Modified,

    /// Path was deleted.
    Deleted,

    /// Path was renamed or moved.
    Moved,
}

impl ChangeKind {
    fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        match kind {
            notify::EventKind::Create(_) => Some(Self::Created),
            notify::EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Moved),
            notify::EventKind::Modify(_) => Some(Self::Modified),
            notify::EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        };
        f.write_str(name)
    }
}

/// Whether the notify event kind already tells us file vs folder.
///
/// Deleted paths can no longer be inspected, so this is the only reliable
/// source for removals.
fn directory_hint(kind: &notify::EventKind) -> Option<bool> {
    match kind {
        notify::EventKind::Create(CreateKind::Folder)
        | notify::EventKind::Remove(RemoveKind::Folder) => Some(true),
        notify::EventKind::Create(CreateKind::File)
        | notify::EventKind::Remove(RemoveKind::File) => Some(false),
        _ => None,
    }
}
