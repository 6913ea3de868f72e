//! Error types for the directory watcher.

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while subscribing to a directory.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Path exists but is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(String),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}
