//! Error types for the mirror engine.

use thiserror::Error;

use syncwatch_directory_watcher::WatcherError;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur in the mirror engine.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The external copy tool could not be found.
    #[error("{0} not found, please install {0} before running this program")]
    ToolNotFound(String),

    /// The configuration file as a whole is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single mapping entry is invalid; siblings are unaffected.
    #[error("invalid mapping {name}: {reason}")]
    InvalidMapping { name: String, reason: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Watch subscription error.
    #[error("watch error: {0}")]
    Watch(#[from] WatcherError),
}

impl MirrorError {
    pub(crate) fn invalid_mapping(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMapping {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
