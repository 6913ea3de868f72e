//! # Directory Watcher
//!
//! Recursive directory subscriptions for SyncWatch. Each subscription turns
//! raw `notify` events into [`ChangeEvent`]s and delivers them on a tokio
//! channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Watch::subscribe ──► notify watcher ──► ChangeEvent           │
//! │        │                                      │                 │
//! │        ▼                                      ▼                 │
//! │   WatchGuard                         mpsc::Receiver             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod event;
pub mod watcher;

pub use error::{Result, WatcherError};
pub use event::{ChangeEvent, ChangeKind};
pub use watcher::{DirectoryWatcher, Subscription, Watch, WatchGuard};
