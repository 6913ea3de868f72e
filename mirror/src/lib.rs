//! # Mirror
//!
//! Debounced, single-flight, loop-safe directory mirroring. Each configured
//! mapping watches its source tree and, once changes have gone quiet, runs an
//! external copy tool (rsync) to bring the destination up to date. A
//! bidirectional mapping runs as two cross-wired directions that filter out
//! the echoes of each other's writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           SyncWatch                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  SyncWatchConfig ──► MonitoredMapping ──► MirrorCoordinator      │
//! │                            │                   │                 │
//! │                            ▼                   ▼                 │
//! │                      RetryWatcher      EchoFilter / Debounce     │
//! │                                                │                 │
//! │                                                ▼                 │
//! │                                         SyncExecutor ──► rsync   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod echo;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod retry;
pub mod supervisor;

pub use config::{CopyOptions, EngineSettings, MappingConfig, SyncWatchConfig};
pub use coordinator::{MirrorCoordinator, MirrorPhase};
pub use debounce::DebounceTimer;
pub use echo::Verdict;
pub use error::{MirrorError, Result};
pub use executor::{
    CopyInvocation, CopyOutput, CopyRunner, ProcessRunner, SyncExecutor, locate_tool,
};
pub use mapping::{DirectionPair, MappingState, MonitoredMapping};
pub use retry::RetryWatcher;
pub use supervisor::{StartupReport, SyncWatch};
