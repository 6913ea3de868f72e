//! Configuration types for mirror mappings.
//!
//! The file format is TOML:
//!
//! ```toml
//! tool = "rsync"
//!
//! [[mapping]]
//! name = "docs"
//! source = "/home/me/docs"
//! destination = "/mnt/backup/docs"
//! delay = 5
//! exclude = ["*.tmp", ".cache/"]
//! reverse_sync = true
//! ```
//!
//! The file itself must parse, but each `[[mapping]]` entry is validated on
//! its own: a broken entry is reported and skipped while its siblings load.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::error;

use crate::error::{MirrorError, Result};

/// Default quiet period before a burst of changes triggers a sync.
pub const DEFAULT_QUIET_DELAY: Duration = Duration::from_secs(10);

/// Default pause after a run before the mapping counts as settled.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default polling interval for mappings waiting on missing paths.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Default copy tool.
pub const DEFAULT_TOOL: &str = "rsync";

/// Conventional configuration file name.
pub const CONFIG_FILE_NAME: &str = "syncwatch.toml";

/// Options passed through to the copy tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Compress file data during transfer.
    pub compress: bool,

    /// Skip files that are newer on the receiver.
    pub update_only: bool,

    /// Delete extraneous files on the receiver.
    pub delete: bool,

    /// Exclude patterns, in order.
    pub exclude_patterns: Vec<String>,

    /// Include patterns, in order.
    pub include_patterns: Vec<String>,

    /// Extra arguments passed verbatim.
    pub raw_options: Vec<String>,
}

/// One configured mirror direction.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfig {
    /// Name used in log lines.
    pub name: String,

    /// Directory whose changes are watched.
    pub source: PathBuf,

    /// Directory mirrored into.
    pub destination: PathBuf,

    /// Quiet period before a sync fires.
    pub quiet_delay: Duration,

    /// Whether new events restart the quiet period.
    pub sliding_window: bool,

    /// Copy tool options.
    pub copy: CopyOptions,

    /// Schedule a sync at startup.
    pub initial_sync_on_start: bool,

    /// Keep polling when source or destination is missing at startup.
    pub retry_until_available: bool,

    /// Also mirror destination back into source.
    pub reverse_sync: bool,

    /// Upper bound on waiting for the reverse direction to settle.
    /// `None` waits forever.
    pub counterpart_wait_timeout: Option<Duration>,
}

impl MappingConfig {
    /// Create a new mapping config with default options.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            quiet_delay: DEFAULT_QUIET_DELAY,
            sliding_window: true,
            copy: CopyOptions::default(),
            initial_sync_on_start: false,
            retry_until_available: false,
            reverse_sync: false,
            counterpart_wait_timeout: None,
        }
    }

    /// Set the quiet period.
    pub fn with_quiet_delay(mut self, delay: Duration) -> Self {
        self.quiet_delay = delay;
        self
    }

    /// Use a fixed window: the first event of a burst starts the only countdown.
    pub fn fixed_window(mut self) -> Self {
        self.sliding_window = false;
        self
    }

    /// Set the copy tool options.
    pub fn with_copy_options(mut self, copy: CopyOptions) -> Self {
        self.copy = copy;
        self
    }

    /// Schedule a sync at startup.
    pub fn with_initial_sync(mut self) -> Self {
        self.initial_sync_on_start = true;
        self
    }

    /// Retry until both paths exist.
    pub fn with_retry(mut self) -> Self {
        self.retry_until_available = true;
        self
    }

    /// Mirror in both directions.
    pub fn bidirectional(mut self) -> Self {
        self.reverse_sync = true;
        self
    }

    /// Bound the wait on the reverse direction.
    pub fn with_counterpart_wait_timeout(mut self, timeout: Duration) -> Self {
        self.counterpart_wait_timeout = Some(timeout);
        self
    }

    /// Whether both source and destination currently exist as directories.
    pub fn paths_available(&self) -> bool {
        self.source.is_dir() && self.destination.is_dir()
    }
}

/// Engine-wide settings shared by every mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Pause after a finished run before the mapping is marked settled.
    pub settle_delay: Duration,

    /// Polling interval of the retry watcher.
    pub retry_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// A loaded configuration file.
#[derive(Debug)]
pub struct SyncWatchConfig {
    /// Copy tool name or path.
    pub tool: String,

    /// Engine-wide settings.
    pub settings: EngineSettings,

    /// Valid mapping entries, in file order.
    pub mappings: Vec<MappingConfig>,

    /// Entries that failed validation and were skipped.
    pub skipped: Vec<MirrorError>,
}

impl SyncWatchConfig {
    /// Build a configuration directly from mappings.
    pub fn new(mappings: Vec<MappingConfig>) -> Self {
        Self {
            tool: DEFAULT_TOOL.to_string(),
            settings: EngineSettings::default(),
            mappings,
            skipped: Vec::new(),
        }
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;

        let mut settings = EngineSettings::default();
        if let Some(ms) = file.settle_delay_ms {
            settings.settle_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = file.retry_interval_secs {
            if secs == 0 {
                return Err(MirrorError::Config(
                    "retry_interval_secs must be greater than zero".to_string(),
                ));
            }
            settings.retry_interval = Duration::from_secs(secs);
        }

        let mut mappings = Vec::new();
        let mut skipped = Vec::new();
        let mut names = HashSet::new();

        for (index, value) in file.mapping.into_iter().enumerate() {
            match parse_entry(index, value) {
                Ok(mapping) if !names.insert(mapping.name.clone()) => {
                    let err = MirrorError::invalid_mapping(&mapping.name, "duplicate mapping name");
                    error!("{err}");
                    skipped.push(err);
                }
                Ok(mapping) => mappings.push(mapping),
                Err(err) => {
                    error!("{err}");
                    skipped.push(err);
                }
            }
        }

        Ok(Self {
            tool: file.tool.unwrap_or_else(|| DEFAULT_TOOL.to_string()),
            settings,
            mappings,
            skipped,
        })
    }

    /// Find the configuration file in the conventional locations.
    ///
    /// Checks `/etc`, then the home directory, then the working directory.
    pub fn locate(home: Option<&Path>) -> Option<PathBuf> {
        let mut candidates = vec![Path::new("/etc").join(CONFIG_FILE_NAME)];
        if let Some(home) = home {
            candidates.push(home.join(CONFIG_FILE_NAME));
        }
        candidates.push(Path::new(".").join(CONFIG_FILE_NAME));

        candidates.into_iter().find(|p| p.is_file())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    tool: Option<String>,
    settle_delay_ms: Option<u64>,
    retry_interval_secs: Option<u64>,
    #[serde(default)]
    mapping: Vec<toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingEntry {
    name: String,
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    delay: Option<f64>,
    #[serde(default = "default_true")]
    reset_timer: bool,
    #[serde(default)]
    compress: bool,
    #[serde(default)]
    update: bool,
    #[serde(default)]
    delete: bool,
    #[serde(default)]
    exclude: PatternList,
    #[serde(default)]
    include: PatternList,
    #[serde(default)]
    options: PatternList,
    #[serde(default)]
    init_sync: bool,
    #[serde(default)]
    retry: bool,
    #[serde(default)]
    reverse_sync: bool,
    counterpart_wait_timeout_secs: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// Either a TOML array of strings or one comma separated string.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum PatternList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl PatternList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            Self::Empty => Vec::new(),
            Self::One(joined) => joined.split(',').map(str::to_string).collect(),
            Self::Many(items) => items,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn parse_entry(index: usize, value: toml::Value) -> Result<MappingConfig> {
    let label = value
        .get("name")
        .and_then(toml::Value::as_str)
        .map_or_else(|| format!("mapping #{}", index + 1), str::to_string);

    let entry: MappingEntry = value
        .try_into()
        .map_err(|e| MirrorError::invalid_mapping(&label, e.to_string()))?;

    let name = entry.name.trim().to_string();
    if name.is_empty() {
        return Err(MirrorError::invalid_mapping(label, "name must not be empty"));
    }

    let (source, destination) = match (entry.source, entry.destination) {
        (Some(s), Some(d)) if !s.as_os_str().is_empty() && !d.as_os_str().is_empty() => (s, d),
        _ => {
            return Err(MirrorError::invalid_mapping(
                name,
                "source or destination path missing",
            ));
        }
    };
    if source == destination {
        return Err(MirrorError::invalid_mapping(
            name,
            "source and destination are the same path",
        ));
    }

    let quiet_delay = match entry.delay {
        Some(secs) => seconds(&name, "delay", secs)?,
        None => DEFAULT_QUIET_DELAY,
    };
    let counterpart_wait_timeout = entry
        .counterpart_wait_timeout_secs
        .map(|secs| seconds(&name, "counterpart_wait_timeout_secs", secs))
        .transpose()?;

    Ok(MappingConfig {
        name,
        source,
        destination,
        quiet_delay,
        sliding_window: entry.reset_timer,
        copy: CopyOptions {
            compress: entry.compress,
            update_only: entry.update,
            delete: entry.delete,
            exclude_patterns: entry.exclude.into_vec(),
            include_patterns: entry.include.into_vec(),
            raw_options: entry.options.into_vec(),
        },
        initial_sync_on_start: entry.init_sync,
        retry_until_available: entry.retry,
        reverse_sync: entry.reverse_sync,
        counterpart_wait_timeout,
    })
}

fn seconds(name: &str, field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        MirrorError::invalid_mapping(
            name,
            format!("{field} must be a non-negative number of seconds, got {secs}"),
        )
    })
}
