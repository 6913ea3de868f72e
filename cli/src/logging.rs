//! Log output: stdout plus a daily rolling file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "syncwatch";
const LOG_FILE_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 5;
const SYSTEM_LOG_DIR: &str = "/var/log";

/// Install stdout and file logging. Keep the returned guard alive until exit
/// so buffered file lines are flushed.
pub fn init(log_dir: Option<&Path>, level: &str) -> Result<WorkerGuard> {
    let dir = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            dir.to_path_buf()
        }
        None => {
            let home = dirs::home_dir();
            let mut candidates = vec![Path::new(SYSTEM_LOG_DIR)];
            candidates.extend(home.as_deref());
            first_writable(&candidates)
                .context("no writable log directory, tried /var/log and the home directory")?
        }
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(&dir)
        .with_context(|| format!("cannot create log files in {}", dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("failed to initialize logging")?;

    Ok(guard)
}

/// Install stdout-only logging.
pub fn init_stdout(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
        .try_init()
        .context("failed to initialize logging")
}

fn filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}"))
}

fn first_writable(candidates: &[&Path]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|dir| is_writable(dir))
        .map(|dir| dir.to_path_buf())
}

fn is_writable(dir: &Path) -> bool {
    let marker = dir.join(format!(".{LOG_FILE_PREFIX}-write-test"));
    let writable = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&marker)
        .is_ok();
    if writable {
        let _ = std::fs::remove_file(&marker);
    }
    writable
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_first_writable_skips_missing_directories() {
        let home = TempDir::new().unwrap();
        let missing = home.path().join("does-not-exist");

        let chosen = first_writable(&[missing.as_path(), home.path()]);
        assert_eq!(chosen.as_deref(), Some(home.path()));
        // The marker file is cleaned up.
        assert_eq!(std::fs::read_dir(home.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_writable_directory() {
        let home = TempDir::new().unwrap();
        let missing = home.path().join("nope");
        assert_eq!(first_writable(&[missing.as_path()]), None);
    }

    #[test]
    fn test_filter_accepts_directives() {
        assert!(filter("info").is_ok());
        assert!(filter("syncwatch_mirror=debug,warn").is_ok());
    }
}
