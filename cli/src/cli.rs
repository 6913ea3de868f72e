use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "syncwatch",
    about = "SyncWatch - mirror directories with rsync as they change",
    version = env!("CARGO_PKG_VERSION"),
    author
)]
pub struct Cli {
    #[arg(
        short,
        long,
        env = "SYNCWATCH_CONFIG",
        help = "Configuration file (default: /etc, ~ or ./syncwatch.toml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Directory for log files (default: /var/log, else home)")]
    pub log_dir: Option<PathBuf>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long, help = "Validate the configuration, print the mappings and exit")]
    pub check: bool,
}
