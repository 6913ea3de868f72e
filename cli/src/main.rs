//! SyncWatch daemon.
//!
//! Loads `syncwatch.toml`, starts one mirror per configured mapping direction
//! and runs until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use syncwatch_directory_watcher::DirectoryWatcher;
use syncwatch_mirror::{ProcessRunner, SyncWatch, SyncWatchConfig, locate_tool};
use tracing::{error, info, warn};

mod cli;
mod logging;
mod signal;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.check {
        logging::init_stdout(&cli.log_level)?;
        return check(&cli);
    }

    let _guard = logging::init(cli.log_dir.as_deref(), &cli.log_level)?;
    if let Err(e) = run(&cli).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let (path, config) = load_config(cli)?;
    info!("Loaded configuration from {}", path.display());

    let program = locate_tool(&config.tool)?;
    if config.mappings.is_empty() {
        warn!("No valid mapping configured, nothing to watch");
    }

    let (engine, report) = SyncWatch::start(
        &config.mappings,
        config.settings,
        program,
        Arc::new(DirectoryWatcher::new()),
        Arc::new(ProcessRunner),
    )
    .await;
    info!(
        "{} watching, {} waiting for their paths, {} skipped",
        report.active.len(),
        report.retrying.len(),
        report.skipped.len()
    );

    let signal = signal::shutdown_signal().await;
    engine.shutdown().await;
    signal.context("failed to listen for shutdown signals")
}

fn load_config(cli: &Cli) -> Result<(PathBuf, SyncWatchConfig)> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => SyncWatchConfig::locate(dirs::home_dir().as_deref()).context(
            "no configuration file found in /etc, the home directory or the working directory",
        )?,
    };
    let config = SyncWatchConfig::load(&path)
        .with_context(|| format!("cannot load configuration {}", path.display()))?;
    Ok((path, config))
}

fn check(cli: &Cli) -> Result<()> {
    let (path, config) = load_config(cli)?;
    println!("Configuration: {}", path.display());

    let tool = locate_tool(&config.tool);
    match &tool {
        Ok(program) => println!("Copy tool: {}", program.display()),
        Err(e) => println!("Copy tool: {e}"),
    }

    for mapping in &config.mappings {
        let arrow = if mapping.reverse_sync { "<->" } else { "->" };
        println!(
            "  {}: {} {arrow} {} (delay {:?}{}{}{})",
            mapping.name,
            mapping.source.display(),
            mapping.destination.display(),
            mapping.quiet_delay,
            if mapping.sliding_window { "" } else { ", fixed window" },
            if mapping.initial_sync_on_start { ", initial sync" } else { "" },
            if mapping.retry_until_available { ", retry" } else { "" },
        );
    }
    for skipped in &config.skipped {
        println!("  skipped: {skipped}");
    }

    if !config.skipped.is_empty() {
        bail!("{} mapping entries are invalid", config.skipped.len());
    }
    tool?;
    Ok(())
}
