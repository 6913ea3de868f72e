//! Single-flight execution of the external copy tool.
//!
//! A [`SyncExecutor`] runs at most one copy per mapping at a time. Triggers
//! arriving while a run is in flight collapse into a single rerun flag; the
//! rerun starts as soon as the current run finishes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::MappingConfig;
use crate::error::{MirrorError, Result};
use crate::mapping::MappingState;

/// Resolve the copy tool on `PATH` (or check an explicit path).
pub fn locate_tool(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| MirrorError::ToolNotFound(tool.to_string()))
}

/// A fully built copy tool command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyInvocation {
    /// Program to execute.
    pub program: PathBuf,

    /// Arguments, in order.
    pub args: Vec<OsString>,
}

impl CopyInvocation {
    /// Build the rsync style invocation for a mapping:
    /// `-Pa[z][u] [--delete] [--exclude=P].. [--include=P].. [raw].. <source>/ <destination>`.
    pub fn new(program: impl Into<PathBuf>, config: &MappingConfig) -> Self {
        let copy = &config.copy;
        let mut args: Vec<OsString> = Vec::new();

        let mut flags = String::from("-Pa");
        if copy.compress {
            flags.push('z');
        }
        if copy.update_only {
            flags.push('u');
        }
        args.push(flags.into());

        if copy.delete {
            args.push("--delete".into());
        }
        for pattern in &copy.exclude_patterns {
            args.push(format!("--exclude={pattern}").into());
        }
        for pattern in &copy.include_patterns {
            args.push(format!("--include={pattern}").into());
        }
        for option in &copy.raw_options {
            args.push(option.into());
        }

        // Trailing separator: mirror the contents, not the directory itself.
        let mut source = normalize(&config.source).into_os_string();
        if !source.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) {
            source.push(std::path::MAIN_SEPARATOR_STR);
        }
        args.push(source);
        args.push(normalize(&config.destination).into_os_string());

        Self {
            program: program.into(),
            args,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Captured result of one copy tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOutput {
    /// Exit code, `None` if terminated by a signal.
    pub code: Option<i32>,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

impl CopyOutput {
    /// Output of a run that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    /// Whether the tool exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a copy invocation to completion.
#[async_trait]
pub trait CopyRunner: Send + Sync {
    /// Execute the invocation and capture its output.
    async fn run(&self, invocation: &CopyInvocation) -> std::io::Result<CopyOutput>;
}

/// [`CopyRunner`] spawning the tool as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CopyRunner for ProcessRunner {
    async fn run(&self, invocation: &CopyInvocation) -> std::io::Result<CopyOutput> {
        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CopyOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug)]
struct Control {
    running: bool,
    rerun_requested: bool,
    accepting: bool,
    task: Option<JoinHandle<()>>,
}

/// Single-flight copy executor for one mapping.
pub struct SyncExecutor {
    job: Arc<Job>,
    control: Arc<Mutex<Control>>,
}

struct Job {
    name: String,
    invocation: CopyInvocation,
    state: Arc<MappingState>,
    runner: Arc<dyn CopyRunner>,
    settle_delay: Duration,
}

impl SyncExecutor {
    /// Create an executor for the mapping named `name` whose runtime state
    /// is `state`.
    pub fn new(
        name: impl Into<String>,
        invocation: CopyInvocation,
        state: Arc<MappingState>,
        runner: Arc<dyn CopyRunner>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            job: Arc::new(Job {
                name: name.into(),
                invocation,
                state,
                runner,
                settle_delay,
            }),
            control: Arc::new(Mutex::new(Control {
                running: false,
                rerun_requested: false,
                accepting: true,
                task: None,
            })),
        }
    }

    /// Request a run. Starts one now if idle, otherwise flags one rerun.
    pub async fn trigger(&self) {
        let mut control = self.control.lock().await;
        if !control.accepting {
            debug!("{}: Ignoring trigger during shutdown", self.job.name);
            return;
        }
        if control.running {
            control.rerun_requested = true;
            return;
        }

        control.running = true;
        // Unsettled before the task is even spawned, so a counterpart that
        // checks right after this call already sees the run.
        self.job.state.mark_unsettled().await;
        let job = self.job.clone();
        let ctl = self.control.clone();
        control.task = Some(tokio::spawn(async move { job.run_loop(ctl).await }));
    }

    /// Whether a run (or its settle period) is in progress.
    pub async fn is_running(&self) -> bool {
        self.control.lock().await.running
    }

    /// Stop accepting triggers and drop any queued rerun. An in-flight run
    /// keeps going; [`shutdown`](Self::shutdown) waits for it.
    pub async fn stop_accepting(&self) {
        let mut control = self.control.lock().await;
        control.accepting = false;
        control.rerun_requested = false;
    }

    /// Stop accepting triggers, drop any queued rerun and wait for the
    /// in-flight run to finish.
    pub async fn shutdown(&self) {
        self.stop_accepting().await;
        let task = self.control.lock().await.task.take();

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("{}: Synchronization task failed: {e}", self.job.name);
            }
        }
    }
}

impl Job {
    async fn run_loop(&self, control: Arc<Mutex<Control>>) {
        loop {
            self.run_once().await;

            if take_rerun(&control).await {
                continue;
            }

            // Give the watcher time to deliver every event the run produced.
            tokio::time::sleep(self.settle_delay).await;

            let mut ctl = control.lock().await;
            if ctl.rerun_requested && ctl.accepting {
                ctl.rerun_requested = false;
                continue;
            }
            self.state.settle().await;
            ctl.running = false;
            return;
        }
    }

    async fn run_once(&self) {
        let name = &self.name;
        self.state.mark_unsettled().await;
        info!("{name}: Synchronization started");

        match self.runner.run(&self.invocation).await {
            Ok(output) if output.success() => {
                let stdout = output.stdout.trim();
                if !stdout.is_empty() {
                    info!("{name}: Output:\n{stdout}");
                }
            }
            Ok(output) => {
                match output.code {
                    Some(code) => error!("{name}: Error during syncing: {code}"),
                    None => error!("{name}: Error during syncing: terminated by signal"),
                }
                let stdout = output.stdout.trim();
                if !stdout.is_empty() {
                    info!("{name}: Output:\n{stdout}");
                }
                let stderr = output.stderr.trim();
                if !stderr.is_empty() {
                    info!("{name}: Error:\n{stderr}");
                }
            }
            Err(e) => {
                error!(
                    "{name}: Error during syncing: failed to run {}: {e}",
                    self.invocation.program.display()
                );
            }
        }

        info!("{name}: Synchronization finished");
    }
}

async fn take_rerun(control: &Mutex<Control>) -> bool {
    let mut ctl = control.lock().await;
    if ctl.rerun_requested && ctl.accepting {
        ctl.rerun_requested = false;
        true
    } else {
        false
    }
}
