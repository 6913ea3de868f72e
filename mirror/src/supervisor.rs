//! Top-level engine: builds every mapping from configuration, starts the
//! ones whose directories exist, queues the rest for retry, and shuts all of
//! them down together.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use syncwatch_directory_watcher::Watch;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{EngineSettings, MappingConfig};
use crate::coordinator::MirrorCoordinator;
use crate::error::Result;
use crate::executor::CopyRunner;
use crate::mapping::MonitoredMapping;
use crate::retry::RetryWatcher;

/// What startup did with each mapping direction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Directions watching now.
    pub active: Vec<String>,

    /// Directions waiting for their paths to appear.
    pub retrying: Vec<String>,

    /// Directions skipped for good.
    pub skipped: Vec<String>,
}

/// Everything needed to turn a mapping into a running coordinator.
struct Activator {
    watch: Arc<dyn Watch>,
    runner: Arc<dyn CopyRunner>,
    program: PathBuf,
    settings: EngineSettings,
}

impl Activator {
    async fn activate(&self, mapping: MonitoredMapping) -> Result<MirrorCoordinator> {
        let subscription = self.watch.subscribe(&mapping.config().source, true)?;
        Ok(MirrorCoordinator::start(
            mapping,
            subscription,
            &self.program,
            self.runner.clone(),
            self.settings,
        )
        .await)
    }
}

/// The running mirror engine.
pub struct SyncWatch {
    active: Arc<Mutex<Vec<MirrorCoordinator>>>,
    retry: Mutex<Option<RetryWatcher>>,
    late_activations: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl SyncWatch {
    /// Build and start every configured mapping.
    ///
    /// `program` is the resolved copy tool. Both directions of a pair are
    /// built before either starts watching.
    pub async fn start(
        mappings: &[MappingConfig],
        settings: EngineSettings,
        program: PathBuf,
        watch: Arc<dyn Watch>,
        runner: Arc<dyn CopyRunner>,
    ) -> (Self, StartupReport) {
        info!("Starting SyncWatch");

        let activator = Arc::new(Activator {
            watch,
            runner,
            program,
            settings,
        });
        let built: Vec<MonitoredMapping> = mappings
            .iter()
            .flat_map(MonitoredMapping::materialize)
            .collect();

        let mut report = StartupReport::default();
        let mut active = Vec::new();
        let mut waiting = Vec::new();

        for mapping in built {
            let name = mapping.name().to_string();
            let retry = mapping.config().retry_until_available;

            if !mapping.config().paths_available() {
                if retry {
                    info!("Source or destination path doesn't exist for {name}, keep on retrying");
                    report.retrying.push(name);
                    waiting.push(mapping);
                } else {
                    error!("Source or destination path doesn't exist for {name}, watch not created");
                    report.skipped.push(name);
                }
                continue;
            }

            match activator.activate(mapping.clone()).await {
                Ok(coordinator) => {
                    report.active.push(name);
                    active.push(coordinator);
                }
                Err(e) if retry => {
                    info!("Cannot watch {name} yet ({e}), keep on retrying");
                    report.retrying.push(name);
                    waiting.push(mapping);
                }
                Err(e) => {
                    error!("Cannot watch {name}: {e}, watch not created");
                    report.skipped.push(name);
                }
            }
        }

        let active = Arc::new(Mutex::new(active));
        let cancel = CancellationToken::new();
        let (retry, late_activations) = if waiting.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            let tx_requeue = tx.clone();
            let retry =
                RetryWatcher::spawn(waiting, settings.retry_interval, tx, cancel.clone());
            let task = tokio::spawn(activate_late(
                rx,
                tx_requeue,
                activator,
                active.clone(),
                cancel.clone(),
            ));
            (Some(retry), Some(task))
        };

        let engine = Self {
            active,
            retry: Mutex::new(retry),
            late_activations: Mutex::new(late_activations),
            cancel,
            stopped: AtomicBool::new(false),
        };
        (engine, report)
    }

    /// Names of the directions currently watching.
    pub async fn active_mappings(&self) -> Vec<String> {
        self.active
            .lock()
            .await
            .iter()
            .map(|c| c.mapping().name().to_string())
            .collect()
    }

    /// Stop retrying, then stop every active mapping (watch, timer, in-flight
    /// copy). Returns once everything is quiet; later calls return at once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        if let Some(retry) = self.retry.lock().await.take() {
            retry.join().await;
        }
        if let Some(task) = self.late_activations.lock().await.take() {
            if let Err(e) = task.await {
                error!("Retry activation task failed: {e}");
            }
        }

        // Refuse new runs everywhere before joining any copy: a finishing
        // copy settles its direction and would release a waiting counterpart.
        let active = std::mem::take(&mut *self.active.lock().await);
        for coordinator in &active {
            coordinator.begin_shutdown().await;
        }
        for coordinator in &active {
            coordinator.shutdown().await;
        }

        info!("SyncWatch stopped");
    }
}

/// Start mappings released by the retry watcher. A mapping whose subscribe
/// still fails goes back to polling.
async fn activate_late(
    mut available: mpsc::UnboundedReceiver<MonitoredMapping>,
    requeue: mpsc::UnboundedSender<MonitoredMapping>,
    activator: Arc<Activator>,
    active: Arc<Mutex<Vec<MirrorCoordinator>>>,
    cancel: CancellationToken,
) {
    let mut retries = Vec::new();

    loop {
        let mapping = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            mapping = available.recv() => mapping,
        };
        let Some(mapping) = mapping else {
            break;
        };

        let name = mapping.name().to_string();
        match activator.activate(mapping.clone()).await {
            Ok(coordinator) => active.lock().await.push(coordinator),
            Err(e) => {
                info!("Cannot watch {name} yet ({e}), keep on retrying");
                retries.push(RetryWatcher::spawn(
                    vec![mapping],
                    activator.settings.retry_interval,
                    requeue.clone(),
                    cancel.clone(),
                ));
            }
        }
    }

    for retry in retries {
        retry.join().await;
    }
}
