//! Mirror coordinator: wires one direction's change stream through the echo
//! filter and debounce timer into its sync executor.
//!
//! ```text
//! change ──► echo filter ──► pending changes ──► debounce timer
//!                                                     │ fire
//!                                                     ▼
//!                      wait for counterpart ──► sync executor ──► settle
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use syncwatch_directory_watcher::{ChangeEvent, Subscription, WatchGuard};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::debounce::DebounceTimer;
use crate::echo::Verdict;
use crate::executor::{CopyInvocation, CopyRunner, SyncExecutor};
use crate::mapping::MonitoredMapping;

/// Observable state of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorPhase {
    /// Settled, timer unarmed.
    Idle,
    /// Timer armed, accumulating changes.
    Watching,
    /// Timer fired, blocked until the counterpart settles.
    WaitingOnCounterpart,
    /// Copy running (or settling).
    Syncing,
}

/// Drives one [`MonitoredMapping`].
pub struct MirrorCoordinator {
    shared: Arc<Shared>,
    guard: Mutex<Option<WatchGuard>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    mapping: MonitoredMapping,
    timer: DebounceTimer,
    executor: SyncExecutor,
    waiting: AtomicBool,
    stopping: AtomicBool,
    cancel: CancellationToken,
}

impl MirrorCoordinator {
    /// Start coordinating `mapping`, consuming change events from
    /// `subscription` and running copies of `program` through `runner`.
    pub async fn start(
        mapping: MonitoredMapping,
        subscription: Subscription,
        program: &Path,
        runner: Arc<dyn CopyRunner>,
        settings: EngineSettings,
    ) -> Self {
        let name = mapping.name().to_string();
        info!("{name}: Starting watch");

        let (events, guard) = subscription.into_parts();
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();

        let config = mapping.config();
        let timer = DebounceTimer::new(config.quiet_delay, config.sliding_window, move || {
            let _ = fire_tx.send(());
        });
        let executor = SyncExecutor::new(
            &name,
            CopyInvocation::new(program, config),
            mapping.state().clone(),
            runner,
            settings.settle_delay,
        );
        let initial_sync = config.initial_sync_on_start;

        let shared = Arc::new(Shared {
            mapping,
            timer,
            executor,
            waiting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let tasks = vec![
            tokio::spawn(shared.clone().intake(events)),
            tokio::spawn(shared.clone().fire_loop(fire_rx)),
        ];

        if initial_sync {
            info!("{name}: Execute initial sync");
            shared.timer.arm().await;
        }

        Self {
            shared,
            guard: Mutex::new(Some(guard)),
            tasks: Mutex::new(tasks),
        }
    }

    /// The coordinated mapping.
    pub fn mapping(&self) -> &MonitoredMapping {
        &self.shared.mapping
    }

    /// Feed one change notification, as if delivered by the watch.
    pub async fn on_change(&self, change: ChangeEvent) {
        self.shared.on_change(change).await;
    }

    /// Current phase of the state machine.
    pub async fn phase(&self) -> MirrorPhase {
        if self.shared.executor.is_running().await {
            MirrorPhase::Syncing
        } else if self.shared.waiting.load(Ordering::SeqCst) {
            MirrorPhase::WaitingOnCounterpart
        } else if self.shared.timer.is_armed().await {
            MirrorPhase::Watching
        } else {
            MirrorPhase::Idle
        }
    }

    /// Stop the watch, cancel the timer and refuse further runs, without
    /// waiting for an in-flight copy. Returns `false` if shutdown had
    /// already begun.
    pub async fn begin_shutdown(&self) -> bool {
        let shared = &self.shared;
        if shared.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }
        shared.cancel.cancel();

        if let Some(mut guard) = self.guard.lock().await.take() {
            guard.stop();
        }
        shared.timer.clear().await;
        shared.executor.stop_accepting().await;

        info!("{}: Stopping watch", shared.mapping.name());
        true
    }

    /// [`begin_shutdown`](Self::begin_shutdown), then join the in-flight
    /// copy and the coordinator's tasks. Safe to call twice.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        self.begin_shutdown().await;
        shared.executor.shutdown().await;

        for task in self.tasks.lock().await.drain(..) {
            if let Err(e) = task.await {
                error!("{}: Coordinator task failed: {e}", shared.mapping.name());
            }
        }
    }
}

impl Shared {
    async fn intake(self: Arc<Self>, mut events: mpsc::Receiver<ChangeEvent>) {
        loop {
            let change = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                change = events.recv() => change,
            };
            match change {
                Some(change) => self.on_change(change).await,
                None => break,
            }
        }
    }

    async fn on_change(&self, change: ChangeEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let name = self.mapping.name();

        match self.mapping.classify(&change).await {
            Verdict::Ignore => {
                debug!(
                    "{name}: Ignoring {} on {}, echo of reverse sync",
                    change.kind,
                    change.path.display()
                );
            }
            Verdict::Process => {
                info!(
                    "{name}: {} event detected on {}",
                    change.kind,
                    change.path.display()
                );
                self.mapping.state().record(change).await;
                self.timer.arm().await;
            }
        }
    }

    async fn fire_loop(self: Arc<Self>, mut fires: mpsc::UnboundedReceiver<()>) {
        loop {
            let fired = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                fired = fires.recv() => fired,
            };
            if fired.is_none() || !self.sync_when_clear().await {
                break;
            }
        }
    }

    /// Trigger the executor once the counterpart (if any) is settled.
    /// Returns `false` if shutdown interrupted the wait.
    async fn sync_when_clear(&self) -> bool {
        let Some(counterpart) = self.mapping.counterpart() else {
            if self.cancel.is_cancelled() {
                return false;
            }
            self.executor.trigger().await;
            return true;
        };

        let name = self.mapping.name();
        let deadline = self
            .mapping
            .config()
            .counterpart_wait_timeout
            .map(|limit| Instant::now() + limit);
        let mut timed_out = false;

        loop {
            {
                let _gate = self.mapping.sync_gate().lock().await;
                if self.cancel.is_cancelled() {
                    self.waiting.store(false, Ordering::SeqCst);
                    return false;
                }
                if timed_out || counterpart.is_settled().await {
                    self.waiting.store(false, Ordering::SeqCst);
                    self.executor.trigger().await;
                    return true;
                }
            }

            if !self.waiting.swap(true, Ordering::SeqCst) {
                info!("{name}: Waiting on reverse action to finish");
            }

            let settled = async {
                match deadline {
                    Some(deadline) => {
                        tokio::time::timeout_at(deadline, counterpart.wait_settled())
                            .await
                            .is_ok()
                    }
                    None => {
                        counterpart.wait_settled().await;
                        true
                    }
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.waiting.store(false, Ordering::SeqCst);
                    return false;
                }
                settled = settled => {
                    if !settled {
                        warn!("{name}: Reverse action still running, synchronizing anyway");
                        timed_out = true;
                    }
                }
            }
        }
    }
}
