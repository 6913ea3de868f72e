//! Monitored mappings and their shared runtime state.
//!
//! Each mirror direction owns a [`MappingState`]: the `settled` signal and
//! the set of changes recorded since the last finished run. A bidirectional
//! entry produces two [`MonitoredMapping`]s whose states are cross-linked
//! with `Weak` references, so neither keeps the other alive.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use syncwatch_directory_watcher::ChangeEvent;
use tokio::sync::{Mutex, Notify};

use crate::config::MappingConfig;
use crate::echo::{self, Verdict};

/// Suffix naming the declared direction of an entry.
const FORWARD_SUFFIX: &str = "-->";

/// Suffix naming the inverse direction of a bidirectional entry.
const INVERSE_SUFFIX: &str = "<--";

#[derive(Debug)]
struct StateInner {
    settled: bool,
    pending: IndexSet<ChangeEvent>,
}

/// Runtime state of one mirror direction.
///
/// One lock guards both the settled flag and the pending changes; readers on
/// the counterpart side always go through it.
#[derive(Debug)]
pub struct MappingState {
    root: PathBuf,
    inner: Mutex<StateInner>,
    settled_changed: Notify,
}

impl MappingState {
    /// Fresh state: settled, nothing pending.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inner: Mutex::new(StateInner {
                settled: true,
                pending: IndexSet::new(),
            }),
            settled_changed: Notify::new(),
        }
    }

    /// The watched root of this direction.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether no mirrored write is currently unconfirmed.
    pub async fn is_settled(&self) -> bool {
        self.inner.lock().await.settled
    }

    /// Record a change. Returns `false` if an identical record was pending.
    pub async fn record(&self, change: ChangeEvent) -> bool {
        self.inner.lock().await.pending.insert(change)
    }

    /// Snapshot of the pending changes, in arrival order.
    pub async fn pending(&self) -> Vec<ChangeEvent> {
        self.inner.lock().await.pending.iter().cloned().collect()
    }

    /// A copy run has started.
    pub async fn mark_unsettled(&self) {
        self.inner.lock().await.settled = false;
    }

    /// A copy run has finished and its events have been observed: clear the
    /// pending changes and wake everyone waiting for settlement.
    pub async fn settle(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.settled = true;
            inner.pending.clear();
        }
        self.settled_changed.notify_waiters();
    }

    /// Wait until the state is settled.
    pub async fn wait_settled(&self) {
        loop {
            let notified = self.settled_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_settled().await {
                return;
            }
            notified.await;
        }
    }

    /// Run the echo check of `change` (observed under `observer_root`)
    /// against this state, under its lock.
    async fn classify_incoming(&self, change: &ChangeEvent, observer_root: &Path) -> Verdict {
        let inner = self.inner.lock().await;
        if inner.settled {
            return Verdict::Process;
        }
        echo::classify(change, observer_root, &self.root, inner.pending.iter())
    }
}

/// One configured mirror direction plus its runtime state.
#[derive(Debug, Clone)]
pub struct MonitoredMapping {
    config: Arc<MappingConfig>,
    state: Arc<MappingState>,
    counterpart: Option<Weak<MappingState>>,
    sync_gate: Arc<Mutex<()>>,
}

impl MonitoredMapping {
    /// A one-way mapping with no counterpart.
    pub fn new(config: MappingConfig) -> Self {
        let state = Arc::new(MappingState::new(&config.source));
        Self {
            config: Arc::new(config),
            state,
            counterpart: None,
            sync_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Materialize the mappings described by one configuration entry: a
    /// single direction, or both directions of a [`DirectionPair`].
    pub fn materialize(config: &MappingConfig) -> Vec<Self> {
        if config.reverse_sync {
            let pair = DirectionPair::new(config);
            vec![pair.forward, pair.inverse]
        } else {
            let mut config = config.clone();
            config.name = format!("{}{FORWARD_SUFFIX}", config.name);
            vec![Self::new(config)]
        }
    }

    /// The direction's configuration.
    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// This direction's own state.
    pub fn state(&self) -> &Arc<MappingState> {
        &self.state
    }

    /// The counterpart's state, if paired and still alive.
    pub fn counterpart(&self) -> Option<Arc<MappingState>> {
        self.counterpart.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this mapping was built as half of a pair.
    pub fn is_paired(&self) -> bool {
        self.counterpart.is_some()
    }

    /// Lock shared by both directions of a pair. Holding it while checking
    /// the counterpart and starting a run makes the two steps atomic.
    pub fn sync_gate(&self) -> &Mutex<()> {
        &self.sync_gate
    }

    /// Decide whether an observed change is a real edit or an echo of the
    /// counterpart's own copy run.
    pub async fn classify(&self, change: &ChangeEvent) -> Verdict {
        match self.counterpart() {
            Some(counterpart) => {
                counterpart
                    .classify_incoming(change, self.state.root())
                    .await
            }
            None => Verdict::Process,
        }
    }
}

/// The two cross-wired directions of a bidirectional entry.
#[derive(Debug, Clone)]
pub struct DirectionPair {
    /// source → destination, as declared.
    pub forward: MonitoredMapping,

    /// destination → source.
    pub inverse: MonitoredMapping,
}

impl DirectionPair {
    /// Build both directions and link each to the other's state.
    ///
    /// Both states exist before either mapping is returned, so there is no
    /// moment where only one side is wired.
    pub fn new(config: &MappingConfig) -> Self {
        let mut forward_config = config.clone();
        forward_config.name = format!("{}{FORWARD_SUFFIX}", config.name);

        let mut inverse_config = config.clone();
        inverse_config.name = format!("{}{INVERSE_SUFFIX}", config.name);
        inverse_config.source = config.destination.clone();
        inverse_config.destination = config.source.clone();

        let forward_state = Arc::new(MappingState::new(&forward_config.source));
        let inverse_state = Arc::new(MappingState::new(&inverse_config.source));
        let sync_gate = Arc::new(Mutex::new(()));

        let forward = MonitoredMapping {
            config: Arc::new(forward_config),
            counterpart: Some(Arc::downgrade(&inverse_state)),
            state: forward_state.clone(),
            sync_gate: sync_gate.clone(),
        };
        let inverse = MonitoredMapping {
            config: Arc::new(inverse_config),
            counterpart: Some(Arc::downgrade(&forward_state)),
            state: inverse_state,
            sync_gate,
        };

        Self { forward, inverse }
    }
}
