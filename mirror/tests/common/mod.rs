//! Shared fakes for the mirror integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syncwatch_directory_watcher::{
    ChangeEvent, Subscription, Watch, WatchGuard, WatcherError,
};
use syncwatch_mirror::{CopyInvocation, CopyOutput, CopyRunner};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Watch backend driven by hand.
#[derive(Default)]
pub struct FakeWatch {
    senders: Mutex<HashMap<PathBuf, mpsc::Sender<ChangeEvent>>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl FakeWatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subscriptions on `path` fail.
    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    /// Let subscriptions on `path` succeed again.
    pub fn recover(&self, path: &Path) {
        self.failing.lock().unwrap().remove(path);
    }

    pub fn is_subscribed(&self, path: &Path) -> bool {
        self.senders.lock().unwrap().contains_key(path)
    }

    /// Deliver `change` to the subscription on `root`.
    pub fn emit(&self, root: &Path, change: ChangeEvent) {
        let sender = self.senders.lock().unwrap().get(root).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(change);
        }
    }
}

impl Watch for FakeWatch {
    fn subscribe(&self, path: &Path, _recursive: bool) -> syncwatch_directory_watcher::Result<Subscription> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }
        let (tx, rx) = mpsc::channel(100);
        self.senders.lock().unwrap().insert(path.to_path_buf(), tx);
        Ok(Subscription::new(rx, WatchGuard::detached(path)))
    }
}

/// One recorded copy run.
#[derive(Debug, Clone)]
pub struct Run {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub started: Instant,
    pub finished: Instant,
}

type Hook = Box<dyn Fn(&CopyInvocation) + Send + Sync>;

/// Copy runner that sleeps instead of copying and records every run.
pub struct RecordingRunner {
    duration: Duration,
    exit_code: i32,
    hook: Option<Hook>,
    runs: Mutex<Vec<Run>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingRunner {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            exit_code: 0,
            hook: None,
            runs: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn exiting_with(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Called at the start of every run, e.g. to emit the events the copy
    /// would cause on the destination.
    pub fn on_run(mut self, hook: impl Fn(&CopyInvocation) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().clone()
    }

    pub fn runs_from(&self, source: &Path) -> Vec<Run> {
        self.runs()
            .into_iter()
            .filter(|run| run.source == source)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CopyRunner for RecordingRunner {
    async fn run(&self, invocation: &CopyInvocation) -> std::io::Result<CopyOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();

        if let Some(hook) = &self.hook {
            hook(invocation);
        }
        tokio::time::sleep(self.duration).await;

        let n = invocation.args.len();
        self.runs.lock().unwrap().push(Run {
            source: PathBuf::from(&invocation.args[n - 2]),
            destination: PathBuf::from(&invocation.args[n - 1]),
            started,
            finished: Instant::now(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(CopyOutput {
            code: Some(self.exit_code),
            stdout: "sent 42 bytes  received 12 bytes".to_string(),
            stderr: if self.exit_code == 0 {
                String::new()
            } else {
                "rsync: some files could not be transferred".to_string()
            },
        })
    }
}

/// Let spawned tasks drain their queues without moving far in time.
pub async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Sleep until `offset` after `start`.
pub async fn at(start: Instant, offset: Duration) {
    tokio::time::sleep_until(start + offset).await;
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
