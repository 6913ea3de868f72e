//! Polling for mappings whose directories are not there yet.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::MappingConfig;
use crate::mapping::MonitoredMapping;

/// Polls waiting mappings on a fixed interval and hands each one over as
/// soon as both of its paths exist.
pub struct RetryWatcher {
    task: JoinHandle<()>,
}

impl RetryWatcher {
    /// Start polling `pending` every `interval`, checking availability with
    /// [`MappingConfig::paths_available`].
    pub fn spawn(
        pending: Vec<MonitoredMapping>,
        interval: Duration,
        available: mpsc::UnboundedSender<MonitoredMapping>,
        cancel: CancellationToken,
    ) -> Self {
        Self::spawn_with_check(
            pending,
            interval,
            MappingConfig::paths_available,
            available,
            cancel,
        )
    }

    /// Like [`spawn`](Self::spawn) with a custom availability check.
    pub fn spawn_with_check<P>(
        pending: Vec<MonitoredMapping>,
        interval: Duration,
        check: P,
        available: mpsc::UnboundedSender<MonitoredMapping>,
        cancel: CancellationToken,
    ) -> Self
    where
        P: Fn(&MappingConfig) -> bool + Send + 'static,
    {
        let task = tokio::spawn(poll(pending, interval, check, available, cancel));
        Self { task }
    }

    /// Wait for the poller to exit (all mappings online, or cancelled).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Retry watcher task failed: {e}");
        }
    }
}

async fn poll<P>(
    mut pending: Vec<MonitoredMapping>,
    interval: Duration,
    check: P,
    available: mpsc::UnboundedSender<MonitoredMapping>,
    cancel: CancellationToken,
) where
    P: Fn(&MappingConfig) -> bool,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);

    while !pending.is_empty() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let (online, waiting): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|mapping| check(mapping.config()));
        pending = waiting;

        for mapping in online {
            info!(
                "Source or destination path came online for {}",
                mapping.name()
            );
            if available.send(mapping).is_err() {
                return;
            }
        }
    }

    debug!("All waiting mappings are online");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_activates_on_first_interval_with_both_paths() {
        let interval = Duration::from_secs(10);
        let checks = Arc::new(AtomicUsize::new(0));
        let check = {
            let checks = checks.clone();
            // Missing for three polls, present from the fourth on.
            move |_: &MappingConfig| checks.fetch_add(1, Ordering::SeqCst) >= 3
        };

        let mapping = MonitoredMapping::new(MappingConfig::new("late", "/src", "/dst").with_retry());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let watcher =
            RetryWatcher::spawn_with_check(vec![mapping], interval, check, tx, CancellationToken::new());

        let activated = rx.recv().await.unwrap();
        assert_eq!(activated.name(), "late");
        assert_eq!(Instant::now() - start, interval * 4);
        assert_eq!(checks.load(Ordering::SeqCst), 4);

        watcher.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_available_mappings_are_released() {
        let ready = MonitoredMapping::new(MappingConfig::new("ready", "/a", "/b"));
        let never = MonitoredMapping::new(MappingConfig::new("never", "/c", "/d"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let watcher = RetryWatcher::spawn_with_check(
            vec![ready, never],
            Duration::from_secs(10),
            |config: &MappingConfig| config.name == "ready",
            tx,
            cancel.clone(),
        );

        assert_eq!(rx.recv().await.unwrap().name(), "ready");
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        watcher.join().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_real_directories() {
        let root = tempfile::TempDir::new().unwrap();
        let source = root.path().join("src");
        let destination = root.path().join("dst");
        std::fs::create_dir(&destination).unwrap();

        let mapping = MonitoredMapping::new(MappingConfig::new("disk", &source, &destination));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher =
            RetryWatcher::spawn(vec![mapping], Duration::from_secs(10), tx, CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(rx.try_recv().is_err());

        std::fs::create_dir(&source).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.try_recv().unwrap().name(), "disk");
    }
}
