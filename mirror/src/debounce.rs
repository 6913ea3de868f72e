//! Debounce timer coalescing bursts of changes into one fire.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Schedules a single callback invocation after a quiet period.
///
/// With a sliding window every [`arm`](Self::arm) restarts the countdown, so
/// the callback fires `delay` after the last call of a burst. With a fixed
/// window arming an armed timer does nothing and the callback fires `delay`
/// after the first call. The callback runs on the timer's own task; once it
/// has run the timer is unarmed again.
pub struct DebounceTimer {
    delay: Duration,
    sliding_window: bool,
    callback: Callback,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceTimer {
    /// Create an unarmed timer.
    pub fn new(
        delay: Duration,
        sliding_window: bool,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay,
            sliding_window,
            callback: Arc::new(callback),
            scheduled: Mutex::new(None),
        }
    }

    /// Schedule a fire, or extend/keep the current schedule.
    pub async fn arm(&self) {
        let mut scheduled = self.scheduled.lock().await;

        if let Some(handle) = scheduled.as_ref().filter(|h| !h.is_finished()) {
            if !self.sliding_window {
                return;
            }
            handle.abort();
        }

        let delay = self.delay;
        let callback = self.callback.clone();
        *scheduled = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
    }

    /// Cancel any pending fire.
    pub async fn clear(&self) {
        if let Some(handle) = self.scheduled.lock().await.take() {
            handle.abort();
        }
    }

    /// Whether a fire is pending.
    pub async fn is_armed(&self) -> bool {
        self.scheduled
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl fmt::Debug for DebounceTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceTimer")
            .field("delay", &self.delay)
            .field("sliding_window", &self.sliding_window)
            .finish_non_exhaustive()
    }
}
