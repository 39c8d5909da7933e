use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cycle::BookmarkWatchCycle;
use crate::preferences::WatchSettings;

/// Polls bookmarks while the application is visible.
pub trait ForegroundWatcher: Send + Sync {
    fn is_watching(&self) -> bool;

    /// Start polling unless already running.
    fn start_watching(&self);

    /// Stop any running poll loop and start a fresh one immediately.
    fn restart_watching(&self);

    fn stop_watching(&self);
}

/// Next polling interval: back to `base` after new replies, otherwise doubled
/// up to `max`.
pub fn next_interval(current: Duration, had_new_replies: bool, base: Duration, max: Duration) -> Duration {
    if had_new_replies {
        base
    } else {
        current.saturating_mul(2).min(max).max(base)
    }
}

/// [`ForegroundWatcher`] running [`BookmarkWatchCycle`]s in a tokio task.
///
/// The loop ends by itself once no watchable bookmark is left; the next
/// bookmark creation restarts it through the coordinator.
pub struct ForegroundBookmarkWatcher {
    cycle: Arc<BookmarkWatchCycle>,
    settings: watch::Receiver<WatchSettings>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ForegroundBookmarkWatcher {
    pub fn new(cycle: Arc<BookmarkWatchCycle>, settings: watch::Receiver<WatchSettings>) -> Self {
        Self {
            cycle,
            settings,
            task: Mutex::new(None),
        }
    }

    fn spawn_loop(&self) -> JoinHandle<()> {
        let cycle = Arc::clone(&self.cycle);
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let mut interval: Option<Duration> = None;
            loop {
                let outcome = cycle.run().await;
                if outcome.active_remaining == 0 {
                    tracing::info!("No active bookmarks left, foreground watching stopped");
                    break;
                }

                let (base, max) = {
                    let current = settings.borrow();
                    (current.foreground_interval, current.max_foreground_interval)
                };
                let next = match interval {
                    Some(current) => next_interval(current, outcome.new_replies > 0, base, max),
                    None => base,
                };
                interval = Some(next);
                tracing::debug!(
                    interval_secs = next.as_secs(),
                    new_replies = outcome.new_replies,
                    "Next foreground watch cycle scheduled"
                );
                tokio::time::sleep(next).await;
            }
        })
    }
}

impl ForegroundWatcher for ForegroundBookmarkWatcher {
    fn is_watching(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn start_watching(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        tracing::info!("Foreground bookmark watching started");
        *task = Some(self.spawn_loop());
    }

    fn restart_watching(&self) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        tracing::info!("Foreground bookmark watching restarted");
        *task = Some(self.spawn_loop());
    }

    fn stop_watching(&self) {
        if let Some(previous) = self.task.lock().take() {
            previous.abort();
            tracing::info!("Foreground bookmark watching stopped");
        }
    }
}

impl Drop for ForegroundBookmarkWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
