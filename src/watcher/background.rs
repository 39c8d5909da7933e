use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::cycle::BookmarkWatchCycle;
use super::scheduler::{restart_background_work, BackgroundJob, BackgroundJobScheduler};
use super::visibility::AppVisibility;
use crate::preferences::WatchSettings;
use crate::registry::BookmarkRegistry;

/// Background job: one watch cycle, then queue the next job.
///
/// While the app is visible the foreground watcher owns polling, so the
/// cycle is skipped but the job still re-arms itself. Nothing is re-armed
/// once no watchable bookmark remains.
pub struct BackgroundWatchJob {
    cycle: Arc<BookmarkWatchCycle>,
    bookmarks: Arc<BookmarkRegistry>,
    settings: watch::Receiver<WatchSettings>,
    visibility: watch::Receiver<AppVisibility>,
    tag: String,
}

impl BackgroundWatchJob {
    pub fn new(
        cycle: Arc<BookmarkWatchCycle>,
        bookmarks: Arc<BookmarkRegistry>,
        settings: watch::Receiver<WatchSettings>,
        visibility: watch::Receiver<AppVisibility>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            cycle,
            bookmarks,
            settings,
            visibility,
            tag: tag.into(),
        }
    }
}

#[async_trait]
impl BackgroundJob for BackgroundWatchJob {
    async fn run(&self, scheduler: &dyn BackgroundJobScheduler) {
        let visible = *self.visibility.borrow() == AppVisibility::Foreground;
        if visible {
            tracing::debug!("App is visible, skipping background watch cycle");
        } else {
            let outcome = self.cycle.run().await;
            tracing::info!(
                checked = outcome.checked,
                new_replies = outcome.new_replies,
                deactivated = outcome.deactivated,
                "Background watch cycle finished"
            );
        }

        if !self.bookmarks.has_active_bookmarks().await {
            tracing::info!("No active bookmarks, background watching not rescheduled");
            return;
        }

        let settings = self.settings.borrow().clone();
        if let Err(e) = restart_background_work(scheduler, &settings, &self.tag).await {
            tracing::warn!(tag = %self.tag, error = %e, "Failed to reschedule background watching");
        }
    }
}
