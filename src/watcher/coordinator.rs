use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::debounce::{Debouncer, Trigger, DEFAULT_DEBOUNCE_WINDOW};
use super::foreground::ForegroundWatcher;
use super::scheduler::{
    cancel_background_bookmark_watching, restart_background_work, BackgroundJobScheduler,
    SchedulingError,
};
use super::visibility::AppVisibility;
use crate::model::BookmarkChange;
use crate::preferences::WatchSettings;
use crate::registry::BookmarkRegistry;

const TRIGGER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Bookmark watch coordinator is already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

/// Which watcher currently owns bookmark polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Idle,
    ForegroundWatching,
    BackgroundScheduled,
}

/// Decides between foreground watching, background scheduling and nothing.
///
/// Bookmark changes, watch settings and app visibility all feed one
/// debounced trigger stream. Each batch leads to one redecision; a batch
/// arriving while a redecision is still running is dropped.
pub struct BookmarkWatchCoordinator {
    bookmarks: Arc<BookmarkRegistry>,
    settings: watch::Receiver<WatchSettings>,
    visibility: watch::Receiver<AppVisibility>,
    foreground: Arc<dyn ForegroundWatcher>,
    scheduler: Arc<dyn BackgroundJobScheduler>,
    job_tag: String,
    debounce_window: Duration,
    initialized: AtomicBool,
    decision_lock: Arc<tokio::sync::Mutex<()>>,
    mode: watch::Sender<WatchMode>,
}

impl BookmarkWatchCoordinator {
    pub fn new(
        bookmarks: Arc<BookmarkRegistry>,
        settings: watch::Receiver<WatchSettings>,
        visibility: watch::Receiver<AppVisibility>,
        foreground: Arc<dyn ForegroundWatcher>,
        scheduler: Arc<dyn BackgroundJobScheduler>,
        job_tag: impl Into<String>,
    ) -> Self {
        let (mode, _) = watch::channel(WatchMode::Idle);
        Self {
            bookmarks,
            settings,
            visibility,
            foreground,
            scheduler,
            job_tag: job_tag.into(),
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            initialized: AtomicBool::new(false),
            decision_lock: Arc::new(tokio::sync::Mutex::new(())),
            mode,
        }
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn mode(&self) -> WatchMode {
        *self.mode.borrow()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<WatchMode> {
        self.mode.subscribe()
    }

    /// Start listening for triggers.
    ///
    /// Subscriptions are taken before this returns, so events published
    /// right after (such as the bookmark registry's `Initialized`) are seen.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::AlreadyInitialized` on a second call.
    pub fn initialize(self: &Arc<Self>) -> Result<JoinHandle<()>, CoordinatorError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(CoordinatorError::AlreadyInitialized);
        }

        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        tokio::spawn(forward_bookmark_changes(self.bookmarks.subscribe(), tx.clone()));
        tokio::spawn(forward_settings(self.settings.clone(), tx.clone()));
        tokio::spawn(forward_visibility(self.visibility.clone(), tx));

        let coordinator = Arc::clone(self);
        let debouncer = Debouncer::new(rx, self.debounce_window);
        Ok(tokio::spawn(async move { coordinator.run(debouncer).await }))
    }

    async fn run(self: Arc<Self>, mut debouncer: Debouncer) {
        while let Some(batch) = debouncer.next().await {
            let Ok(guard) = Arc::clone(&self.decision_lock).try_lock_owned() else {
                tracing::debug!(
                    triggers = batch.triggers,
                    "Redecision already running, dropping triggers"
                );
                continue;
            };

            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = coordinator.decide(batch.had_creation).await {
                    tracing::warn!(error = %e, "Bookmark watch redecision failed");
                }
            });
        }
        tracing::debug!("Bookmark watch trigger stream closed");
    }

    /// Re-evaluate which watcher should run and apply the result.
    ///
    /// `had_creation` restarts an already running foreground watcher so new
    /// bookmarks are fetched without waiting out the current interval.
    /// Applying the same inputs twice leaves the same state behind.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error if background work could not be
    /// scheduled or cancelled.
    pub async fn decide(&self, had_creation: bool) -> Result<WatchMode, CoordinatorError> {
        let settings = self.settings.borrow().clone();
        let hidden = *self.visibility.borrow() == AppVisibility::Background;
        let has_active = self.bookmarks.has_active_bookmarks().await;

        let mode = if !has_active || !settings.enabled {
            tracing::debug!(
                has_active,
                enabled = settings.enabled,
                "Nothing to watch, stopping watchers"
            );
            self.foreground.stop_watching();
            cancel_background_bookmark_watching(self.scheduler.as_ref(), &self.job_tag).await?;
            WatchMode::Idle
        } else {
            if !settings.in_background {
                cancel_background_bookmark_watching(self.scheduler.as_ref(), &self.job_tag)
                    .await?;
            }

            if hidden {
                self.foreground.stop_watching();
                if settings.in_background {
                    restart_background_work(self.scheduler.as_ref(), &settings, &self.job_tag)
                        .await?;
                    WatchMode::BackgroundScheduled
                } else {
                    WatchMode::Idle
                }
            } else {
                if had_creation {
                    self.foreground.restart_watching();
                } else if !self.foreground.is_watching() {
                    self.foreground.start_watching();
                }
                WatchMode::ForegroundWatching
            }
        };

        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(?previous, ?mode, "Bookmark watch mode changed");
        }
        Ok(mode)
    }
}

// ============================================================================
// Trigger sources
// ============================================================================

async fn forward_bookmark_changes(
    mut changes: broadcast::Receiver<BookmarkChange>,
    tx: mpsc::Sender<Trigger>,
) {
    loop {
        let trigger = match changes.recv().await {
            Ok(BookmarkChange::Updated(_)) => continue,
            Ok(change) if change.is_creation() => Trigger::created(),
            Ok(_) => Trigger::changed(),
            Err(RecvError::Lagged(skipped)) => {
                // Missed events may include creations
                tracing::warn!(skipped, "Bookmark change events lagged");
                Trigger::created()
            }
            Err(RecvError::Closed) => break,
        };
        if tx.send(trigger).await.is_err() {
            break;
        }
    }
}

/// The settings a redecision depends on.
fn decision_inputs(settings: &WatchSettings) -> (bool, bool, Duration) {
    (
        settings.enabled,
        settings.in_background,
        settings.background_interval,
    )
}

async fn forward_settings(mut settings: watch::Receiver<WatchSettings>, tx: mpsc::Sender<Trigger>) {
    let mut last = decision_inputs(&settings.borrow_and_update());
    while settings.changed().await.is_ok() {
        let current = decision_inputs(&settings.borrow_and_update());
        if current == last {
            continue;
        }
        last = current;
        if tx.send(Trigger::changed()).await.is_err() {
            break;
        }
    }
}

async fn forward_visibility(
    mut visibility: watch::Receiver<AppVisibility>,
    tx: mpsc::Sender<Trigger>,
) {
    while visibility.changed().await.is_ok() {
        let trigger = match *visibility.borrow_and_update() {
            AppVisibility::Background => Trigger::flush(),
            AppVisibility::Foreground => Trigger::changed(),
        };
        if tx.send(trigger).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ThreadBookmark, ThreadDescriptor};
    use crate::storage::{Database, PersistenceGateway};
    use crate::watcher::scheduler::JobConstraints;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const TAG: &str = "test_background_bookmark_watcher";

    #[derive(Default)]
    struct FakeForeground {
        watching: AtomicBool,
        starts: AtomicUsize,
        restarts: AtomicUsize,
    }

    impl ForegroundWatcher for FakeForeground {
        fn is_watching(&self) -> bool {
            self.watching.load(Ordering::SeqCst)
        }

        fn start_watching(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.watching.store(true, Ordering::SeqCst);
        }

        fn restart_watching(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            self.watching.store(true, Ordering::SeqCst);
        }

        fn stop_watching(&self) {
            self.watching.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        pending: Mutex<HashMap<String, Duration>>,
    }

    #[async_trait]
    impl BackgroundJobScheduler for FakeScheduler {
        async fn schedule(
            &self,
            tag: &str,
            delay: Duration,
            _constraints: JobConstraints,
        ) -> Result<(), SchedulingError> {
            self.pending.lock().insert(tag.to_string(), delay);
            Ok(())
        }

        async fn cancel(&self, tag: &str) -> Result<(), SchedulingError> {
            self.pending.lock().remove(tag);
            Ok(())
        }
    }

    struct Harness {
        coordinator: Arc<BookmarkWatchCoordinator>,
        bookmarks: Arc<BookmarkRegistry>,
        db: Database,
        foreground: Arc<FakeForeground>,
        scheduler: Arc<FakeScheduler>,
        settings: watch::Sender<WatchSettings>,
        visibility: watch::Sender<AppVisibility>,
    }

    async fn harness() -> Harness {
        let db = Database::open(":memory:").await.unwrap();
        let bookmarks = Arc::new(BookmarkRegistry::new(db.clone()));
        bookmarks.initialize().await.unwrap();

        let (settings, settings_rx) = watch::channel(WatchSettings::default());
        let (visibility, visibility_rx) = watch::channel(AppVisibility::Foreground);
        let foreground = Arc::new(FakeForeground::default());
        let scheduler = Arc::new(FakeScheduler::default());

        let coordinator = Arc::new(BookmarkWatchCoordinator::new(
            Arc::clone(&bookmarks),
            settings_rx,
            visibility_rx,
            foreground.clone(),
            scheduler.clone(),
            TAG,
        ));

        Harness {
            coordinator,
            bookmarks,
            db,
            foreground,
            scheduler,
            settings,
            visibility,
        }
    }

    async fn add_bookmark(h: &Harness, op_no: u64) {
        let descriptor = ThreadDescriptor::create("4chan", "g", op_no);
        h.db.create_empty_thread_if_not_exists(&descriptor)
            .await
            .unwrap();
        h.bookmarks
            .create_bookmarks(vec![ThreadBookmark::new(descriptor)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_active_bookmarks_is_idle() {
        let h = harness().await;
        h.foreground.start_watching();
        h.scheduler
            .pending
            .lock()
            .insert(TAG.to_string(), Duration::from_secs(60));

        let mode = h.coordinator.decide(false).await.unwrap();

        assert_eq!(mode, WatchMode::Idle);
        assert!(!h.foreground.is_watching());
        assert!(h.scheduler.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_foreground_start_is_idempotent() {
        let h = harness().await;
        add_bookmark(&h, 1).await;

        assert_eq!(
            h.coordinator.decide(false).await.unwrap(),
            WatchMode::ForegroundWatching
        );
        assert_eq!(
            h.coordinator.decide(false).await.unwrap(),
            WatchMode::ForegroundWatching
        );

        assert_eq!(h.foreground.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.foreground.restarts.load(Ordering::SeqCst), 0);
        assert_eq!(h.coordinator.mode(), WatchMode::ForegroundWatching);
    }

    #[tokio::test]
    async fn test_creation_restarts_foreground() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        h.coordinator.decide(false).await.unwrap();

        h.coordinator.decide(true).await.unwrap();

        assert_eq!(h.foreground.restarts.load(Ordering::SeqCst), 1);
        assert!(h.foreground.is_watching());
    }

    #[tokio::test]
    async fn test_disabled_watching_stops_everything() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        h.coordinator.decide(false).await.unwrap();

        h.settings.send_modify(|s| s.enabled = false);
        let mode = h.coordinator.decide(false).await.unwrap();

        assert_eq!(mode, WatchMode::Idle);
        assert!(!h.foreground.is_watching());
    }

    #[tokio::test]
    async fn test_background_schedules_single_job() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        h.settings.send_modify(|s| s.in_background = true);
        h.visibility.send_replace(AppVisibility::Background);
        h.foreground.start_watching();

        for _ in 0..3 {
            assert_eq!(
                h.coordinator.decide(false).await.unwrap(),
                WatchMode::BackgroundScheduled
            );
        }

        assert!(!h.foreground.is_watching());
        let pending = h.scheduler.pending.lock();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(TAG), Some(&WatchSettings::default().background_interval));
    }

    #[tokio::test]
    async fn test_background_without_permission_is_idle() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        h.scheduler
            .pending
            .lock()
            .insert(TAG.to_string(), Duration::from_secs(60));
        h.visibility.send_replace(AppVisibility::Background);

        let mode = h.coordinator.decide(false).await.unwrap();

        assert_eq!(mode, WatchMode::Idle);
        assert!(h.scheduler.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_foreground_cancels_background_when_not_allowed() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        h.scheduler
            .pending
            .lock()
            .insert(TAG.to_string(), Duration::from_secs(60));

        h.coordinator.decide(false).await.unwrap();

        assert!(h.scheduler.pending.lock().is_empty());
        assert!(h.foreground.is_watching());
    }

    /// Scheduler whose `cancel` blocks until a permit is added, holding the
    /// redecision that called it.
    struct GatedScheduler {
        cancels: AtomicUsize,
        gate: tokio::sync::Semaphore,
    }

    impl GatedScheduler {
        fn new() -> Self {
            Self {
                cancels: AtomicUsize::new(0),
                gate: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl BackgroundJobScheduler for GatedScheduler {
        async fn schedule(
            &self,
            _tag: &str,
            _delay: Duration,
            _constraints: JobConstraints,
        ) -> Result<(), SchedulingError> {
            Ok(())
        }

        async fn cancel(&self, _tag: &str) -> Result<(), SchedulingError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_triggers_during_redecision_are_dropped() {
        let h = harness().await;
        add_bookmark(&h, 1).await;
        let scheduler = Arc::new(GatedScheduler::new());
        let coordinator = Arc::new(BookmarkWatchCoordinator::new(
            Arc::clone(&h.bookmarks),
            h.settings.subscribe(),
            h.visibility.subscribe(),
            h.foreground.clone(),
            scheduler.clone(),
            TAG,
        ));

        let window = DEFAULT_DEBOUNCE_WINDOW;
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        tokio::spawn(Arc::clone(&coordinator).run(Debouncer::new(rx, window)));
        // No database access from here on
        tokio::time::pause();

        tx.send(Trigger::changed()).await.unwrap();
        tokio::time::sleep(window * 2).await;
        assert_eq!(scheduler.cancels.load(Ordering::SeqCst), 1);

        // Arrives while the first redecision is parked in `cancel`
        tx.send(Trigger::created()).await.unwrap();
        tokio::time::sleep(window * 2).await;
        assert_eq!(scheduler.cancels.load(Ordering::SeqCst), 1);

        scheduler.gate.add_permits(1);
        tokio::time::sleep(window * 2).await;
        assert_eq!(scheduler.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(h.foreground.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.foreground.restarts.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.mode(), WatchMode::ForegroundWatching);

        // The lock is free again, so the next batch is decided
        scheduler.gate.add_permits(1);
        tx.send(Trigger::created()).await.unwrap();
        tokio::time::sleep(window * 2).await;
        assert_eq!(scheduler.cancels.load(Ordering::SeqCst), 2);
        assert_eq!(h.foreground.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let h = harness().await;
        h.coordinator.initialize().unwrap();
        assert!(matches!(
            h.coordinator.initialize(),
            Err(CoordinatorError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_decision_inputs_ignore_foreground_intervals() {
        let base = WatchSettings::default();
        let tweaked = WatchSettings {
            foreground_interval: base.foreground_interval * 2,
            ..base.clone()
        };
        assert_eq!(decision_inputs(&base), decision_inputs(&tweaked));

        let backgrounded = WatchSettings {
            in_background: !base.in_background,
            ..base.clone()
        };
        assert_ne!(decision_inputs(&base), decision_inputs(&backgrounded));
    }
}
