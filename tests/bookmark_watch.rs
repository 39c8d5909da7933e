//! Integration tests for bookmark watching: the watch cycle against a mocked
//! site, and the coordinator's trigger handling with fake watchers.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chanwatch::config::SiteConfig;
use chanwatch::fetch::{ChanFetcher, FetchSettings};
use chanwatch::model::{ThreadBookmark, ThreadDescriptor, ThreadExtraInfo};
use chanwatch::preferences::WatchSettings;
use chanwatch::registry::{BookmarkRegistry, SiteRegistry};
use chanwatch::storage::{Database, PersistenceGateway};
use chanwatch::watcher::{
    AppVisibility, BackgroundJobScheduler, BookmarkWatchCoordinator, BookmarkWatchCycle,
    ForegroundWatcher, JobConstraints, SchedulingError, WatchMode,
};

// ============================================================================
// Helpers
// ============================================================================

async fn bookmarks_with_db() -> (Arc<BookmarkRegistry>, Database) {
    let db = Database::open(":memory:").await.unwrap();
    let bookmarks = Arc::new(BookmarkRegistry::new(db.clone()));
    bookmarks.initialize().await.unwrap();
    (bookmarks, db)
}

async fn bookmark_thread(bookmarks: &BookmarkRegistry, db: &Database, thread: &ThreadDescriptor) {
    db.create_empty_thread_if_not_exists(thread).await.unwrap();
    bookmarks
        .create_bookmarks(vec![ThreadBookmark::new(thread.clone())])
        .await
        .unwrap();
}

fn watch_cycle(server: &MockServer, bookmarks: &Arc<BookmarkRegistry>) -> BookmarkWatchCycle {
    let sites = Arc::new(SiteRegistry::new());
    sites
        .initialize(&[SiteConfig {
            name: "4chan".to_string(),
            api_base: server.uri(),
            media_base: server.uri(),
        }])
        .unwrap();
    let fetcher = ChanFetcher::new(FetchSettings::default()).unwrap();
    BookmarkWatchCycle::new(Arc::clone(bookmarks), sites, fetcher)
}

async fn mount_thread(server: &MockServer, board: &str, op_no: u64, posts: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{board}/thread/{op_no}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "posts": posts })))
        .mount(server)
        .await;
}

// ============================================================================
// Watch cycle
// ============================================================================

#[tokio::test]
async fn test_cycle_fills_bookmark_and_counts_new_replies() {
    let server = MockServer::start().await;
    let (bookmarks, db) = bookmarks_with_db().await;
    let thread = ThreadDescriptor::create("4chan", "g", 100);
    bookmark_thread(&bookmarks, &db, &thread).await;
    let cycle = watch_cycle(&server, &bookmarks);

    mount_thread(
        &server,
        "g",
        100,
        json!([
            { "no": 100, "sub": "Desktop thread", "com": "post them", "tim": 42,
              "bumplimit": 0, "unique_ips": 3 },
            { "no": 101, "com": "first" }
        ]),
    )
    .await;

    let first = cycle.run().await;
    assert_eq!(first.checked, 1);
    // The first load only establishes the baseline
    assert_eq!(first.new_replies, 0);
    assert_eq!(first.active_remaining, 1);

    let loaded = bookmarks
        .map_bookmark(&thread, |b| b.clone())
        .await
        .unwrap();
    assert_eq!(loaded.title.as_deref(), Some("Desktop thread"));
    assert_eq!(
        loaded.thumbnail_url,
        Some(format!("{}/g/42s.jpg", server.uri()))
    );
    assert_eq!(loaded.last_loaded_post, Some(101));
    assert_eq!(loaded.total_posts_count, 2);
    assert_eq!(
        bookmarks.extra_info(&thread).await,
        Some(ThreadExtraInfo {
            bump_limit_reached: Some(false),
            unique_posters: Some(3),
        })
    );

    server.reset().await;
    mount_thread(
        &server,
        "g",
        100,
        json!([
            { "no": 100, "sub": "Desktop thread", "com": "post them" },
            { "no": 101, "com": "first" },
            { "no": 102, "com": "second" },
            { "no": 103, "com": "third" }
        ]),
    )
    .await;

    let second = cycle.run().await;
    assert_eq!(second.new_replies, 2);
    let total = bookmarks
        .map_bookmark(&thread, |b| b.total_posts_count)
        .await;
    assert_eq!(total, Some(4));
}

#[tokio::test]
async fn test_cycle_marks_missing_thread_dead() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/g/thread/200.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let (bookmarks, db) = bookmarks_with_db().await;
    let thread = ThreadDescriptor::create("4chan", "g", 200);
    bookmark_thread(&bookmarks, &db, &thread).await;

    let outcome = watch_cycle(&server, &bookmarks).run().await;

    assert_eq!(outcome.deactivated, 1);
    assert_eq!(outcome.active_remaining, 0);
    let (dead, active) = bookmarks
        .map_bookmark(&thread, |b| (b.is_dead, b.is_active))
        .await
        .unwrap();
    assert!(dead);
    assert!(!active);
    assert!(!bookmarks.has_active_bookmarks().await);
}

#[tokio::test]
async fn test_cycle_deactivates_closed_thread() {
    let server = MockServer::start().await;
    mount_thread(
        &server,
        "ck",
        300,
        json!([{ "no": 300, "sub": "Closed", "closed": 1 }]),
    )
    .await;
    let (bookmarks, db) = bookmarks_with_db().await;
    let thread = ThreadDescriptor::create("4chan", "ck", 300);
    bookmark_thread(&bookmarks, &db, &thread).await;

    let outcome = watch_cycle(&server, &bookmarks).run().await;

    assert_eq!(outcome.deactivated, 1);
    let (dead, active) = bookmarks
        .map_bookmark(&thread, |b| (b.is_dead, b.is_active))
        .await
        .unwrap();
    assert!(!dead);
    assert!(!active);
}

#[tokio::test]
async fn test_cycle_keeps_bookmark_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/g/thread/400.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let (bookmarks, db) = bookmarks_with_db().await;
    let thread = ThreadDescriptor::create("4chan", "g", 400);
    bookmark_thread(&bookmarks, &db, &thread).await;

    let outcome = watch_cycle(&server, &bookmarks).run().await;

    assert_eq!(outcome.checked, 0);
    assert_eq!(outcome.deactivated, 0);
    assert_eq!(outcome.active_remaining, 1);
}

#[tokio::test]
async fn test_cycle_waits_for_bookmarks_to_load() {
    let server = MockServer::start().await;
    let (writer, db) = bookmarks_with_db().await;
    let thread = ThreadDescriptor::create("4chan", "g", 100);
    bookmark_thread(&writer, &db, &thread).await;
    mount_thread(&server, "g", 100, json!([{ "no": 100, "com": "op" }])).await;

    // A fresh registry over the same database, not loaded yet
    let bookmarks = Arc::new(BookmarkRegistry::new(db.clone()));
    let cycle = Arc::new(watch_cycle(&server, &bookmarks));
    let pass = {
        let cycle = Arc::clone(&cycle);
        tokio::spawn(async move { cycle.run().await })
    };
    tokio::task::yield_now().await;
    assert!(!pass.is_finished());

    bookmarks.initialize().await.unwrap();
    let outcome = pass.await.unwrap();
    assert_eq!(outcome.checked, 1);
    assert_eq!(outcome.active_remaining, 1);
}

// ============================================================================
// Coordinator
// ============================================================================

/// Records every call the coordinator makes.
#[derive(Default)]
struct RecordingForeground {
    watching: Mutex<bool>,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingForeground {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl ForegroundWatcher for RecordingForeground {
    fn is_watching(&self) -> bool {
        self.calls.lock().push("is_watching");
        *self.watching.lock()
    }

    fn start_watching(&self) {
        self.calls.lock().push("start");
        *self.watching.lock() = true;
    }

    fn restart_watching(&self) {
        self.calls.lock().push("restart");
        *self.watching.lock() = true;
    }

    fn stop_watching(&self) {
        self.calls.lock().push("stop");
        *self.watching.lock() = false;
    }
}

#[derive(Default)]
struct MapScheduler {
    pending: Mutex<HashMap<String, Duration>>,
}

#[async_trait]
impl BackgroundJobScheduler for MapScheduler {
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
    foreground: Arc<RecordingForeground>,
    scheduler: Arc<MapScheduler>,
    settings: watch::Sender<WatchSettings>,
    visibility: watch::Sender<AppVisibility>,
}

/// Coordinator over an uninitialized bookmark registry, so the
/// `Initialized` event is part of the first burst.
async fn harness(window: Duration) -> Harness {
    let db = Database::open(":memory:").await.unwrap();
    let bookmarks = Arc::new(BookmarkRegistry::new(db.clone()));
    let (settings, settings_rx) = watch::channel(WatchSettings::default());
    let (visibility, visibility_rx) = watch::channel(AppVisibility::Foreground);
    let foreground = Arc::new(RecordingForeground::default());
    let scheduler = Arc::new(MapScheduler::default());

    let coordinator = Arc::new(
        BookmarkWatchCoordinator::new(
            Arc::clone(&bookmarks),
            settings_rx,
            visibility_rx,
            foreground.clone(),
            scheduler.clone(),
            "test_background_bookmark_watcher",
        )
        .with_debounce_window(window),
    );

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

/// Debounce window for the coordinator tests. Database writes run on the
/// real clock and finish well inside it; the window itself is only ever
/// elapsed on a paused clock.
const WINDOW: Duration = Duration::from_secs(10);

/// Let the debounce window run out on a paused clock.
///
/// sqlx's SQLite worker threads make the runtime look idle, so the clock is
/// resumed again before the next database write.
async fn elapse_window() {
    tokio::time::pause();
    tokio::time::sleep(WINDOW * 2).await;
    tokio::time::resume();
}

#[tokio::test]
async fn test_burst_with_creations_yields_one_restart() {
    let h = harness(WINDOW).await;
    h.coordinator.initialize().unwrap();

    h.bookmarks.initialize().await.unwrap();
    for op_no in 1..=3 {
        bookmark_thread(
            &h.bookmarks,
            &h.db,
            &ThreadDescriptor::create("4chan", "g", op_no),
        )
        .await;
    }
    elapse_window().await;

    assert_eq!(h.coordinator.mode(), WatchMode::ForegroundWatching);
    assert_eq!(h.foreground.calls(), vec!["restart"]);

    // A burst without creations only makes sure the watcher runs
    h.bookmarks
        .delete_bookmarks(&[ThreadDescriptor::create("4chan", "g", 1)])
        .await
        .unwrap();
    elapse_window().await;
    assert_eq!(h.foreground.calls(), vec!["restart", "is_watching"]);
}

#[tokio::test]
async fn test_updates_alone_do_not_trigger() {
    let h = harness(WINDOW).await;
    h.bookmarks.initialize().await.unwrap();
    let thread = ThreadDescriptor::create("4chan", "g", 1);
    bookmark_thread(&h.bookmarks, &h.db, &thread).await;
    h.coordinator.initialize().unwrap();

    h.bookmarks
        .update_bookmarks(
            &[thread],
            chanwatch::model::NotifyOption::Notify,
            |b| b.total_posts_count += 1,
        )
        .await
        .unwrap();
    elapse_window().await;

    assert!(h.foreground.calls().is_empty());
    assert_eq!(h.coordinator.mode(), WatchMode::Idle);
}

#[tokio::test]
async fn test_irrelevant_setting_change_ignored() {
    let h = harness(WINDOW).await;
    h.bookmarks.initialize().await.unwrap();
    h.coordinator.initialize().unwrap();

    h.settings
        .send_modify(|s| s.foreground_interval = Duration::from_secs(99));
    elapse_window().await;
    assert!(h.foreground.calls().is_empty());

    h.settings.send_modify(|s| s.enabled = false);
    elapse_window().await;
    assert_eq!(h.foreground.calls(), vec!["stop"]);
}

#[tokio::test]
async fn test_going_to_background_flushes_immediately() {
    let h = harness(WINDOW).await;
    h.settings.send_modify(|s| s.in_background = true);
    h.bookmarks.initialize().await.unwrap();
    bookmark_thread(
        &h.bookmarks,
        &h.db,
        &ThreadDescriptor::create("4chan", "g", 1),
    )
    .await;
    let mut mode = h.coordinator.subscribe_mode();
    h.coordinator.initialize().unwrap();

    tokio::time::pause();
    let start = tokio::time::Instant::now();
    h.visibility.send_replace(AppVisibility::Background);

    mode.changed().await.unwrap();
    assert!(start.elapsed() < WINDOW);
    tokio::time::resume();

    assert_eq!(*mode.borrow(), WatchMode::BackgroundScheduled);
    assert_eq!(
        h.scheduler
            .pending
            .lock()
            .get("test_background_bookmark_watcher")
            .copied(),
        Some(WatchSettings::default().background_interval)
    );
    assert_eq!(h.foreground.calls(), vec!["stop"]);
}

#[tokio::test]
async fn test_decide_is_idempotent() {
    let h = harness(Duration::from_millis(200)).await;
    h.settings.send_modify(|s| s.in_background = true);
    h.visibility.send_replace(AppVisibility::Background);
    h.bookmarks.initialize().await.unwrap();
    bookmark_thread(
        &h.bookmarks,
        &h.db,
        &ThreadDescriptor::create("4chan", "g", 1),
    )
    .await;

    let first = h.coordinator.decide(false).await.unwrap();
    let pending_after_first = h.scheduler.pending.lock().clone();
    let second = h.coordinator.decide(false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(*h.scheduler.pending.lock(), pending_after_first);
    assert_eq!(pending_after_first.len(), 1);
}
