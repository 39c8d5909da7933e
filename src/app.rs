use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::fetch::{ChanFetcher, FetchSettings};
use crate::loader::{ListenerId, LoadState, LoadedContent, LoaderCache, SiteContentSource};
use crate::model::{ContentDescriptor, ThreadBookmark, ThreadDescriptor, ThreadSnapshot};
use crate::preferences::PreferenceManager;
use crate::registry::{BoardRegistry, BookmarkRegistry, FilterRegistry, SiteRegistry};
use crate::storage::{Database, DatabaseError, PersistenceGateway};
use crate::usecase::FilterMatchUseCase;
use crate::watcher::{
    AlwaysOnline, AppVisibility, AppVisibilityObserver, BackgroundWatchJob, BookmarkWatchCoordinator,
    BookmarkWatchCycle, ConnectivityProbe, ForegroundBookmarkWatcher, ForegroundWatcher,
    HttpConnectivityProbe, TokioJobScheduler,
};

// ============================================================================
// App
// ============================================================================

/// Every long-lived service, wired once at startup.
///
/// Construction only builds the object graph. Registries load their
/// persisted state in [`App::initialize`]; watching begins with
/// [`App::start_watching`].
pub struct App {
    pub config: Config,
    pub db: Database,
    pub preferences: Arc<PreferenceManager>,
    pub fetcher: ChanFetcher,
    pub sites: Arc<SiteRegistry>,
    pub boards: Arc<BoardRegistry>,
    pub bookmarks: Arc<BookmarkRegistry>,
    pub filters: Arc<FilterRegistry>,
    pub visibility: AppVisibilityObserver,
    pub scheduler: TokioJobScheduler,
    pub coordinator: Arc<BookmarkWatchCoordinator>,
    pub filter_match: Arc<FilterMatchUseCase>,
    foreground: Arc<ForegroundBookmarkWatcher>,
    loaders: Mutex<LoaderCache>,
}

impl App {
    /// Open the database at the configured location and wire the services.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` (wrapped) if another process
    /// holds the database, or any error from building the HTTP client.
    pub async fn open(config: Config) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory '{}'", parent.display())
            })?;
        }
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

        let db = match Database::open(db_path_str).await {
            Ok(db) => db,
            Err(e @ DatabaseError::InstanceLocked) => return Err(e.into()),
            Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
        };

        Self::with_database(config, db).await
    }

    /// Wire the services on top of an already opened database.
    pub async fn with_database(config: Config, db: Database) -> Result<Self> {
        let preferences = Arc::new(
            PreferenceManager::load(&config, db.clone())
                .await
                .context("Failed to load preferences")?,
        );

        let fetch_settings = FetchSettings::from(&config.network);
        let fetcher =
            ChanFetcher::new(fetch_settings.clone()).context("Failed to build HTTP client")?;

        let sites = Arc::new(SiteRegistry::new());
        sites
            .initialize(&config.sites)
            .context("Failed to register sites")?;

        let boards = Arc::new(BoardRegistry::new(db.clone()));
        let bookmarks = Arc::new(BookmarkRegistry::new(db.clone()));
        let filters = Arc::new(FilterRegistry::new(db.clone()));
        let visibility = AppVisibilityObserver::new(AppVisibility::Foreground);

        let probe: Arc<dyn ConnectivityProbe> = match config.sites.first() {
            Some(site) => {
                let client = reqwest::Client::builder()
                    .user_agent(fetch_settings.user_agent.as_str())
                    .build()
                    .context("Failed to build connectivity probe client")?;
                Arc::new(HttpConnectivityProbe::new(client, site.api_base.clone()))
            }
            None => Arc::new(AlwaysOnline),
        };
        let scheduler = TokioJobScheduler::new(probe);

        let cycle = Arc::new(BookmarkWatchCycle::new(
            Arc::clone(&bookmarks),
            Arc::clone(&sites),
            fetcher.clone(),
        ));

        let tag = config.background_watch_tag();
        scheduler.register(
            tag.clone(),
            Arc::new(BackgroundWatchJob::new(
                Arc::clone(&cycle),
                Arc::clone(&bookmarks),
                preferences.subscribe(),
                visibility.subscribe(),
                tag.clone(),
            )),
        );

        let foreground = Arc::new(ForegroundBookmarkWatcher::new(
            cycle,
            preferences.subscribe(),
        ));
        let coordinator = Arc::new(BookmarkWatchCoordinator::new(
            Arc::clone(&bookmarks),
            preferences.subscribe(),
            visibility.subscribe(),
            foreground.clone(),
            Arc::new(scheduler.clone()),
            tag,
        ));

        let persistence: Arc<dyn PersistenceGateway> = Arc::new(db.clone());
        let filter_match = Arc::new(FilterMatchUseCase::new(
            Arc::clone(&boards),
            Arc::clone(&bookmarks),
            Arc::clone(&filters),
            Arc::clone(&sites),
            persistence,
            fetcher.clone(),
        ));

        let loaders = Mutex::new(LoaderCache::new(Arc::new(SiteContentSource::new(
            Arc::clone(&sites),
            fetcher.clone(),
        ))));

        Ok(Self {
            config,
            db,
            preferences,
            fetcher,
            sites,
            boards,
            bookmarks,
            filters,
            visibility,
            scheduler,
            coordinator,
            filter_match,
            foreground,
            loaders,
        })
    }

    /// Load persisted boards, filters and bookmarks.
    pub async fn initialize(&self) -> Result<()> {
        self.boards.initialize().await?;
        self.filters.initialize().await?;
        self.bookmarks.initialize().await?;

        let bookmarks = self.bookmarks.bookmarks_snapshot().await.len();
        tracing::info!(
            boards = self.boards.all_boards().len(),
            bookmarks,
            "Registries initialized"
        );
        Ok(())
    }

    /// Start the coordinator, then load the registries.
    ///
    /// The coordinator subscribes first so the bookmark registry's
    /// `Initialized` event triggers the first decision.
    pub async fn start_watching(&self) -> Result<JoinHandle<()>> {
        let handle = self.coordinator.initialize()?;
        self.initialize().await?;
        Ok(handle)
    }

    /// Run the filter watch periodically, if an interval is configured.
    ///
    /// The first pass waits until boards, filters and bookmarks are loaded,
    /// so the task may be spawned before [`App::initialize`] runs.
    pub fn spawn_filter_watch(&self) -> Option<JoinHandle<()>> {
        let period = self.preferences.watch_settings().filter_watch_interval?;
        let filter_match = Arc::clone(&self.filter_match);
        let boards = Arc::clone(&self.boards);
        let filters = Arc::clone(&self.filters);
        let bookmarks = Arc::clone(&self.bookmarks);

        tracing::info!(interval_secs = period.as_secs(), "Periodic filter watch enabled");
        Some(tokio::spawn(async move {
            let ready = async {
                boards.await_initialized().await?;
                filters.await_initialized().await?;
                bookmarks.await_initialized().await
            }
            .await;
            if let Err(e) = ready {
                tracing::warn!(error = %e, "Registries unavailable, periodic filter watch disabled");
                return;
            }

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = filter_match.execute().await {
                    tracing::warn!(error = %e, "Filter watch failed");
                }
            }
        }))
    }

    /// Run one filter watch pass and return the bookmarks it created.
    ///
    /// Bookmarks that only gained the filter-watch flag are not included.
    pub async fn run_filter_watch(&self) -> Result<Vec<ThreadBookmark>> {
        let before: HashSet<ThreadDescriptor> = self
            .bookmarks
            .bookmarks_snapshot()
            .await
            .into_iter()
            .map(|bookmark| bookmark.descriptor)
            .collect();

        self.filter_match.execute().await?;

        Ok(self
            .bookmarks
            .bookmarks_snapshot()
            .await
            .into_iter()
            .filter(|bookmark| !before.contains(&bookmark.descriptor))
            .collect())
    }

    /// Fetch a thread through the loader cache.
    ///
    /// The loader stays cached after release, so a later call for the same
    /// thread reuses it.
    pub async fn load_thread(&self, thread: &ThreadDescriptor) -> Result<ThreadSnapshot> {
        let listener = ListenerId::next();
        let loader = self
            .loaders
            .lock()
            .await
            .obtain(ContentDescriptor::Thread(thread.clone()), listener);

        loader.load().join().await;
        let state = loader.state();
        self.loaders.lock().await.release(&loader, listener);

        match state {
            LoadState::Loaded(content) => match content.as_ref() {
                LoadedContent::Thread(snapshot) => Ok(snapshot.clone()),
                LoadedContent::Catalog(_) => Err(anyhow::anyhow!("Expected a thread for {thread}")),
            },
            LoadState::Error(e) => Err(anyhow::anyhow!("{e:#}")),
            LoadState::Idle | LoadState::Loading => {
                Err(anyhow::anyhow!("Load of {thread} did not finish"))
            }
        }
    }

    /// Bookmark a thread, filling title and thumbnail from its first post.
    ///
    /// A thread that cannot be fetched is still bookmarked without a title;
    /// the watcher fills it in later. Returns `false` if it was already
    /// bookmarked.
    pub async fn add_bookmark(&self, thread: ThreadDescriptor) -> Result<bool> {
        if !self.db.create_empty_thread_if_not_exists(&thread).await? {
            anyhow::bail!("Could not create a thread row for {thread}");
        }

        let mut bookmark = ThreadBookmark::new(thread.clone());
        match self.load_thread(&thread).await {
            Ok(snapshot) => {
                if let Some(op) = snapshot.original_post() {
                    bookmark.title = Some(ThreadBookmark::derive_title(
                        op.subject.as_deref(),
                        &op.comment,
                        &thread,
                    ));
                    bookmark.thumbnail_url = op.thumbnail_url.clone();
                }
                bookmark.last_loaded_post = snapshot.last_post_no();
            }
            Err(e) => {
                tracing::warn!(thread = %thread, error = %e, "Could not fetch thread, bookmarking without title");
            }
        }

        let created = self.bookmarks.create_bookmarks(vec![bookmark]).await?;
        Ok(!created.is_empty())
    }

    /// Stop every watcher and pending job.
    pub fn shutdown(&self) {
        self.foreground.stop_watching();
        self.scheduler.shutdown();
    }
}
