use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

use crate::fetch::ChanFetcher;
use crate::model::{
    BoardDescriptor, CatalogThread, ChanFilter, FilterScope, FilterWatchCatalogInfoObject,
    NotifyOption, ThreadBookmark, ThreadDescriptor,
};
use crate::registry::{
    BoardRegistry, BookmarkRegistry, FilterRegistry, RegistryError, SiteRegistry,
};
use crate::site;
use crate::storage::PersistenceGateway;
use crate::util::batch_size;

#[derive(Debug, Error)]
pub enum FilterWatchError {
    /// A registry has not finished loading its persisted state.
    #[error("{0} registry is not initialized")]
    NotInitialized(&'static str),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A catalog thread that matched a watch filter.
#[derive(Debug, Clone)]
struct FilterMatch {
    descriptor: ThreadDescriptor,
    title: String,
    thumbnail_url: Option<String>,
    filter_id: Option<i64>,
}

/// Scans the catalogs of watched boards and bookmarks threads that match an
/// enabled watch filter.
///
/// Fetch and decode failures of single boards are logged and skipped, so one
/// unreachable board never prevents bookmarks from the others.
pub struct FilterMatchUseCase {
    boards: Arc<BoardRegistry>,
    bookmarks: Arc<BookmarkRegistry>,
    filters: Arc<FilterRegistry>,
    sites: Arc<SiteRegistry>,
    persistence: Arc<dyn PersistenceGateway>,
    fetcher: ChanFetcher,
    batch_size: usize,
}

impl FilterMatchUseCase {
    pub fn new(
        boards: Arc<BoardRegistry>,
        bookmarks: Arc<BookmarkRegistry>,
        filters: Arc<FilterRegistry>,
        sites: Arc<SiteRegistry>,
        persistence: Arc<dyn PersistenceGateway>,
        fetcher: ChanFetcher,
    ) -> Self {
        Self {
            boards,
            bookmarks,
            filters,
            sites,
            persistence,
            fetcher,
            batch_size: batch_size(),
        }
    }

    /// Run one filter-watch pass.
    ///
    /// # Errors
    ///
    /// - [`FilterWatchError::NotInitialized`] - a registry is not ready yet
    /// - [`FilterWatchError::Registry`] - bookmarks could not be written
    pub async fn execute(&self) -> Result<(), FilterWatchError> {
        self.ensure_registries_ready()?;

        let filters = self.filters.get_enabled_watch_filters();
        if filters.is_empty() {
            tracing::debug!("No enabled watch filters");
            return Ok(());
        }

        let boards = self.boards_to_scan(&filters);
        if boards.is_empty() {
            tracing::debug!("No active boards to scan");
            return Ok(());
        }

        let board_count = boards.len();
        let catalogs = self.fetch_catalogs(boards).await;
        let matches = self.match_catalogs(catalogs, filters).await;
        tracing::info!(
            boards = board_count,
            matched = matches.len(),
            "Filter watch scan finished"
        );

        self.apply_matches(matches).await
    }

    fn ensure_registries_ready(&self) -> Result<(), FilterWatchError> {
        let checks = [
            ("board", self.boards.is_ready()),
            ("bookmark", self.bookmarks.is_ready()),
            ("filter", self.filters.is_ready()),
            ("site", self.sites.is_ready()),
        ];
        match checks.iter().find(|(_, ready)| !ready) {
            Some((name, _)) => Err(FilterWatchError::NotInitialized(*name)),
            None => Ok(()),
        }
    }

    /// Active boards named by board-scoped filters, plus every active board
    /// if any filter applies to all boards.
    fn boards_to_scan(&self, filters: &[Arc<ChanFilter>]) -> BTreeSet<BoardDescriptor> {
        let mut explicit = BTreeSet::new();
        let mut any_all = false;
        for filter in filters {
            match &filter.filter.scope {
                FilterScope::All => any_all = true,
                FilterScope::Boards(boards) => explicit.extend(boards.iter().cloned()),
            }
        }

        let mut boards = BTreeSet::new();
        if any_all {
            self.boards
                .view_all_active(None, |board| {
                    boards.insert(board.descriptor.clone());
                });
        } else {
            self.boards.view_all_active(Some(&explicit), |board| {
                boards.insert(board.descriptor.clone());
            });
        }
        boards
    }

    async fn fetch_catalogs(
        &self,
        boards: BTreeSet<BoardDescriptor>,
    ) -> Vec<FilterWatchCatalogInfoObject> {
        stream::iter(boards)
            .map(|board| async move {
                let Some(site) = self.sites.by_descriptor(&board.site) else {
                    tracing::warn!(board = %board, "No site registered for board");
                    return None;
                };
                match site::load_catalog(site.as_ref(), &self.fetcher, &board).await {
                    Ok(catalog) => Some(catalog),
                    Err(e) => {
                        tracing::warn!(board = %board, error = %e, "Failed to load catalog");
                        None
                    }
                }
            })
            .buffer_unordered(self.batch_size)
            .filter_map(|catalog| async move { catalog })
            .collect()
            .await
    }

    async fn match_catalogs(
        &self,
        catalogs: Vec<FilterWatchCatalogInfoObject>,
        filters: Vec<Arc<ChanFilter>>,
    ) -> Vec<FilterMatch> {
        let filters = Arc::new(filters);

        let per_catalog: Vec<Vec<FilterMatch>> = stream::iter(catalogs)
            .map(|catalog| {
                let filters = Arc::clone(&filters);
                async move {
                    let board = catalog.board.clone();
                    // Regex matching and comment cleaning are CPU-bound
                    match tokio::task::spawn_blocking(move || match_catalog(&catalog, &filters))
                        .await
                    {
                        Ok(matches) => matches,
                        Err(e) => {
                            tracing::warn!(board = %board, error = %e, "Catalog matching failed");
                            Vec::new()
                        }
                    }
                }
            })
            .buffer_unordered(self.batch_size)
            .collect()
            .await;

        per_catalog.into_iter().flatten().collect()
    }

    async fn apply_matches(&self, matches: Vec<FilterMatch>) -> Result<(), FilterWatchError> {
        let mut to_create = Vec::new();
        let mut to_upgrade = Vec::new();

        for found in matches {
            let existing = self
                .bookmarks
                .map_bookmark(&found.descriptor, |bookmark| bookmark.is_filter_watch)
                .await;

            match existing {
                Some(true) => {}
                Some(false) => to_upgrade.push(found.descriptor),
                None => {
                    match self
                        .persistence
                        .create_empty_thread_if_not_exists(&found.descriptor)
                        .await
                    {
                        Ok(true) => {
                            tracing::debug!(
                                thread = %found.descriptor,
                                filter_id = ?found.filter_id,
                                "Filter matched new thread"
                            );
                            to_create.push(ThreadBookmark::filter_watched(
                                found.descriptor,
                                found.title,
                                found.thumbnail_url,
                            ));
                        }
                        Ok(false) => {
                            tracing::info!(
                                thread = %found.descriptor,
                                "Thread row could not be confirmed, skipping bookmark"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                thread = %found.descriptor,
                                error = %e,
                                "Failed to persist thread, skipping bookmark"
                            );
                        }
                    }
                }
            }
        }

        if !to_create.is_empty() {
            let created = self.bookmarks.create_bookmarks(to_create).await?;
            tracing::info!(created = created.len(), "Filter watch bookmarks created");
        }

        if !to_upgrade.is_empty() {
            let upgraded = self
                .bookmarks
                .update_bookmarks(&to_upgrade, NotifyOption::Notify, |bookmark| {
                    bookmark.is_filter_watch = true;
                })
                .await?;
            tracing::info!(upgraded = upgraded.len(), "Existing bookmarks marked filter-watched");
        }

        Ok(())
    }
}

/// Test every thread of `catalog` against the filters that apply to its
/// board; the first matching filter wins.
fn match_catalog(
    catalog: &FilterWatchCatalogInfoObject,
    filters: &[Arc<ChanFilter>],
) -> Vec<FilterMatch> {
    let applicable: Vec<&ChanFilter> = filters
        .iter()
        .filter(|filter| filter.applies_to_board(&catalog.board))
        .map(Arc::as_ref)
        .collect();
    if applicable.is_empty() {
        return Vec::new();
    }

    catalog
        .threads
        .iter()
        .filter_map(|thread| {
            let filter = applicable
                .iter()
                .find(|filter| filter.matches_thread(thread))?;
            Some(FilterMatch {
                descriptor: thread.descriptor.clone(),
                title: bookmark_title(thread),
                thumbnail_url: thread.thumbnail_url.clone(),
                filter_id: filter.filter.id,
            })
        })
        .collect()
}

fn bookmark_title(thread: &CatalogThread) -> String {
    ThreadBookmark::derive_title(
        thread.subject.as_deref(),
        thread.comment(),
        &thread.descriptor,
    )
}
