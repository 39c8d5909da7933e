use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::fetch::ChanFetcher;
use crate::model::{NotifyOption, ThreadBookmark, ThreadDescriptor, ThreadExtraInfo, ThreadSnapshot};
use crate::registry::{BookmarkRegistry, SiteRegistry};
use crate::site::{self, LoadError};
use crate::util::batch_size;

/// Result of one pass over the active bookmarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Threads fetched successfully.
    pub checked: usize,
    /// Replies that appeared since the previous pass.
    pub new_replies: usize,
    /// Bookmarks deactivated because their thread ended or disappeared.
    pub deactivated: usize,
    /// Bookmarks still watchable after the pass.
    pub active_remaining: usize,
}

/// Fetches every active bookmarked thread once and records what changed.
///
/// Shared by the foreground watcher and the background job.
pub struct BookmarkWatchCycle {
    bookmarks: Arc<BookmarkRegistry>,
    sites: Arc<SiteRegistry>,
    fetcher: ChanFetcher,
    batch_size: usize,
}

impl BookmarkWatchCycle {
    pub fn new(bookmarks: Arc<BookmarkRegistry>, sites: Arc<SiteRegistry>, fetcher: ChanFetcher) -> Self {
        Self {
            bookmarks,
            sites,
            fetcher,
            batch_size: batch_size(),
        }
    }

    /// Run one pass.
    ///
    /// A job firing right after startup may beat the bookmark registry's
    /// initial load, so the pass first waits for the registry to be ready.
    /// If that load failed, the pass does nothing.
    pub async fn run(&self) -> CycleOutcome {
        if let Err(e) = self.bookmarks.await_initialized().await {
            tracing::warn!(error = %e, "Bookmarks unavailable, skipping watch cycle");
            return CycleOutcome::default();
        }

        let active = self.bookmarks.active_bookmark_descriptors().await;
        let mut outcome = CycleOutcome::default();

        let results: Vec<(ThreadDescriptor, Result<ThreadSnapshot, LoadError>)> =
            stream::iter(active)
                .map(|thread| async move {
                    let result = self.fetch(&thread).await;
                    (thread, result)
                })
                .buffer_unordered(self.batch_size)
                .collect()
                .await;

        for (thread, result) in results {
            match result {
                Ok(snapshot) => {
                    outcome.checked += 1;
                    match self.apply_snapshot(&snapshot).await {
                        Ok((new_replies, deactivated)) => {
                            outcome.new_replies += new_replies;
                            outcome.deactivated += usize::from(deactivated);
                        }
                        Err(e) => {
                            tracing::warn!(thread = %thread, error = %e, "Failed to update bookmark");
                        }
                    }
                }
                Err(e) if e.is_not_found() => {
                    tracing::info!(thread = %thread, "Thread is gone, deactivating bookmark");
                    let marked = self
                        .bookmarks
                        .update_bookmarks(&[thread.clone()], NotifyOption::Notify, |bookmark| {
                            bookmark.is_dead = true;
                            bookmark.is_active = false;
                        })
                        .await;
                    match marked {
                        Ok(updated) => outcome.deactivated += updated.len(),
                        Err(e) => {
                            tracing::warn!(thread = %thread, error = %e, "Failed to mark bookmark dead");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(thread = %thread, error = %e, "Failed to fetch watched thread");
                }
            }
        }

        outcome.active_remaining = self.bookmarks.active_bookmark_descriptors().await.len();
        tracing::debug!(
            checked = outcome.checked,
            new_replies = outcome.new_replies,
            deactivated = outcome.deactivated,
            active = outcome.active_remaining,
            "Bookmark watch cycle finished"
        );
        outcome
    }

    async fn fetch(&self, thread: &ThreadDescriptor) -> Result<ThreadSnapshot, LoadError> {
        let Some(site) = self.sites.by_descriptor(thread.site()) else {
            return Err(LoadError::UnknownSite(thread.site().clone()));
        };
        site::load_thread(site.as_ref(), &self.fetcher, thread).await
    }

    /// Record a fetched thread. Returns the number of new replies and
    /// whether the bookmark was deactivated.
    async fn apply_snapshot(
        &self,
        snapshot: &ThreadSnapshot,
    ) -> Result<(usize, bool), crate::registry::RegistryError> {
        let thread = &snapshot.descriptor;
        let last_post = snapshot.last_post_no();
        let total_posts = u32::try_from(snapshot.posts.len()).unwrap_or(u32::MAX);
        let finished = snapshot.is_finished();
        let op = snapshot.original_post();

        let mut new_replies = 0;
        let mut deactivated = false;
        self.bookmarks
            .update_bookmarks(&[thread.clone()], NotifyOption::Notify, |bookmark| {
                if let (Some(previous), Some(_)) = (bookmark.last_loaded_post, last_post) {
                    new_replies = snapshot
                        .posts
                        .iter()
                        .filter(|post| post.no > previous)
                        .count();
                }
                bookmark.last_loaded_post = last_post.or(bookmark.last_loaded_post);
                bookmark.total_posts_count = total_posts;

                if let Some(op) = op {
                    if bookmark.title.is_none() {
                        bookmark.title = Some(ThreadBookmark::derive_title(
                            op.subject.as_deref(),
                            &op.comment,
                            thread,
                        ));
                    }
                    if bookmark.thumbnail_url.is_none() {
                        bookmark.thumbnail_url = op.thumbnail_url.clone();
                    }
                }

                if finished && bookmark.is_active {
                    bookmark.is_active = false;
                    deactivated = true;
                }
            })
            .await?;

        if finished {
            tracing::info!(
                thread = %thread,
                closed = snapshot.closed,
                archived = snapshot.archived,
                "Thread ended, bookmark deactivated"
            );
        }

        self.bookmarks
            .update_extra_info(
                thread,
                ThreadExtraInfo {
                    bump_limit_reached: snapshot.bump_limit_reached,
                    unique_posters: snapshot.unique_posters,
                },
            )
            .await?;

        Ok((new_replies, deactivated))
    }
}
