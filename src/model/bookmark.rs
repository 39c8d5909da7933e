use chrono::{DateTime, Utc};

use super::descriptor::ThreadDescriptor;
use crate::util::truncate_chars;

/// Longest bookmark title derived from a thread comment.
pub const MAX_TITLE_CHARS: usize = 200;

/// A watched thread.
///
/// Bookmarks are owned by [`BookmarkRegistry`](crate::registry::BookmarkRegistry);
/// everything else reads copies and requests mutations through the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadBookmark {
    pub descriptor: ThreadDescriptor,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Watched by the foreground/background watcher.
    pub is_active: bool,
    /// Created (or adopted) by a watch filter.
    pub is_filter_watch: bool,
    /// Set once the thread returned 404; such bookmarks are never watched again.
    pub is_dead: bool,
    /// Highest post number the user has seen.
    pub last_viewed_post: Option<u64>,
    /// Highest post number the watcher has fetched.
    pub last_loaded_post: Option<u64>,
    pub seen_posts_count: u32,
    pub total_posts_count: u32,
    pub created_on: DateTime<Utc>,
}

impl ThreadBookmark {
    pub fn new(descriptor: ThreadDescriptor) -> Self {
        Self {
            descriptor,
            title: None,
            thumbnail_url: None,
            is_active: true,
            is_filter_watch: false,
            is_dead: false,
            last_viewed_post: None,
            last_loaded_post: None,
            seen_posts_count: 0,
            total_posts_count: 0,
            created_on: Utc::now(),
        }
    }

    /// Bookmark created by the filter watcher for a matched catalog thread.
    pub fn filter_watched(
        descriptor: ThreadDescriptor,
        title: String,
        thumbnail_url: Option<String>,
    ) -> Self {
        Self {
            title: Some(title),
            thumbnail_url,
            is_filter_watch: true,
            ..Self::new(descriptor)
        }
    }

    /// Whether the watcher should poll this thread.
    pub fn is_watchable(&self) -> bool {
        self.is_active && !self.is_dead
    }

    pub fn unseen_posts_count(&self) -> u32 {
        self.total_posts_count.saturating_sub(self.seen_posts_count)
    }

    /// Title for a thread: its subject, else its comment truncated to
    /// [`MAX_TITLE_CHARS`], else `/board/no`.
    pub fn derive_title(
        subject: Option<&str>,
        comment: &str,
        descriptor: &ThreadDescriptor,
    ) -> String {
        if let Some(subject) = subject.map(str::trim).filter(|s| !s.is_empty()) {
            return subject.to_string();
        }

        let comment = comment.trim();
        if !comment.is_empty() {
            return truncate_chars(comment, MAX_TITLE_CHARS).into_owned();
        }

        format!("/{}/{}", descriptor.board.code(), descriptor.op_no)
    }
}

/// Site-specific information attached to a bookmark after a successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadExtraInfo {
    pub bump_limit_reached: Option<bool>,
    pub unique_posters: Option<u32>,
}

/// Change notifications published by the bookmark registry.
#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkChange {
    /// The registry finished loading persisted bookmarks.
    Initialized,
    Created(Vec<ThreadDescriptor>),
    Updated(Vec<ThreadDescriptor>),
    Deleted(Vec<ThreadDescriptor>),
}

impl BookmarkChange {
    pub fn is_creation(&self) -> bool {
        matches!(self, BookmarkChange::Created(_))
    }
}

/// Whether a registry update should publish a [`BookmarkChange::Updated`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOption {
    Notify,
    DoNotNotify,
}
