use std::sync::OnceLock;

use super::descriptor::{BoardDescriptor, ThreadDescriptor};
use crate::util::html_to_plain_text;

/// One thread as listed in a board catalog.
#[derive(Debug, Clone)]
pub struct CatalogThread {
    pub descriptor: ThreadDescriptor,
    pub subject: Option<String>,
    raw_comment: String,
    cleaned_comment: OnceLock<String>,
    pub thumbnail_url: Option<String>,
}

impl CatalogThread {
    pub fn new(
        descriptor: ThreadDescriptor,
        subject: Option<String>,
        raw_comment: String,
        thumbnail_url: Option<String>,
    ) -> Self {
        Self {
            descriptor,
            subject,
            raw_comment,
            cleaned_comment: OnceLock::new(),
            thumbnail_url,
        }
    }

    pub fn raw_comment(&self) -> &str {
        &self.raw_comment
    }

    /// Plain-text rendering of the comment.
    ///
    /// Parsed on first access and cached, so several filters testing the same
    /// thread clean its markup only once.
    pub fn comment(&self) -> &str {
        self.cleaned_comment
            .get_or_init(|| html_to_plain_text(&self.raw_comment).into_owned())
    }
}

/// Catalog snapshot decoded by a site reader for filter watching.
#[derive(Debug, Clone)]
pub struct FilterWatchCatalogInfoObject {
    pub board: BoardDescriptor,
    pub threads: Vec<CatalogThread>,
}

/// One post of a fetched thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRecord {
    pub no: u64,
    pub subject: Option<String>,
    pub comment: String,
    pub thumbnail_url: Option<String>,
}

/// A fetched thread as decoded by a site reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub descriptor: ThreadDescriptor,
    pub posts: Vec<PostRecord>,
    pub closed: bool,
    pub archived: bool,
    pub bump_limit_reached: Option<bool>,
    pub unique_posters: Option<u32>,
}

impl ThreadSnapshot {
    pub fn original_post(&self) -> Option<&PostRecord> {
        self.posts.first()
    }

    pub fn last_post_no(&self) -> Option<u64> {
        self.posts.iter().map(|post| post.no).max()
    }

    /// Threads that can no longer receive replies.
    pub fn is_finished(&self) -> bool {
        self.closed || self.archived
    }
}
