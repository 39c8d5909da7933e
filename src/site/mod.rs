//! Site abstraction: where a site's documents live and how they are decoded.
//!
//! A [`Site`] bundles [`SiteEndpoints`] (URL construction) with a
//! [`ChanReader`] (document decoding). The watchers and the filter matcher
//! only talk to these traits, so supporting another site dialect means
//! implementing them and registering the site in the
//! [`SiteRegistry`](crate::registry::SiteRegistry).

mod json_api;

pub use json_api::JsonApiSite;

use thiserror::Error;

use crate::fetch::{ChanFetcher, FetchError};
use crate::model::{
    BoardDescriptor, FilterWatchCatalogInfoObject, SiteDescriptor, ThreadDescriptor,
    ThreadSnapshot,
};

/// A document was fetched but could not be decoded.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread document has no posts")]
    EmptyThread,

    #[error("Thread document starts with post {found}, expected {expected}")]
    OriginalPostMismatch { expected: u64, found: u64 },
}

/// Failure to fetch or decode a site document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("No site registered as '{0}'")]
    UnknownSite(SiteDescriptor),
}

impl LoadError {
    /// The thread or board no longer exists on the site.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::Fetch(FetchError::NotFound))
    }
}

pub trait SiteEndpoints: Send + Sync {
    /// URL of the catalog document for `board`.
    fn catalog(&self, board: &BoardDescriptor) -> String;

    /// URL of the thread document for `thread`.
    fn thread(&self, thread: &ThreadDescriptor) -> String;
}

pub trait ChanReader: Send + Sync {
    /// Decode a catalog into the threads the filter watcher tests.
    fn read_filter_watch_catalog(
        &self,
        board: &BoardDescriptor,
        body: &[u8],
    ) -> Result<FilterWatchCatalogInfoObject, ReadError>;

    fn read_thread(
        &self,
        thread: &ThreadDescriptor,
        body: &[u8],
    ) -> Result<ThreadSnapshot, ReadError>;
}

pub trait Site: Send + Sync {
    fn descriptor(&self) -> &SiteDescriptor;

    fn endpoints(&self) -> &dyn SiteEndpoints;

    fn reader(&self) -> &dyn ChanReader;
}

/// Fetch and decode the catalog of `board`.
pub async fn load_catalog(
    site: &dyn Site,
    fetcher: &ChanFetcher,
    board: &BoardDescriptor,
) -> Result<FilterWatchCatalogInfoObject, LoadError> {
    let url = site.endpoints().catalog(board);
    let body = fetcher.fetch(&url).await?;
    Ok(site.reader().read_filter_watch_catalog(board, &body)?)
}

/// Fetch and decode a single thread.
pub async fn load_thread(
    site: &dyn Site,
    fetcher: &ChanFetcher,
    thread: &ThreadDescriptor,
) -> Result<ThreadSnapshot, LoadError> {
    let url = site.endpoints().thread(thread);
    let body = fetcher.fetch(&url).await?;
    Ok(site.reader().read_thread(thread, &body)?)
}
