use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;

use crate::fetch::ChanFetcher;
use crate::model::{ContentDescriptor, FilterWatchCatalogInfoObject, ThreadSnapshot};
use crate::registry::SiteRegistry;
use crate::site::{self, LoadError};

/// Result of a successful load.
#[derive(Debug, Clone)]
pub enum LoadedContent {
    Catalog(FilterWatchCatalogInfoObject),
    Thread(ThreadSnapshot),
}

/// Where loaders get their content from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load(&self, descriptor: &ContentDescriptor) -> anyhow::Result<LoadedContent>;
}

/// Loads content through the registered site for the descriptor.
pub struct SiteContentSource {
    sites: Arc<SiteRegistry>,
    fetcher: ChanFetcher,
}

impl SiteContentSource {
    pub fn new(sites: Arc<SiteRegistry>, fetcher: ChanFetcher) -> Self {
        Self { sites, fetcher }
    }
}

#[async_trait]
impl ContentSource for SiteContentSource {
    async fn load(&self, descriptor: &ContentDescriptor) -> anyhow::Result<LoadedContent> {
        let site_descriptor = &descriptor.board().site;
        let site = self
            .sites
            .by_descriptor(site_descriptor)
            .ok_or_else(|| LoadError::UnknownSite(site_descriptor.clone()))?;

        let content = match descriptor {
            ContentDescriptor::Catalog(board) => {
                site::load_catalog(site.as_ref(), &self.fetcher, board)
                    .await
                    .map(LoadedContent::Catalog)
            }
            ContentDescriptor::Thread(thread) => {
                site::load_thread(site.as_ref(), &self.fetcher, thread)
                    .await
                    .map(LoadedContent::Thread)
            }
        };
        content.with_context(|| format!("Loading {descriptor}"))
    }
}
