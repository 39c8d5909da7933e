//! Domain types shared by the loader cache, the registries and the watchers.
//!
//! - [`descriptor`] - immutable identity keys for sites, boards, catalogs and threads
//! - [`bookmark`] - watched-thread records owned by the bookmark registry
//! - [`filter`] - user auto-watch rules and their compiled matchers
//! - [`catalog`] - ephemeral snapshots produced by site readers

mod bookmark;
mod catalog;
mod descriptor;
mod filter;

pub use bookmark::{
    BookmarkChange, NotifyOption, ThreadBookmark, ThreadExtraInfo, MAX_TITLE_CHARS,
};
pub use catalog::{CatalogThread, FilterWatchCatalogInfoObject, PostRecord, ThreadSnapshot};
pub use descriptor::{BoardDescriptor, ContentDescriptor, SiteDescriptor, ThreadDescriptor};
pub use filter::{ChanFilter, FilterError, FilterScope, FilterTarget, WatchFilter};
