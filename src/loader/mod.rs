//! Reference-counted loaders for catalogs and threads.
//!
//! Screens that show a thread or catalog [`obtain`](LoaderCache::obtain) a
//! [`Loader`] with their own [`ListenerId`] and
//! [`release`](LoaderCache::release) it when done. Thread loaders outlive
//! their last listener in a bounded LRU tier so that going back to a recently
//! viewed thread reuses its loaded state.

mod cache;
mod content_loader;
mod source;

pub use cache::{LoaderCache, THREAD_LOADERS_CACHE_SIZE};
pub use content_loader::{ListenerId, LoadHandle, LoadState, Loader};
pub use source::{ContentSource, LoadedContent, SiteContentSource};
