use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::content_loader::{ListenerId, Loader};
use super::source::ContentSource;
use crate::model::{ContentDescriptor, ThreadDescriptor};

/// Number of released thread loaders kept for reuse.
pub const THREAD_LOADERS_CACHE_SIZE: usize = 25;

/// Hands out loaders and keeps recently released thread loaders warm.
///
/// - At most one live loader exists per thread; every `obtain` for a thread
///   that is live, or still in the released tier, returns the same instance.
/// - A thread loader whose last listener is released moves to an LRU tier of
///   [`THREAD_LOADERS_CACHE_SIZE`] entries; the least recently released one is
///   dropped when the tier overflows.
/// - Catalog loaders are never shared: each `obtain` builds a fresh one and
///   its final release discards it.
///
/// All methods take `&mut self`, so callers sharing a cache must serialize
/// access (e.g. behind a mutex or inside one task).
pub struct LoaderCache {
    source: Arc<dyn ContentSource>,
    live: HashMap<ThreadDescriptor, Arc<Loader>>,
    released: LruCache<ThreadDescriptor, Arc<Loader>>,
}

impl LoaderCache {
    pub fn new(source: Arc<dyn ContentSource>) -> Self {
        let capacity = NonZeroUsize::new(THREAD_LOADERS_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self::with_capacity(source, capacity)
    }

    pub fn with_capacity(source: Arc<dyn ContentSource>, capacity: NonZeroUsize) -> Self {
        Self {
            source,
            live: HashMap::new(),
            released: LruCache::new(capacity),
        }
    }

    /// Get the loader for `descriptor` and register `listener` on it.
    ///
    /// Every `obtain` must be paired with exactly one [`release`](Self::release)
    /// of the same loader and listener.
    pub fn obtain(&mut self, descriptor: ContentDescriptor, listener: ListenerId) -> Arc<Loader> {
        let thread = match descriptor {
            ContentDescriptor::Thread(thread) => thread,
            catalog @ ContentDescriptor::Catalog(_) => {
                let loader = Arc::new(Loader::new(catalog, Arc::clone(&self.source)));
                loader.register_listener(listener);
                return loader;
            }
        };

        let loader = if let Some(loader) = self.live.get(&thread) {
            Arc::clone(loader)
        } else if let Some(loader) = self.released.pop(&thread) {
            tracing::debug!(thread = %thread, "Reusing released thread loader");
            self.live.insert(thread.clone(), Arc::clone(&loader));
            loader
        } else {
            let loader = Arc::new(Loader::new(
                ContentDescriptor::Thread(thread.clone()),
                Arc::clone(&self.source),
            ));
            self.live.insert(thread.clone(), Arc::clone(&loader));
            loader
        };

        if !loader.register_listener(listener) {
            tracing::debug!(thread = %thread, listener = ?listener, "Listener already registered");
        }
        loader
    }

    /// Unregister `listener` from `loader`.
    ///
    /// # Panics
    ///
    /// If `loader` was not handed out by this cache (or was already fully
    /// released), or if `listener` is not registered on it. Both mean the
    /// caller broke the obtain/release pairing.
    pub fn release(&mut self, loader: &Arc<Loader>, listener: ListenerId) {
        let thread = match loader.descriptor() {
            ContentDescriptor::Catalog(_) => {
                if loader.unregister_listener(listener).is_none() {
                    misuse(loader.descriptor(), listener, "listener was never registered");
                }
                return;
            }
            ContentDescriptor::Thread(thread) => thread,
        };

        match self.live.get(thread) {
            Some(live) if Arc::ptr_eq(live, loader) => {}
            _ => misuse(loader.descriptor(), listener, "the released loader does not exist"),
        }

        let Some(remaining) = loader.unregister_listener(listener) else {
            misuse(loader.descriptor(), listener, "listener was never registered");
        };
        if remaining > 0 {
            return;
        }

        if let Some(loader) = self.live.remove(thread) {
            if let Some((evicted, _)) = self.released.push(thread.clone(), loader) {
                tracing::debug!(thread = %evicted, "Evicted released thread loader");
            }
        }
    }

    /// Number of loaders with at least one listener.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of thread loaders waiting in the released tier.
    pub fn released_count(&self) -> usize {
        self.released.len()
    }

    pub fn is_released(&self, thread: &ThreadDescriptor) -> bool {
        self.released.contains(thread)
    }
}

#[track_caller]
fn misuse(descriptor: &ContentDescriptor, listener: ListenerId, reason: &str) -> ! {
    tracing::error!(
        descriptor = %descriptor,
        listener = ?listener,
        reason,
        "Loader cache misuse"
    );
    panic!("Loader cache misuse for {descriptor}: {reason}");
}
