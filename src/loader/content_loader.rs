use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::source::{ContentSource, LoadedContent};
use crate::model::ContentDescriptor;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying one consumer of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique listener id.
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded(Arc<LoadedContent>),
    Error(Arc<anyhow::Error>),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn content(&self) -> Option<&Arc<LoadedContent>> {
        match self {
            LoadState::Loaded(content) => Some(content),
            _ => None,
        }
    }
}

/// Loads one catalog or thread and publishes its state to listeners.
///
/// Instances are handed out by [`LoaderCache`](super::LoaderCache), which
/// tracks the registered listeners; a loader is never dropped by the cache
/// while it still has listeners.
pub struct Loader {
    descriptor: ContentDescriptor,
    source: Arc<dyn ContentSource>,
    listeners: Mutex<HashSet<ListenerId>>,
    state: watch::Sender<LoadState>,
    last_loaded: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("descriptor", &self.descriptor)
            .field("listeners", &self.listener_count())
            .field("last_loaded", &self.last_loaded())
            .finish()
    }
}

impl Loader {
    pub(super) fn new(descriptor: ContentDescriptor, source: Arc<dyn ContentSource>) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            descriptor,
            source,
            listeners: Mutex::new(HashSet::new()),
            state,
            last_loaded: Mutex::new(None),
        }
    }

    pub fn descriptor(&self) -> &ContentDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Watch state transitions of this loader.
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    /// Time of the last successful load.
    pub fn last_loaded(&self) -> Option<DateTime<Utc>> {
        *self.last_loaded.lock()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns `false` if the listener was already registered.
    pub(super) fn register_listener(&self, listener: ListenerId) -> bool {
        self.listeners.lock().insert(listener)
    }

    /// Returns the number of remaining listeners, or `None` if `listener`
    /// was not registered.
    pub(super) fn unregister_listener(&self, listener: ListenerId) -> Option<usize> {
        let mut listeners = self.listeners.lock();
        listeners.remove(&listener).then(|| listeners.len())
    }

    /// Start loading in a background task.
    ///
    /// The fetch keeps running until it completes or the returned handle is
    /// explicitly [cancelled](LoadHandle::cancel); dropping the handle does
    /// not stop it.
    pub fn load(self: &Arc<Self>) -> LoadHandle {
        self.state.send_replace(LoadState::Loading);

        let loader = Arc::clone(self);
        let task = tokio::spawn(async move {
            let next = match loader.source.load(&loader.descriptor).await {
                Ok(content) => {
                    *loader.last_loaded.lock() = Some(Utc::now());
                    tracing::debug!(descriptor = %loader.descriptor, "Loaded");
                    LoadState::Loaded(Arc::new(content))
                }
                Err(e) => {
                    tracing::warn!(descriptor = %loader.descriptor, error = %e, "Load failed");
                    LoadState::Error(Arc::new(e))
                }
            };
            loader.state.send_replace(next);
        });

        LoadHandle {
            loader: Arc::clone(self),
            task,
            cancelled: AtomicBool::new(false),
            on_cancel: Mutex::new(None),
        }
    }
}

/// Handle to an in-flight load started by [`Loader::load`].
pub struct LoadHandle {
    loader: Arc<Loader>,
    task: JoinHandle<()>,
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl LoadHandle {
    /// Run `callback` when this load is cancelled.
    pub fn on_cancel(self, callback: impl FnOnce() + Send + 'static) -> Self {
        *self.on_cancel.lock() = Some(Box::new(callback));
        self
    }

    /// Abort the load. Only the first call has any effect.
    ///
    /// A loader still in `Loading` goes back to `Idle`; a load that already
    /// finished keeps its result.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        self.task.abort();
        self.loader.state.send_if_modified(|state| {
            if state.is_loading() {
                *state = LoadState::Idle;
                true
            } else {
                false
            }
        });
        tracing::debug!(descriptor = %self.loader.descriptor, "Load cancelled");

        let callback = self.on_cancel.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the load task to end, whether it completed or was cancelled.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThreadDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Source that blocks until released, then returns an empty thread.
    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl ContentSource for GatedSource {
        async fn load(&self, descriptor: &ContentDescriptor) -> anyhow::Result<LoadedContent> {
            self.gate.notified().await;
            let thread = descriptor
                .as_thread()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("threads only"))?;
            Ok(LoadedContent::Thread(crate::model::ThreadSnapshot {
                descriptor: thread,
                posts: Vec::new(),
                closed: false,
                archived: false,
                bump_limit_reached: None,
                unique_posters: None,
            }))
        }
    }

    fn gated_loader() -> (Arc<Loader>, Arc<GatedSource>) {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
        });
        let loader = Arc::new(Loader::new(
            ThreadDescriptor::create("4chan", "ck", 1).into(),
            source.clone(),
        ));
        (loader, source)
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_load_publishes_states() {
        let (loader, source) = gated_loader();
        let mut states = loader.subscribe();
        assert!(matches!(loader.state(), LoadState::Idle));

        let handle = loader.load();
        assert!(loader.state().is_loading());
        assert!(loader.last_loaded().is_none());

        source.gate.notify_one();
        handle.join().await;

        states
            .wait_for(|state| state.content().is_some())
            .await
            .unwrap();
        assert!(loader.last_loaded().is_some());
    }

    #[tokio::test]
    async fn test_cancel_fires_once_and_resets_state() {
        let (loader, _source) = gated_loader();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = loader.load().on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(loader.state(), LoadState::Idle));
        assert!(loader.last_loaded().is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_result() {
        let (loader, source) = gated_loader();
        let handle = loader.load();
        source.gate.notify_one();

        let mut states = loader.subscribe();
        states
            .wait_for(|state| state.content().is_some())
            .await
            .unwrap();

        handle.cancel();
        assert!(loader.state().content().is_some());
    }

    #[tokio::test]
    async fn test_failed_load_reports_error() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
        });
        source.gate.notify_one();
        let loader = Arc::new(Loader::new(
            ContentDescriptor::Catalog(crate::model::BoardDescriptor::create("4chan", "ck")),
            source,
        ));

        loader.load().join().await;
        assert!(matches!(loader.state(), LoadState::Error(_)));
        assert!(loader.last_loaded().is_none());
    }
}
