use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, Mutex};

use super::{InitGate, RegistryError};
use crate::model::{
    BookmarkChange, NotifyOption, ThreadBookmark, ThreadDescriptor, ThreadExtraInfo,
};
use crate::storage::Database;

/// Capacity of the change-event channel. Slow subscribers that fall further
/// behind observe `RecvError::Lagged` and should re-read registry state.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct BookmarkState {
    bookmarks: BTreeMap<ThreadDescriptor, ThreadBookmark>,
    extra_info: HashMap<ThreadDescriptor, ThreadExtraInfo>,
}

/// Sole owner of bookmark records.
///
/// Every method takes the internal lock for its whole duration, including
/// the database write, so memory and storage are mutated in the same order
/// and callbacks never see a half-applied update. Callbacks receive
/// references that cannot escape the lock.
pub struct BookmarkRegistry {
    db: Database,
    gate: InitGate,
    state: Mutex<BookmarkState>,
    changes: broadcast::Sender<BookmarkChange>,
}

impl BookmarkRegistry {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db,
            gate: InitGate::new("bookmark"),
            state: Mutex::new(BookmarkState::default()),
            changes,
        }
    }

    /// Load persisted bookmarks and publish [`BookmarkChange::Initialized`].
    pub async fn initialize(&self) -> Result<(), RegistryError> {
        self.gate.begin()?;

        let loaded = async {
            let bookmarks = self.db.load_bookmarks().await?;
            let extra_info = self.db.load_extra_info().await?;
            anyhow::Ok((bookmarks, extra_info))
        }
        .await;

        match loaded {
            Ok((bookmarks, extra_info)) => {
                {
                    let mut state = self.state.lock().await;
                    state.bookmarks = bookmarks
                        .into_iter()
                        .map(|bookmark| (bookmark.descriptor.clone(), bookmark))
                        .collect();
                    state.extra_info = extra_info.into_iter().collect();
                    tracing::info!(
                        bookmarks = state.bookmarks.len(),
                        "Bookmark registry initialized"
                    );
                }
                self.gate.finish(true);
                self.publish(BookmarkChange::Initialized);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load bookmarks");
                self.gate.finish(false);
                Err(RegistryError::Storage(e))
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn await_initialized(&self) -> Result<(), RegistryError> {
        self.gate.wait().await
    }

    /// Subscribe to bookmark change events.
    pub fn subscribe(&self) -> broadcast::Receiver<BookmarkChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: BookmarkChange) {
        // No subscribers is fine; the coordinator may not be running yet
        let _ = self.changes.send(change);
    }

    /// Whether at least one bookmark should be watched.
    pub async fn has_active_bookmarks(&self) -> bool {
        self.state
            .lock()
            .await
            .bookmarks
            .values()
            .any(ThreadBookmark::is_watchable)
    }

    pub async fn active_bookmark_descriptors(&self) -> Vec<ThreadDescriptor> {
        self.state
            .lock()
            .await
            .bookmarks
            .values()
            .filter(|bookmark| bookmark.is_watchable())
            .map(|bookmark| bookmark.descriptor.clone())
            .collect()
    }

    pub async fn contains(&self, descriptor: &ThreadDescriptor) -> bool {
        self.state.lock().await.bookmarks.contains_key(descriptor)
    }

    /// Run `f` against the bookmark for `descriptor`, if any.
    pub async fn map_bookmark<R>(
        &self,
        descriptor: &ThreadDescriptor,
        f: impl FnOnce(&ThreadBookmark) -> R,
    ) -> Option<R> {
        self.state.lock().await.bookmarks.get(descriptor).map(f)
    }

    /// Copies of all bookmarks, ordered by descriptor.
    pub async fn bookmarks_snapshot(&self) -> Vec<ThreadBookmark> {
        self.state.lock().await.bookmarks.values().cloned().collect()
    }

    pub async fn extra_info(&self, descriptor: &ThreadDescriptor) -> Option<ThreadExtraInfo> {
        self.state.lock().await.extra_info.get(descriptor).cloned()
    }

    /// Create bookmarks that do not exist yet.
    ///
    /// Already-bookmarked threads are skipped, as are bookmarks whose thread
    /// row is missing from storage. Returns the descriptors actually created
    /// and publishes a single [`BookmarkChange::Created`] for them.
    pub async fn create_bookmarks(
        &self,
        bookmarks: Vec<ThreadBookmark>,
    ) -> Result<Vec<ThreadDescriptor>, RegistryError> {
        self.gate.ensure_ready()?;
        let mut state = self.state.lock().await;

        let mut fresh: BTreeMap<ThreadDescriptor, ThreadBookmark> = BTreeMap::new();
        for bookmark in bookmarks {
            if !state.bookmarks.contains_key(&bookmark.descriptor) {
                fresh.insert(bookmark.descriptor.clone(), bookmark);
            }
        }
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let to_persist: Vec<ThreadBookmark> = fresh.values().cloned().collect();
        let persisted = self.db.upsert_bookmarks(&to_persist).await?;

        for descriptor in &persisted {
            if let Some(bookmark) = fresh.remove(descriptor) {
                state.bookmarks.insert(descriptor.clone(), bookmark);
            }
        }
        drop(state);

        if !persisted.is_empty() {
            tracing::info!(created = persisted.len(), "Bookmarks created");
            self.publish(BookmarkChange::Created(persisted.clone()));
        }
        Ok(persisted)
    }

    /// Apply `mutator` to each existing bookmark in `descriptors`.
    ///
    /// Only bookmarks the mutator actually changed are persisted and reported.
    /// Nothing is applied in memory if the database write fails.
    pub async fn update_bookmarks(
        &self,
        descriptors: &[ThreadDescriptor],
        notify: NotifyOption,
        mut mutator: impl FnMut(&mut ThreadBookmark),
    ) -> Result<Vec<ThreadDescriptor>, RegistryError> {
        self.gate.ensure_ready()?;
        let mut state = self.state.lock().await;

        let mut changed = Vec::new();
        for descriptor in descriptors {
            let Some(current) = state.bookmarks.get(descriptor) else {
                continue;
            };
            let mut updated = current.clone();
            mutator(&mut updated);
            // Identity is not mutable
            updated.descriptor = descriptor.clone();
            if &updated != current {
                changed.push(updated);
            }
        }
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        self.db.upsert_bookmarks(&changed).await?;

        let updated: Vec<ThreadDescriptor> = changed
            .into_iter()
            .map(|bookmark| {
                let descriptor = bookmark.descriptor.clone();
                state.bookmarks.insert(descriptor.clone(), bookmark);
                descriptor
            })
            .collect();
        drop(state);

        if notify == NotifyOption::Notify {
            self.publish(BookmarkChange::Updated(updated.clone()));
        }
        Ok(updated)
    }

    /// Delete bookmarks. Returns the descriptors that existed.
    pub async fn delete_bookmarks(
        &self,
        descriptors: &[ThreadDescriptor],
    ) -> Result<Vec<ThreadDescriptor>, RegistryError> {
        self.gate.ensure_ready()?;
        let mut state = self.state.lock().await;

        let existing: Vec<ThreadDescriptor> = descriptors
            .iter()
            .filter(|descriptor| state.bookmarks.contains_key(*descriptor))
            .cloned()
            .collect();
        if existing.is_empty() {
            return Ok(Vec::new());
        }

        self.db.delete_bookmarks(&existing).await?;
        for descriptor in &existing {
            state.bookmarks.remove(descriptor);
            state.extra_info.remove(descriptor);
        }
        drop(state);

        tracing::info!(deleted = existing.len(), "Bookmarks deleted");
        self.publish(BookmarkChange::Deleted(existing.clone()));
        Ok(existing)
    }

    /// Attach site-specific info to a bookmarked thread.
    ///
    /// Ignored for threads that are not bookmarked.
    pub async fn update_extra_info(
        &self,
        descriptor: &ThreadDescriptor,
        info: ThreadExtraInfo,
    ) -> Result<(), RegistryError> {
        self.gate.ensure_ready()?;
        let mut state = self.state.lock().await;

        if !state.bookmarks.contains_key(descriptor)
            || state.extra_info.get(descriptor) == Some(&info)
        {
            return Ok(());
        }

        self.db.upsert_extra_info(descriptor, &info).await?;
        state.extra_info.insert(descriptor.clone(), info);
        Ok(())
    }
}
