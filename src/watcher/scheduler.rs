use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::preferences::WatchSettings;

/// How often an offline job re-checks connectivity.
pub const CONNECTIVITY_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("No job registered for tag '{0}'")]
    UnknownJob(String),

    #[error("Scheduler is shut down")]
    ShutDown,
}

/// Conditions a job waits for after its delay has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobConstraints {
    pub requires_network: bool,
}

/// One-shot deferred work keyed by a tag. Scheduling a tag that already has
/// a pending job replaces that job.
#[async_trait]
pub trait BackgroundJobScheduler: Send + Sync {
    async fn schedule(
        &self,
        tag: &str,
        delay: Duration,
        constraints: JobConstraints,
    ) -> Result<(), SchedulingError>;

    /// Cancel the pending job for `tag`, if any.
    async fn cancel(&self, tag: &str) -> Result<(), SchedulingError>;
}

/// Work run by [`TokioJobScheduler`] when a scheduled tag comes due.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    async fn run(&self, scheduler: &dyn BackgroundJobScheduler);
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Treats the network as always reachable.
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Considers the network reachable when `url` answers with any HTTP status.
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectivityProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        let request = self.client.head(&self.url).send();
        match tokio::time::timeout(Duration::from_secs(10), request).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(url = %self.url, error = %e, "Connectivity check failed");
                false
            }
            Err(_) => false,
        }
    }
}

// ============================================================================
// TokioJobScheduler
// ============================================================================

struct PendingJob {
    generation: u64,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, Arc<dyn BackgroundJob>>>,
    pending: Mutex<HashMap<String, PendingJob>>,
    probe: Arc<dyn ConnectivityProbe>,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

/// [`BackgroundJobScheduler`] running jobs as tokio tasks.
///
/// Cheap to clone; clones share the same job table.
#[derive(Clone)]
pub struct TokioJobScheduler {
    inner: Arc<SchedulerInner>,
}

impl TokioJobScheduler {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                probe,
                next_generation: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register the work to run for `tag`.
    pub fn register(&self, tag: impl Into<String>, job: Arc<dyn BackgroundJob>) {
        self.inner.jobs.lock().insert(tag.into(), job);
    }

    /// Tags with a job waiting to run.
    pub fn pending_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.inner.pending.lock().keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn is_pending(&self, tag: &str) -> bool {
        self.inner.pending.lock().contains_key(tag)
    }

    /// Abort all pending jobs and refuse new ones.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        for (tag, pending) in self.inner.pending.lock().drain() {
            pending.handle.abort();
            tracing::debug!(tag = %tag, "Aborted pending job on shutdown");
        }
    }

    /// Forget the pending entry of a job that is about to run, unless it was
    /// replaced in the meantime.
    fn take_due(&self, tag: &str, generation: u64) -> bool {
        let mut pending = self.inner.pending.lock();
        match pending.get(tag) {
            Some(job) if job.generation == generation => {
                pending.remove(tag);
                true
            }
            _ => false,
        }
    }

    async fn wait_for_network(&self, tag: &str) {
        while !self.inner.probe.is_online().await {
            tracing::debug!(tag = %tag, "Network unavailable, delaying job");
            tokio::time::sleep(CONNECTIVITY_RECHECK_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BackgroundJobScheduler for TokioJobScheduler {
    async fn schedule(
        &self,
        tag: &str,
        delay: Duration,
        constraints: JobConstraints,
    ) -> Result<(), SchedulingError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(SchedulingError::ShutDown);
        }
        let job = self
            .inner
            .jobs
            .lock()
            .get(tag)
            .cloned()
            .ok_or_else(|| SchedulingError::UnknownJob(tag.to_string()))?;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let scheduler = self.clone();
        let owned_tag = tag.to_string();

        // Hold the table lock while spawning so the task cannot observe a
        // missing entry for its own generation
        let mut pending = self.inner.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if constraints.requires_network {
                scheduler.wait_for_network(&owned_tag).await;
            }
            if !scheduler.take_due(&owned_tag, generation) {
                return;
            }
            tracing::debug!(tag = %owned_tag, "Running background job");
            job.run(&scheduler).await;
        });

        if let Some(previous) = pending.insert(tag.to_string(), PendingJob { generation, handle }) {
            previous.handle.abort();
            tracing::debug!(tag = %tag, "Replaced pending job");
        }
        tracing::debug!(tag = %tag, delay_secs = delay.as_secs(), "Job scheduled");
        Ok(())
    }

    async fn cancel(&self, tag: &str) -> Result<(), SchedulingError> {
        if let Some(pending) = self.inner.pending.lock().remove(tag) {
            pending.handle.abort();
            tracing::debug!(tag = %tag, "Job cancelled");
        }
        Ok(())
    }
}

// ============================================================================
// Background bookmark watching
// ============================================================================

/// Queue the next background watch job, or cancel it when background
/// watching is off.
///
/// Any job already pending under `tag` is replaced, so calling this
/// repeatedly leaves exactly one job.
pub async fn restart_background_work(
    scheduler: &dyn BackgroundJobScheduler,
    settings: &WatchSettings,
    tag: &str,
) -> Result<(), SchedulingError> {
    if !settings.enabled || !settings.in_background {
        return cancel_background_bookmark_watching(scheduler, tag).await;
    }

    scheduler
        .schedule(
            tag,
            settings.background_interval,
            JobConstraints {
                requires_network: true,
            },
        )
        .await
}

pub async fn cancel_background_bookmark_watching(
    scheduler: &dyn BackgroundJobScheduler,
    tag: &str,
) -> Result<(), SchedulingError> {
    scheduler.cancel(tag).await
}
