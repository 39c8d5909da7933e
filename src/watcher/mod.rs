//! Bookmark watching.
//!
//! The [`BookmarkWatchCoordinator`] listens to bookmark changes, watch
//! settings and app visibility, and hands polling to either the
//! [`ForegroundBookmarkWatcher`] (app visible, adaptive interval) or a
//! [`BackgroundWatchJob`] queued on a [`BackgroundJobScheduler`] (app hidden,
//! one job per tag). Both run the same [`BookmarkWatchCycle`].

mod background;
mod coordinator;
mod cycle;
mod debounce;
mod foreground;
mod scheduler;
mod visibility;

pub use background::BackgroundWatchJob;
pub use coordinator::{BookmarkWatchCoordinator, CoordinatorError, WatchMode};
pub use cycle::{BookmarkWatchCycle, CycleOutcome};
pub use debounce::{Debouncer, Trigger, TriggerBatch, DEFAULT_DEBOUNCE_WINDOW};
pub use foreground::{next_interval, ForegroundBookmarkWatcher, ForegroundWatcher};
pub use scheduler::{
    cancel_background_bookmark_watching, restart_background_work, AlwaysOnline, BackgroundJob,
    BackgroundJobScheduler, ConnectivityProbe, HttpConnectivityProbe, JobConstraints,
    SchedulingError, TokioJobScheduler, CONNECTIVITY_RECHECK_INTERVAL,
};
pub use visibility::{AppVisibility, AppVisibilityObserver};
