//! In-memory registries for boards, bookmarks, filters and sites.
//!
//! Every registry is an explicitly constructed service with an
//! [`InitGate`]: it starts `Uninitialized`, loads its persisted state once,
//! and only then reports [`is_ready`](InitGate::is_ready). Consumers that must
//! not run early either check readiness or await the gate.

mod boards;
mod bookmarks;
mod filters;
mod lifecycle;
mod sites;

pub use boards::{BoardRegistry, ChanBoard};
pub use bookmarks::BookmarkRegistry;
pub use filters::FilterRegistry;
pub use lifecycle::{InitGate, InitState};
pub use sites::SiteRegistry;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} registry is already initialized")]
    AlreadyInitialized(&'static str),

    #[error("{0} registry failed to initialize")]
    InitializationFailed(&'static str),

    #[error("{0} registry is not ready")]
    NotReady(&'static str),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error(transparent)]
    Filter(#[from] crate::model::FilterError),
}
