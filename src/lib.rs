//! chanwatch: imageboard thread watching.
//!
//! - [`loader`] - shared content loaders with a bounded cache of released threads
//! - [`watcher`] - foreground/background bookmark watching
//! - [`usecase`] - filter-driven auto-watch over board catalogs
//! - [`registry`] - in-memory owners of boards, bookmarks, filters and sites
//! - [`storage`] - SQLite persistence

pub mod app;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod model;
pub mod preferences;
pub mod registry;
pub mod site;
pub mod storage;
pub mod usecase;
pub mod util;
pub mod watcher;
