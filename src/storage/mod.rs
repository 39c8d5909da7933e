//! SQLite persistence for boards, threads, bookmarks, filters and preferences.
//!
//! Each concern lives in its own `impl Database` block; the registries are the
//! only writers outside of tests and the CLI.

mod boards;
mod bookmarks;
mod filters;
mod preferences;
mod schema;
mod threads;
mod types;

pub use schema::Database;
pub use threads::PersistenceGateway;
pub use types::{DatabaseError, StoredBoard};
