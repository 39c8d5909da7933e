//! Application use cases composed from registries, sites and storage.

mod filter_match;

pub use filter_match::{FilterMatchUseCase, FilterWatchError};
