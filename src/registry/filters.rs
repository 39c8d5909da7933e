use parking_lot::RwLock;
use std::sync::Arc;

use super::{InitGate, RegistryError};
use crate::model::{ChanFilter, WatchFilter};
use crate::storage::Database;

/// Compiled watch filters, in insertion order.
pub struct FilterRegistry {
    db: Database,
    gate: InitGate,
    filters: RwLock<Vec<Arc<ChanFilter>>>,
}

impl FilterRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            gate: InitGate::new("filter"),
            filters: RwLock::new(Vec::new()),
        }
    }

    /// Load and compile persisted filters.
    ///
    /// Filters whose pattern no longer compiles are skipped with a warning.
    pub async fn initialize(&self) -> Result<(), RegistryError> {
        self.gate.begin()?;

        let stored = match self.db.load_filters().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load filters");
                self.gate.finish(false);
                return Err(RegistryError::Storage(e));
            }
        };

        let compiled: Vec<Arc<ChanFilter>> = stored
            .into_iter()
            .filter_map(|filter| {
                let id = filter.id;
                match ChanFilter::compile(filter) {
                    Ok(compiled) => Some(Arc::new(compiled)),
                    Err(e) => {
                        tracing::warn!(filter_id = ?id, error = %e, "Skipping invalid filter");
                        None
                    }
                }
            })
            .collect();

        tracing::info!(filters = compiled.len(), "Filter registry initialized");
        *self.filters.write() = compiled;
        self.gate.finish(true);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn await_initialized(&self) -> Result<(), RegistryError> {
        self.gate.wait().await
    }

    /// Enabled filters that create bookmarks on match.
    pub fn get_enabled_watch_filters(&self) -> Vec<Arc<ChanFilter>> {
        self.filters
            .read()
            .iter()
            .filter(|filter| filter.filter.is_enabled_watch())
            .cloned()
            .collect()
    }

    pub fn view_all_filters(&self, mut visitor: impl FnMut(&ChanFilter)) {
        self.filters.read().iter().for_each(|filter| visitor(filter));
    }

    /// Validate, persist and register a new filter. Returns its id.
    pub async fn add_filter(&self, filter: WatchFilter) -> Result<i64, RegistryError> {
        self.gate.ensure_ready()?;

        // Invalid patterns are never saved
        let mut compiled = ChanFilter::compile(filter)?;
        let id = self.db.insert_filter(&compiled.filter).await?;
        compiled.filter.id = Some(id);

        tracing::info!(filter_id = id, pattern = %compiled.filter.pattern, "Filter added");
        self.filters.write().push(Arc::new(compiled));
        Ok(id)
    }

    /// Returns `false` if no filter has this id.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<bool, RegistryError> {
        self.gate.ensure_ready()?;

        if !self.db.set_filter_enabled(id, enabled).await? {
            return Ok(false);
        }

        let mut filters = self.filters.write();
        if let Some(slot) = filters.iter_mut().find(|f| f.filter.id == Some(id)) {
            let mut updated = (**slot).clone();
            updated.filter.enabled = enabled;
            *slot = Arc::new(updated);
        }
        Ok(true)
    }

    /// Returns `false` if no filter has this id.
    pub async fn delete(&self, id: i64) -> Result<bool, RegistryError> {
        self.gate.ensure_ready()?;

        if !self.db.delete_filter(id).await? {
            return Ok(false);
        }
        self.filters.write().retain(|f| f.filter.id != Some(id));
        Ok(true)
    }
}
