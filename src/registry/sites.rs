use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{InitGate, RegistryError};
use crate::config::SiteConfig;
use crate::model::SiteDescriptor;
use crate::site::{JsonApiSite, Site};

/// Sites the application can load content from.
pub struct SiteRegistry {
    gate: InitGate,
    sites: RwLock<BTreeMap<SiteDescriptor, Arc<dyn Site>>>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self {
            gate: InitGate::new("site"),
            sites: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register the configured JSON-API sites.
    ///
    /// Entries with invalid base URLs are skipped with a warning.
    pub fn initialize(&self, configs: &[SiteConfig]) -> Result<(), RegistryError> {
        let sites = configs
            .iter()
            .filter_map(|config| match JsonApiSite::from_config(config) {
                Ok(site) => Some(Arc::new(site) as Arc<dyn Site>),
                Err(e) => {
                    tracing::warn!(site = %config.name, error = %e, "Skipping misconfigured site");
                    None
                }
            })
            .collect();
        self.initialize_with(sites)
    }

    /// Register an explicit set of sites.
    pub fn initialize_with(&self, sites: Vec<Arc<dyn Site>>) -> Result<(), RegistryError> {
        self.gate.begin()?;

        let mut map = self.sites.write();
        for site in sites {
            let descriptor = site.descriptor().clone();
            if map.insert(descriptor.clone(), site).is_some() {
                tracing::warn!(site = %descriptor, "Duplicate site definition, last one wins");
            }
        }
        tracing::info!(sites = map.len(), "Site registry initialized");
        drop(map);

        self.gate.finish(true);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub async fn await_initialized(&self) -> Result<(), RegistryError> {
        self.gate.wait().await
    }

    pub fn by_descriptor(&self, descriptor: &SiteDescriptor) -> Option<Arc<dyn Site>> {
        self.sites.read().get(descriptor).cloned()
    }

    pub fn descriptors(&self) -> Vec<SiteDescriptor> {
        self.sites.read().keys().cloned().collect()
    }
}
