//! Read-mostly catalog of known signals.
//!
//! Readers take an `Arc` snapshot of the catalog and never hold the lock
//! while iterating. Provisioning builds a new catalog and swaps it in, so
//! writes are serialized against each other and never observed half-done.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use greenwave_ir::types::SignalSite;
use tracing::info;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Signal not found: {signal_id}")]
    SignalNotFound { signal_id: String },

    #[error("Signal already provisioned: {signal_id}")]
    DuplicateSignal { signal_id: String },
}

/// Immutable catalog generation.
#[derive(Debug, Default)]
pub struct Catalog {
    sites: Vec<SignalSite>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    fn build(sites: Vec<SignalSite>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(sites.len());
        for (i, site) in sites.iter().enumerate() {
            if by_id.insert(site.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateSignal {
                    signal_id: site.id.clone(),
                });
            }
        }
        Ok(Self { sites, by_id })
    }

    pub fn sites(&self) -> &[SignalSite] {
        &self.sites
    }

    pub fn get(&self, id: &str) -> Option<&SignalSite> {
        self.by_id.get(id).map(|&i| &self.sites[i])
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

pub struct SignalRegistry {
    current: RwLock<Arc<Catalog>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    /// Build a registry from catalog entries. Duplicate ids are rejected.
    pub fn from_sites(sites: Vec<SignalSite>) -> Result<Self, RegistryError> {
        let catalog = Catalog::build(sites)?;
        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Current catalog generation.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn list_all(&self) -> Vec<SignalSite> {
        self.snapshot().sites().to_vec()
    }

    pub fn get(&self, id: &str) -> Result<SignalSite, RegistryError> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::SignalNotFound {
                signal_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Add a signal to the catalog.
    pub fn provision(&self, site: SignalSite) -> Result<(), RegistryError> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.get(&site.id).is_some() {
            return Err(RegistryError::DuplicateSignal { signal_id: site.id });
        }
        let id = site.id.clone();
        let mut sites = guard.sites().to_vec();
        sites.push(site);
        *guard = Arc::new(Catalog::build(sites)?);
        info!(signal_id = %id, total = guard.len(), "signal provisioned");
        Ok(())
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
