//! Loading collaborator
//!
//! The kernel does not read any wire format itself. A [`ModuleLoader`]
//! turns an import spec into an address and an address into a parsed
//! [`ModuleDocument`].

use dashmap::DashMap;
use qedeq_logic::{ImportSpec, LogicError, ModuleAddress, ModuleDocument};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("module {address} not found")]
    NotFound { address: ModuleAddress },

    #[error("cannot locate import `{label}` at `{location}`: {message}")]
    Unlocatable {
        label: String,
        location: String,
        message: String,
    },

    #[error("invalid module {address}: {source}")]
    Invalid {
        address: ModuleAddress,
        #[source]
        source: LogicError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait ModuleLoader: Send + Sync {
    /// Address of the module an import of `origin` refers to
    fn locate(&self, origin: &ModuleAddress, spec: &ImportSpec) -> Result<ModuleAddress, LoadError> {
        origin
            .resolve(&spec.location)
            .map_err(|error| LoadError::Unlocatable {
                label: spec.label.clone(),
                location: spec.location.clone(),
                message: error.to_string(),
            })
    }

    fn load(&self, address: &ModuleAddress) -> Result<ModuleDocument, LoadError>;
}

/// Loader over documents held in memory
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    documents: DashMap<ModuleAddress, ModuleDocument>,
    loads: DashMap<ModuleAddress, usize>,
    total: AtomicUsize,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address: ModuleAddress, document: ModuleDocument) {
        self.documents.insert(address, document);
    }

    /// Builder style [`insert`](Self::insert) for an address given as text
    pub fn with(self, address: &str, document: ModuleDocument) -> Result<Self, LogicError> {
        self.insert(ModuleAddress::new(address)?, document);
        Ok(self)
    }

    pub fn remove(&self, address: &ModuleAddress) -> Option<ModuleDocument> {
        self.documents.remove(address).map(|(_, document)| document)
    }

    /// Times `address` was loaded, failed attempts included
    pub fn load_count(&self, address: &ModuleAddress) -> usize {
        self.loads.get(address).map_or(0, |count| *count)
    }

    pub fn total_loads(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for InMemoryLoader {
    fn load(&self, address: &ModuleAddress) -> Result<ModuleDocument, LoadError> {
        *self.loads.entry(address.clone()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(address)
            .map(|document| document.clone())
            .ok_or_else(|| LoadError::NotFound {
                address: address.clone(),
            })
    }
}
