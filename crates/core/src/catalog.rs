//! Capability catalog.
//!
//! Holds every invocable operation keyed by its unique code. Resolution is
//! strict: an unknown or inactive code is an error, never a silent skip.

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::capability::{Capability, CapabilityCode};

/// Verbs that mark a capability destructive even when it is not tagged as such.
pub const DESTRUCTIVE_VERBS: &[&str] = &["delete", "remove", "destroy", "unlink"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("capability `{0}` is not registered")]
    NotFound(CapabilityCode),
    #[error("capability `{0}` is inactive")]
    Inactive(CapabilityCode),
    #[error("capability `{0}` is already registered")]
    Duplicate(CapabilityCode),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DestructiveSignal {
    Explicit,
    Verb(&'static str),
}

#[derive(Clone, Debug, Default)]
pub struct CapabilityCatalog {
    capabilities: HashMap<CapabilityCode, Capability>,
}

impl CapabilityCatalog {
    pub fn new(capabilities: Vec<Capability>) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for capability in capabilities {
            catalog.register(capability)?;
        }
        Ok(catalog)
    }

    pub fn register(&mut self, capability: Capability) -> Result<(), CatalogError> {
        if self.capabilities.contains_key(&capability.code) {
            return Err(CatalogError::Duplicate(capability.code));
        }
        self.capabilities.insert(capability.code.clone(), capability);
        Ok(())
    }

    pub fn resolve(&self, code: &CapabilityCode) -> Result<&Capability, CatalogError> {
        match self.capabilities.get(code) {
            Some(capability) if capability.active => Ok(capability),
            Some(_) => Err(CatalogError::Inactive(code.clone())),
            None => Err(CatalogError::NotFound(code.clone())),
        }
    }

    pub fn is_destructive(&self, code: &CapabilityCode) -> bool {
        match self.capabilities.get(code) {
            Some(capability) => destructive_signal(capability).is_some(),
            None => destructive_verb(code.as_str()).is_some(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// Explicit tag wins; otherwise the code and the handler target are scanned for
/// destructive verbs.
pub fn destructive_signal(capability: &Capability) -> Option<DestructiveSignal> {
    if capability.destructive {
        return Some(DestructiveSignal::Explicit);
    }

    destructive_verb(capability.code.as_str())
        .or_else(|| destructive_verb(capability.target.as_str()))
        .map(DestructiveSignal::Verb)
}

pub fn destructive_verb(name: &str) -> Option<&'static str> {
    let lowered = name.to_ascii_lowercase();
    DESTRUCTIVE_VERBS.iter().copied().find(|verb| lowered.contains(verb))
}
