//! Provider registry: name → adapter resolution.
//!
//! Populated once at startup by the host process and read-only afterwards.
//! The engine only resolves names to adapters and dispatches; it never
//! mutates the registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::DocumentProvider;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown provider: {0}")]
    NotFound(String),
}

#[derive(Clone, Default, Debug)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn DocumentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn DocumentProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DocumentProvider>, RegistryError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ProviderRegistry::new();
        registry.register("workspace", Arc::new(MemoryProvider::new()));

        assert!(registry.has("workspace"));
        assert!(registry.get("workspace").is_ok());
        assert_eq!(registry.names(), vec!["workspace"]);
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}
