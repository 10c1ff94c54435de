use super::{CloudProvider, ProviderDescriptor};
use crate::config::CloudlinkConfig;
use crate::error::{CloudError, Result};
use crate::providers::VercelProvider;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Provider registry: lower-cased name -> provider.
///
/// Built once at startup and handed to consumers. Runtime registration is
/// safe; the map is sharded and locked internally.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in provider.
    pub fn with_defaults(config: &CloudlinkConfig) -> Result<Self> {
        let registry = Self::new();
        registry.register(Arc::new(VercelProvider::new(config)))?;
        Ok(registry)
    }

    /// Registers `provider` under its lower-cased name.
    ///
    /// An existing provider with the same name is replaced.
    pub fn register(&self, provider: Arc<dyn CloudProvider>) -> Result<()> {
        let name = provider.name().trim().to_lowercase();
        if name.is_empty() {
            return Err(CloudError::validation("name", "provider name must not be empty"));
        }

        let version = provider.version().to_string();
        if let Some(previous) = self.providers.insert(name.clone(), provider) {
            warn!(
                provider = %name,
                previous_version = %previous.version(),
                version = %version,
                "Replaced registered provider"
            );
        } else {
            info!(provider = %name, version = %version, "Registered provider");
        }
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Result<Arc<dyn CloudProvider>> {
        self.providers
            .get(&name.trim().to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                let available = self.list();
                CloudError::NotFound(format!(
                    "provider '{}' is not registered (available: {})",
                    name,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ))
            })
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(&name.trim().to_lowercase())
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns `true` if a provider was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.providers.remove(&name.trim().to_lowercase()).is_some();
        if removed {
            info!(provider = %name, "Unregistered provider");
        }
        removed
    }

    /// Descriptors of all registered providers, sorted by name.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .providers
            .iter()
            .map(|entry| {
                let mut descriptor = entry.value().descriptor();
                descriptor.name = entry.key().clone();
                descriptor
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Capability;

    #[test]
    fn test_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());

        let err = registry.get("vercel").err().unwrap();
        assert!(matches!(err, CloudError::NotFound(ref m) if m.contains("none")));
    }

    #[test]
    fn test_with_defaults_registers_vercel() {
        let registry = ProviderRegistry::with_defaults(&CloudlinkConfig::default()).unwrap();
        assert_eq!(registry.list(), vec!["vercel".to_string()]);

        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "vercel");
        assert_eq!(descriptors[0].capabilities, Capability::ALL.to_vec());
    }

    #[test]
    fn test_unregister() {
        let registry = ProviderRegistry::with_defaults(&CloudlinkConfig::default()).unwrap();
        assert!(registry.unregister("VERCEL"));
        assert!(!registry.has("vercel"));
        assert!(!registry.unregister("vercel"));
    }
}
