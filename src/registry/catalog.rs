//! Descriptor cache and protected-name snapshot over the registry.
//!
//! Lookups never fail: registry errors and missing records both fall back to
//! a default descriptor. Uses DashMap for lock-free concurrent access.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{ModelDescriptor, ModelRegistry};

/// Configuration for the model catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Size estimate used when the registry has no record for a model.
    pub default_size_bytes: u64,
    /// How long a cached descriptor stays valid.
    pub descriptor_ttl: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_size_bytes: 4 * 1024 * 1024 * 1024, // 4 GiB
            descriptor_ttl: Duration::from_secs(60),
        }
    }
}

struct CachedDescriptor {
    descriptor: ModelDescriptor,
    fetched_at: Instant,
}

/// Caching facade over the registry.
///
/// The protected-name snapshot is refreshed explicitly; a stale snapshot is
/// tolerated (eventual consistency with the registry).
pub struct ModelCatalog {
    registry: Arc<dyn ModelRegistry>,
    descriptors: DashMap<String, CachedDescriptor>,
    protected: RwLock<HashSet<String>>,
    config: CatalogConfig,
}

impl ModelCatalog {
    pub fn new(registry: Arc<dyn ModelRegistry>, config: CatalogConfig) -> Self {
        Self {
            registry,
            descriptors: DashMap::new(),
            protected: RwLock::new(HashSet::new()),
            config,
        }
    }

    /// Resolve a model name to a descriptor. Never fails: a registry error
    /// or a missing record yields the default descriptor.
    pub async fn describe(&self, name: &str) -> ModelDescriptor {
        if let Some(cached) = self.descriptors.get(name) {
            if cached.fetched_at.elapsed() <= self.config.descriptor_ttl {
                return cached.descriptor.clone();
            }
        }

        let descriptor = match self.registry.describe(name).await {
            Ok(Some(desc)) => desc,
            Ok(None) => {
                tracing::debug!(model = %name, "no registry record, using defaults");
                ModelDescriptor::unknown(name, self.config.default_size_bytes)
            }
            Err(e) => {
                tracing::warn!(model = %name, error = %e, "registry lookup failed, using defaults");
                ModelDescriptor::unknown(name, self.config.default_size_bytes)
            }
        };

        self.descriptors.insert(
            name.to_string(),
            CachedDescriptor {
                descriptor: descriptor.clone(),
                fetched_at: Instant::now(),
            },
        );
        descriptor
    }

    /// Snapshot of names currently known to be protected.
    pub fn protected_names(&self) -> HashSet<String> {
        self.protected.read().clone()
    }

    /// Re-query the registry for protected names. On error the previous
    /// snapshot is kept.
    pub async fn refresh_protected(&self) {
        match self.registry.protected_names().await {
            Ok(names) => {
                tracing::debug!(count = names.len(), "refreshed protected name snapshot");
                *self.protected.write() = names;
            }
            Err(e) => {
                tracing::warn!(error = %e, "protected name refresh failed, keeping stale snapshot");
            }
        }
    }

    /// Report a successful load to the registry. Errors are logged, never
    /// propagated.
    pub async fn notify_loaded(&self, name: &str) {
        if let Err(e) = self.registry.notify_load_status(name, true).await {
            tracing::warn!(model = %name, error = %e, "load notification failed");
        }
    }

    /// Report an unload to the registry. Errors are logged, never propagated.
    pub async fn notify_unloaded(&self, name: &str) {
        if let Err(e) = self.registry.notify_load_status(name, false).await {
            tracing::warn!(model = %name, error = %e, "unload notification failed");
        }
    }

    /// Drop any cached descriptor for a model (forces a registry re-query).
    pub fn invalidate(&self, name: &str) {
        self.descriptors.remove(name);
    }
}
