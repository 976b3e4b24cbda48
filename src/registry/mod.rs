//! External collaborator interfaces: the model registry and the model loader.
//!
//! The registry is the source of truth for size estimates, tiers, and
//! protection flags, and the sink for load/unload status updates. The loader
//! performs the actual (slow, possibly failing) load into the runtime.
//! Both are consumed behind trait objects; this crate implements neither.

mod catalog;

pub use catalog::{CatalogConfig, ModelCatalog};

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Error from the external loader, passed through to admission results.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct LoaderError(pub String);

/// Coarse speed/latency classification for a model.
///
/// Protection eligibility is derived from the tier on the registry side;
/// this crate only carries the value through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    UltraFast,
    Fast,
    Medium,
    #[default]
    General,
}

/// Priority score bucketed into a comparable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

impl PriorityLevel {
    /// Bucket a 0-100 priority score.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=49 => PriorityLevel::Low,
            50..=79 => PriorityLevel::Medium,
            _ => PriorityLevel::High,
        }
    }
}

/// Registry-provided description of a loadable model.
///
/// Sizes are estimates, not measurements. A descriptor is snapshotted into
/// the loaded set at admission time and not refreshed while loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub tier: ModelTier,
    /// 0-100 score; see [`PriorityLevel::from_score`] for bucketing.
    pub priority: u8,
    /// Must remain available under normal conditions.
    pub protected: bool,
}

impl ModelDescriptor {
    /// Fallback descriptor for a name the registry has no record of.
    pub fn unknown(name: &str, default_size_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            size_bytes: default_size_bytes,
            tier: ModelTier::General,
            priority: 50,
            protected: false,
        }
    }

    pub fn priority_level(&self) -> PriorityLevel {
        PriorityLevel::from_score(self.priority)
    }
}

/// Source of truth for model metadata and sink for load-status updates.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Look up a model's descriptor. `Ok(None)` means the registry has no
    /// record; that is not an error (callers fall back to defaults).
    async fn describe(&self, name: &str) -> Result<Option<ModelDescriptor>, RegistryError>;

    /// Names the registry currently marks as protected.
    async fn protected_names(&self) -> Result<HashSet<String>, RegistryError>;

    /// Report a load/unload to the registry. Best-effort on the caller side.
    async fn notify_load_status(&self, name: &str, loaded: bool) -> Result<(), RegistryError>;
}

/// Brings a model into the active runtime. The only long-blocking call in
/// this crate; cancellation and timeouts are the loader's responsibility.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn ensure_loaded(&self, name: &str) -> Result<(), LoaderError>;
}
