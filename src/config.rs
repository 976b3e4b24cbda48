//! Configuration loading from environment variables.
//!
//! All values are loaded from `MODELMEM_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MODELMEM_MAX_MODEL_MEMORY_GB` | 24 | Total model memory budget (GiB) |
//! | `MODELMEM_MIN_FREE_BYTES` | 2147483648 | Free margin kept after admission (bytes) |
//! | `MODELMEM_OPTIMIZE_INTERVAL_SECS` | 60 | Background reclamation interval (secs) |
//! | `MODELMEM_STALE_AFTER_SECS` | 600 | Idle threshold for stale eviction (secs) |
//! | `MODELMEM_DEFAULT_MODEL_SIZE_BYTES` | 4294967296 | Size estimate for unknown models (bytes) |

use std::time::Duration;

use crate::memory::{BudgetConfig, ReclaimConfig};
use crate::registry::CatalogConfig;

const GIB: u64 = 1024 * 1024 * 1024;

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, serde::Serialize)]
pub struct EffectiveConfig {
    pub max_memory_bytes: u64,
    pub min_free_bytes: u64,
    pub protected_reserve_bytes: u64,
    pub eviction_trigger_ratio: f64,
    pub optimize_interval_secs: u64,
    pub stale_after_secs: u64,
    pub reclaim_target_ratio: f64,
    pub default_model_size_bytes: u64,
}

/// All configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub budget: BudgetConfig,
    pub reclaim: ReclaimConfig,
    pub catalog: CatalogConfig,
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Load budget configuration from environment.
fn load_budget() -> BudgetConfig {
    let max_gb = parse_u64("MODELMEM_MAX_MODEL_MEMORY_GB", 24).max(1);
    let mut budget = BudgetConfig::with_max_gb(max_gb);
    let min_free = parse_u64("MODELMEM_MIN_FREE_BYTES", 2 * GIB);
    // Keep the invariant 0 < min_free < max.
    budget.min_free_bytes = min_free.clamp(1, budget.max_memory_bytes - 1);
    budget
}

/// Load reclamation configuration from environment.
fn load_reclaim() -> ReclaimConfig {
    let interval_secs = parse_u64("MODELMEM_OPTIMIZE_INTERVAL_SECS", 60).max(1);
    let stale_secs = parse_u64("MODELMEM_STALE_AFTER_SECS", 600);
    ReclaimConfig {
        interval: Duration::from_secs(interval_secs),
        stale_after: Duration::from_secs(stale_secs),
        ..ReclaimConfig::default()
    }
}

/// Load catalog configuration from environment.
fn load_catalog() -> CatalogConfig {
    let default_size = parse_u64("MODELMEM_DEFAULT_MODEL_SIZE_BYTES", 4 * GIB);
    CatalogConfig {
        default_size_bytes: default_size.max(1024 * 1024), // floor: 1 MiB
        ..CatalogConfig::default()
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        budget: load_budget(),
        reclaim: load_reclaim(),
        catalog: load_catalog(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            max_memory_bytes: self.budget.max_memory_bytes,
            min_free_bytes: self.budget.min_free_bytes,
            protected_reserve_bytes: self.budget.protected_reserve_bytes,
            eviction_trigger_ratio: self.budget.eviction_trigger_ratio,
            optimize_interval_secs: self.reclaim.interval.as_secs(),
            stale_after_secs: self.reclaim.stale_after.as_secs(),
            reclaim_target_ratio: self.reclaim.target_ratio,
            default_model_size_bytes: self.catalog.default_size_bytes,
        }
    }
}
