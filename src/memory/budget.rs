//! Memory budget configuration and pressure classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("max_memory_bytes must be positive")]
    ZeroBudget,

    #[error("min_free_bytes ({min_free}) must be positive and below max_memory_bytes ({max})")]
    BadMinFree { min_free: u64, max: u64 },

    #[error("{name} must be within (0, 1], got {value}")]
    BadRatio { name: &'static str, value: f64 },
}

/// Static memory budget, derived once at startup.
///
/// Sizes are policy signals over estimates, not measured physical memory.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Total budget for loaded models.
    pub max_memory_bytes: u64,
    /// Fraction held back for the rest of the system. Informative only.
    pub system_reserve_ratio: f64,
    /// Soft budget earmarked for protected models. Not a hard partition.
    pub protected_reserve_bytes: u64,
    /// Usage ratio considered "full" for proactive reclamation.
    pub eviction_trigger_ratio: f64,
    /// Safety margin that must remain free after any admission.
    pub min_free_bytes: u64,
}

impl BudgetConfig {
    /// Budget for a given total, with the standard derived reserves.
    pub fn with_max_gb(max_gb: u64) -> Self {
        let max = max_gb * GIB;
        Self {
            max_memory_bytes: max,
            system_reserve_ratio: 0.10,
            protected_reserve_bytes: (max as f64 * 0.60) as u64,
            eviction_trigger_ratio: 0.85,
            min_free_bytes: 2 * GIB,
        }
    }

    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.max_memory_bytes == 0 {
            return Err(BudgetError::ZeroBudget);
        }
        if self.min_free_bytes == 0 || self.min_free_bytes >= self.max_memory_bytes {
            return Err(BudgetError::BadMinFree {
                min_free: self.min_free_bytes,
                max: self.max_memory_bytes,
            });
        }
        for (name, value) in [
            ("system_reserve_ratio", self.system_reserve_ratio),
            ("eviction_trigger_ratio", self.eviction_trigger_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(BudgetError::BadRatio { name, value });
            }
        }
        Ok(())
    }

    /// Pressure bucket for a given usage in bytes.
    pub fn pressure(&self, used_bytes: u64) -> MemoryPressure {
        MemoryPressure::from_ratio(used_bytes as f64 / self.max_memory_bytes as f64)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self::with_max_gb(24)
    }
}

/// Bucketed usage-to-budget ratio driving background reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.6 {
            MemoryPressure::Low
        } else if ratio < 0.8 {
            MemoryPressure::Medium
        } else if ratio < 0.95 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// High or critical: new optional work should back off.
    pub fn is_elevated(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}
