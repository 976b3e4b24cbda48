//! Admission, eviction, and reclamation orchestration.
//!
//! All loaded-set mutations go through one `RwLock`; the `optimizing` flag
//! is a non-blocking try-lock ensuring a single eviction-mutating pass at a
//! time. An admission that needs eviction while a pass is in flight fails
//! fast with [`AdmissionError::Busy`] instead of queueing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::registry::{ModelCatalog, ModelLoader};
use crate::telemetry;

use super::budget::{BudgetConfig, MemoryPressure};
use super::planner;
use super::tracked::{LoadedModel, LoadedSet};

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// A reclamation pass holds the eviction guard. Transient; retry after
    /// backoff.
    #[error("Memory optimization in progress, retry later")]
    Busy,

    /// The model cannot fit even after eviction. Evictions already performed
    /// are not rolled back.
    #[error("Insufficient memory for {model}: need {needed_bytes} bytes, reclaimed {freed_bytes}")]
    InsufficientMemory {
        model: String,
        needed_bytes: u64,
        freed_bytes: u64,
    },

    /// The external loader failed. Evictions already performed are not
    /// rolled back.
    #[error("Loader failed for {model}: {reason}")]
    LoaderFailed { model: String, reason: String },
}

/// Result of a successful admission.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// The model was already loaded; only recency/use count changed.
    pub already_loaded: bool,
    pub bytes_freed: u64,
    /// Models evicted to make room, in eviction order.
    pub evicted: Vec<String>,
}

/// Read-only memory accounting snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub loaded_count: usize,
    pub protected_loaded_count: usize,
    pub pressure: MemoryPressure,
}

/// Background reclamation tuning.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Interval between background optimization passes.
    pub interval: Duration,
    /// Non-protected models idle longer than this are stale. Protected
    /// models use three times this threshold.
    pub stale_after: Duration,
    /// Fraction of the total budget a pass tries to reclaim.
    pub target_ratio: f64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(10 * 60),
            target_ratio: 0.30,
        }
    }
}

/// Admits models into the runtime under a fixed memory budget, evicting
/// less-valuable models to make room.
pub struct MemoryManager {
    budget: BudgetConfig,
    catalog: Arc<ModelCatalog>,
    loader: Arc<dyn ModelLoader>,
    reclaim: ReclaimConfig,
    loaded: RwLock<LoadedSet>,
    optimizing: AtomicBool,
}

impl MemoryManager {
    pub fn new(
        budget: BudgetConfig,
        catalog: Arc<ModelCatalog>,
        loader: Arc<dyn ModelLoader>,
        reclaim: ReclaimConfig,
    ) -> Self {
        Self {
            budget,
            catalog,
            loader,
            reclaim,
            loaded: RwLock::new(LoadedSet::new()),
            optimizing: AtomicBool::new(false),
        }
    }

    /// Admit a model, evicting to make room if needed.
    ///
    /// Idempotent for already-loaded models (touches recency only). Partial
    /// evictions are not rolled back on [`AdmissionError::InsufficientMemory`]
    /// or [`AdmissionError::LoaderFailed`].
    pub async fn load_model(&self, name: &str) -> Result<LoadOutcome, AdmissionError> {
        let now = Instant::now();

        if self.loaded.write().touch(name, now) {
            tracing::debug!(model = %name, "already loaded, refreshed usage");
            return Ok(LoadOutcome {
                already_loaded: true,
                ..LoadOutcome::default()
            });
        }

        let desc = self.catalog.describe(name).await;
        // Saturate: a pathological registry-supplied size must degrade to
        // InsufficientMemory, not overflow.
        let needed = desc.size_bytes.saturating_add(self.budget.min_free_bytes);

        let mut eviction_required = false;
        let mut freed = 0u64;
        let mut evicted: Vec<String> = Vec::new();
        {
            let mut set = self.loaded.write();
            let available = self.budget.max_memory_bytes.saturating_sub(set.usage_bytes());
            if available < needed {
                eviction_required = true;
                if self
                    .optimizing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Err(AdmissionError::Busy);
                }

                let plan = planner::plan(
                    &set.snapshot(),
                    name,
                    desc.size_bytes,
                    desc.protected,
                    self.budget.min_free_bytes,
                    now,
                );
                for victim in &plan.victims {
                    if freed >= needed {
                        break;
                    }
                    if let Some(entry) = set.remove(&victim.name) {
                        freed = freed.saturating_add(entry.size_bytes);
                        evicted.push(entry.name);
                    }
                }
                self.optimizing.store(false, Ordering::SeqCst);
            }
        }

        for victim in &evicted {
            tracing::info!(model = %victim, target = %name, "evicted to make room");
            self.catalog.notify_unloaded(victim).await;
        }
        if !evicted.is_empty() {
            telemetry::record_evictions(evicted.len() as u64, freed);
        }

        if eviction_required && freed < desc.size_bytes {
            tracing::warn!(
                model = %name,
                needed_bytes = desc.size_bytes,
                freed_bytes = freed,
                "admission failed: insufficient memory after eviction"
            );
            return Err(AdmissionError::InsufficientMemory {
                model: name.to_string(),
                needed_bytes: desc.size_bytes,
                freed_bytes: freed,
            });
        }

        if let Err(e) = self.loader.ensure_loaded(name).await {
            tracing::warn!(model = %name, error = %e, "loader failed");
            telemetry::record_load_failure(name);
            return Err(AdmissionError::LoaderFailed {
                model: name.to_string(),
                reason: e.to_string(),
            });
        }

        let used_bytes = {
            let mut set = self.loaded.write();
            set.insert(LoadedModel::from_descriptor(&desc, now));
            set.usage_bytes()
        };
        self.catalog.notify_loaded(name).await;
        telemetry::record_load_success(name);
        telemetry::record_usage(used_bytes);
        tracing::info!(
            model = %name,
            size_bytes = desc.size_bytes,
            used_bytes,
            bytes_freed = freed,
            "model loaded"
        );

        Ok(LoadOutcome {
            already_loaded: false,
            bytes_freed: freed,
            evicted,
        })
    }

    /// Record a usage signal arriving outside the admission path. No-op for
    /// models that are not loaded.
    pub fn record_usage(&self, name: &str) -> bool {
        self.loaded.write().touch(name, Instant::now())
    }

    /// Unconditionally unload a model, bypassing eviction policy. Returns
    /// `false` if it was not tracked as loaded.
    pub async fn force_unload(&self, name: &str) -> bool {
        let removed = self.loaded.write().remove(name);
        match removed {
            Some(entry) => {
                tracing::info!(model = %name, size_bytes = entry.size_bytes, "force unloaded");
                self.catalog.notify_unloaded(name).await;
                telemetry::record_usage(self.loaded.read().usage_bytes());
                true
            }
            None => false,
        }
    }

    /// Reclaim stale models under memory pressure. Returns bytes reclaimed.
    ///
    /// No-op below medium pressure, and yields to an in-flight
    /// admission-triggered eviction rather than contending.
    pub async fn optimize_memory_usage(&self) -> u64 {
        let now = Instant::now();
        let pressure = self.budget.pressure(self.loaded.read().usage_bytes());
        if pressure == MemoryPressure::Low {
            return 0;
        }

        if self
            .optimizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("optimization pass skipped, eviction already in flight");
            return 0;
        }

        let target = (self.budget.max_memory_bytes as f64 * self.reclaim.target_ratio) as u64;
        let mut freed = 0u64;
        let mut evicted: Vec<String> = Vec::new();
        {
            let mut set = self.loaded.write();
            let mut stale: Vec<LoadedModel> = set
                .snapshot()
                .into_iter()
                .filter(|entry| {
                    let threshold = if entry.protected {
                        self.reclaim.stale_after * 3
                    } else {
                        self.reclaim.stale_after
                    };
                    entry.idle_for(now) > threshold
                })
                .collect();
            stale.sort_by_key(|entry| entry.last_used);

            for entry in stale {
                if freed >= target {
                    break;
                }
                if let Some(removed) = set.remove(&entry.name) {
                    freed = freed.saturating_add(removed.size_bytes);
                    evicted.push(removed.name);
                }
            }
        }

        for victim in &evicted {
            tracing::info!(model = %victim, ?pressure, "evicted stale model");
            self.catalog.notify_unloaded(victim).await;
        }
        self.optimizing.store(false, Ordering::SeqCst);

        if freed > 0 {
            telemetry::record_evictions(evicted.len() as u64, freed);
            telemetry::record_usage(self.loaded.read().usage_bytes());
            tracing::info!(bytes_freed = freed, count = evicted.len(), "reclaimed stale models");
        }
        freed
    }

    /// Load every protected model that is not already loaded. Best-effort:
    /// individual failures are logged; the loop aborts or stops early only
    /// on elevated pressure. Returns the number of models loaded.
    pub async fn preload_protected(&self) -> usize {
        let names = self.catalog.protected_names();
        if self.stats().pressure.is_elevated() {
            tracing::warn!("skipping protected preload under elevated pressure");
            return 0;
        }

        let mut loaded = 0usize;
        for name in names {
            if self.loaded.read().contains(&name) {
                continue;
            }
            match self.load_model(&name).await {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(model = %name, error = %e, "protected preload failed");
                }
            }
            if self.stats().pressure.is_elevated() {
                tracing::info!(loaded, "stopping protected preload, pressure elevated");
                break;
            }
        }
        loaded
    }

    /// Accounting snapshot. Never fails.
    pub fn stats(&self) -> MemoryStats {
        let set = self.loaded.read();
        let used_bytes = set.usage_bytes();
        MemoryStats {
            total_bytes: self.budget.max_memory_bytes,
            used_bytes,
            available_bytes: self.budget.max_memory_bytes.saturating_sub(used_bytes),
            loaded_count: set.len(),
            protected_loaded_count: set.protected_count(),
            pressure: self.budget.pressure(used_bytes),
        }
    }

    /// Clone of all tracked entries, in no particular order.
    pub fn loaded_models(&self) -> Vec<LoadedModel> {
        self.loaded.read().snapshot()
    }

    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }
}
