//! Tests for MemoryManager admission, eviction, and forced unload.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use modelmem::memory::{
    AdmissionError, BudgetConfig, MemoryManager, MemoryPressure, ReclaimConfig,
};
use modelmem::registry::{
    CatalogConfig, LoaderError, ModelCatalog, ModelDescriptor, ModelLoader, ModelRegistry,
    ModelTier, RegistryError,
};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Default)]
struct MockRegistry {
    descriptors: HashMap<String, ModelDescriptor>,
    protected: HashSet<String>,
    notifications: Mutex<Vec<(String, bool)>>,
    unload_delay: Duration,
}

impl MockRegistry {
    fn with_model(self, name: &str, size_gib: u64, protected: bool) -> Self {
        self.with_model_bytes(name, size_gib * GIB, protected)
    }

    fn with_model_bytes(mut self, name: &str, size_bytes: u64, protected: bool) -> Self {
        self.descriptors.insert(
            name.to_string(),
            ModelDescriptor {
                name: name.to_string(),
                size_bytes,
                tier: ModelTier::Fast,
                priority: 60,
                protected,
            },
        );
        if protected {
            self.protected.insert(name.to_string());
        }
        self
    }

    /// Make unload notifications stall, keeping eviction passes in flight.
    fn with_unload_delay(mut self, delay: Duration) -> Self {
        self.unload_delay = delay;
        self
    }
}

#[async_trait]
impl ModelRegistry for MockRegistry {
    async fn describe(&self, name: &str) -> Result<Option<ModelDescriptor>, RegistryError> {
        Ok(self.descriptors.get(name).cloned())
    }

    async fn protected_names(&self) -> Result<HashSet<String>, RegistryError> {
        Ok(self.protected.clone())
    }

    async fn notify_load_status(&self, name: &str, loaded: bool) -> Result<(), RegistryError> {
        if !loaded && !self.unload_delay.is_zero() {
            tokio::time::sleep(self.unload_delay).await;
        }
        self.notifications.lock().push((name.to_string(), loaded));
        Ok(())
    }
}

#[derive(Default)]
struct MockLoader {
    fail: AtomicBool,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn ensure_loaded(&self, name: &str) -> Result<(), LoaderError> {
        self.calls.lock().push(name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoaderError("backend out of device memory".to_string()));
        }
        Ok(())
    }
}

async fn manager_with(
    registry: MockRegistry,
    loader: Arc<MockLoader>,
) -> (Arc<MockRegistry>, MemoryManager) {
    let registry = Arc::new(registry);
    let catalog = Arc::new(ModelCatalog::new(registry.clone(), CatalogConfig::default()));
    catalog.refresh_protected().await;
    let manager = MemoryManager::new(
        BudgetConfig::with_max_gb(24),
        catalog,
        loader,
        ReclaimConfig::default(),
    );
    (registry, manager)
}

// Scenario: first load into an empty set needs no eviction.
#[tokio::test]
async fn test_load_into_empty_set() {
    let loader = Arc::new(MockLoader::default());
    let (registry, manager) =
        manager_with(MockRegistry::default().with_model("a", 12, false), loader.clone()).await;

    let outcome = manager.load_model("a").await.unwrap();
    assert!(!outcome.already_loaded);
    assert_eq!(outcome.bytes_freed, 0);
    assert!(outcome.evicted.is_empty());

    let stats = manager.stats();
    assert_eq!(stats.used_bytes, 12 * GIB);
    assert_eq!(stats.loaded_count, 1);
    assert_eq!(loader.calls.lock().as_slice(), ["a"]);
    assert_eq!(
        registry.notifications.lock().as_slice(),
        [("a".to_string(), true)]
    );
}

// Scenario: eviction frees too little, admission fails, evictions stand.
#[tokio::test]
async fn test_insufficient_memory_keeps_partial_eviction() {
    let loader = Arc::new(MockLoader::default());
    let (registry, manager) = manager_with(
        MockRegistry::default()
            .with_model("a", 12, false)
            .with_model("b", 14, false),
        loader.clone(),
    )
    .await;

    manager.load_model("a").await.unwrap();

    // available = 12 GiB < 14 + 2; evicting "a" frees 12 GiB < 14 GiB.
    let err = manager.load_model("b").await.unwrap_err();
    assert!(matches!(
        err,
        AdmissionError::InsufficientMemory {
            needed_bytes,
            freed_bytes,
            ..
        } if needed_bytes == 14 * GIB && freed_bytes == 12 * GIB
    ));

    // "a" stays evicted; the loader was never asked for "b".
    assert_eq!(manager.stats().loaded_count, 0);
    assert_eq!(loader.calls.lock().as_slice(), ["a"]);
    assert!(registry
        .notifications
        .lock()
        .contains(&("a".to_string(), false)));
}

// Scenario: eviction frees enough and the new model is admitted.
#[tokio::test]
async fn test_eviction_makes_room() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("a", 12, false)
            .with_model("b", 10, false),
        loader.clone(),
    )
    .await;

    manager.load_model("a").await.unwrap();
    let outcome = manager.load_model("b").await.unwrap();

    assert_eq!(outcome.bytes_freed, 12 * GIB);
    assert_eq!(outcome.evicted, vec!["a".to_string()]);

    let stats = manager.stats();
    assert_eq!(stats.loaded_count, 1);
    assert_eq!(stats.used_bytes, 10 * GIB);
    assert_eq!(loader.calls.lock().as_slice(), ["a", "b"]);
}

#[tokio::test]
async fn test_readmission_is_idempotent() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) =
        manager_with(MockRegistry::default().with_model("a", 8, false), loader.clone()).await;

    manager.load_model("a").await.unwrap();
    let before = manager.loaded_models().pop().unwrap();

    let outcome = manager.load_model("a").await.unwrap();
    assert!(outcome.already_loaded);
    assert_eq!(outcome.bytes_freed, 0);

    let after = manager.loaded_models().pop().unwrap();
    assert_eq!(after.size_bytes, before.size_bytes);
    assert_eq!(after.tier, before.tier);
    assert_eq!(after.priority, before.priority);
    assert_eq!(after.protected, before.protected);
    assert_eq!(after.use_count, before.use_count + 1);
    assert!(after.last_used >= before.last_used);

    // The loader is not re-invoked for an already-loaded model.
    assert_eq!(loader.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_loader_failure_surfaces_without_rollback() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("a", 12, false)
            .with_model("b", 9, false),
        loader.clone(),
    )
    .await;

    manager.load_model("a").await.unwrap();

    loader.fail.store(true, Ordering::SeqCst);
    let err = manager.load_model("b").await.unwrap_err();
    assert!(matches!(err, AdmissionError::LoaderFailed { .. }));

    // The eviction of "a" performed to make room is not rolled back.
    assert_eq!(manager.stats().loaded_count, 0);
}

#[tokio::test]
async fn test_unknown_model_falls_back_to_defaults() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(MockRegistry::default(), loader).await;

    // No registry record: defaults to 4 GiB, general, unprotected.
    manager.load_model("mystery").await.unwrap();
    let entry = manager.loaded_models().pop().unwrap();
    assert_eq!(entry.size_bytes, 4 * GIB);
    assert_eq!(entry.tier, ModelTier::General);
    assert!(!entry.protected);
}

#[tokio::test]
async fn test_budget_respected_on_happy_path() {
    let loader = Arc::new(MockLoader::default());
    let mut registry = MockRegistry::default();
    for i in 0..10 {
        registry = registry.with_model(&format!("m{i}"), 5, false);
    }
    let (_, manager) = manager_with(registry, loader).await;

    for i in 0..10 {
        let _ = manager.load_model(&format!("m{i}")).await;
    }
    let stats = manager.stats();
    assert!(
        stats.used_bytes <= stats.total_bytes,
        "usage {} exceeds budget {}",
        stats.used_bytes,
        stats.total_bytes
    );
}

#[tokio::test]
async fn test_force_unload_untracked_is_noop() {
    let loader = Arc::new(MockLoader::default());
    let (registry, manager) = manager_with(MockRegistry::default(), loader).await;

    assert!(!manager.force_unload("x").await);
    assert_eq!(manager.stats().loaded_count, 0);
    assert!(registry.notifications.lock().is_empty());
}

#[tokio::test]
async fn test_force_unload_bypasses_policy() {
    let loader = Arc::new(MockLoader::default());
    let (registry, manager) =
        manager_with(MockRegistry::default().with_model("p", 8, true), loader).await;

    manager.load_model("p").await.unwrap();
    assert!(manager.force_unload("p").await);
    assert_eq!(manager.stats().loaded_count, 0);
    assert!(registry
        .notifications
        .lock()
        .contains(&("p".to_string(), false)));
}

#[tokio::test]
async fn test_record_usage_only_touches_loaded() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) =
        manager_with(MockRegistry::default().with_model("a", 8, false), loader).await;

    assert!(!manager.record_usage("a"));
    manager.load_model("a").await.unwrap();
    assert!(manager.record_usage("a"));
    assert_eq!(manager.loaded_models().pop().unwrap().use_count, 2);
}

#[tokio::test]
async fn test_stats_snapshot() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("plain", 12, false)
            .with_model("prot", 8, true),
        loader,
    )
    .await;

    manager.load_model("plain").await.unwrap();
    manager.load_model("prot").await.unwrap();

    let stats = manager.stats();
    assert_eq!(stats.total_bytes, 24 * GIB);
    assert_eq!(stats.used_bytes, 20 * GIB);
    assert_eq!(stats.available_bytes, 4 * GIB);
    assert_eq!(stats.loaded_count, 2);
    assert_eq!(stats.protected_loaded_count, 1);
    // 20/24 = 0.833
    assert_eq!(stats.pressure, MemoryPressure::High);

    // Stats are export-ready.
    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"pressure\":\"high\""));
}

#[tokio::test]
async fn test_preload_protected_loads_missing_models() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("p1", 4, true)
            .with_model("p2", 4, true)
            .with_model("plain", 4, false),
        loader,
    )
    .await;

    let loaded = manager.preload_protected().await;
    assert_eq!(loaded, 2);

    let stats = manager.stats();
    assert_eq!(stats.loaded_count, 2);
    assert_eq!(stats.protected_loaded_count, 2);
}

#[tokio::test]
async fn test_preload_protected_stops_early_when_pressure_rises() {
    let loader = Arc::new(MockLoader::default());
    // Either protected model alone pushes usage to 20/24 = 0.833 (high),
    // so the loop must stop after the first load.
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("p1", 20, true)
            .with_model("p2", 20, true),
        loader.clone(),
    )
    .await;

    let loaded = manager.preload_protected().await;
    assert_eq!(loaded, 1);

    let stats = manager.stats();
    assert_eq!(stats.loaded_count, 1);
    assert_eq!(stats.protected_loaded_count, 1);
    assert!(stats.pressure.is_elevated());
    assert_eq!(loader.calls.lock().len(), 1);
}

// While a reclamation pass is stalled mid-flight (inside an unload
// notification), an admission that needs eviction fails fast with Busy and
// a second pass yields instead of contending.
#[tokio::test]
async fn test_in_flight_reclamation_makes_contending_eviction_fail_fast() {
    let loader = Arc::new(MockLoader::default());
    let registry = Arc::new(
        MockRegistry::default()
            .with_model("a", 2, false)
            .with_model("b", 10, false)
            .with_model("c", 10, false)
            .with_model("d", 10, false)
            .with_unload_delay(Duration::from_millis(300)),
    );
    let catalog = Arc::new(ModelCatalog::new(registry.clone(), CatalogConfig::default()));
    catalog.refresh_protected().await;
    let manager = Arc::new(MemoryManager::new(
        BudgetConfig::with_max_gb(24),
        catalog,
        loader.clone(),
        ReclaimConfig {
            stale_after: Duration::ZERO,
            // Reclaim little enough that pressure stays elevated mid-pass.
            target_ratio: 0.05,
            ..ReclaimConfig::default()
        },
    ));

    for name in ["a", "b", "c"] {
        manager.load_model(name).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // 22/24 = 0.917: the pass evicts the oldest model ("a", 2 GiB), then
    // stalls inside its unload notification with the guard still held.
    let background = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.optimize_memory_usage().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // 20/24 is still high pressure, so this reaches the guard and yields.
    assert_eq!(manager.optimize_memory_usage().await, 0);

    // available = 4 GiB < 10 + 2: eviction required, guard held -> Busy.
    let err = manager.load_model("d").await.unwrap_err();
    assert!(matches!(err, AdmissionError::Busy));
    assert!(!loader.calls.lock().contains(&"d".to_string()));

    assert_eq!(background.await.unwrap(), 2 * GIB);

    // Once the pass completes, the same admission goes through.
    let outcome = manager.load_model("d").await.unwrap();
    assert!(!outcome.evicted.is_empty());
    assert_eq!(manager.stats().pressure, MemoryPressure::Low);
}

#[tokio::test]
async fn test_absurd_size_estimate_degrades_to_insufficient_memory() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("base", 8, false)
            .with_model_bytes("huge", u64::MAX, false),
        loader.clone(),
    )
    .await;

    manager.load_model("base").await.unwrap();

    // size + min_free would overflow u64; it must saturate and fail cleanly.
    let err = manager.load_model("huge").await.unwrap_err();
    assert!(matches!(err, AdmissionError::InsufficientMemory { .. }));
    assert!(!loader.calls.lock().contains(&"huge".to_string()));
}

#[tokio::test]
async fn test_preload_protected_aborts_under_pressure() {
    let loader = Arc::new(MockLoader::default());
    let (_, manager) = manager_with(
        MockRegistry::default()
            .with_model("big", 20, false)
            .with_model("p1", 2, true),
        loader.clone(),
    )
    .await;

    // 20/24 = 0.833 -> high pressure before the loop starts.
    manager.load_model("big").await.unwrap();
    let loaded = manager.preload_protected().await;
    assert_eq!(loaded, 0);
    assert_eq!(loader.calls.lock().as_slice(), ["big"]);
}
