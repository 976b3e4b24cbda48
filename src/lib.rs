//! modelmem — budget-aware memory manager for loadable inference models.
//!
//! Admits or denies requests to bring a memory-heavy model into the active
//! runtime under a fixed budget, and autonomously evicts less-valuable
//! models to make room.
//!
//! # Responsibilities
//!
//! - **Budget accounting**: estimated sizes summed against a fixed budget
//!   with a mandatory free margin after every admission.
//! - **Tiered-priority eviction**: protected models are sacrificed last,
//!   and only to other protected models when clearly idle.
//! - **Race avoidance**: one eviction-mutating pass at a time via a
//!   non-blocking try-lock; contending admissions fail fast.
//! - **Staleness reclamation**: a background pass evicts idle models once
//!   pressure rises, independent of admission traffic.
//!
//! The registry (metadata source, status sink) and the loader (the slow,
//! possibly failing load itself) are external; this crate consumes them
//! behind the traits in [`registry`].

pub mod config;
pub mod memory;
pub mod registry;
pub mod telemetry;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::EnvConfig;
use memory::{spawn_optimizer, BudgetError, MemoryManager};
use registry::{ModelCatalog, ModelLoader, ModelRegistry};

/// Composition root: a manager wired to its collaborators with the
/// background optimizer running.
pub struct MemoryRuntime {
    pub manager: Arc<MemoryManager>,
    shutdown: CancellationToken,
    optimizer: JoinHandle<()>,
}

impl MemoryRuntime {
    /// Validate configuration, wire the catalog and manager, refresh the
    /// protected-name snapshot, and spawn the background optimizer.
    pub async fn start(
        config: EnvConfig,
        registry: Arc<dyn ModelRegistry>,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self, BudgetError> {
        config.budget.validate()?;

        let catalog = Arc::new(ModelCatalog::new(registry, config.catalog));
        catalog.refresh_protected().await;

        let interval = config.reclaim.interval;
        let manager = Arc::new(MemoryManager::new(
            config.budget,
            catalog,
            loader,
            config.reclaim,
        ));

        let shutdown = CancellationToken::new();
        let optimizer = spawn_optimizer(manager.clone(), interval, shutdown.clone());

        Ok(Self {
            manager,
            shutdown,
            optimizer,
        })
    }

    /// Stop the background optimizer and wait for it to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.optimizer.await;
    }
}
