//! Background reclamation loop.
//!
//! One timer per manager; the manager's eviction guard keeps the pass from
//! racing admission-triggered evictions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::manager::MemoryManager;

/// Spawn the optimization loop. Returns a handle for shutdown.
pub fn spawn_optimizer(
    manager: Arc<MemoryManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        optimize_loop(&manager, interval, shutdown).await;
    })
}

async fn optimize_loop(manager: &MemoryManager, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so startup preloads settle first.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("memory optimizer: shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let freed = manager.optimize_memory_usage().await;
                if freed > 0 {
                    tracing::debug!(bytes_freed = freed, "optimization pass reclaimed memory");
                }
            }
        }
    }
}
