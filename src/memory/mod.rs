//! Memory management: budget accounting, eviction planning, and the
//! admission/reclamation orchestrator.

mod budget;
mod manager;
mod optimizer;
pub mod planner;
mod tracked;

pub use budget::{BudgetConfig, BudgetError, MemoryPressure};
pub use manager::{AdmissionError, LoadOutcome, MemoryManager, MemoryStats, ReclaimConfig};
pub use optimizer::spawn_optimizer;
pub use planner::EvictionPlan;
pub use tracked::{LoadedModel, LoadedSet};
