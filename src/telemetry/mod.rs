//! Telemetry: structured logging initialization and metrics helpers.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{record_evictions, record_load_failure, record_load_success, record_usage};
