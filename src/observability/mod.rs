//! # Observability Infrastructure
//!
//! Structured logging, Prometheus metrics and provider health checking for
//! the driver.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthChecker, HealthProvider, HealthStatus, ProviderHealthProvider};
pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, StatsReporter};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and metrics, returning the reporter to inject into
/// the node server and the reconciler.
pub fn init_observability(config: &ObservabilityConfig, node_id: &str) -> Result<StatsReporter> {
    init_logging(config)?;

    let reporter = StatsReporter::new(node_id);
    init_metrics(config, &reporter)?;

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        metrics_enabled = %config.enable_metrics,
        "Observability initialized successfully"
    );

    Ok(reporter)
}
