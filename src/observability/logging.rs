//! # Structured Logging
//!
//! Installs the global `tracing` subscriber and provides span helpers for the
//! driver's node and rotation operations.

use crate::config::{DriverConfig, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Create a tracing span for a node volume operation.
///
/// ```rust,ignore
/// let span = volume_span!("node_publish", volume_id, target_path);
/// ```
#[macro_export]
macro_rules! volume_span {
    ($operation:expr, $volume_id:expr, $target_path:expr) => {
        tracing::info_span!(
            "volume_operation",
            operation = %$operation,
            volume_id = %$volume_id,
            target_path = %$target_path,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $volume_id:expr, $target_path:expr, $($field:tt)*) => {
        tracing::info_span!(
            "volume_operation",
            operation = %$operation,
            volume_id = %$volume_id,
            target_path = %$target_path,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for one reconcile of a status record
#[macro_export]
macro_rules! rotation_span {
    ($key:expr) => {
        tracing::debug_span!(
            "rotation_reconcile",
            key = %$key,
            reconcile_id = %uuid::Uuid::new_v4()
        )
    };
}

/// Install the global subscriber: `RUST_LOG` wins over the configured level.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {}", config.log_level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry.with(tracing_subscriber::fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::config(format!("Failed to initialize logging: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &DriverConfig) {
    tracing::info!(
        node_id = %config.node_id,
        provider_dir = %config.provider.provider_dir.display(),
        rpc_timeout_seconds = config.provider.rpc_timeout_seconds,
        rotation_enabled = config.rotation.enabled,
        rotation_poll_interval_seconds = config.rotation.poll_interval_seconds,
        metrics_enabled = config.observability.enable_metrics,
        "Secrets store driver configuration"
    );
}
