//! # Configuration Settings
//!
//! Defines the configuration structure for the secrets store driver.

use crate::errors::{Error, Result};
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Environment variable prefix shared by every setting
pub const ENV_PREFIX: &str = "SECRETS_STORE_";

/// Main driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DriverConfig {
    /// Name of the node this driver instance runs on
    #[validate(length(min = 1, message = "Node ID cannot be empty"))]
    pub node_id: String,

    /// Provider plugin configuration
    #[validate(nested)]
    pub provider: ProviderConfig,

    /// Rotation reconciler configuration
    #[validate(nested)]
    pub rotation: RotationConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Optional YAML file with provider-class definitions (local mode)
    pub provider_classes_file: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_id: "localhost".to_string(),
            provider: ProviderConfig::default(),
            rotation: RotationConfig::default(),
            observability: ObservabilityConfig::default(),
            provider_classes_file: None,
        }
    }
}

impl DriverConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Keys are looked up with the `SECRETS_STORE_` prefix. Unset keys fall
    /// back to defaults; malformed values are configuration errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));
        let defaults = Self::default();

        let provider = ProviderConfig {
            provider_dir: get("PROVIDER_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.provider.provider_dir),
            rpc_timeout_seconds: parse_or(
                &get,
                "PROVIDER_RPC_TIMEOUT_SECONDS",
                defaults.provider.rpc_timeout_seconds,
            )?,
            max_attempts: parse_or(&get, "PROVIDER_MAX_ATTEMPTS", defaults.provider.max_attempts)?,
            initial_backoff_ms: parse_or(
                &get,
                "PROVIDER_INITIAL_BACKOFF_MS",
                defaults.provider.initial_backoff_ms,
            )?,
            max_backoff_ms: parse_or(
                &get,
                "PROVIDER_MAX_BACKOFF_MS",
                defaults.provider.max_backoff_ms,
            )?,
            backoff_multiplier: parse_or(
                &get,
                "PROVIDER_BACKOFF_MULTIPLIER",
                defaults.provider.backoff_multiplier,
            )?,
            max_message_size: parse_or(
                &get,
                "PROVIDER_MAX_MESSAGE_SIZE",
                defaults.provider.max_message_size,
            )?,
            health_check_enabled: parse_bool_or(
                &get,
                "PROVIDER_HEALTH_CHECK",
                defaults.provider.health_check_enabled,
            ),
            health_check_interval_seconds: parse_or(
                &get,
                "PROVIDER_HEALTH_CHECK_INTERVAL_SECONDS",
                defaults.provider.health_check_interval_seconds,
            )?,
        };

        let rotation = RotationConfig {
            enabled: parse_bool_or(&get, "ENABLE_ROTATION", defaults.rotation.enabled),
            poll_interval_seconds: parse_or(
                &get,
                "ROTATION_POLL_INTERVAL_SECONDS",
                defaults.rotation.poll_interval_seconds,
            )?,
            workers: parse_or(&get, "ROTATION_WORKERS", defaults.rotation.workers)?,
            requeue_delay_seconds: parse_or(
                &get,
                "ROTATION_REQUEUE_DELAY_SECONDS",
                defaults.rotation.requeue_delay_seconds,
            )?,
        };

        let observability = ObservabilityConfig {
            enable_metrics: parse_bool_or(
                &get,
                "ENABLE_METRICS",
                defaults.observability.enable_metrics,
            ),
            metrics_port: parse_or(&get, "METRICS_PORT", defaults.observability.metrics_port)?,
            service_name: get("SERVICE_NAME").unwrap_or(defaults.observability.service_name),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.observability.log_level),
            json_logging: parse_bool_or(&get, "JSON_LOGGING", defaults.observability.json_logging),
        };

        let config = Self {
            node_id: get("NODE_ID").unwrap_or(defaults.node_id),
            provider,
            rotation,
            observability,
            provider_classes_file: get("PROVIDER_CLASSES_FILE").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if self.provider.initial_backoff_ms > self.provider.max_backoff_ms {
            return Err(Error::config(
                "Provider initial backoff cannot exceed the maximum backoff",
            ));
        }

        if !self.provider.provider_dir.is_absolute() {
            return Err(Error::config(format!(
                "Provider directory must be absolute: {}",
                self.provider.provider_dir.display()
            )));
        }

        Ok(())
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::config(format!("Invalid value for {}{}: {}", ENV_PREFIX, key, e))),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> bool
where
    G: Fn(&str) -> Option<String>,
{
    get(key).map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(default)
}

/// Provider plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Directory holding one `<provider>.sock` unix socket per plugin
    pub provider_dir: PathBuf,

    /// Deadline for a single provider call, retries included
    #[validate(range(min = 1, max = 600, message = "RPC timeout must be between 1 and 600 seconds"))]
    pub rpc_timeout_seconds: u64,

    /// Attempt ceiling for `Unavailable` retries
    #[validate(range(min = 1, max = 10, message = "Max attempts must be between 1 and 10"))]
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    #[validate(range(min = 1.0, max = 10.0, message = "Backoff multiplier must be between 1 and 10"))]
    pub backoff_multiplier: f64,

    /// Maximum gRPC message size accepted from providers
    #[validate(range(min = 1024, message = "Max message size must be at least 1KB"))]
    pub max_message_size: usize,

    /// Periodically call Version on every connected provider
    pub health_check_enabled: bool,

    #[validate(range(
        min = 1,
        max = 3600,
        message = "Health check interval must be between 1 and 3600 seconds"
    ))]
    pub health_check_interval_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_dir: PathBuf::from("/var/run/secrets-store-csi-providers"),
            rpc_timeout_seconds: 60,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            max_message_size: 4 * 1024 * 1024, // 4MB
            health_check_enabled: false,
            health_check_interval_seconds: 60,
        }
    }
}

impl ProviderConfig {
    /// Get RPC timeout as Duration
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    /// Retry policy applied to provider Mount calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: 0.0,
        }
    }
}

/// Rotation reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RotationConfig {
    /// Enable periodic rotation
    pub enabled: bool,

    /// Interval between full passes over the node's mounts
    #[validate(range(min = 1, message = "Poll interval must be at least 1 second"))]
    pub poll_interval_seconds: u64,

    /// Number of worker loops draining the queue
    #[validate(range(min = 1, max = 64, message = "Workers must be between 1 and 64"))]
    pub workers: usize,

    /// Delay before a failed item is retried
    #[validate(range(min = 1, max = 3600, message = "Requeue delay must be between 1 and 3600 seconds"))]
    pub requeue_delay_seconds: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_seconds: 120,
            workers: 1,
            requeue_delay_seconds: 10,
        }
    }
}

impl RotationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_seconds)
    }
}

/// Observability configuration for metrics and logging
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_port: 8095,
            service_name: "secrets-store-csi".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
