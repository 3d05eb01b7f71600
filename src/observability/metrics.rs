//! # Metrics Collection
//!
//! Prometheus metrics for node operations, rotation and provider health.
//! The exporter is installed once at startup; a [`StatsReporter`] is
//! constructed explicitly and handed to the components that report.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

const NODE_PUBLISH_TOTAL: &str = "node_publish_total";
const NODE_PUBLISH_ERROR_TOTAL: &str = "node_publish_error_total";
const NODE_UNPUBLISH_TOTAL: &str = "node_unpublish_total";
const NODE_UNPUBLISH_ERROR_TOTAL: &str = "node_unpublish_error_total";
const NODE_PUBLISH_DURATION: &str = "node_publish_duration_seconds";
const ROTATION_RECONCILE_TOTAL: &str = "rotation_reconcile_total";
const ROTATION_RECONCILE_ERROR_TOTAL: &str = "rotation_reconcile_error_total";
const ROTATION_RECONCILE_DURATION: &str = "rotation_reconcile_duration_seconds";
const PROVIDER_HEALTHY: &str = "provider_healthy";

/// Reports driver metrics through the global `metrics` recorder.
///
/// Without an installed exporter every call is a no-op, so tests construct
/// it freely.
#[derive(Debug, Clone)]
pub struct StatsReporter {
    node_id: String,
}

impl StatsReporter {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { node_id: node_id.into() }
    }

    /// Record a node publish outcome; `error_type` is the error's reason code
    pub fn report_node_publish(&self, provider: &str, duration: Duration, error_type: Option<&str>) {
        let labels = [("node_id", self.node_id.clone()), ("provider", provider.to_string())];
        counter!(NODE_PUBLISH_TOTAL, &labels).increment(1);
        histogram!(NODE_PUBLISH_DURATION, &labels).record(duration.as_secs_f64());

        if let Some(error_type) = error_type {
            let labels = [
                ("node_id", self.node_id.clone()),
                ("provider", provider.to_string()),
                ("error_type", error_type.to_string()),
            ];
            counter!(NODE_PUBLISH_ERROR_TOTAL, &labels).increment(1);
        }
    }

    pub fn report_node_unpublish(&self, error_type: Option<&str>) {
        let labels = [("node_id", self.node_id.clone())];
        counter!(NODE_UNPUBLISH_TOTAL, &labels).increment(1);

        if let Some(error_type) = error_type {
            let labels = [("node_id", self.node_id.clone()), ("error_type", error_type.to_string())];
            counter!(NODE_UNPUBLISH_ERROR_TOTAL, &labels).increment(1);
        }
    }

    /// Record one reconcile of a status record
    pub fn report_rotation(&self, duration: Duration, error_type: Option<&str>) {
        let labels = [("node_id", self.node_id.clone())];
        counter!(ROTATION_RECONCILE_TOTAL, &labels).increment(1);
        histogram!(ROTATION_RECONCILE_DURATION, &labels).record(duration.as_secs_f64());

        if let Some(error_type) = error_type {
            let labels = [("node_id", self.node_id.clone()), ("error_type", error_type.to_string())];
            counter!(ROTATION_RECONCILE_ERROR_TOTAL, &labels).increment(1);
        }
    }

    pub fn set_provider_health(&self, provider: &str, healthy: bool) {
        let labels = [("provider", provider.to_string())];
        gauge!(PROVIDER_HEALTHY, &labels).set(if healthy { 1.0 } else { 0.0 });
    }

    /// Register metric descriptions so exports appear before events occur.
    pub fn register_metrics(&self) {
        describe_counter!(NODE_PUBLISH_TOTAL, Unit::Count, "Number of node publish calls");
        describe_counter!(NODE_PUBLISH_ERROR_TOTAL, Unit::Count, "Number of failed node publish calls");
        describe_counter!(NODE_UNPUBLISH_TOTAL, Unit::Count, "Number of node unpublish calls");
        describe_counter!(
            NODE_UNPUBLISH_ERROR_TOTAL,
            Unit::Count,
            "Number of failed node unpublish calls"
        );
        describe_histogram!(NODE_PUBLISH_DURATION, Unit::Seconds, "Node publish duration");
        describe_counter!(ROTATION_RECONCILE_TOTAL, Unit::Count, "Number of rotation reconciles");
        describe_counter!(
            ROTATION_RECONCILE_ERROR_TOTAL,
            Unit::Count,
            "Number of failed rotation reconciles"
        );
        describe_histogram!(ROTATION_RECONCILE_DURATION, Unit::Seconds, "Rotation reconcile duration");
        describe_gauge!(PROVIDER_HEALTHY, "Provider Version health check result (1 = healthy)");
    }
}

/// Install the Prometheus exporter and describe the driver's metrics.
pub fn init_metrics(config: &ObservabilityConfig, reporter: &StatsReporter) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    reporter.register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}
