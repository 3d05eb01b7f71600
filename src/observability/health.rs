//! # Health Checking
//!
//! Periodic health checks for the driver's dependencies. Provider plugins are
//! checked through their Version RPC.

use crate::errors::Result;
use crate::observability::StatsReporter;
use crate::provider::ProviderRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Health status for a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Component is healthy and operational
    Healthy,
    /// Component is degraded but still functional
    Degraded { message: String },
    /// Component is unhealthy and not functional
    Unhealthy { message: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded { message } | HealthStatus::Unhealthy { message } => Some(message),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, String>,
}

impl HealthCheck {
    pub fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            last_check: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    pub fn degraded<S: Into<String>>(component: impl Into<String>, message: S) -> Self {
        Self::new(component, HealthStatus::Degraded { message: message.into() })
    }

    pub fn unhealthy<S: Into<String>>(component: impl Into<String>, message: S) -> Self {
        Self::new(component, HealthStatus::Unhealthy { message: message.into() })
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Component that can report its own health
#[async_trait]
pub trait HealthProvider: Send + Sync {
    async fn health_check(&self) -> Result<HealthCheck>;
}

/// Central health checker that manages health checks for all components
#[derive(Clone)]
pub struct HealthChecker {
    providers: Arc<RwLock<HashMap<String, Arc<dyn HealthProvider>>>>,
    cache: Arc<RwLock<HashMap<String, HealthCheck>>>,
    instance_id: String,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn register_provider<S: Into<String>>(&self, name: S, provider: Arc<dyn HealthProvider>) {
        self.providers.write().await.insert(name.into(), provider);
    }

    /// Run every registered check and cache the results
    pub async fn check_all(&self) -> HashMap<String, HealthCheck> {
        let providers: Vec<(String, Arc<dyn HealthProvider>)> = self
            .providers
            .read()
            .await
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect();

        let mut results = HashMap::new();
        for (name, provider) in providers {
            let check = match provider.health_check().await {
                Ok(check) => check,
                Err(e) => HealthCheck::unhealthy(name.clone(), format!("Health check failed: {}", e)),
            };
            results.insert(name, check);
        }

        self.cache.write().await.extend(results.clone());
        results
    }

    /// Aggregate status across all components
    pub async fn overall_status(&self) -> HealthStatus {
        let checks = self.check_all().await;

        if checks.is_empty() {
            return HealthStatus::Degraded { message: "No health providers registered".to_string() };
        }

        let mut unhealthy_count = 0;
        let mut degraded_count = 0;
        for check in checks.values() {
            match &check.status {
                HealthStatus::Healthy => {}
                HealthStatus::Degraded { .. } => degraded_count += 1,
                HealthStatus::Unhealthy { .. } => unhealthy_count += 1,
            }
        }

        if unhealthy_count > 0 {
            HealthStatus::Unhealthy {
                message: format!(
                    "{} unhealthy, {} degraded out of {} components",
                    unhealthy_count,
                    degraded_count,
                    checks.len()
                ),
            }
        } else if degraded_count > 0 {
            HealthStatus::Degraded {
                message: format!("{} degraded out of {} components", degraded_count, checks.len()),
            }
        } else {
            HealthStatus::Healthy
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.overall_status().await.is_operational()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn get_cached_checks(&self) -> HashMap<String, HealthCheck> {
        self.cache.read().await.clone()
    }

    /// Check every `interval` until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.overall_status().await {
                        HealthStatus::Healthy => debug!("Health check passed"),
                        status => warn!(message = status.message().unwrap_or_default(), "Health check not healthy"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health checker stopping");
                        return;
                    }
                }
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls every cached provider client with the Version RPC.
pub struct ProviderHealthProvider {
    registry: Arc<ProviderRegistry>,
    reporter: StatsReporter,
}

impl ProviderHealthProvider {
    pub fn new(registry: Arc<ProviderRegistry>, reporter: StatsReporter) -> Self {
        Self { registry, reporter }
    }
}

#[async_trait]
impl HealthProvider for ProviderHealthProvider {
    async fn health_check(&self) -> Result<HealthCheck> {
        let clients = self.registry.clients().await;
        let total = clients.len();
        let mut failed = Vec::new();

        let answers = join_all(clients.iter().map(|client| client.version())).await;
        for (client, answer) in clients.iter().zip(answers) {
            match answer {
                Ok(version) => {
                    self.reporter.set_provider_health(client.name(), true);
                    debug!(
                        provider = %client.name(),
                        runtime_version = %version.runtime_version,
                        "Provider healthy"
                    );
                }
                Err(e) => {
                    self.reporter.set_provider_health(client.name(), false);
                    warn!(provider = %client.name(), error = %e, "Provider health check failed");
                    failed.push(client.name().to_string());
                }
            }
        }

        let check = if failed.is_empty() {
            HealthCheck::healthy("providers")
        } else if failed.len() == total {
            HealthCheck::unhealthy("providers", format!("all providers failed: {}", failed.join(", ")))
        } else {
            HealthCheck::degraded("providers", format!("providers failed: {}", failed.join(", ")))
        };
        Ok(check.with_metadata("provider_count", total.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ClientOptions;

    struct MockHealthProvider {
        status: HealthStatus,
    }

    #[async_trait]
    impl HealthProvider for MockHealthProvider {
        async fn health_check(&self) -> Result<HealthCheck> {
            Ok(HealthCheck::new("mock", self.status.clone()))
        }
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Healthy.message().is_none());

        let degraded = HealthStatus::Degraded { message: "slow".to_string() };
        assert!(!degraded.is_healthy());
        assert!(degraded.is_operational());
        assert_eq!(degraded.message(), Some("slow"));

        let unhealthy = HealthStatus::Unhealthy { message: "down".to_string() };
        assert!(!unhealthy.is_operational());
    }

    #[tokio::test]
    async fn test_health_checker_aggregation() {
        let checker = HealthChecker::new();
        assert!(matches!(checker.overall_status().await, HealthStatus::Degraded { .. }));

        checker
            .register_provider("a", Arc::new(MockHealthProvider { status: HealthStatus::Healthy }))
            .await;
        assert!(checker.overall_status().await.is_healthy());

        checker
            .register_provider(
                "b",
                Arc::new(MockHealthProvider {
                    status: HealthStatus::Unhealthy { message: "down".into() },
                }),
            )
            .await;
        assert!(!checker.is_ready().await);
        assert_eq!(checker.get_cached_checks().await.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_health_with_no_clients() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(ProviderRegistry::new(dir.path(), ClientOptions::default()));
        let provider = ProviderHealthProvider::new(registry, StatsReporter::new("node"));
        let check = provider.health_check().await.unwrap();
        assert!(check.status.is_healthy());
        assert_eq!(check.metadata["provider_count"], "0");
    }
}
