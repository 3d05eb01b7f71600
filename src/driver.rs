//! Wiring of the driver's long-running components.

use crate::config::DriverConfig;
use crate::errors::{Error, Result};
use crate::node::{Mounter, NodeServer};
use crate::observability::{HealthChecker, ProviderHealthProvider, StatsReporter};
use crate::platform::{MemoryPlatform, Platform, ProviderClass};
use crate::provider::{ClientOptions, ProviderRegistry};
use crate::rotation::Reconciler;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// The node server, the reconciler and the health checker sharing one
/// provider registry.
pub struct Driver {
    config: DriverConfig,
    registry: Arc<ProviderRegistry>,
    node_server: Arc<NodeServer>,
    reconciler: Arc<Reconciler>,
    health: HealthChecker,
    reporter: StatsReporter,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        platform: Platform,
        mounter: Arc<dyn Mounter>,
        reporter: StatsReporter,
    ) -> Self {
        let registry = Arc::new(ProviderRegistry::new(
            config.provider.provider_dir.clone(),
            ClientOptions::from(&config.provider),
        ));
        let node_server = Arc::new(NodeServer::new(
            config.node_id.clone(),
            registry.clone(),
            platform.clone(),
            mounter,
            config.provider.rpc_timeout(),
            reporter.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            config.node_id.clone(),
            registry.clone(),
            platform,
            config.rotation.clone(),
            config.provider.rpc_timeout(),
            reporter.clone(),
        ));

        Self { config, registry, node_server, reconciler, health: HealthChecker::new(), reporter }
    }

    pub fn node_server(&self) -> &Arc<NodeServer> {
        &self.node_server
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Run background loops until `shutdown` resolves, then release provider
    /// connections.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if self.config.rotation.enabled {
            let reconciler = self.reconciler.clone();
            let rx = stop_rx.clone();
            tasks.push(tokio::spawn(async move { reconciler.run(rx).await }));
        } else {
            info!("Rotation disabled");
        }

        if self.config.provider.health_check_enabled {
            self.health
                .register_provider(
                    "providers",
                    Arc::new(ProviderHealthProvider::new(self.registry.clone(), self.reporter.clone())),
                )
                .await;
            let health = self.health.clone();
            let interval = self.config.provider.health_check_interval();
            let rx = stop_rx.clone();
            tasks.push(tokio::spawn(async move { health.run(interval, rx).await }));
        }

        info!(node_id = %self.config.node_id, "Secrets store driver running");
        shutdown.await;
        info!("Shutdown signal received");

        stop_tx
            .send(true)
            .map_err(|_| Error::internal("background tasks exited before shutdown"))?;
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task panicked");
            }
        }

        self.registry.cleanup().await;
        info!("Secrets store driver stopped");
        Ok(())
    }
}

/// Read provider classes from a YAML list.
pub fn load_provider_classes(path: &Path) -> Result<Vec<ProviderClass>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))?;
    serde_yaml::from_str(&content).map_err(|e| {
        Error::config_with_source(format!("invalid provider classes in {}", path.display()), Box::new(e))
    })
}

/// Seed an in-memory platform with provider classes
pub async fn seed_provider_classes(platform: &MemoryPlatform, classes: Vec<ProviderClass>) -> usize {
    let count = classes.len();
    for class in classes {
        platform.insert_class(class).await;
    }
    count
}
