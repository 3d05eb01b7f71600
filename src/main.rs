use std::sync::Arc;

use anyhow::Context;
use secrets_store_csi::{
    driver::{load_provider_classes, seed_provider_classes},
    node::SystemMounter,
    observability::{init_observability, log_config_info},
    platform::{MemoryPlatform, Platform},
    Driver, DriverConfig, APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists; must happen before config is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = DriverConfig::from_env().context("failed to load driver configuration")?;
    let reporter = init_observability(&config.observability, &config.node_id)
        .context("failed to initialize observability")?;

    info!(app_name = APP_NAME, version = VERSION, "Starting secrets store driver");
    log_config_info(&config);

    let memory = Arc::new(MemoryPlatform::new());
    if let Some(path) = &config.provider_classes_file {
        let classes = load_provider_classes(path)
            .with_context(|| format!("failed to load provider classes from {}", path.display()))?;
        let count = seed_provider_classes(&memory, classes).await;
        info!(count, path = %path.display(), "Loaded provider classes");
    }

    let driver =
        Driver::new(config, Platform::in_memory(memory), Arc::new(SystemMounter::new()), reporter);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };

    driver.run(shutdown).await.context("driver terminated with error")?;
    Ok(())
}
