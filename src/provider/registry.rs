//! Lazily-dialed cache of provider clients, keyed by provider name.

use super::client::{ClientOptions, ProviderClient};
use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Concurrency-safe provider name -> client map.
///
/// Clients are created on first use and only evicted by [`ProviderRegistry::cleanup`].
#[derive(Debug)]
pub struct ProviderRegistry {
    provider_dir: PathBuf,
    options: ClientOptions,
    clients: RwLock<HashMap<String, Arc<ProviderClient>>>,
}

impl ProviderRegistry {
    pub fn new(provider_dir: impl Into<PathBuf>, options: ClientOptions) -> Self {
        Self { provider_dir: provider_dir.into(), options, clients: RwLock::new(HashMap::new()) }
    }

    pub fn provider_dir(&self) -> &Path {
        &self.provider_dir
    }

    /// Socket address of a provider: `<provider_dir>/<name>.sock`
    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.provider_dir.join(format!("{}.sock", name))
    }

    /// Return the cached client for `name`, dialing it on first use.
    ///
    /// Concurrent callers for the same name share a single dial.
    pub async fn get(&self, name: &str) -> Result<Arc<ProviderClient>> {
        if let Some(client) = self.clients.read().await.get(name) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        // another caller may have dialed while we waited for the write lock
        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }

        validate_provider_name(name)?;
        let address = self.socket_path(name);
        if !address.exists() {
            return Err(Error::provider_not_found(name, address));
        }

        let client = Arc::new(ProviderClient::connect(name, address, self.options.clone()).await?);
        clients.insert(name.to_string(), client.clone());
        info!(provider = %name, "Provider client created");

        Ok(client)
    }

    /// Every cached client, in no particular order
    pub async fn clients(&self) -> Vec<Arc<ProviderClient>> {
        self.clients.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Close and forget every cached client.
    pub async fn cleanup(&self) {
        let mut clients = self.clients.write().await;
        for (name, client) in clients.drain() {
            client.close();
            debug!(provider = %name, "Provider client released");
        }
    }
}

/// Reject names that are empty, reserved, or could escape the provider directory.
pub fn validate_provider_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_provider_name(name, "must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(Error::invalid_provider_name(name, "reserved name"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(Error::invalid_provider_name(name, "must not contain path separators"));
    }
    if name.contains("..") {
        return Err(Error::invalid_provider_name(name, "must not contain path traversal"));
    }
    if name.contains('\0') {
        return Err(Error::invalid_provider_name(name, "must not contain NUL"));
    }
    Ok(())
}
