//! Provider side of the plugin contract.
//!
//! A [`SecretProvider`] is a backend capability. [`PluginServer`] exposes any
//! backend over the gRPC contract and [`serve_unix`] listens on the socket the
//! driver dials. Backends are registered by name in a [`ProviderFactoryRegistry`].

use crate::errors::{Error, Result};
use crate::proto::{
    CsiDriverProvider, CsiDriverProviderServer, MountRequest, MountResponse, VersionRequest,
    VersionResponse,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

/// A secret backend that can answer Mount requests.
#[async_trait]
pub trait SecretProvider: Send + Sync + 'static {
    /// Name the provider registers under and the socket it listens on
    fn name(&self) -> &str;

    /// Fetch the objects described by `request`.
    ///
    /// Backend-level failures that the driver should see as a provider error
    /// code belong in `MountResponse.error`; an `Err` surfaces as a transport
    /// failure.
    async fn mount(&self, request: MountRequest) -> Result<MountResponse>;

    fn runtime_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

type ProviderFactory = Arc<dyn Fn() -> Arc<dyn SecretProvider> + Send + Sync>;

/// Name-keyed constructors for secret backends.
#[derive(Default, Clone)]
pub struct ProviderFactoryRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn SecretProvider> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn SecretProvider>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::not_found("secret_provider", name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ProviderFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactoryRegistry").field("providers", &self.names()).finish()
    }
}

/// gRPC adapter from a [`SecretProvider`] to the plugin contract
#[derive(Clone)]
pub struct PluginServer {
    provider: Arc<dyn SecretProvider>,
}

impl PluginServer {
    pub fn new(provider: Arc<dyn SecretProvider>) -> Self {
        Self { provider }
    }

    pub fn into_service(self) -> CsiDriverProviderServer<Self> {
        CsiDriverProviderServer::new(self)
    }
}

#[tonic::async_trait]
impl CsiDriverProvider for PluginServer {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> std::result::Result<Response<VersionResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(VersionResponse {
            version: req.version,
            runtime_name: self.provider.name().to_string(),
            runtime_version: self.provider.runtime_version(),
        }))
    }

    async fn mount(
        &self,
        request: Request<MountRequest>,
    ) -> std::result::Result<Response<MountResponse>, Status> {
        let req = request.into_inner();
        debug!(provider = %self.provider.name(), target_path = %req.target_path, "Mount requested");

        if let Err(e) = validate_mount_request(&req) {
            debug!(provider = %self.provider.name(), error = %e, "Rejected malformed mount request");
            return Err(Status::invalid_argument(e.to_string()));
        }

        match self.provider.mount(req).await {
            Ok(response) => Ok(Response::new(response)),
            Err(Error::GrpcProvider { source: Some(status), .. }) => Err(*status),
            Err(e) => {
                warn!(provider = %self.provider.name(), error = %e, "Provider mount failed");
                Err(Status::from(e))
            }
        }
    }
}

/// Reject a Mount request the backend cannot act on: attributes and secrets
/// must be JSON objects, permission a JSON file mode, target path non-empty.
pub fn validate_mount_request(request: &MountRequest) -> Result<()> {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&request.attributes)
        .map_err(|e| Error::invalid_field(format!("failed to unmarshal attributes: {}", e), "attributes"))?;
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&request.secrets)
        .map_err(|e| Error::invalid_field(format!("failed to unmarshal secrets: {}", e), "secrets"))?;
    serde_json::from_str::<u32>(&request.permission)
        .map_err(|e| Error::invalid_field(format!("failed to unmarshal file permission: {}", e), "permission"))?;
    if request.target_path.is_empty() {
        return Err(Error::invalid_field("missing target path", "target_path"));
    }
    Ok(())
}

/// Serve `provider` on a unix socket until `shutdown` resolves.
///
/// A stale socket file from a previous run is removed first.
pub async fn serve_unix<F>(
    provider: Arc<dyn SecretProvider>,
    socket_path: &Path,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(path = %socket_path.display(), "Removed stale provider socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("failed to remove stale provider socket", e)),
    }

    let listener = UnixListener::bind(socket_path)
        .map_err(|e| Error::io(format!("failed to bind {}", socket_path.display()), e))?;

    info!(
        provider = %provider.name(),
        path = %socket_path.display(),
        "Provider plugin listening"
    );

    Server::builder()
        .add_service(PluginServer::new(provider).into_service())
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| Error::internal(format!("provider server failed: {}", e)))
}
