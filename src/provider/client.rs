//! A single connection to one out-of-process provider plugin.

use crate::config::ProviderConfig;
use crate::errors::{Error, Result};
use crate::proto::{
    CsiDriverProviderClient, File, MountRequest, MountResponse, ObjectVersion, VersionRequest,
    VersionResponse, CONTRACT_VERSION,
};
use crate::utils::{retry_with_backoff, RetryPolicy};
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Request};
use tower::service_fn;
use tracing::{debug, instrument, warn};

/// Connection settings shared by every client the registry dials.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub retry_policy: RetryPolicy,
    pub rpc_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for ClientOptions {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            retry_policy: config.retry_policy(),
            rpc_timeout: config.rpc_timeout(),
            max_message_size: config.max_message_size,
        }
    }
}

/// What a successful Mount call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountOutcome {
    /// object id -> version, as reported by the provider
    pub object_versions: BTreeMap<String, String>,
    pub files: Vec<File>,
}

/// Client for one provider plugin, reachable over a unix socket.
///
/// Immutable once dialed apart from the closed flag.
#[derive(Debug)]
pub struct ProviderClient {
    name: String,
    address: PathBuf,
    client: CsiDriverProviderClient<Channel>,
    options: ClientOptions,
    closed: AtomicBool,
}

impl ProviderClient {
    /// Dial the provider listening on `address`.
    pub async fn connect(
        name: impl Into<String>,
        address: impl Into<PathBuf>,
        options: ClientOptions,
    ) -> Result<Self> {
        let name = name.into();
        let address = address.into();

        // the authority is ignored, every connection goes to the socket
        let endpoint = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| Error::internal(format!("invalid endpoint: {}", e)))?
            .timeout(options.rpc_timeout);

        let socket = address.clone();
        let channel = endpoint
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket = socket.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
            }))
            .await
            .map_err(|e| {
                if !address.exists() {
                    Error::provider_not_found(name.clone(), address.clone())
                } else {
                    Error::grpc_provider(format!("failed to dial provider {}: {}", name, e))
                }
            })?;

        let client = CsiDriverProviderClient::new(channel)
            .max_decoding_message_size(options.max_message_size)
            .max_encoding_message_size(options.max_message_size);

        debug!(provider = %name, address = %address.display(), "Connected to provider");

        Ok(Self { name, address, client, options, closed: AtomicBool::new(false) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Path {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the client closed. The connection is released once the last
    /// reference is dropped; further calls fail fast.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(provider = %self.name, "Provider client closed");
        }
    }

    /// Ask the provider for the objects behind a mount.
    ///
    /// `attributes` and `secrets` are JSON objects, `permission` the
    /// JSON-encoded file mode. Transport failures with `Unavailable` are
    /// retried per the client's policy.
    #[instrument(skip(self, attributes, secrets, current_versions), fields(provider = %self.name))]
    pub async fn mount(
        &self,
        attributes: &str,
        secrets: &str,
        target_path: &str,
        permission: &str,
        current_versions: &BTreeMap<String, String>,
    ) -> Result<MountOutcome> {
        self.ensure_open()?;

        let request = MountRequest {
            attributes: attributes.to_string(),
            secrets: secrets.to_string(),
            target_path: target_path.to_string(),
            permission: permission.to_string(),
            current_object_version: current_versions
                .iter()
                .map(|(id, version)| ObjectVersion { id: id.clone(), version: version.clone() })
                .collect(),
        };

        let rpc_timeout = self.options.rpc_timeout;
        let response = retry_with_backoff(
            &self.options.retry_policy,
            "provider_mount",
            |status: &tonic::Status| status.code() == Code::Unavailable,
            || {
                let mut client = self.client.clone();
                let mut req = Request::new(request.clone());
                req.set_timeout(rpc_timeout);
                async move { client.mount(req).await.map(|r| r.into_inner()) }
            },
        )
        .await
        .map_err(|status| {
            warn!(provider = %self.name, code = ?status.code(), "Mount RPC failed");
            Error::grpc_status(format!("provider {} mount failed", self.name), status)
        })?;

        interpret_mount_response(response)
    }

    /// Call the provider's Version RPC.
    pub async fn version(&self) -> Result<VersionResponse> {
        self.ensure_open()?;

        let mut client = self.client.clone();
        let mut req = Request::new(VersionRequest { version: CONTRACT_VERSION.to_string() });
        req.set_timeout(self.options.rpc_timeout);

        client.version(req).await.map(|r| r.into_inner()).map_err(|status| {
            Error::grpc_status(format!("provider {} version failed", self.name), status)
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::grpc_provider(format!("provider client {} is closed", self.name)));
        }
        Ok(())
    }
}

/// Turn a raw Mount response into versions and files, rejecting responses
/// that carry an error code, no object versions, or a repeated object id.
pub fn interpret_mount_response(response: MountResponse) -> Result<MountOutcome> {
    if let Some(error) = response.error.as_ref() {
        if !error.code.is_empty() {
            return Err(Error::provider_error(error.code.clone()));
        }
    }

    if response.object_version.is_empty() {
        return Err(Error::grpc_provider("missing object versions"));
    }

    let mut object_versions = BTreeMap::new();
    for ov in response.object_version {
        if object_versions.contains_key(&ov.id) {
            return Err(Error::grpc_provider(format!("duplicate object id in response: {}", ov.id)));
        }
        object_versions.insert(ov.id, ov.version);
    }

    Ok(MountOutcome { object_versions, files: response.files })
}
