//! Common test utilities for integration tests
//!
//! Starts mock provider plugins on unix sockets inside a temp directory and
//! wires node servers and reconcilers against an in-memory platform.

#![allow(dead_code)]

use secrets_store_csi::config::RotationConfig;
use secrets_store_csi::node::{
    FakeMounter, NodePublishVolumeRequest, NodeServer, VolumeCapability, CSI_POD_NAME,
    CSI_POD_NAMESPACE, CSI_POD_SERVICE_ACCOUNT_NAME, CSI_POD_UID, CSI_SECRET_PROVIDER_CLASS,
};
use secrets_store_csi::observability::StatsReporter;
use secrets_store_csi::platform::{MemoryPlatform, Platform, PodInfo, PodVolume, ProviderClass};
use secrets_store_csi::provider::{
    serve_unix, ClientOptions, MockProvider, ProviderRegistry, SecretProvider,
};
use secrets_store_csi::rotation::Reconciler;
use secrets_store_csi::utils::RetryPolicy;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const NODE_ID: &str = "node-1";
pub const NAMESPACE: &str = "default";
pub const POD_NAME: &str = "web-0";
pub const POD_UID: &str = "uid-web-0";
pub const CLASS_NAME: &str = "db-secrets";
pub const PROVIDER: &str = "mock";

/// Retry policy with millisecond backoff so retry tests stay fast
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn fast_client_options() -> ClientOptions {
    ClientOptions {
        retry_policy: fast_retry_policy(),
        rpc_timeout: Duration::from_secs(5),
        max_message_size: 4 * 1024 * 1024,
    }
}

/// A provider plugin served on `<dir>/<name>.sock` until dropped
pub struct RunningProvider {
    pub socket_path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RunningProvider {
    /// Stop serving and wait for the server task to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RunningProvider {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve `provider` in the background and wait until its socket exists.
pub async fn start_provider(dir: &Path, provider: Arc<dyn SecretProvider>) -> RunningProvider {
    let socket_path = dir.join(format!("{}.sock", provider.name()));
    let (tx, rx) = oneshot::channel::<()>();

    let path = socket_path.clone();
    let handle = tokio::spawn(async move {
        serve_unix(provider, &path, async {
            let _ = rx.await;
        })
        .await
        .expect("provider server failed");
    });

    for _ in 0..200 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(socket_path.exists(), "provider socket never appeared");

    RunningProvider { socket_path, shutdown: Some(tx), handle: Some(handle) }
}

pub fn provider_class(parameters: &[(&str, &str)]) -> ProviderClass {
    ProviderClass {
        name: CLASS_NAME.to_string(),
        namespace: NAMESPACE.to_string(),
        provider: PROVIDER.to_string(),
        parameters: parameters.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        secret_objects: vec![],
    }
}

pub fn pod(node_publish_secret_ref: Option<&str>) -> PodInfo {
    PodInfo {
        name: POD_NAME.to_string(),
        namespace: NAMESPACE.to_string(),
        uid: POD_UID.to_string(),
        service_account: "web".to_string(),
        node_name: NODE_ID.to_string(),
        terminating: false,
        volumes: vec![PodVolume {
            provider_class: CLASS_NAME.to_string(),
            node_publish_secret_ref: node_publish_secret_ref.map(str::to_string),
        }],
    }
}

pub fn volume_context() -> HashMap<String, String> {
    HashMap::from([
        (CSI_SECRET_PROVIDER_CLASS.to_string(), CLASS_NAME.to_string()),
        (CSI_POD_NAME.to_string(), POD_NAME.to_string()),
        (CSI_POD_NAMESPACE.to_string(), NAMESPACE.to_string()),
        (CSI_POD_UID.to_string(), POD_UID.to_string()),
        (CSI_POD_SERVICE_ACCOUNT_NAME.to_string(), "web".to_string()),
    ])
}

pub fn publish_request(target: &Path) -> NodePublishVolumeRequest {
    NodePublishVolumeRequest {
        volume_id: "csi-vol-1".to_string(),
        target_path: target.to_string_lossy().into_owned(),
        volume_capability: Some(VolumeCapability::default()),
        volume_context: volume_context(),
        secrets: HashMap::new(),
        readonly: true,
    }
}

/// Node server, reconciler and a running mock provider sharing one platform
pub struct Harness {
    pub dir: TempDir,
    pub mock: Arc<MockProvider>,
    pub provider: Option<RunningProvider>,
    pub platform: Arc<MemoryPlatform>,
    pub mounter: Arc<FakeMounter>,
    pub registry: Arc<ProviderRegistry>,
    pub node: NodeServer,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    /// Everything wired with one mock provider serving `objects` as (id, version, contents)
    pub async fn new(objects: &[(&str, &str, &str)]) -> Self {
        Self::with_rotation(objects, RotationConfig::default()).await
    }

    pub async fn with_rotation(objects: &[(&str, &str, &str)], rotation: RotationConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let provider_dir = dir.path().join("providers");
        std::fs::create_dir_all(&provider_dir).expect("provider dir");

        let mock = MockProvider::new(PROVIDER);
        for (id, version, contents) in objects {
            mock.set_object(id, version, contents.as_bytes().to_vec());
        }
        let mock = Arc::new(mock);
        let provider = start_provider(&provider_dir, mock.clone()).await;

        let platform = Arc::new(MemoryPlatform::new());
        platform.insert_class(provider_class(&[("objects", "db-password")])).await;
        platform.insert_pod(pod(None)).await;

        let mounter = Arc::new(FakeMounter::new());
        let registry = Arc::new(ProviderRegistry::new(&provider_dir, fast_client_options()));
        let reporter = StatsReporter::new(NODE_ID);

        let node = NodeServer::new(
            NODE_ID,
            registry.clone(),
            Platform::in_memory(platform.clone()),
            mounter.clone(),
            Duration::from_secs(5),
            reporter.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(
            NODE_ID,
            registry.clone(),
            Platform::in_memory(platform.clone()),
            rotation,
            Duration::from_secs(5),
            reporter,
        ));

        Self {
            dir,
            mock,
            provider: Some(provider),
            platform,
            mounter,
            registry,
            node,
            reconciler,
        }
    }

    /// Target directory for a volume; not created
    pub fn target(&self) -> PathBuf {
        self.dir.path().join("pods").join(POD_UID).join("volumes").join("secrets")
    }

    /// Publish the default volume and return its target path
    pub async fn publish(&self) -> PathBuf {
        let target = self.target();
        self.node
            .node_publish_volume(publish_request(&target))
            .await
            .expect("publish should succeed");
        target
    }
}

pub fn read_file(target: &Path, name: &str) -> String {
    std::fs::read_to_string(target.join(name)).expect("mounted file")
}

pub fn versions(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(id, v)| (id.to_string(), v.to_string())).collect()
}
