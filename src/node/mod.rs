//! # Node Volume Service
//!
//! Publish prepares a tmpfs mount, asks the provider for the volume's objects,
//! projects them atomically and records the mount for rotation. Unpublish
//! tears the mount down again.

pub mod mounter;

pub use mounter::{FakeMounter, Mounter, SystemMounter};

use crate::errors::{Error, Result};
use crate::fileutil;
use crate::observability::StatsReporter;
use crate::platform::{
    MountStatusRecord, ObjectVersionRecord, Platform, ProviderClass, ProviderClassStore, StatusStore,
};
use crate::provider::{MountOutcome, ProviderRegistry};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Volume attribute naming the provider class
pub const CSI_SECRET_PROVIDER_CLASS: &str = "secretProviderClass";
pub const CSI_POD_NAME: &str = "csi.storage.k8s.io/pod.name";
pub const CSI_POD_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";
pub const CSI_POD_UID: &str = "csi.storage.k8s.io/pod.uid";
pub const CSI_POD_SERVICE_ACCOUNT_NAME: &str = "csi.storage.k8s.io/serviceAccount.name";

/// Mode of files written into a mount
pub const DEFAULT_FILE_MODE: u32 = 0o644;

const TARGET_DIR_MODE: u32 = 0o750;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeCapability {
    pub mount_flags: Vec<String>,
    /// Group id that should own the projected files
    pub volume_mount_group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
    pub volume_capability: Option<VolumeCapability>,
    pub volume_context: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

/// Identity of the pod a volume is published for, taken from the volume context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub service_account: String,
}

impl PodIdentity {
    pub fn from_volume_context(context: &HashMap<String, String>) -> Self {
        let get = |key: &str| context.get(key).cloned().unwrap_or_default();
        Self {
            name: get(CSI_POD_NAME),
            namespace: get(CSI_POD_NAMESPACE),
            uid: get(CSI_POD_UID),
            service_account: get(CSI_POD_SERVICE_ACCOUNT_NAME),
        }
    }
}

/// Provider attributes: the class parameters plus the pod identity keys.
pub fn build_mount_attributes(
    class: &ProviderClass,
    pod: &PodIdentity,
) -> BTreeMap<String, String> {
    let mut attributes = class.parameters.clone();
    attributes.insert(CSI_POD_NAME.to_string(), pod.name.clone());
    attributes.insert(CSI_POD_NAMESPACE.to_string(), pod.namespace.clone());
    attributes.insert(CSI_POD_UID.to_string(), pod.uid.clone());
    attributes.insert(CSI_POD_SERVICE_ACCOUNT_NAME.to_string(), pod.service_account.clone());
    attributes
}

/// Call the provider for a mount and project the returned files.
///
/// Shared by publish and rotation. The whole provider call is bounded by
/// `rpc_timeout`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn mount_content(
    registry: &ProviderRegistry,
    provider_name: &str,
    attributes: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
    target_path: &Path,
    current_versions: &BTreeMap<String, String>,
    fs_group: Option<u32>,
    rpc_timeout: Duration,
) -> Result<MountOutcome> {
    let attributes = serde_json::to_string(attributes)?;
    let secrets = serde_json::to_string(secrets)?;
    let permission = serde_json::to_string(&DEFAULT_FILE_MODE)?;
    let target = target_path.to_string_lossy();

    let client = registry.get(provider_name).await?;
    let outcome = tokio::time::timeout(
        rpc_timeout,
        client.mount(&attributes, &secrets, &target, &permission, current_versions),
    )
    .await
    .map_err(|_| Error::timeout("provider_mount", rpc_timeout.as_millis() as u64))??;

    if !outcome.files.is_empty() {
        let target = target_path.to_path_buf();
        let files = outcome.files.clone();
        tokio::task::spawn_blocking(move || fileutil::write_payloads(&target, &files, fs_group))
            .await
            .map_err(|e| Error::internal(format!("payload writer task failed: {}", e)))??;
    }

    Ok(outcome)
}

/// Node-side volume publish/unpublish.
pub struct NodeServer {
    node_id: String,
    registry: Arc<ProviderRegistry>,
    platform: Platform,
    mounter: Arc<dyn Mounter>,
    rpc_timeout: Duration,
    reporter: StatsReporter,
}

impl NodeServer {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        platform: Platform,
        mounter: Arc<dyn Mounter>,
        rpc_timeout: Duration,
        reporter: StatsReporter,
    ) -> Self {
        Self { node_id: node_id.into(), registry, platform, mounter, rpc_timeout, reporter }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish a volume at `request.target_path`.
    ///
    /// A target that is already a mount point succeeds without calling the
    /// provider. Once tmpfs is mounted, any later failure unmounts it again.
    pub async fn node_publish_volume(&self, request: NodePublishVolumeRequest) -> Result<()> {
        let span = crate::volume_span!("node_publish", request.volume_id, request.target_path);
        let start = Instant::now();
        let mut provider_name = String::new();

        let result = self.publish(&request, &mut provider_name).instrument(span).await;

        self.reporter.report_node_publish(
            &provider_name,
            start.elapsed(),
            result.as_ref().err().map(|e| e.code()),
        );
        result
    }

    async fn publish(
        &self,
        request: &NodePublishVolumeRequest,
        provider_name: &mut String,
    ) -> Result<()> {
        // validate
        let capability = request
            .volume_capability
            .as_ref()
            .ok_or_else(|| Error::invalid_field("Volume capability missing in request", "volume_capability"))?;
        if request.volume_id.is_empty() {
            return Err(Error::invalid_field("Volume ID missing in request", "volume_id"));
        }
        if request.target_path.is_empty() {
            return Err(Error::invalid_field("Target path missing in request", "target_path"));
        }
        if request.volume_context.is_empty() {
            return Err(Error::invalid_field("Volume attributes missing in request", "volume_context"));
        }
        let fs_group = parse_mount_group(capability)?;
        let target_path = PathBuf::from(&request.target_path);

        // ensure mount point
        if self.ensure_mount_point(&target_path).await? {
            info!(target_path = %target_path.display(), "Target path is already mounted");
            return Ok(());
        }

        // resolve config
        let pod = PodIdentity::from_volume_context(&request.volume_context);
        let class_name = request
            .volume_context
            .get(CSI_SECRET_PROVIDER_CLASS)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::invalid_field("secretProviderClass is not set", CSI_SECRET_PROVIDER_CLASS)
            })?;
        let class = self
            .platform
            .classes
            .get(&pod.namespace, class_name)
            .await?
            .ok_or_else(|| {
                Error::not_found("secret_provider_class", format!("{}/{}", pod.namespace, class_name))
            })?;
        if class.provider.is_empty() {
            return Err(Error::invalid_field(
                format!("provider not set in secret provider class {}", class.name),
                "provider",
            ));
        }
        if class.parameters.is_empty() {
            return Err(Error::invalid_field(
                format!("parameters not set in secret provider class {}", class.name),
                "parameters",
            ));
        }
        *provider_name = class.provider.clone();

        if !request.readonly {
            return Err(Error::invalid_field("Readonly is not true in request", "readonly"));
        }

        self.mounter.mount_tmpfs(&target_path).await?;
        debug!(target_path = %target_path.display(), "Mounted tmpfs");

        let result = self.provision(request, &class, &pod, &target_path, fs_group).await;
        if let Err(e) = &result {
            error!(
                target_path = %target_path.display(),
                provider = %class.provider,
                error = %e,
                "Publish failed, unmounting target"
            );
            if let Err(unmount_err) = self.mounter.unmount(&target_path).await {
                error!(
                    target_path = %target_path.display(),
                    error = %unmount_err,
                    "Failed to unmount target after publish failure"
                );
            }
        }
        result
    }

    async fn provision(
        &self,
        request: &NodePublishVolumeRequest,
        class: &ProviderClass,
        pod: &PodIdentity,
        target_path: &Path,
        fs_group: Option<u32>,
    ) -> Result<()> {
        let attributes = build_mount_attributes(class, pod);
        let secrets: BTreeMap<String, String> =
            request.secrets.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let outcome = mount_content(
            &self.registry,
            &class.provider,
            &attributes,
            &secrets,
            target_path,
            &BTreeMap::new(),
            fs_group,
            self.rpc_timeout,
        )
        .await?;

        let record = MountStatusRecord {
            name: MountStatusRecord::record_name(&pod.name, &pod.namespace, &class.name),
            namespace: pod.namespace.clone(),
            pod_name: pod.name.clone(),
            pod_uid: pod.uid.clone(),
            target_path: request.target_path.clone(),
            provider_class: class.name.clone(),
            node_name: self.node_id.clone(),
            mounted: true,
            fs_group,
            objects: outcome
                .object_versions
                .iter()
                .map(|(id, version)| ObjectVersionRecord { id: id.clone(), version: version.clone() })
                .collect(),
        };
        match self.platform.status.create(record).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(pod = %pod.name, class = %class.name, "Mount status record already exists");
            }
            Err(e) => return Err(e),
        }

        info!(
            pod = %pod.name,
            namespace = %pod.namespace,
            provider = %class.provider,
            objects = outcome.object_versions.len(),
            files = outcome.files.len(),
            "Volume published"
        );
        Ok(())
    }

    /// Unpublish a volume: drop residual files if needed, unmount, remove the directory.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id, target_path = %request.target_path))]
    pub async fn node_unpublish_volume(&self, request: NodeUnpublishVolumeRequest) -> Result<()> {
        let result = self.unpublish(&request).await;
        self.reporter.report_node_unpublish(result.as_ref().err().map(|e| e.code()));
        result
    }

    async fn unpublish(&self, request: &NodeUnpublishVolumeRequest) -> Result<()> {
        if request.volume_id.is_empty() {
            return Err(Error::invalid_field("Volume ID missing in request", "volume_id"));
        }
        if request.target_path.is_empty() {
            return Err(Error::invalid_field("Target path missing in request", "target_path"));
        }
        let target_path = PathBuf::from(&request.target_path);

        if !self.mounter.unmount_clears_entries() {
            let target = target_path.clone();
            let cleanup = tokio::task::spawn_blocking(move || remove_dir_contents(&target)).await;
            match cleanup {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to remove residual files"),
                Err(e) => warn!(error = %e, "Residual file cleanup task failed"),
            }
        }

        self.mounter.unmount(&target_path).await?;

        match tokio::fs::remove_dir(&target_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::mount_io(&target_path, "failed to remove target directory", e)),
        }

        info!("Volume unpublished");
        Ok(())
    }

    /// Returns true when the target is already a mount point. Creates it when missing.
    async fn ensure_mount_point(&self, target_path: &Path) -> Result<bool> {
        match tokio::fs::metadata(target_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let target = target_path.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    fileutil::create_dir_all_with_mode(&target, TARGET_DIR_MODE)
                })
                .await
                .map_err(|e| Error::internal(format!("mkdir task failed: {}", e)))?
                .map_err(|e| Error::mount_io(target_path, "failed to create target directory", e))?;
                return Ok(false);
            }
            Err(e) => return Err(Error::mount_io(target_path, "failed to stat target path", e)),
        }
        self.mounter.is_mount_point(target_path).await
    }
}

fn parse_mount_group(capability: &VolumeCapability) -> Result<Option<u32>> {
    match capability.volume_mount_group.as_deref() {
        None | Some("") => Ok(None),
        Some(group) => group.parse::<u32>().map(Some).map_err(|_| {
            Error::invalid_field(
                format!("volume mount group {} is not a valid group id", group),
                "volume_mount_group",
            )
        }),
    }
}

fn remove_dir_contents(dir: &Path) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
