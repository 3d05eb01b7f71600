//! # Platform Collaborators
//!
//! The driver reads pods, provider classes and node-publish secrets from the
//! host platform and persists mount status records back to it. Those stores
//! are modelled as traits; [`memory::MemoryPlatform`] implements all of them.

pub mod memory;

pub use memory::MemoryPlatform;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Secret type whose mirrored data is split into key and certificate
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
/// Label marking native secrets managed by the driver
pub const MANAGED_LABEL: &str = "secrets-store.csi.k8s.io/managed";

/// Which provider to call for a volume and with which parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderClass {
    pub name: String,
    pub namespace: String,
    pub provider: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_objects: Vec<SecretObject>,
}

/// A native secret to mirror from mounted files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretObject {
    pub secret_name: String,
    #[serde(rename = "type")]
    pub secret_type: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Vec<SecretObjectData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectData {
    /// Mounted file the value is read from
    pub object_name: String,
    /// Key in the native secret
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub service_account: String,
    pub node_name: String,
    pub terminating: bool,
    pub volumes: Vec<PodVolume>,
}

/// A secrets-store volume declared by a pod
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodVolume {
    pub provider_class: String,
    pub node_publish_secret_ref: Option<String>,
}

impl PodInfo {
    /// The volume backed by `provider_class`, if the pod declares one
    pub fn volume_for_class(&self, provider_class: &str) -> Option<&PodVolume> {
        self.volumes.iter().find(|v| v.provider_class == provider_class)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeSecret {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl NativeSecret {
    /// Secret values as strings, for passing to a provider
    pub fn string_data(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersionRecord {
    pub id: String,
    pub version: String,
}

/// Persisted outcome of one successful mount; the reconciler's work list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountStatusRecord {
    pub name: String,
    pub namespace: String,
    pub pod_name: String,
    pub pod_uid: String,
    pub target_path: String,
    pub provider_class: String,
    pub node_name: String,
    pub mounted: bool,
    /// Group that owns the mounted files; rotation rewrites keep it
    pub fs_group: Option<u32>,
    pub objects: Vec<ObjectVersionRecord>,
}

impl MountStatusRecord {
    /// Record name: `<pod>-<namespace>-<class>`
    pub fn record_name(pod_name: &str, namespace: &str, provider_class: &str) -> String {
        format!("{}-{}-{}", pod_name, namespace, provider_class)
    }

    pub fn key(&self) -> StatusKey {
        StatusKey::new(&self.namespace, &self.name)
    }

    /// object id -> version
    pub fn object_versions(&self) -> BTreeMap<String, String> {
        self.objects.iter().map(|o| (o.id.clone(), o.version.clone())).collect()
    }
}

/// `namespace/name` of a status record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey {
    pub namespace: String,
    pub name: String,
}

impl StatusKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string() }
    }
}

impl std::fmt::Display for StatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Mount status persistence
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fails with `AlreadyExists` if the record is present
    async fn create(&self, record: MountStatusRecord) -> Result<()>;

    async fn get(&self, key: &StatusKey) -> Result<Option<MountStatusRecord>>;

    async fn list_by_node(&self, node_name: &str) -> Result<Vec<MountStatusRecord>>;

    /// Replace the record's objects. May fail with `Conflict` on concurrent writes.
    async fn update_objects(&self, key: &StatusKey, objects: Vec<ObjectVersionRecord>)
        -> Result<()>;
}

#[async_trait]
pub trait ProviderClassStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ProviderClass>>;
}

#[async_trait]
pub trait PodStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NativeSecret>>;

    /// Merge `secret`'s data and labels into the existing native secret
    async fn patch(&self, secret: NativeSecret) -> Result<()>;
}

/// The set of stores the driver talks to
#[derive(Clone)]
pub struct Platform {
    pub status: Arc<dyn StatusStore>,
    pub classes: Arc<dyn ProviderClassStore>,
    pub pods: Arc<dyn PodStore>,
    pub secrets: Arc<dyn SecretStore>,
}

impl Platform {
    /// Every store backed by the same in-memory platform
    pub fn in_memory(platform: Arc<MemoryPlatform>) -> Self {
        Self {
            status: platform.clone(),
            classes: platform.clone(),
            pods: platform.clone(),
            secrets: platform,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
