//! In-memory implementation of every platform store.
//!
//! Used by the local binary and by tests, which also read its call counters
//! and script its failures.

use super::{
    MountStatusRecord, NativeSecret, ObjectVersionRecord, PodInfo, PodStore, ProviderClass,
    ProviderClassStore, SecretStore, StatusKey, StatusStore,
};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

type NamespacedKey = (String, String);

fn nk(namespace: &str, name: &str) -> NamespacedKey {
    (namespace.to_string(), name.to_string())
}

#[derive(Debug, Default)]
pub struct MemoryPlatform {
    records: RwLock<HashMap<StatusKey, MountStatusRecord>>,
    classes: RwLock<HashMap<NamespacedKey, ProviderClass>>,
    pods: RwLock<HashMap<NamespacedKey, PodInfo>>,
    secrets: RwLock<HashMap<NamespacedKey, NativeSecret>>,
    failing_patches: RwLock<HashSet<NamespacedKey>>,

    status_creates: AtomicU32,
    status_updates: AtomicU32,
    secret_patches: AtomicU32,
    pending_update_conflicts: AtomicU32,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_class(&self, class: ProviderClass) {
        self.classes.write().await.insert(nk(&class.namespace, &class.name), class);
    }

    pub async fn remove_class(&self, namespace: &str, name: &str) {
        self.classes.write().await.remove(&nk(namespace, name));
    }

    pub async fn insert_pod(&self, pod: PodInfo) {
        self.pods.write().await.insert(nk(&pod.namespace, &pod.name), pod);
    }

    pub async fn remove_pod(&self, namespace: &str, name: &str) {
        self.pods.write().await.remove(&nk(namespace, name));
    }

    pub async fn insert_secret(&self, secret: NativeSecret) {
        self.secrets.write().await.insert(nk(&secret.namespace, &secret.name), secret);
    }

    /// Overwrite or add a status record without touching the counters
    pub async fn insert_record(&self, record: MountStatusRecord) {
        self.records.write().await.insert(record.key(), record);
    }

    pub async fn remove_record(&self, key: &StatusKey) {
        self.records.write().await.remove(key);
    }

    pub async fn secret(&self, namespace: &str, name: &str) -> Option<NativeSecret> {
        self.secrets.read().await.get(&nk(namespace, name)).cloned()
    }

    /// The next `count` `update_objects` calls fail with `Conflict`
    pub fn fail_next_updates(&self, count: u32) {
        self.pending_update_conflicts.store(count, Ordering::SeqCst);
    }

    /// Every patch of this secret fails
    pub async fn fail_patches_for(&self, namespace: &str, name: &str) {
        self.failing_patches.write().await.insert(nk(namespace, name));
    }

    pub fn status_creates(&self) -> u32 {
        self.status_creates.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self) -> u32 {
        self.status_updates.load(Ordering::SeqCst)
    }

    pub fn secret_patches(&self) -> u32 {
        self.secret_patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusStore for MemoryPlatform {
    async fn create(&self, record: MountStatusRecord) -> Result<()> {
        self.status_creates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write().await;
        let key = record.key();
        if records.contains_key(&key) {
            return Err(Error::already_exists("mount_status", key.to_string()));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &StatusKey) -> Result<Option<MountStatusRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list_by_node(&self, node_name: &str) -> Result<Vec<MountStatusRecord>> {
        let mut records: Vec<MountStatusRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.node_name == node_name)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(records)
    }

    async fn update_objects(
        &self,
        key: &StatusKey,
        objects: Vec<ObjectVersionRecord>,
    ) -> Result<()> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);

        let conflict = self
            .pending_update_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(Error::conflict(
                format!("status record {} was modified concurrently", key),
                "mount_status",
            ));
        }

        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| Error::not_found("mount_status", key.to_string()))?;
        record.objects = objects;
        Ok(())
    }
}

#[async_trait]
impl ProviderClassStore for MemoryPlatform {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ProviderClass>> {
        Ok(self.classes.read().await.get(&nk(namespace, name)).cloned())
    }
}

#[async_trait]
impl PodStore for MemoryPlatform {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        Ok(self.pods.read().await.get(&nk(namespace, name)).cloned())
    }
}

#[async_trait]
impl SecretStore for MemoryPlatform {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<NativeSecret>> {
        Ok(self.secret(namespace, name).await)
    }

    async fn patch(&self, secret: NativeSecret) -> Result<()> {
        self.secret_patches.fetch_add(1, Ordering::SeqCst);
        let key = nk(&secret.namespace, &secret.name);

        if self.failing_patches.read().await.contains(&key) {
            return Err(Error::conflict(
                format!("patch of secret {}/{} rejected", secret.namespace, secret.name),
                "secret",
            ));
        }

        let mut secrets = self.secrets.write().await;
        let existing = secrets
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("secret", format!("{}/{}", key.0, key.1)))?;
        existing.data.extend(secret.data);
        existing.labels.extend(secret.labels);
        existing.annotations.extend(secret.annotations);
        if !secret.secret_type.is_empty() {
            existing.secret_type = secret.secret_type;
        }
        Ok(())
    }
}
