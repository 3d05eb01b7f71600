//! # Rotation Reconciler
//!
//! Periodically re-invokes the provider for every mount owned by this node,
//! rewrites the mounted files, records new object versions and refreshes
//! mirrored native secrets.

pub mod queue;
pub mod secrets;

pub use queue::WorkQueue;

use crate::config::RotationConfig;
use crate::errors::Error;
use crate::fileutil;
use crate::node::{build_mount_attributes, mount_content, PodIdentity};
use crate::observability::StatsReporter;
use crate::platform::{
    ObjectVersionRecord, Platform, PodStore, ProviderClass, ProviderClassStore, SecretStore,
    StatusKey, StatusStore,
};
use crate::provider::ProviderRegistry;
use crate::utils::{retry_with_backoff, RetryPolicy};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Why a reconcile failed; used as the metrics `error_type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    StatusLookupFailed,
    PodNotFound,
    ProviderClassNotFound,
    NodePublishSecretNotFound,
    ProviderCallFailed,
    StatusUpdateFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::StatusLookupFailed => "StatusLookupFailed",
            FailureReason::PodNotFound => "PodNotFound",
            FailureReason::ProviderClassNotFound => "ProviderClassNotFound",
            FailureReason::NodePublishSecretNotFound => "NodePublishSecretNotFound",
            FailureReason::ProviderCallFailed => "ProviderCallFailed",
            FailureReason::StatusUpdateFailed => "StatusUpdateFailed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{reason}: {source}")]
pub struct ReconcileError {
    pub reason: FailureReason,
    #[source]
    pub source: Error,
}

impl ReconcileError {
    fn new(reason: FailureReason, source: Error) -> Self {
        Self { reason, source }
    }
}

/// What a successful reconcile did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record no longer exists
    Dropped,
    /// Nothing to do for this record
    Skipped(&'static str),
    /// Provider was called; `updated` when any known object changed version
    Rotated { updated: bool },
}

pub struct Reconciler {
    node_id: String,
    registry: Arc<ProviderRegistry>,
    platform: Platform,
    queue: Arc<WorkQueue<StatusKey>>,
    config: RotationConfig,
    rpc_timeout: Duration,
    reporter: StatsReporter,
    status_policy: RetryPolicy,
    secret_policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        node_id: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        platform: Platform,
        config: RotationConfig,
        rpc_timeout: Duration,
        reporter: StatsReporter,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1000)));
        Self {
            node_id: node_id.into(),
            registry,
            platform,
            queue,
            config,
            rpc_timeout,
            reporter,
            status_policy: RetryPolicy::status_update(),
            secret_policy: RetryPolicy::status_update(),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<StatusKey>> {
        &self.queue
    }

    /// Run the ticker and the workers until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            node_id = %self.node_id,
            poll_interval_seconds = self.config.poll_interval_seconds,
            workers = self.config.workers,
            "Starting rotation reconciler"
        );

        let mut workers = Vec::with_capacity(self.config.workers.max(1));
        for worker_id in 0..self.config.workers.max(1) {
            let reconciler = Arc::clone(&self);
            workers.push(tokio::spawn(async move {
                while reconciler.process_next().await {}
                debug!(worker_id, "Rotation worker stopped");
            }));
        }

        self.run_ticker(shutdown).await;
        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Rotation worker panicked");
            }
        }
        info!("Rotation reconciler stopped");
    }

    async fn run_ticker(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.enqueue_all().await {
                        error!(error = %e, "Failed to list mount status records");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Queue every status record of this node. Returns how many were listed.
    pub async fn enqueue_all(&self) -> crate::errors::Result<usize> {
        let records = self.platform.status.list_by_node(&self.node_id).await?;
        let count = records.len();
        for record in records {
            self.queue.add(record.key());
        }
        debug!(count, "Queued mount status records for rotation");
        Ok(count)
    }

    /// Take one key off the queue and reconcile it. Returns false once the
    /// queue is shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let start = Instant::now();
        let result = self.reconcile(&key).instrument(crate::rotation_span!(key)).await;

        match &result {
            Ok(outcome) => {
                debug!(key = %key, outcome = ?outcome, "Reconcile finished");
                self.queue.forget(&key);
            }
            Err(e) => {
                warn!(
                    key = %key,
                    reason = %e.reason,
                    error = %e.source,
                    "Reconcile failed, requeueing"
                );
                self.queue.add_after(key.clone(), self.config.requeue_delay());
            }
        }
        self.reporter
            .report_rotation(start.elapsed(), result.as_ref().err().map(|e| e.reason.as_str()));

        self.queue.done(&key);
        true
    }

    /// Reconcile one status record.
    pub async fn reconcile(&self, key: &StatusKey) -> Result<ReconcileOutcome, ReconcileError> {
        // (1) load everything the provider call needs
        let record = match self.platform.status.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(key = %key, "Status record gone, dropping");
                return Ok(ReconcileOutcome::Dropped);
            }
            Err(e) => return Err(ReconcileError::new(FailureReason::StatusLookupFailed, e)),
        };
        if !record.mounted {
            return Ok(ReconcileOutcome::Skipped("not mounted"));
        }

        let pod = self
            .platform
            .pods
            .get(&record.namespace, &record.pod_name)
            .await
            .and_then(|pod| {
                pod.ok_or_else(|| {
                    Error::not_found("pod", format!("{}/{}", record.namespace, record.pod_name))
                })
            })
            .map_err(|e| ReconcileError::new(FailureReason::PodNotFound, e))?;
        if pod.terminating {
            return Ok(ReconcileOutcome::Skipped("pod terminating"));
        }
        if pod.uid != record.pod_uid {
            return Ok(ReconcileOutcome::Skipped("pod uid mismatch"));
        }

        let class = self
            .platform
            .classes
            .get(&record.namespace, &record.provider_class)
            .await
            .and_then(|class| {
                class.ok_or_else(|| {
                    Error::not_found(
                        "secret_provider_class",
                        format!("{}/{}", record.namespace, record.provider_class),
                    )
                })
            })
            .map_err(|e| ReconcileError::new(FailureReason::ProviderClassNotFound, e))?;

        let mut node_publish_secrets = BTreeMap::new();
        let secret_ref = pod
            .volume_for_class(&record.provider_class)
            .and_then(|volume| volume.node_publish_secret_ref.clone());
        if let Some(secret_name) = secret_ref {
            let secret = self
                .platform
                .secrets
                .get(&record.namespace, &secret_name)
                .await
                .and_then(|secret| {
                    secret.ok_or_else(|| {
                        Error::not_found("secret", format!("{}/{}", record.namespace, secret_name))
                    })
                })
                .map_err(|e| ReconcileError::new(FailureReason::NodePublishSecretNotFound, e))?;
            node_publish_secrets = secret.string_data();
        }

        // (2) prior versions
        let prior_versions = record.object_versions();

        // (3) call the provider and rewrite the mount
        let identity = PodIdentity {
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            uid: pod.uid.clone(),
            service_account: pod.service_account.clone(),
        };
        let attributes = build_mount_attributes(&class, &identity);
        let target_path = PathBuf::from(&record.target_path);
        let outcome = mount_content(
            &self.registry,
            &class.provider,
            &attributes,
            &node_publish_secrets,
            &target_path,
            &prior_versions,
            record.fs_group,
            self.rpc_timeout,
        )
        .await
        .map_err(|e| ReconcileError::new(FailureReason::ProviderCallFailed, e))?;

        // (4) only ids known on both sides count as a change
        let updated = requires_update(&prior_versions, &outcome.object_versions);
        if !updated {
            debug!(key = %key, "No object versions changed");
            return Ok(ReconcileOutcome::Rotated { updated: false });
        }

        // (5) persist the new versions
        let objects: Vec<ObjectVersionRecord> = outcome
            .object_versions
            .iter()
            .map(|(id, version)| ObjectVersionRecord { id: id.clone(), version: version.clone() })
            .collect();
        retry_with_backoff(&self.status_policy, "status_update_objects", Error::is_retryable, || {
            self.platform.status.update_objects(key, objects.clone())
        })
        .await
        .map_err(|e| ReconcileError::new(FailureReason::StatusUpdateFailed, e))?;

        info!(
            key = %key,
            provider = %class.provider,
            objects = objects.len(),
            "Rotated mounted content"
        );

        // (6) refresh mirrored secrets
        if !class.secret_objects.is_empty() {
            self.patch_mirrored_secrets(&class, &record.namespace, target_path).await;
        }

        Ok(ReconcileOutcome::Rotated { updated: true })
    }

    /// Patch each mirrored secret; failures are logged and skipped.
    async fn patch_mirrored_secrets(&self, class: &ProviderClass, namespace: &str, target: PathBuf) {
        let files = match tokio::task::spawn_blocking(move || fileutil::get_mounted_files(&target)).await {
            Ok(Ok(files)) => files,
            Ok(Err(e)) => {
                warn!(class = %class.name, error = %e, "Failed to list mounted files");
                return;
            }
            Err(e) => {
                warn!(class = %class.name, error = %e, "Mounted file listing task failed");
                return;
            }
        };

        for object in &class.secret_objects {
            if let Err(e) = secrets::validate_secret_object(object) {
                warn!(class = %class.name, error = %e, "Skipping invalid secret object");
                continue;
            }
            let secret = match secrets::build_native_secret(object, namespace, &files) {
                Ok(secret) => secret,
                Err(e) => {
                    warn!(secret = %object.secret_name, error = %e, "Failed to build secret data");
                    continue;
                }
            };

            let patched = retry_with_backoff(&self.secret_policy, "patch_secret", Error::is_retryable, || {
                self.platform.secrets.patch(secret.clone())
            })
            .await;
            match patched {
                Ok(()) => debug!(secret = %object.secret_name, "Patched mirrored secret"),
                Err(e) => warn!(secret = %object.secret_name, error = %e, "Failed to patch mirrored secret"),
            }
        }
    }
}

/// True when an object present in both maps reports a different version.
///
/// Objects the provider stops returning, or starts returning, do not count.
pub fn requires_update(prior: &BTreeMap<String, String>, current: &BTreeMap<String, String>) -> bool {
    current
        .iter()
        .any(|(id, version)| prior.get(id).is_some_and(|previous| previous != version))
}
