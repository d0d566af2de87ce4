//! Deploy orchestration.
//!
//! A deploy publishes one [`AssetSnapshot`] to the origin and then purges the
//! edge cache. Viewers must never be told to refetch before the origin holds
//! the new content, so the steps run strictly in order:
//!
//! 1. take the per-target lock;
//! 2. upload every file, bounded fan-out, each with retry; join all of them;
//! 3. if any upload failed, stop: nothing is invalidated;
//! 4. prune objects the new snapshot dropped;
//! 5. plan and submit the invalidation, with retry;
//! 6. write the new manifest.
//!
//! A purge that still fails after retries does not fail the deploy. The origin
//! already serves the new site; the report carries
//! [`InvalidationOutcome::Deferred`] and the manifest records the unpurged
//! paths, which the next deploy adds to its own invalidation.

use crate::config::{DeployConfig, MANIFEST_KEY};
use crate::error::{DeployError, EdgeCacheError, Result, SnapshotError, StorageError};
use crate::metrics::DeployMetrics;
use crate::services::deploy_lock::DeployLocks;
use crate::services::edge_cache::EdgeCache;
use crate::services::invalidation::{InvalidationPlanner, InvalidationRequest};
use crate::services::storage::StorageTarget;
use crate::snapshot::{AssetFile, AssetSnapshot, SnapshotManifest};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use resilience::{presets, with_retry_if, with_timeout_result, RetryError, ServiceConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tuning for one [`DeployInvalidator`]
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub upload_concurrency: usize,
    pub prune: bool,
    pub upload: ServiceConfig,
    pub invalidation: ServiceConfig,
    pub manifest_key: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            upload_concurrency: 8,
            prune: true,
            upload: presets::object_storage_config(),
            invalidation: presets::edge_invalidation_config(),
            manifest_key: MANIFEST_KEY.to_string(),
        }
    }
}

impl DeployOptions {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            upload_concurrency: config.upload_concurrency.max(1),
            prune: config.prune,
            upload: config.upload_policy(),
            invalidation: config.invalidation_policy(),
            manifest_key: config.manifest_key.clone(),
        }
    }
}

/// What happened to the edge purge of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvalidationOutcome {
    /// Accepted by the edge; completes asynchronously
    Issued { invalidation_id: String },
    /// Not accepted; the origin is updated but cached copies may be stale
    Deferred { reason: String },
}

impl InvalidationOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, InvalidationOutcome::Issued { .. })
    }
}

/// Summary of a successful deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub deploy_id: Uuid,
    pub target: String,
    pub uploaded: usize,
    /// Keys deleted from the origin because the snapshot dropped them
    pub pruned: Vec<String>,
    pub invalidation: InvalidationRequest,
    pub outcome: InvalidationOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Publishes snapshots to one storage target and purges one edge cache
pub struct DeployInvalidator {
    storage: Arc<dyn StorageTarget>,
    edge: Arc<dyn EdgeCache>,
    planner: InvalidationPlanner,
    options: DeployOptions,
    locks: DeployLocks,
}

impl DeployInvalidator {
    pub fn new(
        storage: Arc<dyn StorageTarget>,
        edge: Arc<dyn EdgeCache>,
        planner: InvalidationPlanner,
        options: DeployOptions,
    ) -> Self {
        Self {
            storage,
            edge,
            planner,
            options,
            locks: DeployLocks::new(),
        }
    }

    /// Share a lock registry with other invalidators in the process
    pub fn with_locks(mut self, locks: DeployLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    /// Manifest of the last successful deploy, `None` on first deploy
    ///
    /// An unreadable manifest is treated as absent, which makes the next
    /// invalidation purge everything.
    pub async fn load_previous_manifest(&self) -> Result<Option<SnapshotManifest>> {
        let key = self.options.manifest_key.as_str();
        let raw = with_retry_if(&self.options.upload.retry, StorageError::is_retryable, || {
            with_timeout_result(self.options.upload.timeout.duration, self.storage.get(key))
        })
        .await
        .map_err(RetryError::into_inner)?;

        let Some(raw) = raw else {
            info!(origin = %self.storage.id(), "No previous manifest");
            return Ok(None);
        };

        match SnapshotManifest::from_json(&raw) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable manifest");
                Ok(None)
            }
        }
    }

    /// Deploy against the manifest of the last successful deploy
    ///
    /// The manifest is read under the target lock, so concurrent publishes
    /// each diff against the deploy that ran before them.
    pub async fn publish(&self, snapshot: &AssetSnapshot) -> Result<DeployReport> {
        self.check_snapshot(snapshot)?;

        let target = self.storage.id();
        let guard = self.locks.acquire(&target).await;
        let previous = self.load_previous_manifest().await?;

        self.deploy_locked(snapshot, previous.as_ref(), target, guard)
            .await
    }

    /// Publish `snapshot` and invalidate the edge paths it changes
    pub async fn deploy(
        &self,
        snapshot: &AssetSnapshot,
        previous: Option<&SnapshotManifest>,
    ) -> Result<DeployReport> {
        self.check_snapshot(snapshot)?;

        let target = self.storage.id();
        let guard = self.locks.acquire(&target).await;

        self.deploy_locked(snapshot, previous, target, guard).await
    }

    fn check_snapshot(&self, snapshot: &AssetSnapshot) -> Result<()> {
        snapshot.validate()?;
        if snapshot.get(&self.options.manifest_key).is_some() {
            return Err(SnapshotError::InvalidPath(self.options.manifest_key.clone()).into());
        }
        Ok(())
    }

    async fn deploy_locked(
        &self,
        snapshot: &AssetSnapshot,
        previous: Option<&SnapshotManifest>,
        target: String,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<DeployReport> {
        let deploy_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();

        info!(
            deploy_id = %deploy_id,
            origin = %target,
            files = snapshot.len(),
            bytes = snapshot.total_size(),
            first_deploy = previous.is_none(),
            "Deploy started"
        );

        let uploaded = self.upload_all(snapshot).await.map_err(|e| {
            error!(deploy_id = %deploy_id, error = %e, "Deploy aborted before invalidation");
            DeployMetrics::record_invalidation("skipped");
            e
        })?;

        let pruned = match previous {
            Some(previous) if self.options.prune => self.prune(snapshot, previous).await,
            _ => Vec::new(),
        };

        let diff = previous.map(|previous| snapshot.diff(previous));
        let carried = previous
            .map(|previous| previous.pending_invalidation.clone())
            .unwrap_or_default();
        if !carried.is_empty() {
            info!(deploy_id = %deploy_id, paths = carried.len(), "Carrying deferred invalidation");
        }
        let request = InvalidationRequest::new(self.planner.plan_with(diff.as_ref(), &carried));
        let outcome = self.invalidate(&request).await;

        let mut manifest = snapshot.manifest();
        if !outcome.is_issued() {
            manifest.pending_invalidation = request.path_patterns.clone();
        }
        self.write_manifest(&manifest).await;

        let finished_at = Utc::now();
        DeployMetrics::record_duration(timer.elapsed().as_secs_f64());

        info!(
            deploy_id = %deploy_id,
            origin = %target,
            uploaded,
            pruned = pruned.len(),
            paths = request.len(),
            invalidated = outcome.is_issued(),
            "Deploy finished"
        );

        Ok(DeployReport {
            deploy_id,
            target,
            uploaded,
            pruned,
            invalidation: request,
            outcome,
            started_at,
            finished_at,
        })
    }

    async fn put_with_retry(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> std::result::Result<(), StorageError> {
        let policy = &self.options.upload;
        with_retry_if(&policy.retry, StorageError::is_retryable, || {
            with_timeout_result(
                policy.timeout.duration,
                self.storage.put(key, body.clone(), content_type),
            )
        })
        .await
        .map_err(RetryError::into_inner)
    }

    /// Upload every file; all uploads finish before this returns
    async fn upload_all(&self, snapshot: &AssetSnapshot) -> Result<usize> {
        let total = snapshot.len();

        let results: Vec<(&String, std::result::Result<(), StorageError>)> =
            stream::iter(snapshot.files())
                .map(|(key, file): (&String, &AssetFile)| async move {
                    let result = self
                        .put_with_retry(key, file.content.clone(), &file.content_type)
                        .await;
                    (key, result)
                })
                .buffer_unordered(self.options.upload_concurrency)
                .collect()
                .await;

        let mut failures = BTreeMap::new();
        for (key, result) in results {
            match result {
                Ok(()) => {
                    DeployMetrics::record_upload("success");
                    debug!(key = %key, "Uploaded");
                }
                Err(e) => {
                    DeployMetrics::record_upload("failure");
                    warn!(key = %key, error = %e, "Upload failed");
                    failures.insert(key.clone(), e);
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(total),
            Some((key, source)) => Err(DeployError::Upload {
                failed,
                total,
                key,
                source,
            }),
        }
    }

    /// Delete keys the previous deploy published and this one does not
    async fn prune(&self, snapshot: &AssetSnapshot, previous: &SnapshotManifest) -> Vec<String> {
        let policy = &self.options.upload;
        let mut pruned = Vec::new();

        for key in previous.files.keys().filter(|key| snapshot.get(key).is_none()) {
            let result = with_retry_if(&policy.retry, StorageError::is_retryable, || {
                with_timeout_result(policy.timeout.duration, self.storage.delete(key))
            })
            .await;

            match result {
                Ok(()) => {
                    debug!(key = %key, "Pruned");
                    pruned.push(key.clone());
                }
                Err(e) => warn!(key = %key, error = %e, "Prune failed, leaving object in place"),
            }
        }

        pruned
    }

    async fn write_manifest(&self, manifest: &SnapshotManifest) {
        let body = match manifest.to_json() {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(error = %e, "Cannot encode manifest");
                return;
            }
        };

        if let Err(e) = self
            .put_with_retry(&self.options.manifest_key, body, mime::APPLICATION_JSON.as_ref())
            .await
        {
            warn!(
                key = %self.options.manifest_key,
                error = %e,
                "Manifest not written, next deploy will purge everything"
            );
        }
    }

    /// Submit the purge; the same request, and so the same caller reference,
    /// is sent on every attempt
    async fn invalidate(&self, request: &InvalidationRequest) -> InvalidationOutcome {
        let policy = &self.options.invalidation;
        let result = with_retry_if(&policy.retry, EdgeCacheError::is_retryable, || {
            with_timeout_result(policy.timeout.duration, self.edge.invalidate(request))
        })
        .await;

        match result {
            Ok(invalidation_id) => {
                DeployMetrics::record_invalidation("issued");
                info!(
                    invalidation_id = %invalidation_id,
                    caller_reference = %request.caller_reference,
                    paths = request.len(),
                    "Invalidation issued"
                );
                InvalidationOutcome::Issued { invalidation_id }
            }
            Err(e) => {
                DeployMetrics::record_invalidation("deferred");
                let attempts = e.attempts();
                let reason = e.into_inner().to_string();
                warn!(
                    attempts,
                    caller_reference = %request.caller_reference,
                    reason = %reason,
                    "Invalidation deferred, edge may serve stale content"
                );
                InvalidationOutcome::Deferred { reason }
            }
        }
    }
}
