//! Archival manager: location registry, archive store maintenance, and a
//! worker pool for copy-to-location jobs.
//!
//! Unlike the cleanup engine, whose jobs only mutate source data in place,
//! every successful archival job produces durable output: an artifact at a
//! named location plus a companion metadata record written alongside it.
//! The two engines run independent queues and worker pools so a slow
//! archival write never starves fast deletes.
//!
//! Archival jobs are not auto-retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use uuid::Uuid;

use common::config::ArchivalConfig;
use common::model::job::{Job, JobCompletion, JobKind, JobResult, JobStatus};
use common::model::location::{ArchivalLocation, LocationKind};
use common::model::policy::{ArchivalStrategyKind, DataType, RetentionPolicy};
use common::strategy::{ArchivalOutcome, ArchivalStrategy};

use crate::metrics::{EngineMetrics, EngineStatistics};

/// Suffix pairing a metadata record with its artifact.
const METADATA_SUFFIX: &str = ".meta.json";

/// Closed dispatch table for the archival strategy family
/// (archive/compress/sample/aggregate). `Delete` has no entry: a delete
/// policy submitted here fails its job with a configuration error.
pub type ArchivalRegistry = HashMap<ArchivalStrategyKind, Arc<dyn ArchivalStrategy>>;

/// Companion record written alongside every artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub policy_name: String,
    pub data_type: DataType,
    pub strategy: ArchivalStrategyKind,
    pub original_records: u64,
    pub archived_records: u64,
    pub compression_ratio: f64,
    pub created_at: DateTime<Utc>,
    /// FNV-1a 64 hash of the artifact payload, hex-encoded.
    pub checksum: String,
}

/// One artifact with its paired metadata (if the pair file exists and
/// parses).
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub artifact_path: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub metadata: Option<ArchiveMetadata>,
}

impl ArchiveEntry {
    /// Age basis for retention pruning: the metadata timestamp when
    /// available, the store's last-modified time otherwise.
    fn created_at(&self) -> DateTime<Utc> {
        self.metadata
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.last_modified)
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("unknown archival location '{0}'")]
    UnknownLocation(String),

    #[error("archival location '{0}' already exists")]
    DuplicateLocation(String),

    #[error("failed to prepare location directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("metadata encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

struct Inner {
    config: ArchivalConfig,
    registry: ArchivalRegistry,
    jobs: RwLock<HashMap<Uuid, Job>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
    locations: RwLock<HashMap<String, ArchivalLocation>>,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    metrics: EngineMetrics,
    completions: Option<mpsc::UnboundedSender<JobCompletion>>,
}

impl Inner {
    fn notify_completion(&self, policy_name: &str, result: &JobResult) {
        if let Some(tx) = &self.completions {
            let _ = tx.send(JobCompletion {
                policy_name: policy_name.to_string(),
                result: result.clone(),
            });
        }
    }
}

/// Bounded worker pool producing archive artifacts, plus management of the
/// archive store itself.
pub struct ArchivalManager {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl ArchivalManager {
    /// Create a manager whose default location is a local-filesystem
    /// directory taken from the configuration.
    pub fn new(config: ArchivalConfig, registry: ArchivalRegistry) -> Result<Self, ArchiveError> {
        let default_location = {
            let mut location = ArchivalLocation::default_local(&config.default_location_path);
            location.retention_days = config.default_location_retention_days;
            location
        };
        Self::with_default_location(config, registry, default_location)
    }

    /// Create a manager with an in-memory default location. Intended for
    /// tests and ephemeral runs.
    pub fn new_in_memory(
        config: ArchivalConfig,
        registry: ArchivalRegistry,
    ) -> Result<Self, ArchiveError> {
        let mut location = ArchivalLocation::new(
            common::model::location::DEFAULT_LOCATION_NAME,
            LocationKind::Memory,
            "",
        );
        location.retention_days = config.default_location_retention_days;
        Self::with_default_location(config, registry, location)
    }

    fn with_default_location(
        config: ArchivalConfig,
        registry: ArchivalRegistry,
        default_location: ArchivalLocation,
    ) -> Result<Self, ArchiveError> {
        let store = build_store(&default_location)?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let mut locations = HashMap::new();
        let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
        stores.insert(default_location.name.clone(), store);
        locations.insert(default_location.name.clone(), default_location);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                jobs: RwLock::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                locations: RwLock::new(locations),
                stores: RwLock::new(stores),
                metrics: EngineMetrics::new(),
                completions: None,
            }),
            shutdown,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Report terminal job results to the given sink. Must be called
    /// before `start`.
    pub fn with_completion_sink(mut self, tx: mpsc::UnboundedSender<JobCompletion>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_completion_sink must be called before workers start");
        inner.completions = Some(tx);
        self
    }

    /// Spawn the worker pool. A no-op if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("archival manager already running");
            return;
        }

        self.shutdown.send_replace(false);

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.inner.config.workers {
            let inner = self.inner.clone();
            let shutdown_rx = self.shutdown.subscribe();
            workers.push(tokio::spawn(worker_loop(inner, shutdown_rx, worker_id)));
        }

        tracing::info!(workers = self.inner.config.workers, "Archival manager started");
    }

    /// Signal shutdown and join every worker. A no-op if already stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("archival manager already stopped");
            return;
        }

        self.shutdown.send_replace(true);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("Archival manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Location management ────────────────────────────────────────────

    /// Register a new location. The name must be unique.
    pub async fn add_location(&self, location: ArchivalLocation) -> Result<(), ArchiveError> {
        let mut locations = self.inner.locations.write().await;
        if locations.contains_key(&location.name) {
            return Err(ArchiveError::DuplicateLocation(location.name.clone()));
        }

        let store = build_store(&location)?;
        self.inner
            .stores
            .write()
            .await
            .insert(location.name.clone(), store);

        tracing::info!(location = %location.name, kind = ?location.kind, "Archival location added");
        locations.insert(location.name.clone(), location);
        Ok(())
    }

    /// Remove a location. The default location is protected: removing it
    /// returns false and changes nothing, as does removing an unknown name.
    pub async fn remove_location(&self, name: &str) -> bool {
        let mut locations = self.inner.locations.write().await;
        match locations.get(name) {
            Some(location) if location.is_default() => {
                tracing::warn!(location = %name, "Refusing to remove default location");
                false
            }
            Some(_) => {
                locations.remove(name);
                self.inner.stores.write().await.remove(name);
                tracing::info!(location = %name, "Archival location removed");
                true
            }
            None => false,
        }
    }

    pub async fn get_location(&self, name: &str) -> Option<ArchivalLocation> {
        self.inner.locations.read().await.get(name).cloned()
    }

    pub async fn list_locations(&self) -> Vec<ArchivalLocation> {
        self.inner.locations.read().await.values().cloned().collect()
    }

    // ── Job API ────────────────────────────────────────────────────────

    /// Enqueue an archival job targeting the named location.
    pub async fn submit_archival_job(
        &self,
        policy: RetentionPolicy,
        location_name: &str,
    ) -> Result<Uuid, ArchiveError> {
        if !self.inner.locations.read().await.contains_key(location_name) {
            return Err(ArchiveError::UnknownLocation(location_name.to_string()));
        }

        let job = Job::new_archival(policy, location_name);
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            policy = %job.policy.name,
            strategy = %job.policy.archival_strategy,
            location = %location_name,
            "Archival job submitted"
        );

        self.inner.jobs.write().await.insert(job_id, job);
        self.inner.metrics.record_submission();
        let _ = self.inner.queue_tx.send(job_id);

        Ok(job_id)
    }

    pub async fn get_job_status(&self, id: Uuid) -> Option<JobStatus> {
        self.inner.jobs.read().await.get(&id).map(|j| j.status)
    }

    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.read().await.get(&id).cloned()
    }

    pub async fn get_all_jobs(&self) -> Vec<Job> {
        self.inner.jobs.read().await.values().cloned().collect()
    }

    /// Cancel a claimed job; same cooperative semantics as the cleanup
    /// engine (`Pending` jobs cannot be cancelled).
    pub async fn cancel_job(&self, id: Uuid) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) => {
                if job.cancel() {
                    self.inner.metrics.record_cancellation();
                    tracing::info!(job_id = %id, "Archival job cancelled");
                    true
                } else {
                    tracing::debug!(job_id = %id, status = %job.status, "Cancel rejected");
                    false
                }
            }
            None => false,
        }
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub async fn get_statistics(&self) -> EngineStatistics {
        let jobs = self.inner.jobs.read().await;
        let pending = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        let running = jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();

        EngineStatistics {
            running: self.is_running(),
            workers: self.inner.config.workers,
            pending_jobs: pending,
            running_jobs: running,
            jobs_submitted: self.inner.metrics.jobs_submitted(),
            jobs_completed: self.inner.metrics.jobs_completed(),
            jobs_failed: self.inner.metrics.jobs_failed(),
            jobs_cancelled: self.inner.metrics.jobs_cancelled(),
            retries_scheduled: self.inner.metrics.retries_scheduled(),
            records_processed: self.inner.metrics.records_processed(),
            records_affected: self.inner.metrics.records_affected(),
            storage_mb: self.inner.metrics.storage_mb(),
        }
    }

    // ── Archive store maintenance ──────────────────────────────────────

    /// Enumerate artifacts and their paired metadata at a location,
    /// newest first.
    pub async fn list_archives(
        &self,
        location_name: &str,
    ) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let store = self.store_for(location_name).await?;
        let listing = list_objects(&store).await?;

        let mut entries = Vec::new();
        for (path, (size_bytes, last_modified)) in &listing {
            if path.ends_with(METADATA_SUFFIX) {
                continue;
            }

            let metadata_path = format!("{path}{METADATA_SUFFIX}");
            let metadata = if listing.contains_key(&metadata_path) {
                read_metadata(&store, &metadata_path).await
            } else {
                None
            };

            entries.push(ArchiveEntry {
                artifact_path: path.clone(),
                size_bytes: *size_bytes,
                last_modified: *last_modified,
                metadata,
            });
        }

        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at()));
        Ok(entries)
    }

    /// Delete artifact+metadata pairs whose age is at least the location's
    /// `retention_days`. Returns the number of pairs deleted and the
    /// megabytes freed (artifact plus metadata sizes). A location without
    /// `retention_days` prunes nothing.
    pub async fn cleanup_old_archives(
        &self,
        location_name: &str,
    ) -> Result<(usize, f64), ArchiveError> {
        let location = self
            .get_location(location_name)
            .await
            .ok_or_else(|| ArchiveError::UnknownLocation(location_name.to_string()))?;

        let Some(retention_days) = location.retention_days else {
            tracing::debug!(location = %location_name, "Location has no retention_days, nothing to prune");
            return Ok((0, 0.0));
        };

        let store = self.store_for(location_name).await?;
        let listing = list_objects(&store).await?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        let mut deleted = 0usize;
        let mut freed_bytes = 0u64;

        for entry in self.list_archives(location_name).await? {
            if entry.created_at() > cutoff {
                continue;
            }

            let metadata_path = format!("{}{METADATA_SUFFIX}", entry.artifact_path);

            store
                .delete(&ObjectPath::from(entry.artifact_path.as_str()))
                .await?;
            freed_bytes += entry.size_bytes;

            if let Some((metadata_size, _)) = listing.get(&metadata_path) {
                store.delete(&ObjectPath::from(metadata_path.as_str())).await?;
                freed_bytes += metadata_size;
            }

            deleted += 1;

            tracing::info!(
                location = %location_name,
                artifact = %entry.artifact_path,
                age_days = (Utc::now() - entry.created_at()).num_days(),
                "Pruned expired archive"
            );
        }

        let freed_mb = freed_bytes as f64 / (1024.0 * 1024.0);

        tracing::info!(
            location = %location_name,
            retention_days,
            deleted,
            freed_mb,
            "Archive retention pass completed"
        );

        Ok((deleted, freed_mb))
    }

    async fn store_for(&self, location_name: &str) -> Result<Arc<dyn ObjectStore>, ArchiveError> {
        self.inner
            .stores
            .read()
            .await
            .get(location_name)
            .cloned()
            .ok_or_else(|| ArchiveError::UnknownLocation(location_name.to_string()))
    }
}

fn build_store(location: &ArchivalLocation) -> Result<Arc<dyn ObjectStore>, ArchiveError> {
    match location.kind {
        LocationKind::LocalFs => {
            std::fs::create_dir_all(&location.path)?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&location.path)?))
        }
        LocationKind::Memory => Ok(Arc::new(InMemory::new())),
    }
}

/// Full listing of a store: path -> (size, last_modified).
async fn list_objects(
    store: &Arc<dyn ObjectStore>,
) -> Result<HashMap<String, (u64, DateTime<Utc>)>, ArchiveError> {
    let mut listing = HashMap::new();
    let mut stream = store.list(None);

    while let Some(meta) = stream.next().await {
        let meta = meta?;
        listing.insert(
            meta.location.to_string(),
            (meta.size as u64, meta.last_modified),
        );
    }

    Ok(listing)
}

async fn read_metadata(store: &Arc<dyn ObjectStore>, path: &str) -> Option<ArchiveMetadata> {
    let bytes = store
        .get(&ObjectPath::from(path))
        .await
        .ok()?
        .bytes()
        .await
        .ok()?;

    match serde_json::from_slice(&bytes) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Unreadable archive metadata, treating artifact as unpaired");
            None
        }
    }
}

/// FNV-1a 64-bit hash, hex-encoded; stable across platforms.
fn checksum(payload: &[u8]) -> String {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in payload {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    format!("{hash:016x}")
}

async fn worker_loop(inner: Arc<Inner>, shutdown_rx: watch::Receiver<bool>, worker_id: usize) {
    tracing::debug!(worker_id, "archival worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let job_id = {
            let mut rx = inner.queue_rx.lock().await;
            match timeout(inner.config.poll_interval, rx.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(id)) => id,
            }
        };

        run_job(&inner, job_id, worker_id).await;
    }

    tracing::debug!(worker_id, "archival worker exited");
}

async fn run_job(inner: &Arc<Inner>, job_id: Uuid, worker_id: usize) {
    let (policy, location_name) = {
        let mut jobs = inner.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            tracing::warn!(job_id = %job_id, "dequeued unknown job");
            return;
        };
        if !job.claim() {
            tracing::warn!(job_id = %job_id, status = %job.status, "job not claimable, skipping");
            return;
        }
        let location = match &job.kind {
            JobKind::Archival { location, .. } => location.clone(),
            JobKind::Cleanup { .. } => {
                tracing::error!(job_id = %job_id, "cleanup job in archival queue");
                return;
            }
        };
        (job.policy.clone(), location)
    };

    tracing::info!(
        worker_id,
        job_id = %job_id,
        policy = %policy.name,
        strategy = %policy.archival_strategy,
        location = %location_name,
        dry_run = policy.dry_run,
        "Archival job started"
    );

    let started = Instant::now();
    let execution = execute_archival(inner, &policy, &location_name, job_id).await;
    let duration = started.elapsed();

    match execution {
        Ok((outcome, artifact_path)) => {
            let result = JobResult {
                records_processed: outcome.records_archived,
                records_affected: outcome.records_archived,
                storage_mb: outcome.storage_archived_mb,
                duration,
                success: true,
                error_message: None,
            };

            let mut jobs = inner.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                if job.complete(result.clone()) {
                    if let JobKind::Archival {
                        artifact_path: slot, ..
                    } = &mut job.kind
                    {
                        *slot = artifact_path.clone();
                    }
                    inner.metrics.record_success(
                        outcome.records_archived,
                        outcome.records_archived,
                        outcome.storage_archived_mb,
                        duration,
                    );
                    inner.notify_completion(&policy.name, &result);
                    tracing::info!(
                        job_id = %job_id,
                        policy = %policy.name,
                        records_archived = outcome.records_archived,
                        storage_archived_mb = outcome.storage_archived_mb,
                        artifact = artifact_path.as_deref().unwrap_or("<dry-run>"),
                        duration_ms = duration.as_millis() as u64,
                        "Archival job completed"
                    );
                } else {
                    tracing::warn!(
                        job_id = %job_id,
                        status = %job.status,
                        "job reached a terminal state during execution, result discarded"
                    );
                }
            }
        }
        Err(message) => {
            let result = JobResult::failure(message.clone(), duration);

            let mut jobs = inner.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id)
                && job.fail(result.clone())
            {
                inner.metrics.record_failure();
                inner.notify_completion(&policy.name, &result);
            }

            tracing::warn!(
                job_id = %job_id,
                policy = %policy.name,
                location = %location_name,
                error = %message,
                "Archival job failed"
            );
        }
    }
}

/// Run the strategy handler and, unless dry-run, write the artifact and
/// its metadata pair. Returns the outcome and the artifact path.
async fn execute_archival(
    inner: &Arc<Inner>,
    policy: &RetentionPolicy,
    location_name: &str,
    job_id: Uuid,
) -> Result<(ArchivalOutcome, Option<String>), String> {
    if policy.archival_strategy == ArchivalStrategyKind::Delete {
        return Err("delete strategy is handled by the cleanup engine".to_string());
    }

    let handler = inner.registry.get(&policy.archival_strategy).ok_or_else(|| {
        format!(
            "no archival handler registered for strategy {}",
            policy.archival_strategy
        )
    })?;

    let outcome = match timeout(
        inner.config.job_timeout,
        handler.execute(policy, policy.dry_run),
    )
    .await
    {
        Err(_) => {
            return Err(format!(
                "job exceeded timeout of {:?}",
                inner.config.job_timeout
            ));
        }
        Ok(Err(e)) => return Err(e.to_string()),
        Ok(Ok(outcome)) => outcome,
    };

    if policy.dry_run {
        return Ok((outcome, None));
    }

    let store = inner
        .stores
        .read()
        .await
        .get(location_name)
        .cloned()
        .ok_or_else(|| format!("archival location '{location_name}' no longer exists"))?;

    let artifact_path = format!(
        "{}/{}/{}_{}.dat",
        policy.name,
        policy.data_type,
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        &job_id.simple().to_string()[..8],
    );

    let metadata = ArchiveMetadata {
        policy_name: policy.name.clone(),
        data_type: policy.data_type,
        strategy: policy.archival_strategy,
        original_records: outcome.records_archived,
        archived_records: outcome.records_archived,
        compression_ratio: policy.compression_level.expected_ratio(),
        created_at: Utc::now(),
        checksum: checksum(&outcome.payload),
    };
    let metadata_bytes =
        serde_json::to_vec_pretty(&metadata).map_err(|e| format!("metadata encoding: {e}"))?;

    store
        .put(
            &ObjectPath::from(artifact_path.as_str()),
            outcome.payload.clone().into(),
        )
        .await
        .map_err(|e| format!("artifact write: {e}"))?;

    store
        .put(
            &ObjectPath::from(format!("{artifact_path}{METADATA_SUFFIX}").as_str()),
            metadata_bytes.into(),
        )
        .await
        .map_err(|e| format!("metadata write: {e}"))?;

    Ok((outcome, Some(artifact_path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::strategy::sim::SimulatedArchival;
    use std::time::Duration;

    fn test_config() -> ArchivalConfig {
        ArchivalConfig {
            workers: 2,
            job_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            default_location_path: ".data/archive".to_string(),
            default_location_retention_days: Some(30),
        }
    }

    fn sim_registry() -> ArchivalRegistry {
        let mut registry: ArchivalRegistry = HashMap::new();
        for strategy in [
            ArchivalStrategyKind::Archive,
            ArchivalStrategyKind::Compress,
            ArchivalStrategyKind::Sample,
            ArchivalStrategyKind::Aggregate,
        ] {
            registry.insert(strategy, Arc::new(SimulatedArchival));
        }
        registry
    }

    fn archive_policy(name: &str) -> RetentionPolicy {
        RetentionPolicy::new(
            name,
            DataType::Events,
            Duration::from_secs(3600),
            ArchivalStrategyKind::Archive,
        )
    }

    fn manager() -> ArchivalManager {
        ArchivalManager::new_in_memory(test_config(), sim_registry()).unwrap()
    }

    async fn wait_for_terminal(manager: &ArchivalManager, id: Uuid) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(status) = manager.get_job_status(id).await
                    && status.is_terminal()
                {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not reach a terminal state in time")
    }

    /// Write an artifact+metadata pair directly, backdating the metadata.
    async fn seed_archive(
        manager: &ArchivalManager,
        path: &str,
        payload: &[u8],
        age_days: i64,
    ) -> u64 {
        let store = manager.store_for("default").await.unwrap();

        let metadata = ArchiveMetadata {
            policy_name: "seeded".to_string(),
            data_type: DataType::Events,
            strategy: ArchivalStrategyKind::Archive,
            original_records: 10,
            archived_records: 10,
            compression_ratio: 0.5,
            created_at: Utc::now() - chrono::Duration::days(age_days),
            checksum: checksum(payload),
        };
        let metadata_bytes = serde_json::to_vec(&metadata).unwrap();
        let metadata_len = metadata_bytes.len() as u64;

        store
            .put(&ObjectPath::from(path), payload.to_vec().into())
            .await
            .unwrap();
        store
            .put(
                &ObjectPath::from(format!("{path}{METADATA_SUFFIX}").as_str()),
                metadata_bytes.into(),
            )
            .await
            .unwrap();

        payload.len() as u64 + metadata_len
    }

    #[tokio::test]
    async fn test_job_writes_artifact_and_metadata_pair() {
        let manager = manager();
        manager.start().await;

        let id = manager
            .submit_archival_job(archive_policy("p1"), "default")
            .await
            .unwrap();
        assert_eq!(wait_for_terminal(&manager, id).await, JobStatus::Completed);

        let job = manager.get_job(id).await.unwrap();
        let JobKind::Archival {
            artifact_path: Some(artifact_path),
            ..
        } = &job.kind
        else {
            panic!("completed archival job must record its artifact path");
        };

        let entries = manager.list_archives("default").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0].artifact_path, artifact_path);

        let metadata = entries[0].metadata.as_ref().expect("metadata pair");
        assert_eq!(metadata.policy_name, "p1");
        assert_eq!(metadata.strategy, ArchivalStrategyKind::Archive);
        assert!(metadata.archived_records > 0);

        // Checksum matches the stored payload.
        let store = manager.store_for("default").await.unwrap();
        let payload = store
            .get(&ObjectPath::from(artifact_path.as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(metadata.checksum, checksum(&payload));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let manager = manager();
        manager.start().await;

        let mut policy = archive_policy("p1");
        policy.dry_run = true;

        let id = manager
            .submit_archival_job(policy, "default")
            .await
            .unwrap();
        assert_eq!(wait_for_terminal(&manager, id).await, JobStatus::Completed);

        assert!(manager.list_archives("default").await.unwrap().is_empty());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_delete_strategy_rejected() {
        let manager = manager();
        manager.start().await;

        let policy = RetentionPolicy::new(
            "p1",
            DataType::Sessions,
            Duration::from_secs(3600),
            ArchivalStrategyKind::Delete,
        );
        let id = manager
            .submit_archival_job(policy, "default")
            .await
            .unwrap();
        assert_eq!(wait_for_terminal(&manager, id).await, JobStatus::Failed);

        let job = manager.get_job(id).await.unwrap();
        let message = job.result.unwrap().error_message.unwrap();
        assert!(message.contains("cleanup engine"));

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_location_rejected_at_submit() {
        let manager = manager();
        let result = manager
            .submit_archival_job(archive_policy("p1"), "nowhere")
            .await;
        assert!(matches!(result, Err(ArchiveError::UnknownLocation(_))));
    }

    #[tokio::test]
    async fn test_default_location_protected() {
        let manager = manager();

        assert!(!manager.remove_location("default").await);
        assert!(manager.get_location("default").await.is_some());

        manager
            .add_location(ArchivalLocation::new("cold", LocationKind::Memory, ""))
            .await
            .unwrap();
        assert!(manager.remove_location("cold").await);
        assert!(manager.get_location("cold").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_location_rejected() {
        let manager = manager();
        let result = manager
            .add_location(ArchivalLocation::new("default", LocationKind::Memory, ""))
            .await;
        assert!(matches!(result, Err(ArchiveError::DuplicateLocation(_))));
    }

    #[tokio::test]
    async fn test_list_archives_newest_first() {
        let manager = manager();

        seed_archive(&manager, "a/old.dat", b"old", 10).await;
        seed_archive(&manager, "a/newer.dat", b"newer", 2).await;
        seed_archive(&manager, "a/newest.dat", b"newest", 0).await;

        let entries = manager.list_archives("default").await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.artifact_path.as_str()).collect();
        assert_eq!(paths, vec!["a/newest.dat", "a/newer.dat", "a/old.dat"]);
    }

    #[tokio::test]
    async fn test_cleanup_old_archives_prunes_exact_pairs() {
        let manager = manager();

        // Default location retention is 30 days.
        let expired_bytes = seed_archive(&manager, "a/expired.dat", b"expired-payload", 45).await;
        seed_archive(&manager, "a/fresh.dat", b"fresh", 5).await;

        let (deleted, freed_mb) = manager.cleanup_old_archives("default").await.unwrap();
        assert_eq!(deleted, 1);

        let expected_mb = expired_bytes as f64 / (1024.0 * 1024.0);
        assert!(
            (freed_mb - expected_mb).abs() < 1e-9,
            "freed {freed_mb} != expected {expected_mb}"
        );

        let remaining = manager.list_archives("default").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].artifact_path, "a/fresh.dat");
        assert!(remaining[0].metadata.is_some(), "fresh pair must be intact");
    }

    #[tokio::test]
    async fn test_cleanup_without_retention_days_is_noop() {
        let manager = manager();
        manager
            .add_location(ArchivalLocation::new("keep", LocationKind::Memory, ""))
            .await
            .unwrap();

        let (deleted, freed) = manager.cleanup_old_archives("keep").await.unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(freed, 0.0);
    }

    #[tokio::test]
    async fn test_local_filesystem_location_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.default_location_path = dir.path().to_string_lossy().to_string();

        let manager = ArchivalManager::new(config, sim_registry()).unwrap();
        manager.start().await;

        let id = manager
            .submit_archival_job(archive_policy("p1"), "default")
            .await
            .unwrap();
        assert_eq!(wait_for_terminal(&manager, id).await, JobStatus::Completed);

        let entries = manager.list_archives("default").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].metadata.is_some());

        manager.stop().await;
    }
}
