//! Cleanup engine: a bounded worker pool draining a FIFO job queue.
//!
//! Executes the in-place strategies (delete/compress/sample/aggregate)
//! through the registered handlers. The archive strategy belongs to the
//! archival manager and is rejected here.
//!
//! A job failure never crashes a worker: the error is captured into the
//! job's result and the worker returns to polling. Failed jobs are retried
//! by resubmitting a fresh job for the same policy after `retry_delay`,
//! with the retry counter carried forward so `max_retries` stays binding.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use common::config::CleanupEngineConfig;
use common::model::job::{Job, JobCompletion, JobKind, JobResult, JobStatus};
use common::model::policy::{ArchivalStrategyKind, RetentionPolicy};
use common::strategy::CleanupStrategy;

use crate::metrics::{EngineMetrics, EngineStatistics};

/// Closed dispatch table: one handler per in-place strategy tag, resolved
/// once at engine construction.
pub type CleanupRegistry = HashMap<ArchivalStrategyKind, Arc<dyn CleanupStrategy>>;

struct Inner {
    config: CleanupEngineConfig,
    registry: CleanupRegistry,
    jobs: RwLock<HashMap<Uuid, Job>>,
    queue_tx: mpsc::UnboundedSender<Uuid>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
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

/// Bounded worker pool executing cleanup jobs.
pub struct CleanupEngine {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CleanupEngine {
    pub fn new(config: CleanupEngineConfig, registry: CleanupRegistry) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                jobs: RwLock::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                metrics: EngineMetrics::new(),
                completions: None,
            }),
            shutdown,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Report terminal job results to the given sink (the policy manager's
    /// completion channel). Must be called before `start`.
    pub fn with_completion_sink(mut self, tx: mpsc::UnboundedSender<JobCompletion>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_completion_sink must be called before workers start");
        inner.completions = Some(tx);
        self
    }

    /// Spawn the worker pool. A no-op if the engine is already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("cleanup engine already running");
            return;
        }

        self.shutdown.send_replace(false);

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.inner.config.workers {
            let inner = self.inner.clone();
            let shutdown_rx = self.shutdown.subscribe();
            workers.push(tokio::spawn(worker_loop(inner, shutdown_rx, worker_id)));
        }

        tracing::info!(workers = self.inner.config.workers, "Cleanup engine started");
    }

    /// Signal shutdown and join every worker. A no-op if already stopped.
    /// In-flight jobs run to completion (bounded by `job_timeout`);
    /// still-queued jobs stay `Pending`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("cleanup engine already stopped");
            return;
        }

        self.shutdown.send_replace(true);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("Cleanup engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue a cleanup job for the policy. Always succeeds; the job
    /// waits in the FIFO queue until a worker claims it.
    pub async fn submit_cleanup_job(&self, policy: RetentionPolicy) -> Uuid {
        let job = Job::new_cleanup(policy, self.inner.config.max_retries);
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            policy = %job.policy.name,
            strategy = %job.policy.archival_strategy,
            "Cleanup job submitted"
        );

        self.inner.jobs.write().await.insert(job_id, job);
        self.inner.metrics.record_submission();
        // The receiver lives as long as the engine, so this cannot fail.
        let _ = self.inner.queue_tx.send(job_id);

        job_id
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

    /// Cancel a claimed job. Only `Running` jobs can be cancelled: a
    /// still-queued job returns false and stays `Pending`. Cancellation is
    /// cooperative — in-flight strategy work is not interrupted, but its
    /// result is discarded and the job is not counted as completed.
    pub async fn cancel_job(&self, id: Uuid) -> bool {
        let mut jobs = self.inner.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) => {
                if job.cancel() {
                    self.inner.metrics.record_cancellation();
                    tracing::info!(job_id = %id, "Cleanup job cancelled");
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
}

/// One worker: poll-dequeue with a timeout so shutdown is observed
/// promptly even when the queue is idle.
async fn worker_loop(inner: Arc<Inner>, shutdown_rx: watch::Receiver<bool>, worker_id: usize) {
    tracing::debug!(worker_id, "cleanup worker started");

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

        run_job(&inner, &shutdown_rx, job_id, worker_id).await;
    }

    tracing::debug!(worker_id, "cleanup worker exited");
}

/// Claim, execute, and record one job. From the claim until the terminal
/// transition this worker is the only mutator of the job record.
async fn run_job(
    inner: &Arc<Inner>,
    shutdown_rx: &watch::Receiver<bool>,
    job_id: Uuid,
    worker_id: usize,
) {
    let (policy, error_count, max_retries) = {
        let mut jobs = inner.jobs.write().await;
        let Some(job) = jobs.get_mut(&job_id) else {
            tracing::warn!(job_id = %job_id, "dequeued unknown job");
            return;
        };
        if !job.claim() {
            tracing::warn!(job_id = %job_id, status = %job.status, "job not claimable, skipping");
            return;
        }
        let (error_count, max_retries) = job.retry_state().unwrap_or((0, 0));
        (job.policy.clone(), error_count, max_retries)
    };

    tracing::info!(
        worker_id,
        job_id = %job_id,
        policy = %policy.name,
        strategy = %policy.archival_strategy,
        dry_run = policy.dry_run,
        "Cleanup job started"
    );

    let started = Instant::now();

    let execution = match inner.registry.get(&policy.archival_strategy) {
        None => Err(format!(
            "no cleanup handler registered for strategy {}",
            policy.archival_strategy
        )),
        Some(handler) => {
            match timeout(
                inner.config.job_timeout,
                handler.execute(&policy, policy.dry_run),
            )
            .await
            {
                Err(_) => Err(format!(
                    "job exceeded timeout of {:?}",
                    inner.config.job_timeout
                )),
                Ok(Err(e)) => Err(e.to_string()),
                Ok(Ok(outcome)) => Ok(outcome),
            }
        }
    };

    let duration = started.elapsed();

    match execution {
        Ok(outcome) => {
            let result = JobResult {
                records_processed: outcome.records_processed,
                records_affected: outcome.records_affected,
                storage_mb: outcome.storage_freed_mb,
                duration,
                success: true,
                error_message: None,
            };

            let mut jobs = inner.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                if job.complete(result.clone()) {
                    inner.metrics.record_success(
                        outcome.records_processed,
                        outcome.records_affected,
                        outcome.storage_freed_mb,
                        duration,
                    );
                    inner.notify_completion(&policy.name, &result);
                    tracing::info!(
                        job_id = %job_id,
                        policy = %policy.name,
                        records_affected = outcome.records_affected,
                        storage_freed_mb = outcome.storage_freed_mb,
                        duration_ms = duration.as_millis() as u64,
                        "Cleanup job completed"
                    );
                } else {
                    // Cancelled while executing: keep the terminal status
                    // and do not count the work as completed.
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
            let mut scheduled_retry = false;

            {
                let mut jobs = inner.jobs.write().await;
                if let Some(job) = jobs.get_mut(&job_id)
                    && job.fail(result.clone())
                {
                    if let JobKind::Cleanup {
                        error_count: count, ..
                    } = &mut job.kind
                    {
                        *count = error_count + 1;
                    }
                    inner.metrics.record_failure();
                    inner.notify_completion(&policy.name, &result);
                    scheduled_retry = error_count + 1 < max_retries;
                }
            }

            tracing::warn!(
                job_id = %job_id,
                policy = %policy.name,
                error = %message,
                error_count = error_count + 1,
                max_retries,
                will_retry = scheduled_retry,
                "Cleanup job failed"
            );

            if scheduled_retry {
                schedule_retry(
                    inner.clone(),
                    shutdown_rx.clone(),
                    policy,
                    error_count + 1,
                    max_retries,
                );
            }
        }
    }
}

/// Resubmit a fresh job for the policy after `retry_delay`. The retry
/// counter is carried forward on the new job.
fn schedule_retry(
    inner: Arc<Inner>,
    shutdown_rx: watch::Receiver<bool>,
    policy: RetentionPolicy,
    error_count: u32,
    max_retries: u32,
) {
    inner.metrics.record_retry();

    tokio::spawn(async move {
        tokio::time::sleep(inner.config.retry_delay).await;

        if *shutdown_rx.borrow() {
            tracing::debug!(policy = %policy.name, "engine stopping, dropping retry");
            return;
        }

        let job = Job::new_cleanup_retry(policy.clone(), error_count, max_retries);
        let job_id = job.id;

        tracing::info!(
            job_id = %job_id,
            policy = %policy.name,
            error_count,
            "Resubmitting failed cleanup job"
        );

        inner.jobs.write().await.insert(job_id, job);
        inner.metrics.record_submission();
        let _ = inner.queue_tx.send(job_id);
    });
}
