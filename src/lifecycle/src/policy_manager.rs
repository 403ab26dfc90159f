//! Policy manager: owns the named policy set and the scheduling loop.
//!
//! The manager decides *which* policies are due and hands them across the
//! component boundary to the engines' submission APIs; it never executes
//! enforcement itself. Terminal job results flow back through a completion
//! channel and are folded into per-policy summaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use common::config::SchedulerConfig;
use common::model::health::HealthStatus;
use common::model::job::JobCompletion;
use common::model::location::DEFAULT_LOCATION_NAME;
use common::model::policy::{
    DEFAULT_POLICY_TAG, PolicyValidationError, RetentionPolicy, default_policies,
};

use crate::archival::ArchivalManager;
use crate::cleanup::CleanupEngine;

/// Aggregate error counts above this mark the whole system as `Error`.
const SYSTEM_ERROR_THRESHOLD: u64 = 10;
/// Aggregate error counts above this mark the system as `Warning`.
const SYSTEM_WARNING_THRESHOLD: u64 = 5;

/// Poll bound for the completion listener, so shutdown is observed
/// promptly while the channel is idle.
const COMPLETION_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy '{0}' already exists")]
    Duplicate(String),

    #[error("policy '{0}' not found")]
    NotFound(String),

    #[error("policy validation failed: {}", format_validation_errors(.0))]
    Invalid(Vec<PolicyValidationError>),
}

fn format_validation_errors(errors: &[PolicyValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Running totals for one policy, fed by engine completion reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicySummary {
    pub runs: u64,
    pub errors: u64,
    pub records_archived: u64,
    pub storage_saved_mb: f64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Aggregate view over the whole policy set.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionStatistics {
    pub total_policies: usize,
    pub active_policies: usize,
    pub total_storage_saved_mb: f64,
    pub total_records_archived: u64,
    /// Number of policies whose summary carries at least one error.
    pub policies_with_errors: usize,
    pub system_status: HealthStatus,
}

struct Inner {
    config: SchedulerConfig,
    policies: RwLock<HashMap<String, RetentionPolicy>>,
    summaries: RwLock<HashMap<String, PolicySummary>>,
    last_cleanup: RwLock<Option<DateTime<Utc>>>,
    cleanup: Arc<CleanupEngine>,
    archival: Arc<ArchivalManager>,
    completions: Mutex<mpsc::UnboundedReceiver<JobCompletion>>,
}

/// Owns the policy set; runs the periodic scheduling loop.
pub struct PolicyManager {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl PolicyManager {
    /// Create a manager seeded with the six built-in default policies.
    pub fn new(
        config: SchedulerConfig,
        cleanup: Arc<CleanupEngine>,
        archival: Arc<ArchivalManager>,
        completions: mpsc::UnboundedReceiver<JobCompletion>,
    ) -> Self {
        let mut policies = HashMap::new();
        for policy in default_policies() {
            policies.insert(policy.name.clone(), policy);
        }

        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                policies: RwLock::new(policies),
                summaries: RwLock::new(HashMap::new()),
                last_cleanup: RwLock::new(None),
                cleanup,
                archival,
                completions: Mutex::new(completions),
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the scheduling loop and the completion listener. A no-op if
    /// already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("policy manager already running");
            return;
        }

        self.shutdown.send_replace(false);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(scheduler_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(completion_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));

        tracing::info!(
            cleanup_interval = ?self.inner.config.cleanup_interval,
            "Policy manager started"
        );
    }

    /// Cancel the loops and await their exit. A no-op if already stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("policy manager already stopped");
            return;
        }

        self.shutdown.send_replace(true);

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("Policy manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Policy set ─────────────────────────────────────────────────────

    /// Insert a new policy. Fails if validation finds any violation or a
    /// policy with the same name already exists.
    pub async fn add_policy(&self, policy: RetentionPolicy) -> Result<(), PolicyError> {
        let errors = policy.validate();
        if !errors.is_empty() {
            return Err(PolicyError::Invalid(errors));
        }

        let mut policies = self.inner.policies.write().await;
        if policies.contains_key(&policy.name) {
            return Err(PolicyError::Duplicate(policy.name.clone()));
        }

        tracing::info!(policy = %policy.name, "Policy added: {}", policy.display());
        policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Replace an existing policy. `created_at` is preserved from the old
    /// record, as is the `default` tag — a seeded policy stays protected
    /// through updates.
    pub async fn update_policy(
        &self,
        name: &str,
        mut policy: RetentionPolicy,
    ) -> Result<(), PolicyError> {
        let errors = policy.validate();
        if !errors.is_empty() {
            return Err(PolicyError::Invalid(errors));
        }

        let mut policies = self.inner.policies.write().await;
        let Some(existing) = policies.get(name) else {
            return Err(PolicyError::NotFound(name.to_string()));
        };

        policy.created_at = existing.created_at;
        policy.updated_at = Utc::now();
        if existing.is_default() && !policy.is_default() {
            policy.tags.push(DEFAULT_POLICY_TAG.to_string());
        }

        tracing::info!(policy = %name, "Policy updated: {}", policy.display());
        policies.insert(name.to_string(), policy);
        Ok(())
    }

    /// Remove a policy. Default-tagged policies are protected: removal
    /// returns false and the set is unchanged.
    pub async fn remove_policy(&self, name: &str) -> bool {
        let mut policies = self.inner.policies.write().await;
        match policies.get(name) {
            Some(policy) if policy.is_default() => {
                tracing::warn!(policy = %name, "Refusing to remove default policy");
                false
            }
            Some(_) => {
                policies.remove(name);
                tracing::info!(policy = %name, "Policy removed");
                true
            }
            None => false,
        }
    }

    pub async fn get_policy(&self, name: &str) -> Option<RetentionPolicy> {
        self.inner.policies.read().await.get(name).cloned()
    }

    pub async fn get_policies(&self) -> Vec<RetentionPolicy> {
        self.inner.policies.read().await.values().cloned().collect()
    }

    /// The due subset: enabled policies with `enforce_immediately` set, or
    /// due because the time since the last enforcement pass exceeds the
    /// configured interval (a manager that has never run treats every
    /// enabled policy as due).
    pub async fn get_policies_for_cleanup(&self) -> Vec<RetentionPolicy> {
        due_policies(&self.inner).await
    }

    /// Run one enforcement pass: submit every due policy to the engine
    /// that owns its strategy, then record the pass. Returns the number of
    /// jobs submitted.
    pub async fn run_enforcement_pass(&self) -> usize {
        run_enforcement_pass(&self.inner).await
    }

    /// Fold a terminal job result into the owning policy's summary.
    pub async fn record_completion(&self, completion: JobCompletion) {
        apply_completion(&self.inner, completion).await;
    }

    pub async fn get_policy_summary(&self, name: &str) -> Option<PolicySummary> {
        self.inner.summaries.read().await.get(name).cloned()
    }

    pub async fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_cleanup.read().await
    }

    /// Aggregate statistics over the policy set and its summaries.
    pub async fn get_retention_statistics(&self) -> RetentionStatistics {
        let policies = self.inner.policies.read().await;
        let summaries = self.inner.summaries.read().await;

        let total_policies = policies.len();
        let active_policies = policies.values().filter(|p| p.enabled).count();

        let total_storage_saved_mb = summaries.values().map(|s| s.storage_saved_mb).sum();
        let total_records_archived = summaries.values().map(|s| s.records_archived).sum();
        let policies_with_errors = summaries.values().filter(|s| s.errors > 0).count();
        let total_errors: u64 = summaries.values().map(|s| s.errors).sum();

        let system_status = if total_errors > SYSTEM_ERROR_THRESHOLD {
            HealthStatus::Error
        } else if total_errors > SYSTEM_WARNING_THRESHOLD {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        RetentionStatistics {
            total_policies,
            active_policies,
            total_storage_saved_mb,
            total_records_archived,
            policies_with_errors,
            system_status,
        }
    }
}

async fn due_policies(inner: &Arc<Inner>) -> Vec<RetentionPolicy> {
    let interval_elapsed = match *inner.last_cleanup.read().await {
        None => true,
        Some(last) => {
            let elapsed = Utc::now() - last;
            elapsed
                > chrono::Duration::from_std(inner.config.cleanup_interval)
                    .unwrap_or(chrono::Duration::MAX)
        }
    };

    inner
        .policies
        .read()
        .await
        .values()
        .filter(|p| p.enabled && (p.enforce_immediately || interval_elapsed))
        .cloned()
        .collect()
}

async fn run_enforcement_pass(inner: &Arc<Inner>) -> usize {
    let started = Instant::now();

    let due = due_policies(inner).await;
    let mut submitted = 0;

    for policy in due {
        if policy.archival_strategy.is_archival() {
            match inner
                .archival
                .submit_archival_job(policy.clone(), DEFAULT_LOCATION_NAME)
                .await
            {
                Ok(_) => submitted += 1,
                Err(e) => {
                    tracing::error!(policy = %policy.name, error = %e, "Failed to submit archival job");
                }
            }
        } else {
            inner.cleanup.submit_cleanup_job(policy).await;
            submitted += 1;
        }
    }

    *inner.last_cleanup.write().await = Some(Utc::now());

    let duration = started.elapsed();
    if duration > inner.config.max_cleanup_duration {
        tracing::warn!(
            duration_ms = duration.as_millis() as u64,
            max_ms = inner.config.max_cleanup_duration.as_millis() as u64,
            "Enforcement pass exceeded max_cleanup_duration"
        );
    }

    tracing::info!(
        submitted,
        duration_ms = duration.as_millis() as u64,
        "Enforcement pass completed"
    );

    submitted
}

async fn apply_completion(inner: &Arc<Inner>, completion: JobCompletion) {
    let mut summaries = inner.summaries.write().await;
    let summary = summaries.entry(completion.policy_name.clone()).or_default();

    summary.runs += 1;
    summary.last_run = Some(Utc::now());

    if completion.result.success {
        summary.records_archived += completion.result.records_affected;
        summary.storage_saved_mb += completion.result.storage_mb;
    } else {
        summary.errors += 1;
    }
}

/// Recurring enforcement driver. The first tick completes immediately, so
/// seeded policies are enforced right after startup.
async fn scheduler_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.cleanup_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_enforcement_pass(&inner).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("scheduler loop exited");
}

/// Drains engine completion reports into per-policy summaries.
async fn completion_loop(inner: Arc<Inner>, shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let completion = {
            let mut rx = inner.completions.lock().await;
            match timeout(COMPLETION_POLL_INTERVAL, rx.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(completion)) => completion,
            }
        };

        apply_completion(&inner, completion).await;
    }

    tracing::debug!("completion loop exited");
}
