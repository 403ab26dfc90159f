//! Retention monitor: polls the other components plus a storage probe,
//! aggregates one health verdict, and raises alerts.
//!
//! Every monitoring cycle evaluates all alert rules independently and
//! appends matching alerts without de-duplication: a condition that holds
//! across cycles produces one alert per cycle. Both histories are bounded
//! sliding windows (oldest entries dropped past the configured caps).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::config::MonitorConfig;
use common::model::alert::{Alert, AlertCategory, AlertSeverity};
use common::model::health::{HealthCheck, HealthStatus};
use common::strategy::StorageProbe;

use crate::archival::ArchivalManager;
use crate::cleanup::CleanupEngine;
use crate::policy_manager::PolicyManager;

struct Inner {
    config: MonitorConfig,
    manager: Arc<PolicyManager>,
    cleanup: Arc<CleanupEngine>,
    archival: Arc<ArchivalManager>,
    probe: Arc<dyn StorageProbe>,
    active_alerts: RwLock<HashMap<Uuid, Alert>>,
    alert_history: RwLock<VecDeque<Alert>>,
    health_history: RwLock<VecDeque<HealthCheck>>,
}

/// Aggregates component health and owns the alert lifecycle.
pub struct RetentionMonitor {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl RetentionMonitor {
    pub fn new(
        config: MonitorConfig,
        manager: Arc<PolicyManager>,
        cleanup: Arc<CleanupEngine>,
        archival: Arc<ArchivalManager>,
        probe: Arc<dyn StorageProbe>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                manager,
                cleanup,
                archival,
                probe,
                active_alerts: RwLock::new(HashMap::new()),
                alert_history: RwLock::new(VecDeque::new()),
                health_history: RwLock::new(VecDeque::new()),
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the monitoring loop. A no-op if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("retention monitor already running");
            return;
        }

        self.shutdown.send_replace(false);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(monitor_loop(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));

        tracing::info!(
            check_interval = ?self.inner.config.check_interval,
            "Retention monitor started"
        );
    }

    /// Cancel the loop and await its exit. A no-op if already stopped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("retention monitor already stopped");
            return;
        }

        self.shutdown.send_replace(true);

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }

        tracing::info!("Retention monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Query every component, aggregate one verdict, evaluate the alert
    /// rules, and append the snapshot to the bounded history.
    pub async fn perform_health_check(&self) -> HealthCheck {
        perform_health_check(&self.inner).await
    }

    // ── Query surface ──────────────────────────────────────────────────

    /// The most recent health snapshot, if a cycle has run.
    pub async fn get_health_summary(&self) -> Option<HealthCheck> {
        self.inner.health_history.read().await.back().cloned()
    }

    /// Most recent health checks, newest first.
    pub async fn get_health_history(&self, limit: usize) -> Vec<HealthCheck> {
        self.inner
            .health_history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .inner
            .active_alerts
            .read()
            .await
            .values()
            .cloned()
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        alerts
    }

    /// Most recent alerts, newest first.
    pub async fn get_alert_history(&self, limit: usize) -> Vec<Alert> {
        self.inner
            .alert_history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Flag an active alert as acknowledged. It stays in the active map.
    pub async fn acknowledge_alert(&self, id: Uuid) -> bool {
        match self.inner.active_alerts.write().await.get_mut(&id) {
            Some(alert) => {
                alert.acknowledged = true;
                tracing::info!(alert_id = %id, "Alert acknowledged");
                true
            }
            None => false,
        }
    }

    /// Resolve an active alert: removed from the active map, retained in
    /// history with the resolved flag set.
    pub async fn resolve_alert(&self, id: Uuid) -> bool {
        let removed = self.inner.active_alerts.write().await.remove(&id);
        match removed {
            Some(_) => {
                let mut history = self.inner.alert_history.write().await;
                if let Some(entry) = history.iter_mut().find(|a| a.id == id) {
                    entry.resolved = true;
                }
                tracing::info!(alert_id = %id, "Alert resolved");
                true
            }
            None => false,
        }
    }
}

async fn raise_alert(inner: &Arc<Inner>, alert: Alert) {
    tracing::warn!(
        alert_id = %alert.id,
        severity = %alert.severity,
        category = %alert.category,
        message = %alert.message,
        "Alert raised"
    );

    {
        let mut history = inner.alert_history.write().await;
        if history.len() >= inner.config.alert_history_limit {
            history.pop_front();
        }
        history.push_back(alert.clone());
    }

    inner.active_alerts.write().await.insert(alert.id, alert);
}

async fn perform_health_check(inner: &Arc<Inner>) -> HealthCheck {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut recommendations = Vec::new();

    // (a) Policy manager statistics.
    let policy_stats = inner.manager.get_retention_statistics().await;
    let policy_status = policy_stats.system_status;
    match policy_status {
        HealthStatus::Error => {
            errors.push("policy manager reports an elevated enforcement error count".to_string());
            recommendations.push("review failing policies and their strategy backends".to_string());
        }
        HealthStatus::Warning => {
            warnings.push("policy manager reports enforcement errors".to_string());
        }
        HealthStatus::Healthy => {}
    }

    // (b) Cleanup engine statistics.
    let cleanup_stats = inner.cleanup.get_statistics().await;
    let cleanup_status = if cleanup_stats.running {
        HealthStatus::Healthy
    } else {
        warnings.push("cleanup engine is stopped".to_string());
        HealthStatus::Warning
    };

    // (c) Archival manager statistics.
    let archival_stats = inner.archival.get_statistics().await;
    let archival_status = if archival_stats.running {
        HealthStatus::Healthy
    } else {
        warnings.push("archival manager is stopped".to_string());
        HealthStatus::Warning
    };

    // (d) Storage-utilization probe.
    let (utilization, storage_status) = match inner.probe.utilization_percent().await {
        Ok(percent) => {
            let status = if percent >= inner.config.storage_critical_threshold {
                errors.push(format!(
                    "storage utilization {percent:.1}% exceeds critical threshold {:.1}%",
                    inner.config.storage_critical_threshold
                ));
                recommendations
                    .push("expand storage capacity or tighten retention periods".to_string());
                HealthStatus::Error
            } else if percent >= inner.config.storage_warning_threshold {
                warnings.push(format!(
                    "storage utilization {percent:.1}% exceeds warning threshold {:.1}%",
                    inner.config.storage_warning_threshold
                ));
                recommendations
                    .push("review retention periods before storage becomes critical".to_string());
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            };
            (percent, status)
        }
        Err(e) => {
            errors.push(format!("storage probe failed: {e}"));
            (0.0, HealthStatus::Error)
        }
    };

    let overall_status = HealthCheck::aggregate(&[
        policy_status,
        cleanup_status,
        archival_status,
        storage_status,
    ]);

    // Alert rules: each evaluated independently, none mutually exclusive,
    // no de-duplication across cycles.
    if overall_status == HealthStatus::Error {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Critical,
                AlertCategory::SystemHealth,
                "overall system health is error",
            ),
        )
        .await;
    }

    if utilization >= inner.config.storage_critical_threshold {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Critical,
                AlertCategory::StorageCritical,
                format!("storage utilization at {utilization:.1}%"),
            )
            .with_context("utilization_percent", format!("{utilization:.1}")),
        )
        .await;
    } else if utilization >= inner.config.storage_warning_threshold {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Warning,
                AlertCategory::StorageCritical,
                format!("storage utilization at {utilization:.1}%"),
            )
            .with_context("utilization_percent", format!("{utilization:.1}")),
        )
        .await;
    }

    if policy_stats.policies_with_errors > inner.config.policy_error_threshold {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Warning,
                AlertCategory::PolicyViolation,
                format!(
                    "{} policies report enforcement errors",
                    policy_stats.policies_with_errors
                ),
            ),
        )
        .await;
    }

    if !cleanup_stats.running {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Warning,
                AlertCategory::ComponentStopped,
                "cleanup engine is stopped",
            ),
        )
        .await;
    }

    if !archival_stats.running {
        raise_alert(
            inner,
            Alert::new(
                AlertSeverity::Warning,
                AlertCategory::ComponentStopped,
                "archival manager is stopped",
            ),
        )
        .await;
    }

    let check = HealthCheck {
        timestamp: Utc::now(),
        overall_status,
        policy_manager: policy_status,
        cleanup_engine: cleanup_status,
        archival_manager: archival_status,
        storage: storage_status,
        storage_utilization_percent: utilization,
        warnings,
        errors,
        recommendations,
    };

    {
        let mut history = inner.health_history.write().await;
        if history.len() >= inner.config.health_history_limit {
            history.pop_front();
        }
        history.push_back(check.clone());
    }

    tracing::info!(
        overall = %check.overall_status,
        storage_utilization = check.storage_utilization_percent,
        warnings = check.warnings.len(),
        errors = check.errors.len(),
        "Health check completed"
    );

    check
}

async fn monitor_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.check_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                perform_health_check(&inner).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("monitor loop exited");
}
