//! End-to-end tests over the assembled component stack: policy manager,
//! cleanup engine, archival manager, and retention monitor wired together
//! the way the binary wires them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::config::{ArchivalConfig, CleanupEngineConfig, MonitorConfig, SchedulerConfig};
use common::model::alert::{AlertCategory, AlertSeverity};
use common::model::health::HealthStatus;
use common::model::job::JobStatus;
use common::model::policy::{ArchivalStrategyKind, DataType, RetentionPolicy};
use common::strategy::StorageProbe;
use common::strategy::sim::{FixedUtilizationProbe, SimulatedArchival, SimulatedCleanup};
use lifecycle::archival::{ArchivalManager, ArchivalRegistry};
use lifecycle::cleanup::{CleanupEngine, CleanupRegistry};
use lifecycle::monitor::RetentionMonitor;
use lifecycle::policy_manager::PolicyManager;

/// Poll an async condition until it holds or the test times out.
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if $cond {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", $what))
    };
}

struct Stack {
    manager: Arc<PolicyManager>,
    cleanup: Arc<CleanupEngine>,
    archival: Arc<ArchivalManager>,
    monitor: Arc<RetentionMonitor>,
}

fn build_stack(probe: Arc<dyn StorageProbe>) -> Stack {
    let mut cleanup_registry: CleanupRegistry = HashMap::new();
    for strategy in [
        ArchivalStrategyKind::Delete,
        ArchivalStrategyKind::Compress,
        ArchivalStrategyKind::Sample,
        ArchivalStrategyKind::Aggregate,
    ] {
        cleanup_registry.insert(strategy, Arc::new(SimulatedCleanup::new(strategy)));
    }

    let mut archival_registry: ArchivalRegistry = HashMap::new();
    archival_registry.insert(ArchivalStrategyKind::Archive, Arc::new(SimulatedArchival));

    let cleanup_config = CleanupEngineConfig {
        workers: 2,
        poll_interval: Duration::from_millis(20),
        retry_delay: Duration::from_millis(20),
        ..CleanupEngineConfig::default()
    };
    let archival_config = ArchivalConfig {
        workers: 2,
        poll_interval: Duration::from_millis(20),
        ..ArchivalConfig::default()
    };
    let monitor_config = MonitorConfig {
        check_interval: Duration::from_millis(50),
        ..MonitorConfig::default()
    };

    let (completions_tx, completions_rx) = mpsc::unbounded_channel();

    let cleanup = Arc::new(
        CleanupEngine::new(cleanup_config, cleanup_registry)
            .with_completion_sink(completions_tx.clone()),
    );
    let archival = Arc::new(
        ArchivalManager::new_in_memory(archival_config, archival_registry)
            .unwrap()
            .with_completion_sink(completions_tx),
    );
    let manager = Arc::new(PolicyManager::new(
        SchedulerConfig::default(),
        cleanup.clone(),
        archival.clone(),
        completions_rx,
    ));
    let monitor = Arc::new(RetentionMonitor::new(
        monitor_config,
        manager.clone(),
        cleanup.clone(),
        archival.clone(),
        probe,
    ));

    Stack {
        manager,
        cleanup,
        archival,
        monitor,
    }
}

async fn start_all(stack: &Stack) {
    stack.cleanup.start().await;
    stack.archival.start().await;
    stack.manager.start().await;
}

async fn stop_all(stack: &Stack) {
    stack.monitor.stop().await;
    stack.manager.stop().await;
    stack.cleanup.stop().await;
    stack.archival.stop().await;
}

#[tokio::test]
async fn test_seeded_policies_are_enforced_end_to_end() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    start_all(&stack).await;

    // The scheduler's first pass fires immediately and routes the six
    // default policies: four to the cleanup engine, two archive policies
    // to the archival manager.
    wait_until!(
        "cleanup jobs to finish",
        stack.cleanup.metrics().jobs_completed() >= 4
    );
    wait_until!(
        "archival jobs to finish",
        stack.archival.metrics().jobs_completed() >= 2
    );

    // All jobs went through pending -> running -> completed.
    for job in stack.cleanup.get_all_jobs().await {
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.result.unwrap().success);
    }

    // Archival jobs produced artifact+metadata pairs at the default
    // location.
    let archives = stack.archival.list_archives("default").await.unwrap();
    assert_eq!(archives.len(), 2);
    for entry in &archives {
        let metadata = entry.metadata.as_ref().expect("paired metadata");
        assert!(metadata.archived_records > 0);
    }

    // Completions flowed back into policy summaries.
    wait_until!(
        "summaries to update",
        stack
            .manager
            .get_policy_summary("sessions-retention")
            .await
            .is_some_and(|s| s.runs > 0)
    );

    let stats = stack.manager.get_retention_statistics().await;
    assert_eq!(stats.total_policies, 6);
    assert!(stats.total_records_archived > 0);
    assert_eq!(stats.system_status, HealthStatus::Healthy);

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_healthy_system_monitor_verdict() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    start_all(&stack).await;

    let check = stack.monitor.perform_health_check().await;
    assert_eq!(check.overall_status, HealthStatus::Healthy);
    assert!(stack.monitor.get_active_alerts().await.is_empty());

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_storage_critical_raises_alert_and_error_verdict() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(96.0)));
    start_all(&stack).await;

    let check = stack.monitor.perform_health_check().await;
    assert_eq!(check.overall_status, HealthStatus::Error);

    let alerts = stack.monitor.get_active_alerts().await;
    assert!(alerts.iter().any(|a| {
        a.severity == AlertSeverity::Critical && a.category == AlertCategory::StorageCritical
    }));

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_stopped_cleanup_engine_is_warning() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    // Everything except the cleanup engine.
    stack.archival.start().await;
    stack.manager.start().await;

    let check = stack.monitor.perform_health_check().await;
    assert_eq!(check.overall_status, HealthStatus::Warning);

    let stopped: Vec<_> = stack
        .monitor
        .get_active_alerts()
        .await
        .into_iter()
        .filter(|a| a.category == AlertCategory::ComponentStopped)
        .collect();
    assert_eq!(stopped.len(), 1);

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_custom_policy_lifecycle() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    start_all(&stack).await;

    let policy = RetentionPolicy::new(
        "debug-snapshots",
        DataType::Events,
        Duration::from_secs(3 * 24 * 3600),
        ArchivalStrategyKind::Delete,
    );
    stack.manager.add_policy(policy).await.unwrap();

    let id = stack
        .cleanup
        .submit_cleanup_job(stack.manager.get_policy("debug-snapshots").await.unwrap())
        .await;

    wait_until!(
        "job to complete",
        stack
            .cleanup
            .get_job_status(id)
            .await
            .is_some_and(|s| s.is_terminal())
    );
    assert_eq!(
        stack.cleanup.get_job_status(id).await,
        Some(JobStatus::Completed)
    );

    assert!(stack.manager.remove_policy("debug-snapshots").await);
    assert!(!stack.manager.remove_policy("audit-retention").await);

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_monitor_loop_populates_bounded_history() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    start_all(&stack).await;
    stack.monitor.start().await;

    wait_until!(
        "a few monitoring cycles",
        stack.monitor.get_health_history(10).await.len() >= 3
    );

    let summary = stack.monitor.get_health_summary().await.unwrap();
    assert_eq!(summary.overall_status, HealthStatus::Healthy);

    stop_all(&stack).await;
}

#[tokio::test]
async fn test_archive_pruning_after_enforcement() {
    let stack = build_stack(Arc::new(FixedUtilizationProbe::new(40.0)));
    start_all(&stack).await;

    wait_until!(
        "archival jobs to finish",
        stack.archival.metrics().jobs_completed() >= 2
    );

    // Freshly written artifacts are well within the default retention.
    let (deleted, freed) = stack.archival.cleanup_old_archives("default").await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(freed, 0.0);
    assert_eq!(
        stack.archival.list_archives("default").await.unwrap().len(),
        2
    );

    stop_all(&stack).await;
}
