//! Trait seams to the external data plane.
//!
//! The engine decides *when* a policy is enforced; these traits own *what*
//! enforcement does to the underlying storage backend. One implementation
//! is registered per strategy tag, and the engines dispatch through a
//! closed registry map built at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::policy::RetentionPolicy;

/// Result of an in-place cleanup pass (delete/compress/sample/aggregate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub records_processed: u64,
    pub records_affected: u64,
    pub storage_freed_mb: f64,
}

/// Result of an archival pass. The engine writes `payload` as the artifact
/// and derives the companion metadata record from the counts.
#[derive(Debug, Clone)]
pub struct ArchivalOutcome {
    pub records_archived: u64,
    pub storage_archived_mb: f64,
    pub payload: Vec<u8>,
}

/// Failure surfaced by a strategy handler. Captured into the job's result;
/// never propagated past the worker.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("strategy execution failed: {0}")]
    Failed(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Executes one cleanup strategy against the data plane.
///
/// `dry_run` asks for an estimate: the outcome is computed and reported but
/// nothing may be mutated.
#[async_trait]
pub trait CleanupStrategy: Send + Sync {
    async fn execute(
        &self,
        policy: &RetentionPolicy,
        dry_run: bool,
    ) -> Result<CleanupOutcome, StrategyError>;
}

/// Executes one archival strategy, producing the artifact payload.
#[async_trait]
pub trait ArchivalStrategy: Send + Sync {
    async fn execute(
        &self,
        policy: &RetentionPolicy,
        dry_run: bool,
    ) -> Result<ArchivalOutcome, StrategyError>;
}

/// Storage-utilization probe consumed by the retention monitor.
#[async_trait]
pub trait StorageProbe: Send + Sync {
    /// Current utilization of the monitored storage backend, in percent.
    async fn utilization_percent(&self) -> anyhow::Result<f64>;
}

pub mod sim {
    //! Deterministic simulated implementations.
    //!
    //! Stand-ins for real data-plane integrations: outcomes are derived
    //! from the policy alone, so tests and the demo binary behave
    //! reproducibly without a storage backend.

    use super::*;
    use crate::model::policy::{ArchivalStrategyKind, DataType};

    /// Synthetic per-category volume: (aged records, average record KiB).
    fn aged_volume(data_type: DataType) -> (u64, f64) {
        match data_type {
            DataType::Metrics => (250_000, 0.5),
            DataType::Logs => (180_000, 1.2),
            DataType::Traces => (120_000, 2.0),
            DataType::Events => (60_000, 0.8),
            DataType::Sessions => (40_000, 0.6),
            DataType::Audit => (20_000, 0.4),
        }
    }

    fn volume_mb(records: u64, record_kib: f64) -> f64 {
        records as f64 * record_kib / 1024.0
    }

    /// Simulated cleanup executor for one strategy tag.
    pub struct SimulatedCleanup {
        strategy: ArchivalStrategyKind,
    }

    impl SimulatedCleanup {
        pub fn new(strategy: ArchivalStrategyKind) -> Self {
            Self { strategy }
        }

        fn outcome(&self, policy: &RetentionPolicy) -> Result<CleanupOutcome, StrategyError> {
            let (records, record_kib) = aged_volume(policy.data_type);
            let total_mb = volume_mb(records, record_kib);

            let (affected, freed_mb) = match self.strategy {
                ArchivalStrategyKind::Delete => (records, total_mb),
                ArchivalStrategyKind::Compress => {
                    let ratio = policy.compression_level.expected_ratio();
                    (records, total_mb * (1.0 - ratio))
                }
                ArchivalStrategyKind::Sample => {
                    let keep = policy.sampling_rate.ok_or_else(|| {
                        StrategyError::Failed("sample strategy requires sampling_rate".to_string())
                    })?;
                    let dropped = (records as f64 * (1.0 - keep)) as u64;
                    (dropped, total_mb * (1.0 - keep))
                }
                ArchivalStrategyKind::Aggregate => {
                    // Rolled-up buckets replace the raw records; roughly a
                    // tenth of the original volume survives.
                    (records, total_mb * 0.9)
                }
                ArchivalStrategyKind::Archive => {
                    return Err(StrategyError::Failed(
                        "archive strategy is handled by the archival manager".to_string(),
                    ));
                }
            };

            Ok(CleanupOutcome {
                records_processed: records,
                records_affected: affected,
                storage_freed_mb: freed_mb,
            })
        }
    }

    #[async_trait]
    impl CleanupStrategy for SimulatedCleanup {
        async fn execute(
            &self,
            policy: &RetentionPolicy,
            _dry_run: bool,
        ) -> Result<CleanupOutcome, StrategyError> {
            // Nothing to mutate: estimate and actual runs are identical.
            self.outcome(policy)
        }
    }

    /// Simulated archival executor: the payload is a JSON manifest of the
    /// records that would have been copied out.
    pub struct SimulatedArchival;

    #[async_trait]
    impl ArchivalStrategy for SimulatedArchival {
        async fn execute(
            &self,
            policy: &RetentionPolicy,
            dry_run: bool,
        ) -> Result<ArchivalOutcome, StrategyError> {
            let (records, record_kib) = aged_volume(policy.data_type);
            let ratio = policy.compression_level.expected_ratio();
            let archived_mb = volume_mb(records, record_kib) * ratio;

            let payload = if dry_run {
                Vec::new()
            } else {
                serde_json::json!({
                    "policy": policy.name,
                    "data_type": policy.data_type.as_str(),
                    "records": records,
                    "compression_ratio": ratio,
                })
                .to_string()
                .into_bytes()
            };

            Ok(ArchivalOutcome {
                records_archived: records,
                storage_archived_mb: archived_mb,
                payload,
            })
        }
    }

    /// Probe reporting a fixed utilization value.
    #[derive(Debug, Clone, Default)]
    pub struct FixedUtilizationProbe {
        percent: f64,
    }

    impl FixedUtilizationProbe {
        pub fn new(percent: f64) -> Self {
            Self { percent }
        }
    }

    #[async_trait]
    impl StorageProbe for FixedUtilizationProbe {
        async fn utilization_percent(&self) -> anyhow::Result<f64> {
            Ok(self.percent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::*;
    use super::*;
    use crate::model::policy::{ArchivalStrategyKind, DataType, RetentionPolicy};
    use std::time::Duration;

    fn policy(strategy: ArchivalStrategyKind) -> RetentionPolicy {
        RetentionPolicy::new(
            "p",
            DataType::Logs,
            Duration::from_secs(3600),
            strategy,
        )
    }

    #[tokio::test]
    async fn test_delete_frees_everything() {
        let handler = SimulatedCleanup::new(ArchivalStrategyKind::Delete);
        let outcome = handler
            .execute(&policy(ArchivalStrategyKind::Delete), false)
            .await
            .unwrap();
        assert_eq!(outcome.records_processed, outcome.records_affected);
        assert!(outcome.storage_freed_mb > 0.0);
    }

    #[tokio::test]
    async fn test_sample_without_rate_fails() {
        let handler = SimulatedCleanup::new(ArchivalStrategyKind::Sample);
        let result = handler
            .execute(&policy(ArchivalStrategyKind::Sample), false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sample_drops_complement_of_rate() {
        let handler = SimulatedCleanup::new(ArchivalStrategyKind::Sample);
        let p = policy(ArchivalStrategyKind::Sample).with_sampling_rate(0.25);
        let outcome = handler.execute(&p, false).await.unwrap();
        assert_eq!(
            outcome.records_affected,
            (outcome.records_processed as f64 * 0.75) as u64
        );
    }

    #[tokio::test]
    async fn test_archival_payload_respects_dry_run() {
        let p = policy(ArchivalStrategyKind::Archive);
        let outcome = SimulatedArchival.execute(&p, false).await.unwrap();
        assert!(!outcome.payload.is_empty());
        assert!(outcome.records_archived > 0);

        let dry = SimulatedArchival.execute(&p, true).await.unwrap();
        assert!(dry.payload.is_empty());
        assert_eq!(dry.records_archived, outcome.records_archived);
    }

    #[tokio::test]
    async fn test_fixed_probe() {
        let probe = FixedUtilizationProbe::new(96.0);
        assert_eq!(probe.utilization_percent().await.unwrap(), 96.0);
    }
}
