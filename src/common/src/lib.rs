//! Shared types for the custodian data-lifecycle engine.
//!
//! This crate holds the value types exchanged between the lifecycle
//! components (policies, jobs, locations, alerts, health snapshots), the
//! figment-based configuration, and the trait seams through which the
//! engine reaches the external data plane (strategy executors and the
//! storage-utilization probe).

pub mod config;
pub mod model;
pub mod strategy;

pub use config::Configuration;
pub use model::alert::{Alert, AlertCategory, AlertSeverity};
pub use model::health::{HealthCheck, HealthStatus};
pub use model::job::{Job, JobCompletion, JobKind, JobResult, JobStatus};
pub use model::location::{ArchivalLocation, LocationKind};
pub use model::policy::{
    ArchivalStrategyKind, CompressionLevel, DataType, PolicyValidationError, RetentionPolicy,
};
pub use strategy::{
    ArchivalOutcome, ArchivalStrategy, CleanupOutcome, CleanupStrategy, StorageProbe,
    StrategyError,
};
