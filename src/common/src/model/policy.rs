//! Retention policy model and validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Tag carried by the built-in policies seeded at startup. Policies with
/// this tag can never be removed.
pub const DEFAULT_POLICY_TAG: &str = "default";

/// Operational data categories governed by retention policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Time-series metrics.
    Metrics,
    /// Application logs.
    Logs,
    /// Distributed traces.
    Traces,
    /// Operational events.
    Events,
    /// Client session records.
    Sessions,
    /// Audit trail entries.
    Audit,
}

impl DataType {
    /// All categories, in seeding order.
    pub const ALL: [DataType; 6] = [
        DataType::Metrics,
        DataType::Logs,
        DataType::Traces,
        DataType::Events,
        DataType::Sessions,
        DataType::Audit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Metrics => "metrics",
            DataType::Logs => "logs",
            DataType::Traces => "traces",
            DataType::Events => "events",
            DataType::Sessions => "sessions",
            DataType::Audit => "audit",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Treatment applied to data once it exceeds the retention period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivalStrategyKind {
    /// Remove aged records in place.
    Delete,
    /// Recompress aged records in place.
    Compress,
    /// Copy aged records to a named archival location.
    Archive,
    /// Keep a sampled subset, drop the rest.
    Sample,
    /// Roll aged records up into coarser aggregates.
    Aggregate,
}

impl ArchivalStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchivalStrategyKind::Delete => "delete",
            ArchivalStrategyKind::Compress => "compress",
            ArchivalStrategyKind::Archive => "archive",
            ArchivalStrategyKind::Sample => "sample",
            ArchivalStrategyKind::Aggregate => "aggregate",
        }
    }

    /// Whether this strategy produces a durable artifact and therefore
    /// belongs to the archival manager rather than the cleanup engine.
    pub fn is_archival(&self) -> bool {
        matches!(self, ArchivalStrategyKind::Archive)
    }
}

impl fmt::Display for ArchivalStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compression effort applied by compress/archive handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    None,
    Low,
    Medium,
    High,
}

impl CompressionLevel {
    /// Expected size ratio after compression (compressed / original).
    pub fn expected_ratio(&self) -> f64 {
        match self {
            CompressionLevel::None => 1.0,
            CompressionLevel::Low => 0.7,
            CompressionLevel::Medium => 0.5,
            CompressionLevel::High => 0.3,
        }
    }
}

/// A named retention rule over one data category.
///
/// Immutable after validation: the policy manager only hands out clones,
/// and mutation goes through an explicit update that re-validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Unique policy name.
    pub name: String,

    /// Data category the policy governs.
    pub data_type: DataType,

    /// Age past which data is subject to the strategy (humantime-encoded
    /// in TOML, e.g. "90days").
    #[serde(with = "humantime_serde")]
    pub retention_period: Duration,

    /// Treatment applied to aged data.
    pub archival_strategy: ArchivalStrategyKind,

    /// Compression effort for compress/archive strategies.
    #[serde(default = "default_compression")]
    pub compression_level: CompressionLevel,

    /// Fraction of records kept by the sample strategy, in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<f64>,

    /// Bucket width for the aggregate strategy.
    #[serde(
        default,
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregation_interval: Option<Duration>,

    /// Disabled policies are never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Due on every scheduling pass, regardless of elapsed interval.
    #[serde(default)]
    pub enforce_immediately: bool,

    /// Execute handlers in estimate-only mode; nothing is mutated.
    #[serde(default)]
    pub dry_run: bool,

    /// Per-policy alerting threshold, in (0, 1].
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Free-form labels. The `default` tag marks irremovable seeded
    /// policies.
    #[serde(default)]
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_compression() -> CompressionLevel {
    CompressionLevel::Medium
}

fn default_enabled() -> bool {
    true
}

fn default_alert_threshold() -> f64 {
    0.8
}

impl RetentionPolicy {
    /// Create a policy with defaults for the optional knobs.
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        retention_period: Duration,
        archival_strategy: ArchivalStrategyKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            data_type,
            retention_period,
            archival_strategy,
            compression_level: default_compression(),
            sampling_rate: None,
            aggregation_interval: None,
            enabled: true,
            enforce_immediately: false,
            dry_run: false,
            alert_threshold: default_alert_threshold(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = Some(rate);
        self
    }

    pub fn with_aggregation_interval(mut self, interval: Duration) -> Self {
        self.aggregation_interval = Some(interval);
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether this is one of the seeded, irremovable policies.
    pub fn is_default(&self) -> bool {
        self.tags.iter().any(|t| t == DEFAULT_POLICY_TAG)
    }

    /// Check every invariant and return all violations at once.
    ///
    /// An empty list means the policy is valid. Violations are returned,
    /// never raised, so a caller can surface every problem in one pass.
    pub fn validate(&self) -> Vec<PolicyValidationError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(PolicyValidationError::EmptyName);
        }

        if self.retention_period.is_zero() {
            errors.push(PolicyValidationError::ZeroRetentionPeriod);
        }

        if let Some(rate) = self.sampling_rate
            && !(0.0..=1.0).contains(&rate)
        {
            errors.push(PolicyValidationError::SamplingRateOutOfRange(rate));
        }

        if !(self.alert_threshold > 0.0 && self.alert_threshold <= 1.0) {
            errors.push(PolicyValidationError::AlertThresholdOutOfRange(
                self.alert_threshold,
            ));
        }

        if self.archival_strategy == ArchivalStrategyKind::Aggregate
            && self.aggregation_interval.is_none()
        {
            errors.push(PolicyValidationError::MissingAggregationInterval);
        }

        if self.archival_strategy == ArchivalStrategyKind::Sample && self.sampling_rate.is_none() {
            errors.push(PolicyValidationError::MissingSamplingRate);
        }

        errors
    }

    /// Human-readable one-liner for logging.
    pub fn display(&self) -> String {
        format!(
            "name={}, data_type={}, strategy={}, period={}, enabled={}",
            self.name,
            self.data_type,
            self.archival_strategy,
            humantime::format_duration(self.retention_period),
            self.enabled,
        )
    }
}

/// The six built-in policies seeded at startup, one per data category.
pub fn default_policies() -> Vec<RetentionPolicy> {
    const DAY: u64 = 24 * 3600;

    vec![
        RetentionPolicy::new(
            "metrics-retention",
            DataType::Metrics,
            Duration::from_secs(90 * DAY),
            ArchivalStrategyKind::Aggregate,
        )
        .with_aggregation_interval(Duration::from_secs(3600))
        .with_tag(DEFAULT_POLICY_TAG),
        RetentionPolicy::new(
            "logs-retention",
            DataType::Logs,
            Duration::from_secs(30 * DAY),
            ArchivalStrategyKind::Compress,
        )
        .with_compression(CompressionLevel::High)
        .with_tag(DEFAULT_POLICY_TAG),
        RetentionPolicy::new(
            "traces-retention",
            DataType::Traces,
            Duration::from_secs(7 * DAY),
            ArchivalStrategyKind::Sample,
        )
        .with_sampling_rate(0.1)
        .with_tag(DEFAULT_POLICY_TAG),
        RetentionPolicy::new(
            "events-retention",
            DataType::Events,
            Duration::from_secs(180 * DAY),
            ArchivalStrategyKind::Archive,
        )
        .with_tag(DEFAULT_POLICY_TAG),
        RetentionPolicy::new(
            "sessions-retention",
            DataType::Sessions,
            Duration::from_secs(14 * DAY),
            ArchivalStrategyKind::Delete,
        )
        .with_tag(DEFAULT_POLICY_TAG),
        RetentionPolicy::new(
            "audit-retention",
            DataType::Audit,
            Duration::from_secs(365 * DAY),
            ArchivalStrategyKind::Archive,
        )
        .with_compression(CompressionLevel::Medium)
        .with_tag(DEFAULT_POLICY_TAG),
    ]
}

/// A single invariant violation found by [`RetentionPolicy::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyValidationError {
    #[error("policy name must not be empty")]
    EmptyName,

    #[error("retention_period must be positive")]
    ZeroRetentionPeriod,

    #[error("sampling_rate {0} is outside [0, 1]")]
    SamplingRateOutOfRange(f64),

    #[error("alert_threshold {0} is outside (0, 1]")]
    AlertThresholdOutOfRange(f64),

    #[error("aggregation_interval is required when archival_strategy is aggregate")]
    MissingAggregationInterval,

    #[error("sampling_rate is required when archival_strategy is sample")]
    MissingSamplingRate,
}
