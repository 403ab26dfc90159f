//! Health snapshots aggregated by the retention monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Component or system health verdict.
///
/// Ordered so that aggregation is a plain `max()`: a single `Error`
/// component outweighs any number of healthy ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable snapshot of one monitoring cycle.
///
/// Appended to a bounded sliding-window history every cycle; never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,

    pub policy_manager: HealthStatus,
    pub cleanup_engine: HealthStatus,
    pub archival_manager: HealthStatus,
    pub storage: HealthStatus,

    pub storage_utilization_percent: f64,

    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl HealthCheck {
    /// Aggregate per-component verdicts with absolute precedence
    /// error > warning > healthy.
    pub fn aggregate(components: &[HealthStatus]) -> HealthStatus {
        components
            .iter()
            .copied()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}
