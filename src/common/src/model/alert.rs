//! Operator-facing alerts raised by the retention monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What condition class the alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    SystemHealth,
    StorageCritical,
    PolicyViolation,
    ComponentStopped,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::SystemHealth => "system_health",
            AlertCategory::StorageCritical => "storage_critical",
            AlertCategory::PolicyViolation => "policy_violation",
            AlertCategory::ComponentStopped => "component_stopped",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single raised alert.
///
/// Created by the monitor when a threshold is crossed; lives in the active
/// map until resolved, and in the (bounded) history forever after.
/// Acknowledgement flags it without removing it from the active map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub resolved: bool,
}

impl Alert {
    pub fn new(severity: AlertSeverity, category: AlertCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            category,
            message: message.into(),
            timestamp: Utc::now(),
            policy_name: None,
            context: HashMap::new(),
            acknowledged: false,
            resolved: false,
        }
    }

    pub fn with_policy(mut self, policy_name: impl Into<String>) -> Self {
        self.policy_name = Some(policy_name.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_defaults() {
        let alert = Alert::new(
            AlertSeverity::Critical,
            AlertCategory::StorageCritical,
            "storage utilization at 96.0%",
        );
        assert!(!alert.acknowledged);
        assert!(!alert.resolved);
        assert!(alert.policy_name.is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Error);
        assert!(AlertSeverity::Error > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }

    #[test]
    fn test_context_builder() {
        let alert = Alert::new(
            AlertSeverity::Warning,
            AlertCategory::PolicyViolation,
            "7 policies with errors",
        )
        .with_policy("logs-retention")
        .with_context("error_count", "7");

        assert_eq!(alert.policy_name.as_deref(), Some("logs-retention"));
        assert_eq!(alert.context.get("error_count").map(String::as_str), Some("7"));
    }
}
