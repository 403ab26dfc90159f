//! Figment-based configuration for the custodian engine.
//!
//! Values resolve in order: compiled defaults, then `custodian.toml`, then
//! `CUSTODIAN__`-prefixed environment variables (`__` separates nesting,
//! e.g. `CUSTODIAN__CLEANUP__WORKERS=8`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Scheduling knobs for the policy manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between enforcement passes; also the elapsed-time bound
    /// that makes a policy due.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// A pass taking longer than this is logged as a warning.
    #[serde(with = "humantime_serde")]
    pub max_cleanup_duration: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),
            max_cleanup_duration: Duration::from_secs(30 * 60),
        }
    }
}

/// Worker-pool knobs for the cleanup engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupEngineConfig {
    /// Number of concurrent workers draining the job queue.
    pub workers: usize,

    /// Hard deadline for a single strategy invocation.
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,

    /// Dequeue wait bound; keeps idle workers responsive to shutdown.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Bounded automatic retries per policy enforcement.
    pub max_retries: u32,

    /// Delay before a failed job is resubmitted.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for CleanupEngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_millis(500),
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// Worker-pool and storage knobs for the archival manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivalConfig {
    pub workers: usize,

    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Root directory of the default local archival location.
    pub default_location_path: String,

    /// Artifact retention at the default location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_location_retention_days: Option<u32>,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            job_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_millis(500),
            default_location_path: ".data/archive".to_string(),
            default_location_retention_days: Some(365),
        }
    }
}

/// Retention monitor thresholds and history bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Storage utilization percentage raising a warning alert.
    pub storage_warning_threshold: f64,

    /// Storage utilization percentage raising a critical alert.
    pub storage_critical_threshold: f64,

    /// Number of policies-with-errors above which a policy_violation
    /// alert is raised.
    pub policy_error_threshold: usize,

    /// Sliding-window cap on retained health checks.
    pub health_history_limit: usize,

    /// Sliding-window cap on retained alerts.
    pub alert_history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            storage_warning_threshold: 85.0,
            storage_critical_threshold: 95.0,
            policy_error_threshold: 5,
            health_history_limit: 100,
            alert_history_limit: 500,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cleanup: CleanupEngineConfig,
    #[serde(default)]
    pub archival: ArchivalConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Configuration {
    /// Load from `custodian.toml` and the environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("custodian.toml"))
            .merge(Env::prefixed("CUSTODIAN__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Load from an explicit TOML path, still honoring the environment.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CUSTODIAN__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Check cross-field invariants figment cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup.workers == 0 {
            return Err(ConfigError::ZeroWorkers("cleanup"));
        }
        if self.archival.workers == 0 {
            return Err(ConfigError::ZeroWorkers("archival"));
        }

        for (name, value) in [
            (
                "storage_warning_threshold",
                self.monitor.storage_warning_threshold,
            ),
            (
                "storage_critical_threshold",
                self.monitor.storage_critical_threshold,
            ),
        ] {
            if !(0.0 < value && value <= 100.0) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }

        if self.monitor.storage_warning_threshold >= self.monitor.storage_critical_threshold {
            return Err(ConfigError::WarningAboveCritical {
                warning: self.monitor.storage_warning_threshold,
                critical: self.monitor.storage_critical_threshold,
            });
        }

        if self.monitor.health_history_limit == 0 || self.monitor.alert_history_limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }

        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} worker count must be positive")]
    ZeroWorkers(&'static str),

    #[error("{name} must be in (0, 100], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("storage_warning_threshold {warning} must be below storage_critical_threshold {critical}")]
    WarningAboveCritical { warning: f64, critical: f64 },

    #[error("history limits must be positive")]
    ZeroHistoryLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cleanup.workers, 4);
        assert_eq!(config.monitor.storage_critical_threshold, 95.0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Configuration::default();
        config.cleanup.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroWorkers("cleanup"))
        ));
    }

    #[test]
    fn test_warning_must_be_below_critical() {
        let mut config = Configuration::default();
        config.monitor.storage_warning_threshold = 96.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WarningAboveCritical { .. })
        ));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CUSTODIAN__CLEANUP__WORKERS", "8");
            jail.set_env("CUSTODIAN__MONITOR__CHECK_INTERVAL", "5s");

            let config = Configuration::load().expect("load");
            assert_eq!(config.cleanup.workers, 8);
            assert_eq!(config.monitor.check_interval, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "custodian.toml",
                r#"
                [scheduler]
                cleanup_interval = "15m"

                [archival]
                default_location_path = "/var/lib/custodian/archive"
                "#,
            )?;

            let config = Configuration::load().expect("load");
            assert_eq!(config.scheduler.cleanup_interval, Duration::from_secs(900));
            assert_eq!(
                config.archival.default_location_path,
                "/var/lib/custodian/archive"
            );
            // Untouched sections keep their defaults.
            assert_eq!(config.cleanup.max_retries, 3);
            Ok(())
        });
    }
}
