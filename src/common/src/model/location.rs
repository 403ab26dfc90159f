//! Archival location model.

use serde::{Deserialize, Serialize};

/// Name of the location created automatically at startup. It can never be
/// removed.
pub const DEFAULT_LOCATION_NAME: &str = "default";

/// Storage backend kind for an archival location.
///
/// Remote object stores (S3, GCS, Azure) plug in as further variants behind
/// the same `object_store` interface; the engine only ever sees
/// `Arc<dyn ObjectStore>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// Local filesystem directory.
    LocalFs,
    /// In-memory store (tests and ephemeral runs).
    Memory,
}

/// A named place archival jobs write artifacts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalLocation {
    /// Unique location name.
    pub name: String,

    pub kind: LocationKind,

    /// Root path (directory for `LocalFs`; ignored for `Memory`).
    pub path: String,

    /// Whether artifacts written here are compressed.
    #[serde(default)]
    pub compression: bool,

    /// Whether artifacts written here are encrypted at rest.
    #[serde(default)]
    pub encryption: bool,

    /// How long archived artifacts themselves are kept. `None` disables
    /// pruning for this location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,

    /// Soft capacity bound, advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_gb: Option<u64>,
}

impl ArchivalLocation {
    pub fn new(name: impl Into<String>, kind: LocationKind, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
            compression: false,
            encryption: false,
            retention_days: None,
            max_size_gb: None,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_LOCATION_NAME
    }

    /// The location seeded at startup.
    pub fn default_local(path: impl Into<String>) -> Self {
        Self::new(DEFAULT_LOCATION_NAME, LocationKind::LocalFs, path)
    }
}
