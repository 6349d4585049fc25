//! Configuration for the session repository.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::codec::SerializationStrategy;
use crate::dirty::DirtyPredicateKind;
use crate::error::Result;
use crate::ring::DEFAULT_RING_CAPACITY;

/// Default idle interval of new and loaded sessions (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECS: i64 = 1800;

/// Default name of the sessions region.
pub const DEFAULT_REGION_NAME: &str = "ClusteredSessions";

/// Configuration for the session repository.
///
/// ```toml
/// max_inactive_interval_secs = 900
/// dirty_predicate = "equals"
/// serialization = "delta"
/// ring_capacity = 10000
/// region_name = "Sessions"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle interval applied to sessions; zero or negative disables
    /// expiration.
    pub max_inactive_interval_secs: i64,

    /// Predicate deciding which attribute writes are persisted.
    pub dirty_predicate: DirtyPredicateKind,

    /// What is shipped to the region on save.
    pub serialization: SerializationStrategy,

    /// Number of recently created session ids remembered to suppress
    /// duplicate Created events.
    pub ring_capacity: usize,

    /// Name of the sessions region.
    pub region_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
            dirty_predicate: DirtyPredicateKind::default(),
            serialization: SerializationStrategy::default(),
            ring_capacity: DEFAULT_RING_CAPACITY,
            region_name: DEFAULT_REGION_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The idle interval as a duration, saturating on overflow.
    pub fn max_inactive_interval(&self) -> Duration {
        let secs = self.max_inactive_interval_secs;
        Duration::try_seconds(secs).unwrap_or(if secs < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        })
    }

    /// Set the idle interval.
    pub fn with_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.max_inactive_interval_secs = interval.num_seconds();
        self
    }

    /// Set the dirty predicate.
    pub fn with_dirty_predicate(mut self, kind: DirtyPredicateKind) -> Self {
        self.dirty_predicate = kind;
        self
    }

    /// Set the serialization strategy.
    pub fn with_serialization(mut self, strategy: SerializationStrategy) -> Self {
        self.serialization = strategy;
        self
    }

    /// Set the ring capacity.
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the region name.
    pub fn with_region_name(mut self, name: impl Into<String>) -> Self {
        self.region_name = name.into();
        self
    }
}
