//! Engine configuration.
//!
//! Every field has a default so a partial JSON document is enough, but unknown
//! keys are rejected to catch typos in hand-edited files.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ConflictResolution, ConflictType};
use crate::util::compact_text;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_CLOCK_SKEW_TOLERANCE_MS: i64 = 5 * 60 * 1000;
const DEFAULT_RETENTION_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PARALLEL_EXCHANGES: usize = 4;
const LIVENESS_INTERVAL_MULTIPLIER: u32 = 3;

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Scheduler tick (default: 60 seconds)
    pub sync_interval_secs: u64,
    /// Silence after which a device is marked offline (default: 3 × interval)
    pub liveness_window_secs: Option<u64>,
    /// How far in the future a change timestamp may be before it is rejected
    pub clock_skew_tolerance_ms: i64,
    /// When set, cross-device changes further apart than this are sequential
    pub concurrency_window_ms: Option<i64>,
    /// How long acknowledged changes are kept for late conflict detection
    pub retention_window_secs: u64,
    /// Deadline for a single device exchange
    pub exchange_timeout_secs: u64,
    /// Upper bound on concurrent device exchanges
    pub max_parallel_exchanges: usize,
    /// Start a cycle when connectivity returns and changes are pending
    pub auto_sync_on_reconnect: bool,
    /// Automatic policy per conflict type; missing types are surfaced for manual handling
    pub default_policies: BTreeMap<ConflictType, ConflictResolution>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            liveness_window_secs: None,
            clock_skew_tolerance_ms: DEFAULT_CLOCK_SKEW_TOLERANCE_MS,
            concurrency_window_ms: None,
            retention_window_secs: DEFAULT_RETENTION_WINDOW_SECS,
            exchange_timeout_secs: DEFAULT_EXCHANGE_TIMEOUT_SECS,
            max_parallel_exchanges: DEFAULT_MAX_PARALLEL_EXCHANGES,
            auto_sync_on_reconnect: true,
            default_policies: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON config document
    pub fn from_json_str(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidConfig(format!("invalid config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let payload = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&payload).map_err(|error| match error {
            Error::InvalidConfig(message) => Error::InvalidConfig(format!(
                "{}: {}",
                path.as_ref().display(),
                compact_text(&message)
            )),
            other => other,
        })
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.liveness_window_secs == Some(0) {
            return Err(Error::InvalidConfig(
                "liveness_window_secs must be greater than zero".to_string(),
            ));
        }
        if self.clock_skew_tolerance_ms < 0 {
            return Err(Error::InvalidConfig(
                "clock_skew_tolerance_ms must not be negative".to_string(),
            ));
        }
        if self.concurrency_window_ms.is_some_and(|window| window < 0) {
            return Err(Error::InvalidConfig(
                "concurrency_window_ms must not be negative".to_string(),
            ));
        }
        if self.exchange_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "exchange_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel_exchanges == 0 {
            return Err(Error::InvalidConfig(
                "max_parallel_exchanges must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Explicit liveness window, or three sync intervals
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.liveness_window_secs.map_or_else(
            || self.sync_interval() * LIVENESS_INTERVAL_MULTIPLIER,
            Duration::from_secs,
        )
    }

    #[must_use]
    pub const fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    #[must_use]
    pub const fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// Worker count for a cycle with `device_count` reachable devices
    #[must_use]
    pub fn parallelism_for(&self, device_count: usize) -> usize {
        device_count.clamp(1, self.max_parallel_exchanges.max(1))
    }

    /// Automatic policy for a conflict type, if one other than `Manual` is configured
    #[must_use]
    pub fn auto_policy(&self, conflict_type: ConflictType) -> Option<ConflictResolution> {
        self.default_policies
            .get(&conflict_type)
            .copied()
            .filter(|resolution| *resolution != ConflictResolution::Manual)
    }

    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    #[must_use]
    pub const fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub const fn with_max_parallel_exchanges(mut self, max: usize) -> Self {
        self.max_parallel_exchanges = max;
        self
    }

    #[must_use]
    pub const fn with_concurrency_window(mut self, window_ms: i64) -> Self {
        self.concurrency_window_ms = Some(window_ms);
        self
    }

    #[must_use]
    pub const fn without_auto_sync_on_reconnect(mut self) -> Self {
        self.auto_sync_on_reconnect = false;
        self
    }

    /// Register an automatic policy for a conflict type
    #[must_use]
    pub fn with_policy(mut self, conflict_type: ConflictType, resolution: ConflictResolution) -> Self {
        self.default_policies.insert(conflict_type, resolution);
        self
    }
}
