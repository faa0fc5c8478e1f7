//! Ambient crate configuration.
//!
//! Governs the core's own tunables (deadlock-check cadence, backpressure
//! pacing, rollback safe-point timeout) — not domain configuration, which
//! stays an external collaborator. Loaded from TOML via `serde` +
//! `toml`, mirroring `knhk-config`'s loader shape.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ChronosError, ChronosResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoExecutorConfig {
    /// How often `CoExecutor::co_start` polls the wait graph for global
    /// termination or a resolvable deadlock.
    pub deadlock_check_interval_ms: u64,
    /// The `window` term in the backpressure pacing formula (`spec` §4.3).
    pub backpressure_window: f64,
    pub backpressure_enabled: bool,
}

impl Default for CoExecutorConfig {
    fn default() -> Self {
        Self {
            deadlock_check_interval_ms: 5,
            backpressure_window: 50.0,
            backpressure_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutiveConfig {
    /// Bound on how long a peer-initiated rollback waits for the owning
    /// executive to reach a safe point before failing with
    /// `RollbackFailed`.
    pub rollback_safe_point_timeout_ms: u64,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            rollback_safe_point_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChronosConfig {
    pub co_executor: CoExecutorConfig,
    pub executive: ExecutiveConfig,
}

impl ChronosConfig {
    pub fn from_path(path: impl AsRef<Path>) -> ChronosResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ChronosError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| ChronosError::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        })
    }

    pub fn deadlock_check_interval(&self) -> Duration {
        Duration::from_millis(self.co_executor.deadlock_check_interval_ms)
    }

    pub fn rollback_safe_point_timeout(&self) -> Duration {
        Duration::from_millis(self.executive.rollback_safe_point_timeout_ms)
    }
}
