//! Orchestrator configuration — all tunables as operator-editable TOML values.
//!
//! Every interval, ceiling, and selection threshold is a field here with a
//! `Default` matching the shipped behavior, so a missing config file means
//! zero-change operation.
//!
//! ## Loading Order
//!
//! 1. `WARDEN_CONFIG` environment variable (path to TOML file)
//! 2. `warden.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is plain owned data handed to
//! [`Orchestrator::new`](crate::Orchestrator::new) — never ambient global
//! state — so multiple orchestrator instances (e.g. in tests) stay isolated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// Root configuration for one orchestrator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Milliseconds between health-check ticks.
    pub check_interval_ms: u64,

    /// Timeout for a single service health check, in milliseconds.
    /// A check exceeding this counts as a failure for that tick.
    pub check_timeout_ms: u64,

    /// Milliseconds between queue-dispatch ticks.
    pub dispatch_interval_ms: u64,

    /// Concurrency ceiling for recovery executions.
    pub max_concurrent_recoveries: usize,

    /// Seconds a completed execution is retained for inspection before purge.
    pub execution_retention_secs: u64,

    /// Buffer capacity of the event subscription channel.
    pub event_capacity: usize,

    /// Strategy-selection and status-transition thresholds.
    pub thresholds: SelectorThresholds,
}

/// Thresholds shared by the health state machine and the strategy selector.
///
/// The shipped values (3 failures → Unhealthy/Restart, 5 → Failed/Isolate,
/// error rate > 0.5 → Degrade) are operational heuristics, not proven
/// optima — hence config fields rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorThresholds {
    /// Consecutive failures at which a service becomes Unhealthy and a
    /// restart is considered.
    pub unhealthy_failures: u32,

    /// Consecutive failures at which a service becomes Failed and isolation
    /// is considered.
    pub failed_failures: u32,

    /// Error rate (0..1) above which graceful degradation is preferred.
    pub degrade_error_rate: f64,
}

impl Default for SelectorThresholds {
    fn default() -> Self {
        Self {
            unhealthy_failures: 3,
            failed_failures: 5,
            degrade_error_rate: 0.5,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            check_timeout_ms: 2_000,
            dispatch_interval_ms: 500,
            max_concurrent_recoveries: 3,
            execution_retention_secs: 60,
            event_capacity: 256,
            thresholds: SelectorThresholds::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration using the standard search order:
    /// 1. `WARDEN_CONFIG` environment variable
    /// 2. `./warden.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded orchestrator config from WARDEN_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from WARDEN_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "WARDEN_CONFIG points to non-existent file, falling back");
            }
        }

        let local = Path::new("warden.toml");
        if local.exists() {
            match Self::from_file(local) {
                Ok(config) => {
                    info!("Loaded orchestrator config from ./warden.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./warden.toml, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a config from a specific TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall or wedge the orchestrator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid("check_interval_ms must be > 0".into()));
        }
        if self.check_timeout_ms == 0 {
            return Err(ConfigError::Invalid("check_timeout_ms must be > 0".into()));
        }
        if self.dispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch_interval_ms must be > 0".into(),
            ));
        }
        if self.max_concurrent_recoveries == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_recoveries must be >= 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be >= 1".into()));
        }
        let t = &self.thresholds;
        if t.unhealthy_failures == 0 || t.failed_failures <= t.unhealthy_failures {
            return Err(ConfigError::Invalid(
                "thresholds must satisfy 0 < unhealthy_failures < failed_failures".into(),
            ));
        }
        if !(0.0..=1.0).contains(&t.degrade_error_rate) {
            return Err(ConfigError::Invalid(
                "degrade_error_rate must be within 0..=1".into(),
            ));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn execution_retention(&self) -> Duration {
        Duration::from_secs(self.execution_retention_secs)
    }
}
