//! Per-service health record and the health state machine's states.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health state of a monitored service.
///
/// Derived from consecutive health-check failures: 0 → Healthy, 1-2 →
/// Degraded, 3-4 → Unhealthy, 5+ → Failed (thresholds configurable).
/// Recovering is entered when an execution is dispatched and left only
/// through the executor's success path or a manual override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ServiceStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
    Recovering,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "healthy"),
            ServiceStatus::Degraded => write!(f, "degraded"),
            ServiceStatus::Unhealthy => write!(f, "unhealthy"),
            ServiceStatus::Failed => write!(f, "failed"),
            ServiceStatus::Recovering => write!(f, "recovering"),
        }
    }
}

/// Health record for one registered service.
///
/// Owned exclusively by the registry; all queries return clones of this
/// snapshot, never references into the registry's map.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Unique service name (registry key).
    pub name: String,
    /// Current status, a pure function of `consecutive_failures` except
    /// while Recovering or manually overridden.
    pub status: ServiceStatus,
    /// Timestamp of the most recent health check, if any.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Failed checks since the last success. Resets to 0 only on a
    /// successful check.
    pub consecutive_failures: u32,
    /// When the service was registered (or last successfully recovered).
    pub uptime_start: DateTime<Utc>,
    /// Response time of the most recent health check.
    pub response_time_ms: f64,
    /// Error rate in 0..1, as reported by the service's health payload.
    pub error_rate: f64,
    /// Names of services this service depends on.
    pub dependencies: Vec<String>,
    /// Completion time of the most recent successful recovery.
    pub last_recovery_time: Option<DateTime<Utc>>,
    /// Number of successful recoveries over the service's lifetime.
    pub recovery_count: u32,
    /// Free-form metadata attached by the embedding application.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ServiceHealth {
    /// Fresh record for a newly registered service: Healthy, zero counters.
    pub fn new(name: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::Healthy,
            last_check_time: None,
            consecutive_failures: 0,
            uptime_start: Utc::now(),
            response_time_ms: 0.0,
            error_rate: 0.0,
            dependencies,
            last_recovery_time: None,
            recovery_count: 0,
            metadata: HashMap::new(),
        }
    }
}
