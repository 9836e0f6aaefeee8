//! Structured events and user-facing notification payloads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::health::ServiceStatus;
use super::plan::Strategy;

/// Events published on the orchestrator's broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    HealthChanged {
        service: String,
        old_status: ServiceStatus,
        new_status: ServiceStatus,
        timestamp: DateTime<Utc>,
    },
    RecoveryStarted {
        service: String,
        execution_id: Uuid,
        strategy: Strategy,
        timestamp: DateTime<Utc>,
    },
    RecoveryCompleted {
        service: String,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    RecoveryFailed {
        service: String,
        execution_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The service's health record was restored to Healthy by a successful
    /// recovery (emitted in addition to `RecoveryCompleted`).
    ServiceRecovered {
        service: String,
        execution_id: Uuid,
        recovery_count: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Phase of a recovery execution, as reported to users.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Started,
    Succeeded,
    Failed,
}

/// Severity of a user-facing notification, derived from the plan's impact
/// class.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Payload handed to the external user notifier.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub service: String,
    pub message: String,
    pub severity: Severity,
    pub phase: RecoveryPhase,
    pub execution_id: Uuid,
    pub timestamp: DateTime<Utc>,
}
