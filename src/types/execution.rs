//! One concrete, stateful run of a recovery plan against a service.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::plan::{ImpactClass, RecoveryPlan, Strategy};

/// Lifecycle of a recovery execution.
///
/// Pending → Running → {Success | Failed | Cancelled}; Success/Failed may
/// further transition to RolledBack via a post-hoc rollback.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    RolledBack,
}

impl ExecutionStatus {
    /// Pending or Running — the states that make a trigger idempotent.
    pub fn is_active(self) -> bool {
        matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
            ExecutionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Mutable record of one triggered recovery attempt.
///
/// Created by the trigger path, advanced by the executor, retained for a
/// grace window after completion for inspection, then purged.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryExecution {
    pub id: Uuid,
    pub plan_id: String,
    pub service_name: String,
    pub status: ExecutionStatus,
    pub strategy: Strategy,
    /// Why this recovery was triggered (health streak, manual call, …).
    pub cause: String,
    pub triggered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 1-based index of the step currently (or last) executing; 0 before
    /// the first step starts. Always ≤ `total_steps`.
    pub current_step: usize,
    pub total_steps: usize,
    /// Accumulated error messages, one per failed step.
    pub errors: Vec<String>,
    /// Arbitrary metrics recorded by the executor (attempt counts, timings).
    pub metrics: HashMap<String, serde_json::Value>,
    /// Whether user-facing notifications are emitted for this execution,
    /// derived from the plan's impact class.
    pub notify_users: bool,
}

impl RecoveryExecution {
    pub fn new(plan: &RecoveryPlan, service_name: &str, cause: &str, strategy: Strategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id.clone(),
            service_name: service_name.to_string(),
            status: ExecutionStatus::Pending,
            strategy,
            cause: cause.to_string(),
            triggered_at: Utc::now(),
            started_at: None,
            ended_at: None,
            current_step: 0,
            total_steps: plan.steps.len(),
            errors: Vec::new(),
            metrics: HashMap::new(),
            notify_users: plan.impact != ImpactClass::None,
        }
    }
}
