//! Core data model: service health, recovery plans, executions, events.

mod event;
mod execution;
mod health;
mod plan;

pub use event::{Notification, OrchestratorEvent, RecoveryPhase, Severity};
pub use execution::{ExecutionStatus, RecoveryExecution};
pub use health::{ServiceHealth, ServiceStatus};
pub use plan::{
    step_fn, Backoff, ImpactClass, PlanSummary, PlanTarget, RecoveryPlan, RecoveryStep,
    RetryPolicy, StepContext, StepFn, Strategy,
};
