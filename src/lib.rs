//! Warden: automatic service-recovery orchestration
//!
//! Monitors the health of registered game backend services (combat,
//! matchmaking, persistence, …), classifies them into health states, and
//! executes recovery procedures — restart, graceful degradation, isolation,
//! or failover — without human intervention.
//!
//! ## Architecture
//!
//! - **Health Monitor**: periodic health-check loop driving the per-service
//!   status state machine
//! - **Strategy Selector**: maps a degraded service's health signal to a
//!   recovery strategy
//! - **Plan Catalog**: built-in and custom recovery procedures, tagged by
//!   strategy
//! - **Scheduler**: FIFO queue with bounded-concurrency dispatch
//! - **Executor**: per-step timeout, retry with backoff, best-effort rollback

pub mod catalog;
pub mod config;
pub mod error;
pub mod notify;
pub mod registry;
pub mod service;
pub mod strategy;
pub mod types;

mod executor;
mod monitor;
mod orchestrator;
mod scheduler;

// Re-export the public surface
pub use config::{OrchestratorConfig, SelectorThresholds};
pub use error::{ConfigError, OrchestratorError, ServiceError, StepError};
pub use notify::{LogNotifier, UserNotifier};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use scheduler::ExecutionCounts;
pub use service::{ErrorReporter, HealthReport, LogReporter, ManagedService, RecoveryHook};

// Re-export commonly used types
pub use types::{
    step_fn, Backoff, ExecutionStatus, ImpactClass, Notification, OrchestratorEvent, PlanSummary,
    PlanTarget, RecoveryExecution, RecoveryPhase, RecoveryPlan, RecoveryStep, RetryPolicy,
    ServiceHealth, ServiceStatus, Severity, StepContext, StepFn, Strategy,
};
