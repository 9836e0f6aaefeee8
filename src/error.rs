//! Error taxonomy for the recovery orchestrator.
//!
//! Health-check failures are statistical and never surface here — they only
//! drive the status state machine. These types cover the final, unrecoverable
//! outcomes (configuration and plan failures) plus collaborator and step
//! errors. There is no fatal/crash path: an unrecovered service simply stays
//! in its unhealthy status.

use std::time::Duration;

use crate::types::Strategy;

/// Errors returned synchronously by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service '{0}' is not registered")]
    ServiceNotFound(String),

    #[error("no recovery plan found for service '{service}' with strategy {strategy}")]
    PlanNotFound { service: String, strategy: Strategy },

    #[error("invalid recovery plan: {0}")]
    InvalidPlan(String),

    #[error("a recovery plan with id '{0}' is already registered")]
    DuplicatePlan(String),

    #[error("recovery execution '{0}' not found")]
    ExecutionNotFound(uuid::Uuid),

    #[error("execution '{id}' is {status} — rollback requires Success or Failed")]
    NotRollbackable {
        id: uuid::Uuid,
        status: crate::types::ExecutionStatus,
    },
}

/// Errors reported by a monitored service, from its health check or from a
/// recovery hook invoked by a plan step.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("health check failed: {0}")]
    CheckFailed(String),

    #[error("recovery hook {hook} failed: {reason}")]
    HookFailed { hook: String, reason: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single recovery-step attempt.
///
/// A timed-out attempt is an ordinary failure, not a separate error class —
/// it retries and escalates exactly like an action failure.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("action failed: {0}")]
    Action(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        StepError::Action(err.to_string())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(String),

    #[error("could not parse config file: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
