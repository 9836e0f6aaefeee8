//! The boundary contract between the orchestrator and the services it
//! supervises.
//!
//! A monitored service implements [`ManagedService`]. Only `check_health`
//! is mandatory; the recovery hooks default to no-ops so a thin service
//! works unmodified — built-in plans simply pass through its hooks and the
//! final verification step re-checks health.

use async_trait::async_trait;

use crate::error::ServiceError;

/// Result payload of a service health check.
///
/// The minimal contract is the `healthy` flag; services with richer
/// introspection can attach an error rate and a detail string.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    /// Observed error rate in 0..1, if the service tracks one.
    pub error_rate: Option<f64>,
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error_rate: None,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error_rate: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = Some(rate.clamp(0.0, 1.0));
        self
    }
}

/// A recovery operation requested of a service by a plan step.
///
/// One tagged enum rather than a dozen trait methods: services override a
/// single `recovery_hook` and match on the variants they support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryHook {
    /// Quiesce in-flight work before a restart.
    Prepare,
    Stop,
    Start,
    /// Release caches, handles, and other state held across a restart.
    ClearResources,
    /// Determine which capabilities can be shed.
    AssessDegradation,
    ApplyPerformanceLimits,
    DisableNonEssential,
    /// Confirm the service still serves its core function while degraded.
    VerifyDegraded,
    /// Estimate the blast radius before isolation.
    AssessImpact,
    /// Point the listed dependents away from this service.
    RerouteDependents { dependents: Vec<String> },
    Isolate,
    /// Confirm the rest of the system is stable with the service cut off.
    VerifyStability,
    IdentifyBackup,
    PrepareBackup,
    TransferState,
    ActivateBackup,
}

impl std::fmt::Display for RecoveryHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryHook::Prepare => "prepare",
            RecoveryHook::Stop => "stop",
            RecoveryHook::Start => "start",
            RecoveryHook::ClearResources => "clear_resources",
            RecoveryHook::AssessDegradation => "assess_degradation",
            RecoveryHook::ApplyPerformanceLimits => "apply_performance_limits",
            RecoveryHook::DisableNonEssential => "disable_non_essential",
            RecoveryHook::VerifyDegraded => "verify_degraded",
            RecoveryHook::AssessImpact => "assess_impact",
            RecoveryHook::RerouteDependents { .. } => "reroute_dependents",
            RecoveryHook::Isolate => "isolate",
            RecoveryHook::VerifyStability => "verify_stability",
            RecoveryHook::IdentifyBackup => "identify_backup",
            RecoveryHook::PrepareBackup => "prepare_backup",
            RecoveryHook::TransferState => "transfer_state",
            RecoveryHook::ActivateBackup => "activate_backup",
        };
        write!(f, "{name}")
    }
}

/// Contract implemented by every supervised service.
#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Check the service's health. Errors and timeouts both count as a
    /// failed check for the current tick.
    ///
    /// The default reports healthy: a service without real introspection is
    /// considered up as long as its handle is registered.
    async fn check_health(&self) -> Result<HealthReport, ServiceError> {
        Ok(HealthReport::healthy())
    }

    /// Perform a recovery operation requested by a plan step. The default
    /// accepts every hook as a no-op.
    async fn recovery_hook(&self, hook: RecoveryHook) -> Result<(), ServiceError> {
        let _ = hook;
        Ok(())
    }

    /// Name of the backup service to fail over to, if one is wired up.
    /// Most services have none, which disables the Failover strategy.
    fn failover_target(&self) -> Option<String> {
        None
    }
}

/// External collaborator that receives health-check errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, service: &str, error: &ServiceError);
}

/// Default reporter: forwards to structured logging.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, service: &str, error: &ServiceError) {
        tracing::warn!(service = %service, error = %error, "Health check error reported");
    }
}
