//! Recovery orchestrator — owns all shared state and the background task
//! lifecycle, and exposes the public API.
//!
//! One instance supervises the services registered on it and nothing else.
//! All state lives behind this instance (no ambient globals), so several
//! orchestrators — production, tests, simulations — coexist in one process
//! without touching each other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, OrchestratorError};
use crate::monitor;
use crate::notify::{LogNotifier, UserNotifier};
use crate::registry::ServiceRegistry;
use crate::scheduler::{self, ExecutionCounts, ExecutionLedger};
use crate::service::{ErrorReporter, LogReporter, ManagedService};
use crate::strategy::select_strategy;
use crate::types::{
    ExecutionStatus, ImpactClass, Notification, OrchestratorEvent, PlanSummary, RecoveryExecution,
    RecoveryPhase, RecoveryPlan, ServiceHealth, ServiceStatus, StepContext, Strategy,
};

/// State shared between the public API and the background tasks.
pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: ServiceRegistry,
    pub(crate) catalog: PlanCatalog,
    pub(crate) ledger: ExecutionLedger,
    events: broadcast::Sender<OrchestratorEvent>,
    pub(crate) notifier: Arc<dyn UserNotifier>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
}

impl Shared {
    fn new(
        config: OrchestratorConfig,
        notifier: Arc<dyn UserNotifier>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            config,
            registry: ServiceRegistry::new(),
            catalog: PlanCatalog::with_builtins(),
            ledger: ExecutionLedger::new(),
            events,
            notifier,
            reporter,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: OrchestratorConfig) -> Self {
        Self::new(config, Arc::new(LogNotifier), Arc::new(LogReporter))
    }

    /// Publish an event; absent subscribers are not an error.
    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    /// Forward a user-facing notification when the plan's impact warrants it.
    pub(crate) async fn notify_users(
        &self,
        execution: &RecoveryExecution,
        impact: ImpactClass,
        phase: RecoveryPhase,
        message: String,
    ) {
        if !execution.notify_users {
            return;
        }
        self.notifier
            .notify(Notification {
                service: execution.service_name.clone(),
                message,
                severity: impact.severity(),
                phase,
                execution_id: execution.id,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Trigger a recovery for a service. Idempotent per service: while an
    /// execution is Pending or Running, its id is returned unchanged.
    pub(crate) async fn trigger_recovery(
        &self,
        service: &str,
        cause: &str,
        strategy: Option<Strategy>,
    ) -> Result<Uuid, OrchestratorError> {
        let health = self
            .registry
            .get(service)
            .await
            .ok_or_else(|| OrchestratorError::ServiceNotFound(service.to_string()))?;

        if let Some(existing) = self.ledger.active_for(service).await {
            return Ok(existing);
        }

        let strategy = match strategy {
            Some(s) => s,
            None => {
                let has_failover = match self.registry.handle(service).await {
                    Some(handle) => handle.failover_target().is_some(),
                    None => false,
                };
                select_strategy(&health, has_failover, &self.config.thresholds)
            }
        };

        let plan = self
            .catalog
            .lookup(service, strategy)
            .await
            .ok_or_else(|| OrchestratorError::PlanNotFound {
                service: service.to_string(),
                strategy,
            })?;

        let execution = RecoveryExecution::new(&plan, service, cause, strategy);
        let (id, created) = self.ledger.insert_idempotent(execution).await;
        if created {
            info!(
                service = %service,
                execution = %id,
                strategy = %strategy,
                plan = %plan.id,
                cause = %cause,
                "Recovery triggered"
            );
        }
        Ok(id)
    }
}

/// Aggregate health and recovery statistics, computed on demand from
/// current in-memory state — there are no separate counters to drift.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorStats {
    pub services_total: usize,
    pub services_healthy: usize,
    pub services_degraded: usize,
    pub services_unhealthy: usize,
    pub services_failed: usize,
    pub services_recovering: usize,
    pub recoveries: ExecutionCounts,
}

impl std::fmt::Display for OrchestratorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} services ({} healthy, {} degraded, {} unhealthy, {} failed, {} recovering), {} recoveries ({} ok, {} failed, {} active, {} queued)",
            self.services_total,
            self.services_healthy,
            self.services_degraded,
            self.services_unhealthy,
            self.services_failed,
            self.services_recovering,
            self.recoveries.total,
            self.recoveries.successful,
            self.recoveries.failed,
            self.recoveries.active,
            self.recoveries.queued
        )
    }
}

/// The service-recovery orchestrator.
///
/// Construct with [`Orchestrator::new`], register services and any custom
/// plans, then [`start`](Orchestrator::start) the background loops. All
/// queries return snapshots; nothing hands out references into internal
/// state.
pub struct Orchestrator {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Orchestrator with default collaborators (log-backed notifier and
    /// error reporter).
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConfigError> {
        Self::with_collaborators(config, Arc::new(LogNotifier), Arc::new(LogReporter))
    }

    /// Orchestrator with explicit notifier and error-reporter collaborators.
    pub fn with_collaborators(
        config: OrchestratorConfig,
        notifier: Arc<dyn UserNotifier>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config, notifier, reporter)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the health-check and queue-dispatch loops.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Orchestrator already started, ignoring");
            return;
        }

        info!("Starting recovery orchestrator background tasks");
        tasks.push(tokio::spawn(monitor::run_monitor(
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        )));
        tasks.push(tokio::spawn(scheduler::run_dispatcher(
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        )));
    }

    /// Stop the background loops and any in-flight executor tasks, then
    /// wait for them to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("Recovery orchestrator shut down");
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a service for supervision.
    pub async fn register_service(
        &self,
        name: &str,
        service: Arc<dyn ManagedService>,
        dependencies: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        self.shared.registry.register(name, service, dependencies).await
    }

    /// Remove a service and its health record. Safe on unknown names.
    pub async fn unregister_service(&self, name: &str) {
        self.shared.registry.unregister(name).await;
    }

    /// Register a custom recovery plan.
    pub async fn register_plan(&self, plan: RecoveryPlan) -> Result<(), OrchestratorError> {
        self.shared.catalog.register(plan).await
    }

    // ------------------------------------------------------------------
    // Recovery control
    // ------------------------------------------------------------------

    /// Trigger a recovery. With no strategy, the selector derives one from
    /// the service's current health. Idempotent per service.
    pub async fn trigger_recovery(
        &self,
        service: &str,
        cause: &str,
        strategy: Option<Strategy>,
    ) -> Result<Uuid, OrchestratorError> {
        self.shared.trigger_recovery(service, cause, strategy).await
    }

    /// Cancel a Pending or Running execution. Returns whether anything
    /// changed. Cancellation of a running execution is cooperative: the
    /// current step attempt finishes, further steps are skipped.
    pub async fn cancel_recovery(&self, id: Uuid) -> bool {
        self.shared.ledger.cancel(id).await
    }

    /// Post-hoc rollback of a completed (Success or Failed) execution via
    /// its plan's rollback step list. Steps run best-effort and in order.
    pub async fn rollback_execution(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let execution = self
            .shared
            .ledger
            .get(id)
            .await
            .ok_or(OrchestratorError::ExecutionNotFound(id))?;
        if !matches!(
            execution.status,
            ExecutionStatus::Success | ExecutionStatus::Failed
        ) {
            return Err(OrchestratorError::NotRollbackable {
                id,
                status: execution.status,
            });
        }

        let plan = self
            .shared
            .catalog
            .get(&execution.plan_id)
            .await
            .ok_or_else(|| OrchestratorError::InvalidPlan(format!(
                "plan '{}' no longer registered",
                execution.plan_id
            )))?;
        let service = self
            .shared
            .registry
            .handle(&execution.service_name)
            .await
            .ok_or_else(|| OrchestratorError::ServiceNotFound(execution.service_name.clone()))?;

        let ctx = StepContext {
            service,
            service_name: execution.service_name.clone(),
            execution_id: id,
            dependents: self
                .shared
                .registry
                .dependents_of(&execution.service_name)
                .await,
        };

        info!(
            execution = %id,
            service = %execution.service_name,
            steps = plan.rollback_steps.len(),
            "Rolling back completed execution"
        );
        for step in &plan.rollback_steps {
            match tokio::time::timeout(step.timeout, (step.action)(ctx.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(execution = %id, step = %step.name, error = %e, "Rollback step failed");
                    self.shared
                        .ledger
                        .record_error(id, format!("rollback step '{}' failed: {e}", step.name))
                        .await;
                }
                Err(_) => {
                    warn!(execution = %id, step = %step.name, "Rollback step timed out");
                    self.shared
                        .ledger
                        .record_error(id, format!("rollback step '{}' timed out", step.name))
                        .await;
                }
            }
        }

        self.shared.ledger.finish(id, ExecutionStatus::RolledBack).await;
        Ok(())
    }

    /// Manually override a service's status. Bypasses the failure-count
    /// derivation until the next health-check tick recomputes it.
    pub async fn force_service_status(&self, name: &str, status: ServiceStatus) -> bool {
        let change = self
            .shared
            .registry
            .update(name, |health| {
                let old = health.status;
                health.status = status;
                (old != status).then_some(old)
            })
            .await;

        match change {
            Some(Some(old_status)) => {
                info!(service = %name, old = %old_status, new = %status, "Service status forced");
                self.shared.emit(OrchestratorEvent::HealthChanged {
                    service: name.to_string(),
                    old_status,
                    new_status: status,
                    timestamp: Utc::now(),
                });
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Health snapshot of one service.
    pub async fn service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.shared.registry.get(name).await
    }

    /// Health snapshots of every registered service.
    pub async fn all_service_health(&self) -> HashMap<String, ServiceHealth> {
        self.shared.registry.get_all().await
    }

    /// Snapshot of one execution, if still retained.
    pub async fn execution(&self, id: Uuid) -> Option<RecoveryExecution> {
        self.shared.ledger.get(id).await
    }

    /// All Pending and Running executions.
    pub async fn active_recoveries(&self) -> HashMap<Uuid, RecoveryExecution> {
        self.shared.ledger.active_map().await
    }

    /// Summaries of every registered recovery plan.
    pub async fn recovery_plans(&self) -> HashMap<String, PlanSummary> {
        self.shared.catalog.summaries().await
    }

    /// Subscribe to orchestrator events. Slow subscribers lag and drop the
    /// oldest events; they never block the core.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.shared.events.subscribe()
    }

    /// Aggregate statistics over services and retained executions.
    pub async fn statistics(&self) -> OrchestratorStats {
        let services = self.shared.registry.get_all().await;
        let mut stats = OrchestratorStats {
            services_total: services.len(),
            services_healthy: 0,
            services_degraded: 0,
            services_unhealthy: 0,
            services_failed: 0,
            services_recovering: 0,
            recoveries: self.shared.ledger.counts().await,
        };
        for health in services.values() {
            match health.status {
                ServiceStatus::Healthy => stats.services_healthy += 1,
                ServiceStatus::Degraded => stats.services_degraded += 1,
                ServiceStatus::Unhealthy => stats.services_unhealthy += 1,
                ServiceStatus::Failed => stats.services_failed += 1,
                ServiceStatus::Recovering => stats.services_recovering += 1,
            }
        }
        stats
    }

    /// One monitor sweep over every service, without the background loop.
    /// Intended for embedders that drive ticks themselves (simulations,
    /// deterministic tests).
    pub async fn run_health_checks_once(&self) {
        monitor::check_all_services(&self.shared).await;
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Background tasks hold child tokens; make sure none outlive us.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::service::HealthReport;
    use async_trait::async_trait;

    struct StubService;

    #[async_trait]
    impl ManagedService for StubService {
        async fn check_health(&self) -> Result<HealthReport, ServiceError> {
            Ok(HealthReport::healthy())
        }
    }

    #[tokio::test]
    async fn statistics_count_services_by_status() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
        for name in ["a", "b", "c"] {
            orchestrator
                .register_service(name, Arc::new(StubService), Vec::new())
                .await
                .unwrap();
        }
        assert!(orchestrator.force_service_status("b", ServiceStatus::Degraded).await);
        assert!(orchestrator.force_service_status("c", ServiceStatus::Failed).await);

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.services_total, 3);
        assert_eq!(stats.services_healthy, 1);
        assert_eq!(stats.services_degraded, 1);
        assert_eq!(stats.services_failed, 1);
        assert_eq!(stats.recoveries.total, 0);
    }

    #[tokio::test]
    async fn force_status_unknown_service_is_false() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
        assert!(
            !orchestrator
                .force_service_status("ghost", ServiceStatus::Failed)
                .await
        );
    }

    #[tokio::test]
    async fn trigger_for_unknown_service_is_config_failure() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default()).unwrap();
        let result = orchestrator.trigger_recovery("ghost", "manual", None).await;
        assert!(matches!(result, Err(OrchestratorError::ServiceNotFound(_))));
        assert!(orchestrator.active_recoveries().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = OrchestratorConfig {
            max_concurrent_recoveries: 0,
            ..OrchestratorConfig::default()
        };
        assert!(Orchestrator::new(config).is_err());
    }
}
