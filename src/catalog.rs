//! Recovery plan catalog — built-in generic plans plus custom registrations.
//!
//! Plans are validated once at registration and read-only afterwards. The
//! four built-ins are wildcard plans acting through the target service's
//! recovery hooks, so any registered service can be recovered out of the
//! box.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{OrchestratorError, StepError};
use crate::service::RecoveryHook;
use crate::types::{
    step_fn, ImpactClass, PlanSummary, PlanTarget, RecoveryPlan, RecoveryStep, RetryPolicy,
    Strategy,
};

/// Catalog of registered recovery plans, keyed by plan id.
pub struct PlanCatalog {
    plans: RwLock<HashMap<String, Arc<RecoveryPlan>>>,
}

impl PlanCatalog {
    /// Empty catalog (no built-ins). Used by tests that want full control.
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog pre-populated with the four built-in wildcard plans.
    pub fn with_builtins() -> Self {
        let mut plans = HashMap::new();
        for plan in builtin_plans() {
            plans.insert(plan.id.clone(), Arc::new(plan));
        }
        Self {
            plans: RwLock::new(plans),
        }
    }

    /// Register a custom plan. Rejects empty ids, step-less plans, and
    /// duplicate ids.
    pub async fn register(&self, plan: RecoveryPlan) -> Result<(), OrchestratorError> {
        if plan.id.trim().is_empty() {
            return Err(OrchestratorError::InvalidPlan("plan id must not be empty".into()));
        }
        if plan.steps.is_empty() {
            return Err(OrchestratorError::InvalidPlan(format!(
                "plan '{}' has no steps",
                plan.id
            )));
        }

        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(OrchestratorError::DuplicatePlan(plan.id));
        }
        info!(plan = %plan.id, strategy = %plan.strategy, "Recovery plan registered");
        plans.insert(plan.id.clone(), Arc::new(plan));
        Ok(())
    }

    /// Resolve a plan for (service, strategy): exact service match first,
    /// then wildcard. Ties break on priority, then id for determinism.
    pub async fn lookup(&self, service: &str, strategy: Strategy) -> Option<Arc<RecoveryPlan>> {
        let plans = self.plans.read().await;
        let mut candidates: Vec<&Arc<RecoveryPlan>> = plans
            .values()
            .filter(|p| p.strategy == strategy && p.matches(service))
            .collect();
        candidates.sort_by(|a, b| {
            let a_exact = a.target != PlanTarget::Any;
            let b_exact = b.target != PlanTarget::Any;
            b_exact
                .cmp(&a_exact)
                .then(b.priority.cmp(&a.priority))
                .then(a.id.cmp(&b.id))
        });

        let found = candidates.first().map(|p| Arc::clone(p));
        if found.is_none() {
            debug!(service = %service, strategy = %strategy, "No recovery plan found");
        }
        found
    }

    /// Fetch a plan by id.
    pub async fn get(&self, plan_id: &str) -> Option<Arc<RecoveryPlan>> {
        self.plans.read().await.get(plan_id).map(Arc::clone)
    }

    /// Serializable summaries of every registered plan.
    pub async fn summaries(&self) -> HashMap<String, PlanSummary> {
        self.plans
            .read()
            .await
            .iter()
            .map(|(id, plan)| (id.clone(), plan.summary()))
            .collect()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ============================================================================
// Built-in plans
// ============================================================================

/// Step that forwards a single recovery hook to the target service.
fn hook_step(
    name: &str,
    description: &str,
    hook: RecoveryHook,
) -> RecoveryStep {
    RecoveryStep::new(
        name,
        description,
        step_fn(move |ctx| {
            let hook = hook.clone();
            async move { ctx.service.recovery_hook(hook).await.map_err(Into::into) }
        }),
    )
}

/// Step whose action is a fresh health check: success only if the service
/// reports healthy again.
fn health_verify_step(name: &str, description: &str) -> RecoveryStep {
    RecoveryStep::new(
        name,
        description,
        step_fn(|ctx| async move {
            match ctx.service.check_health().await {
                Ok(report) if report.healthy => Ok(()),
                Ok(report) => Err(StepError::Verification(
                    report
                        .detail
                        .unwrap_or_else(|| "service still reports unhealthy".to_string()),
                )),
                Err(e) => Err(StepError::Verification(e.to_string())),
            }
        }),
    )
}

/// The four built-in wildcard plans, one per strategy.
pub fn builtin_plans() -> Vec<RecoveryPlan> {
    vec![
        restart_generic(),
        degrade_generic(),
        isolate_generic(),
        failover_generic(),
    ]
}

/// Restart in place: prepare → stop → clear resources → start → verify.
fn restart_generic() -> RecoveryPlan {
    let steps = vec![
        hook_step("prepare", "Quiesce in-flight work", RecoveryHook::Prepare),
        hook_step("stop", "Stop the service", RecoveryHook::Stop).with_rollback(step_fn(
            |ctx| async move {
                ctx.service
                    .recovery_hook(RecoveryHook::Start)
                    .await
                    .map_err(Into::into)
            },
        )),
        hook_step(
            "clear_resources",
            "Release caches and stale handles",
            RecoveryHook::ClearResources,
        ),
        hook_step("start", "Start the service", RecoveryHook::Start).with_rollback(step_fn(
            |ctx| async move {
                ctx.service
                    .recovery_hook(RecoveryHook::Stop)
                    .await
                    .map_err(Into::into)
            },
        )),
        health_verify_step("verify_health", "Confirm the service is healthy again"),
    ];

    RecoveryPlan {
        id: "restart_generic".into(),
        target: PlanTarget::Any,
        strategy: Strategy::Restart,
        priority: 5,
        estimated_duration: Duration::from_secs(30),
        impact: ImpactClass::Low,
        steps,
        rollback_steps: Vec::new(),
        timeout: Duration::from_secs(60),
        retry_policy: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        },
    }
}

/// Keep the service up with reduced capability.
fn degrade_generic() -> RecoveryPlan {
    let steps = vec![
        hook_step(
            "assess_options",
            "Determine which capabilities can be shed",
            RecoveryHook::AssessDegradation,
        ),
        hook_step(
            "apply_limits",
            "Apply performance limits",
            RecoveryHook::ApplyPerformanceLimits,
        ),
        hook_step(
            "disable_non_essential",
            "Disable non-essential features",
            RecoveryHook::DisableNonEssential,
        ),
        hook_step(
            "verify_degraded",
            "Confirm degraded operation still serves the core function",
            RecoveryHook::VerifyDegraded,
        ),
    ];

    RecoveryPlan {
        id: "degrade_generic".into(),
        target: PlanTarget::Any,
        strategy: Strategy::Degrade,
        priority: 4,
        estimated_duration: Duration::from_secs(20),
        impact: ImpactClass::Medium,
        steps,
        rollback_steps: Vec::new(),
        timeout: Duration::from_secs(90),
        retry_policy: RetryPolicy::default(),
    }
}

/// Cut the service off from its dependents. Reserved for severe failures,
/// hence the highest priority of the built-ins.
fn isolate_generic() -> RecoveryPlan {
    let steps = vec![
        hook_step(
            "assess_impact",
            "Estimate blast radius before isolation",
            RecoveryHook::AssessImpact,
        ),
        RecoveryStep::new(
            "reroute_dependents",
            "Point dependent services away from the target",
            step_fn(|ctx| async move {
                let hook = RecoveryHook::RerouteDependents {
                    dependents: ctx.dependents.clone(),
                };
                ctx.service.recovery_hook(hook).await.map_err(Into::into)
            }),
        ),
        hook_step("isolate", "Isolate the service", RecoveryHook::Isolate),
        hook_step(
            "verify_stability",
            "Confirm system stability with the service cut off",
            RecoveryHook::VerifyStability,
        ),
    ];

    RecoveryPlan {
        id: "isolate_generic".into(),
        target: PlanTarget::Any,
        strategy: Strategy::Isolate,
        priority: 10,
        estimated_duration: Duration::from_secs(15),
        impact: ImpactClass::High,
        steps,
        rollback_steps: Vec::new(),
        timeout: Duration::from_secs(60),
        retry_policy: RetryPolicy::default(),
    }
}

/// Move traffic and state to a designated backup. The longest procedure of
/// the four — state transfer dominates.
fn failover_generic() -> RecoveryPlan {
    let steps = vec![
        RecoveryStep::new(
            "identify_backup",
            "Resolve the wired failover target",
            step_fn(|ctx| async move {
                if ctx.service.failover_target().is_none() {
                    return Err(StepError::Action(format!(
                        "service '{}' has no failover target wired",
                        ctx.service_name
                    )));
                }
                ctx.service
                    .recovery_hook(RecoveryHook::IdentifyBackup)
                    .await
                    .map_err(Into::into)
            }),
        ),
        hook_step(
            "prepare_backup",
            "Warm up the backup instance",
            RecoveryHook::PrepareBackup,
        ),
        hook_step(
            "transfer_state",
            "Transfer live state to the backup",
            RecoveryHook::TransferState,
        )
        .with_timeout(Duration::from_secs(60)),
        hook_step(
            "activate_backup",
            "Activate the backup",
            RecoveryHook::ActivateBackup,
        ),
        health_verify_step("verify_health", "Confirm the failover took"),
    ];

    RecoveryPlan {
        id: "failover_generic".into(),
        target: PlanTarget::Any,
        strategy: Strategy::Failover,
        priority: 6,
        estimated_duration: Duration::from_secs(120),
        impact: ImpactClass::Medium,
        steps,
        rollback_steps: Vec::new(),
        timeout: Duration::from_secs(300),
        retry_policy: RetryPolicy::default(),
    }
}
