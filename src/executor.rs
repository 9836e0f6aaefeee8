//! Recovery executor — runs a plan's steps strictly in order with per-step
//! timeout, retry with backoff, and best-effort rollback.
//!
//! Each execution runs as its own task, spawned by the dispatcher. All
//! mutation of the execution record goes through the ledger; the service's
//! health record is only touched at the terminal transitions (Success →
//! Healthy, Failed/Cancelled → status derived from the failure counter
//! again). Cancellation is cooperative: an in-flight step attempt is never
//! interrupted, the executor checks for it before every step and attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StepError;
use crate::monitor::status_for_failures;
use crate::orchestrator::Shared;
use crate::types::{
    ExecutionStatus, OrchestratorEvent, RecoveryPhase, RecoveryPlan, RecoveryStep, RetryPolicy,
    ServiceStatus, StepContext,
};

enum StepOutcome {
    Success { attempts: u32 },
    Failed { attempts: u32, error: StepError },
    Cancelled,
}

/// Run one recovery execution to completion.
pub(crate) async fn run(
    shared: Arc<Shared>,
    execution_id: Uuid,
    plan: Arc<RecoveryPlan>,
    cancel: CancellationToken,
) {
    let Some(execution) = shared.ledger.get(execution_id).await else {
        return;
    };
    let service_name = execution.service_name;

    let Some(service) = shared.registry.handle(&service_name).await else {
        shared
            .ledger
            .record_error(execution_id, "service unregistered before execution".to_string())
            .await;
        finish_failed(&shared, execution_id, &plan, &service_name).await;
        return;
    };

    let ctx = StepContext {
        service,
        service_name: service_name.clone(),
        execution_id,
        dependents: shared.registry.dependents_of(&service_name).await,
    };

    let started = Instant::now();
    let deadline = started + plan.timeout;

    for (idx, step) in plan.steps.iter().enumerate() {
        if is_cancelled(&shared, execution_id, &cancel).await {
            restore_derived_status(&shared, &service_name).await;
            return;
        }

        let step_no = idx + 1;
        shared.ledger.set_current_step(execution_id, step_no).await;
        debug!(
            execution = %execution_id,
            service = %service_name,
            step = %step.name,
            step_no = step_no,
            total = plan.steps.len(),
            "Executing recovery step"
        );

        match run_step(&shared, execution_id, &ctx, step, &plan.retry_policy, deadline, &cancel).await
        {
            StepOutcome::Success { attempts } => {
                shared
                    .ledger
                    .record_metric(
                        execution_id,
                        &format!("step_{step_no}_attempts"),
                        serde_json::json!(attempts),
                    )
                    .await;
            }
            StepOutcome::Cancelled => {
                restore_derived_status(&shared, &service_name).await;
                return;
            }
            StepOutcome::Failed { attempts, error } => {
                let message = format!(
                    "step {step_no} '{}' failed after {attempts} attempts: {error}",
                    step.name
                );
                warn!(execution = %execution_id, service = %service_name, "{message}");
                shared.ledger.record_error(execution_id, message).await;

                run_rollback(&shared, execution_id, &ctx, step).await;
                finish_failed(&shared, execution_id, &plan, &service_name).await;
                return;
            }
        }
    }

    shared
        .ledger
        .record_metric(
            execution_id,
            "duration_ms",
            serde_json::json!(started.elapsed().as_millis() as u64),
        )
        .await;
    finish_succeeded(&shared, execution_id, &plan, &service_name).await;
}

/// Attempt one step up to `retries + 1` times with policy-driven delays.
async fn run_step(
    shared: &Arc<Shared>,
    execution_id: Uuid,
    ctx: &StepContext,
    step: &RecoveryStep,
    policy: &RetryPolicy,
    deadline: Instant,
    cancel: &CancellationToken,
) -> StepOutcome {
    let total_attempts = step.retries + 1;
    let mut last_error = StepError::Action("no attempt executed".to_string());

    for attempt in 1..=total_attempts {
        if is_cancelled(shared, execution_id, cancel).await {
            return StepOutcome::Cancelled;
        }

        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return StepOutcome::Failed {
                attempts: attempt.saturating_sub(1),
                error: StepError::Action("recovery plan timeout exhausted".to_string()),
            };
        };
        let attempt_timeout = step.timeout.min(remaining);

        match run_attempt(ctx, step, attempt_timeout).await {
            Ok(()) => return StepOutcome::Success { attempts: attempt },
            Err(error) => {
                debug!(
                    execution = %execution_id,
                    step = %step.name,
                    attempt = attempt,
                    of = total_attempts,
                    error = %error,
                    "Step attempt failed"
                );
                last_error = error;
                if attempt < total_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => return StepOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    StepOutcome::Failed {
        attempts: total_attempts,
        error: last_error,
    }
}

/// One attempt: the action under the step timeout, then the verification
/// (if present) under the same timeout. Both must succeed.
async fn run_attempt(
    ctx: &StepContext,
    step: &RecoveryStep,
    attempt_timeout: Duration,
) -> Result<(), StepError> {
    match tokio::time::timeout(attempt_timeout, (step.action)(ctx.clone())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(StepError::Timeout(attempt_timeout)),
    }

    if let Some(verify) = &step.verify {
        match tokio::time::timeout(attempt_timeout, verify(ctx.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(StepError::Timeout(attempt_timeout)),
        }
    }
    Ok(())
}

/// Best-effort rollback of a failed step. A rollback failure is logged and
/// recorded but does not change the execution's outcome.
async fn run_rollback(
    shared: &Arc<Shared>,
    execution_id: Uuid,
    ctx: &StepContext,
    step: &RecoveryStep,
) {
    let Some(rollback) = &step.rollback else {
        return;
    };
    info!(execution = %execution_id, step = %step.name, "Rolling back failed step");
    match tokio::time::timeout(step.timeout, rollback(ctx.clone())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(execution = %execution_id, step = %step.name, error = %e, "Step rollback failed");
            shared
                .ledger
                .record_error(execution_id, format!("rollback of '{}' failed: {e}", step.name))
                .await;
        }
        Err(_) => {
            warn!(execution = %execution_id, step = %step.name, "Step rollback timed out");
            shared
                .ledger
                .record_error(execution_id, format!("rollback of '{}' timed out", step.name))
                .await;
        }
    }
}

/// True when either the shutdown token fired or the execution was flipped
/// to Cancelled through the public API.
async fn is_cancelled(shared: &Arc<Shared>, execution_id: Uuid, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        shared.ledger.cancel(execution_id).await;
        return true;
    }
    !matches!(
        shared.ledger.status_of(execution_id).await,
        Some(status) if status != ExecutionStatus::Cancelled
    )
}

/// Put a service that is no longer Recovering back on its counter-derived
/// status.
async fn restore_derived_status(shared: &Arc<Shared>, service_name: &str) {
    let thresholds = shared.config.thresholds.clone();
    let change = shared
        .registry
        .update(service_name, |health| {
            if health.status != ServiceStatus::Recovering {
                return None;
            }
            let old = health.status;
            health.status = status_for_failures(health.consecutive_failures, &thresholds);
            (old != health.status).then_some((old, health.status))
        })
        .await
        .flatten();

    if let Some((old_status, new_status)) = change {
        shared.emit(OrchestratorEvent::HealthChanged {
            service: service_name.to_string(),
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    }
}

async fn finish_failed(
    shared: &Arc<Shared>,
    execution_id: Uuid,
    plan: &RecoveryPlan,
    service_name: &str,
) {
    let Some(snapshot) = shared.ledger.finish(execution_id, ExecutionStatus::Failed).await else {
        return;
    };
    restore_derived_status(shared, service_name).await;
    if snapshot.status != ExecutionStatus::Failed {
        // Raced with a cancellation; the cancel path already finalized it.
        return;
    }

    let error = snapshot
        .errors
        .last()
        .cloned()
        .unwrap_or_else(|| "recovery failed".to_string());
    info!(
        execution = %execution_id,
        service = %service_name,
        error = %error,
        "Recovery execution failed"
    );
    shared.emit(OrchestratorEvent::RecoveryFailed {
        service: service_name.to_string(),
        execution_id,
        error: error.clone(),
        timestamp: Utc::now(),
    });
    shared
        .notify_users(
            &snapshot,
            plan.impact,
            RecoveryPhase::Failed,
            format!("Recovery of '{service_name}' failed: {error}"),
        )
        .await;
}

async fn finish_succeeded(
    shared: &Arc<Shared>,
    execution_id: Uuid,
    plan: &RecoveryPlan,
    service_name: &str,
) {
    let Some(snapshot) = shared.ledger.finish(execution_id, ExecutionStatus::Success).await else {
        return;
    };
    if snapshot.status != ExecutionStatus::Success {
        restore_derived_status(shared, service_name).await;
        return;
    }

    let now = Utc::now();
    let recovered = shared
        .registry
        .update(service_name, |health| {
            let old = health.status;
            health.consecutive_failures = 0;
            health.status = ServiceStatus::Healthy;
            health.recovery_count += 1;
            health.last_recovery_time = Some(now);
            health.uptime_start = now;
            (old, health.recovery_count)
        })
        .await;

    info!(
        execution = %execution_id,
        service = %service_name,
        plan = %plan.id,
        "Recovery execution succeeded"
    );

    if let Some((old_status, recovery_count)) = recovered {
        if old_status != ServiceStatus::Healthy {
            shared.emit(OrchestratorEvent::HealthChanged {
                service: service_name.to_string(),
                old_status,
                new_status: ServiceStatus::Healthy,
                timestamp: now,
            });
        }
        shared.emit(OrchestratorEvent::ServiceRecovered {
            service: service_name.to_string(),
            execution_id,
            recovery_count,
            timestamp: now,
        });
    }

    shared.emit(OrchestratorEvent::RecoveryCompleted {
        service: service_name.to_string(),
        execution_id,
        timestamp: now,
    });
    shared
        .notify_users(
            &snapshot,
            plan.impact,
            RecoveryPhase::Succeeded,
            format!("Service '{service_name}' recovered"),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::error::ServiceError;
    use crate::service::{HealthReport, ManagedService};
    use crate::types::{
        step_fn, ImpactClass, PlanTarget, RecoveryExecution, RetryPolicy, Strategy,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubService;

    #[async_trait]
    impl ManagedService for StubService {
        async fn check_health(&self) -> Result<HealthReport, ServiceError> {
            Ok(HealthReport::healthy())
        }
    }

    fn test_plan(steps: Vec<RecoveryStep>) -> Arc<RecoveryPlan> {
        Arc::new(RecoveryPlan {
            id: "test_plan".into(),
            target: PlanTarget::Any,
            strategy: Strategy::Restart,
            priority: 1,
            estimated_duration: Duration::from_secs(1),
            impact: ImpactClass::None,
            steps,
            rollback_steps: Vec::new(),
            timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy {
                max_retries: 3,
                backoff: crate::types::Backoff::Fixed,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: false,
            },
        })
    }

    async fn setup(failures: u32) -> Arc<Shared> {
        let shared = Arc::new(Shared::for_tests(OrchestratorConfig::default()));
        shared
            .registry
            .register("cache", Arc::new(StubService), Vec::new())
            .await
            .unwrap();
        shared
            .registry
            .update("cache", |h| {
                h.consecutive_failures = failures;
                h.status = status_for_failures(failures, &OrchestratorConfig::default().thresholds);
            })
            .await;
        shared
    }

    async fn start_execution(shared: &Arc<Shared>, plan: &Arc<RecoveryPlan>) -> Uuid {
        let execution = RecoveryExecution::new(plan, "cache", "test", Strategy::Restart);
        let (id, created) = shared.ledger.insert_idempotent(execution).await;
        assert!(created);
        let dispatched = shared.ledger.pop_dispatchable(1).await;
        assert_eq!(dispatched.len(), 1);
        shared
            .registry
            .update("cache", |h| h.status = ServiceStatus::Recovering)
            .await;
        id
    }

    fn noop_step(name: &str) -> RecoveryStep {
        RecoveryStep::new(name, "no-op", step_fn(|_| async { Ok(()) }))
    }

    #[tokio::test]
    async fn successful_run_heals_the_service() {
        let shared = setup(3).await;
        let plan = test_plan(vec![noop_step("one"), noop_step("two")]);
        let id = start_execution(&shared, &plan).await;

        run(Arc::clone(&shared), id, Arc::clone(&plan), CancellationToken::new()).await;

        let execution = shared.ledger.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.current_step, 2);
        assert!(execution.errors.is_empty());

        let health = shared.registry.get("cache").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.recovery_count, 1);
        assert!(health.last_recovery_time.is_some());
    }

    #[tokio::test]
    async fn failing_step_four_skips_step_five_and_rolls_back() {
        let shared = setup(3).await;
        let rollback_calls = Arc::new(AtomicU32::new(0));
        let step_five_calls = Arc::new(AtomicU32::new(0));

        let rb = Arc::clone(&rollback_calls);
        let failing = RecoveryStep::new(
            "four",
            "always fails",
            step_fn(|_| async { Err(StepError::Action("boom".into())) }),
        )
        .with_retries(2)
        .with_rollback(step_fn(move |_| {
            let rb = Arc::clone(&rb);
            async move {
                rb.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let s5 = Arc::clone(&step_five_calls);
        let step_five = RecoveryStep::new(
            "five",
            "must never run",
            step_fn(move |_| {
                let s5 = Arc::clone(&s5);
                async move {
                    s5.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let plan = test_plan(vec![
            noop_step("one"),
            noop_step("two"),
            noop_step("three"),
            failing,
            step_five,
        ]);
        let id = start_execution(&shared, &plan).await;

        run(Arc::clone(&shared), id, Arc::clone(&plan), CancellationToken::new()).await;

        let execution = shared.ledger.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.current_step, 4);
        assert_eq!(execution.total_steps, 5);
        assert_eq!(execution.errors.len(), 1);
        assert!(execution.errors[0].contains("step 4"));
        assert!(execution.errors[0].contains("3 attempts"));
        assert_eq!(rollback_calls.load(Ordering::SeqCst), 1);
        assert_eq!(step_five_calls.load(Ordering::SeqCst), 0);

        // Service falls back to its counter-derived status, eligible for
        // re-trigger on the next failing check.
        let health = shared.registry.get("cache").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert_eq!(health.recovery_count, 0);
    }

    #[tokio::test]
    async fn verification_failure_consumes_attempts() {
        let shared = setup(3).await;
        let verify_calls = Arc::new(AtomicU32::new(0));

        let vc = Arc::clone(&verify_calls);
        let step = RecoveryStep::new("apply", "action ok, verify fails", step_fn(|_| async { Ok(()) }))
            .with_retries(1)
            .with_verify(step_fn(move |_| {
                let vc = Arc::clone(&vc);
                async move {
                    vc.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::Verification("still broken".into()))
                }
            }));

        let plan = test_plan(vec![step]);
        let id = start_execution(&shared, &plan).await;
        run(Arc::clone(&shared), id, Arc::clone(&plan), CancellationToken::new()).await;

        let execution = shared.ledger.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(verify_calls.load(Ordering::SeqCst), 2);
        assert!(execution.errors[0].contains("verification failed"));
    }

    #[tokio::test]
    async fn slow_step_times_out_as_ordinary_failure() {
        let shared = setup(3).await;
        let step = RecoveryStep::new(
            "slow",
            "sleeps past its timeout",
            step_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }),
        )
        .with_timeout(Duration::from_millis(20))
        .with_retries(0);

        let plan = test_plan(vec![step]);
        let id = start_execution(&shared, &plan).await;
        run(Arc::clone(&shared), id, Arc::clone(&plan), CancellationToken::new()).await;

        let execution = shared.ledger.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_takes_effect_before_next_step() {
        let shared = setup(3).await;

        // Step one cancels its own execution through the public ledger;
        // the executor must observe it before step two.
        let shared_for_step = Arc::clone(&shared);
        let step_two_calls = Arc::new(AtomicU32::new(0));
        let s2 = Arc::clone(&step_two_calls);

        let plan = test_plan(vec![
            RecoveryStep::new(
                "one",
                "cancels the execution",
                step_fn(move |ctx| {
                    let shared = Arc::clone(&shared_for_step);
                    async move {
                        shared.ledger.cancel(ctx.execution_id).await;
                        Ok(())
                    }
                }),
            ),
            RecoveryStep::new(
                "two",
                "must never run",
                step_fn(move |_| {
                    let s2 = Arc::clone(&s2);
                    async move {
                        s2.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ),
        ]);

        let id = start_execution(&shared, &plan).await;
        run(Arc::clone(&shared), id, Arc::clone(&plan), CancellationToken::new()).await;

        let execution = shared.ledger.get(id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.current_step, 1);
        assert_eq!(step_two_calls.load(Ordering::SeqCst), 0);

        let health = shared.registry.get("cache").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Unhealthy);
    }
}
