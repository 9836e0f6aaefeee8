//! Health monitor — periodic health-check loop, failure counting, and the
//! status state machine.
//!
//! One tick sweeps every registered service: run its health check under the
//! configured timeout, update the counters, derive the new status, and
//! auto-trigger recovery when a failing check leaves the service Unhealthy
//! or Failed. Ticks never overlap — a slow sweep simply delays the next one.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SelectorThresholds;
use crate::error::ServiceError;
use crate::orchestrator::Shared;
use crate::types::{OrchestratorEvent, ServiceStatus};

/// The failure-count → status function at the core of the state machine.
///
/// Applied after every health check, except while the service is
/// Recovering (only the executor's success path clears that).
pub(crate) fn status_for_failures(failures: u32, thresholds: &SelectorThresholds) -> ServiceStatus {
    if failures >= thresholds.failed_failures {
        ServiceStatus::Failed
    } else if failures >= thresholds.unhealthy_failures {
        ServiceStatus::Unhealthy
    } else if failures >= 1 {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Healthy
    }
}

/// Run the health-check loop until cancelled.
pub(crate) async fn run_monitor(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.check_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_ms = shared.config.check_interval_ms,
        timeout_ms = shared.config.check_timeout_ms,
        "[HealthMonitor] Task starting"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[HealthMonitor] Shutdown signal received");
                return;
            }
            _ = interval.tick() => {
                check_all_services(&shared).await;
            }
        }
    }
}

/// One monitor tick: check every registered service in turn.
pub(crate) async fn check_all_services(shared: &Arc<Shared>) {
    for name in shared.registry.names().await {
        check_service(shared, &name).await;
    }
}

async fn check_service(shared: &Arc<Shared>, name: &str) {
    let Some(handle) = shared.registry.handle(name).await else {
        return;
    };

    let timeout = shared.config.check_timeout();
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, handle.check_health()).await;
    let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (healthy, error_rate, failure) = match outcome {
        Ok(Ok(report)) if report.healthy => (true, report.error_rate, None),
        Ok(Ok(report)) => {
            let reason = report
                .detail
                .clone()
                .unwrap_or_else(|| "service reports unhealthy".to_string());
            (false, report.error_rate, Some(ServiceError::CheckFailed(reason)))
        }
        Ok(Err(e)) => (false, None, Some(e)),
        Err(_) => (
            false,
            None,
            Some(ServiceError::CheckFailed(format!(
                "health check timed out after {timeout:?}"
            ))),
        ),
    };

    if let Some(error) = &failure {
        shared.reporter.report(name, error);
    }

    let thresholds = shared.config.thresholds.clone();
    let change = shared
        .registry
        .update(name, |health| {
            health.last_check_time = Some(Utc::now());
            health.response_time_ms = response_time_ms;
            if let Some(rate) = error_rate {
                health.error_rate = rate;
            }
            if healthy {
                health.consecutive_failures = 0;
            } else {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            }

            let old = health.status;
            if old != ServiceStatus::Recovering {
                health.status = status_for_failures(health.consecutive_failures, &thresholds);
            }
            (old, health.status, health.consecutive_failures)
        })
        .await;

    // Unregistered between the sweep snapshot and the check; nothing to record.
    let Some((old_status, new_status, failures)) = change else {
        return;
    };

    if old_status != new_status {
        info!(
            service = %name,
            old = %old_status,
            new = %new_status,
            failures = failures,
            "Service status changed"
        );
        shared.emit(OrchestratorEvent::HealthChanged {
            service: name.to_string(),
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    } else if !healthy {
        debug!(service = %name, failures = failures, "Health check failed");
    }

    // A failing check that leaves the service Unhealthy or Failed arms a
    // recovery. The trigger is idempotent per service, so a streak fires
    // exactly once while its execution is Pending/Running, and re-arms on
    // the next failing check after a Failed execution.
    if !healthy
        && matches!(
            new_status,
            ServiceStatus::Unhealthy | ServiceStatus::Failed
        )
    {
        let cause = format!("{failures} consecutive health-check failures");
        match shared.trigger_recovery(name, &cause, None).await {
            Ok(execution_id) => {
                debug!(service = %name, execution = %execution_id, "Recovery armed by health monitor");
            }
            Err(e) => {
                debug!(service = %name, error = %e, "Auto-trigger skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::service::{HealthReport, ManagedService};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn status_thresholds() {
        let t = SelectorThresholds::default();
        assert_eq!(status_for_failures(0, &t), ServiceStatus::Healthy);
        assert_eq!(status_for_failures(1, &t), ServiceStatus::Degraded);
        assert_eq!(status_for_failures(2, &t), ServiceStatus::Degraded);
        assert_eq!(status_for_failures(3, &t), ServiceStatus::Unhealthy);
        assert_eq!(status_for_failures(4, &t), ServiceStatus::Unhealthy);
        assert_eq!(status_for_failures(5, &t), ServiceStatus::Failed);
        assert_eq!(status_for_failures(50, &t), ServiceStatus::Failed);
    }

    /// Service whose health is flipped from the test.
    struct SwitchService {
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ManagedService for SwitchService {
        async fn check_health(&self) -> Result<HealthReport, ServiceError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(HealthReport::healthy())
            } else {
                Ok(HealthReport::unhealthy("switched off"))
            }
        }
    }

    struct SlowService;

    #[async_trait]
    impl ManagedService for SlowService {
        async fn check_health(&self) -> Result<HealthReport, ServiceError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(HealthReport::healthy())
        }
    }

    #[tokio::test]
    async fn failures_walk_the_state_machine() {
        let shared = Arc::new(Shared::for_tests(OrchestratorConfig::default()));
        let healthy = Arc::new(AtomicBool::new(false));
        shared
            .registry
            .register(
                "cache",
                Arc::new(SwitchService {
                    healthy: Arc::clone(&healthy),
                }),
                Vec::new(),
            )
            .await
            .unwrap();

        check_all_services(&shared).await;
        assert_eq!(
            shared.registry.get("cache").await.unwrap().status,
            ServiceStatus::Degraded
        );

        check_all_services(&shared).await;
        check_all_services(&shared).await;
        let health = shared.registry.get("cache").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 3);

        // Three failures armed a recovery for the streak
        assert!(shared.ledger.active_for("cache").await.is_some());

        check_all_services(&shared).await;
        check_all_services(&shared).await;
        assert_eq!(
            shared.registry.get("cache").await.unwrap().status,
            ServiceStatus::Failed
        );

        // One success resets the counter and the status
        healthy.store(true, Ordering::SeqCst);
        check_all_services(&shared).await;
        let health = shared.registry.get("cache").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn recovering_status_is_left_to_the_executor() {
        let shared = Arc::new(Shared::for_tests(OrchestratorConfig::default()));
        let healthy = Arc::new(AtomicBool::new(false));
        shared
            .registry
            .register(
                "combat",
                Arc::new(SwitchService {
                    healthy: Arc::clone(&healthy),
                }),
                Vec::new(),
            )
            .await
            .unwrap();
        shared
            .registry
            .update("combat", |h| h.status = ServiceStatus::Recovering)
            .await;

        check_all_services(&shared).await;
        let health = shared.registry.get("combat").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Recovering);
        assert_eq!(health.consecutive_failures, 1);

        // Even a successful check does not clear Recovering; it only
        // resets the counter.
        healthy.store(true, Ordering::SeqCst);
        check_all_services(&shared).await;
        let health = shared.registry.get("combat").await.unwrap();
        assert_eq!(health.status, ServiceStatus::Recovering);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn timed_out_check_counts_as_failure() {
        let config = OrchestratorConfig {
            check_timeout_ms: 20,
            ..OrchestratorConfig::default()
        };
        let shared = Arc::new(Shared::for_tests(config));
        shared
            .registry
            .register("persistence", Arc::new(SlowService), Vec::new())
            .await
            .unwrap();

        check_all_services(&shared).await;
        let health = shared.registry.get("persistence").await.unwrap();
        assert_eq!(health.consecutive_failures, 1);
        assert_eq!(health.status, ServiceStatus::Degraded);
    }
}
