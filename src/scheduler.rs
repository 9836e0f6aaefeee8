//! Recovery scheduler — execution ledger, FIFO queue, and the
//! bounded-concurrency dispatch loop.
//!
//! The ledger is the single synchronization domain for execution state:
//! triggers append, the dispatch loop pops under the concurrency ceiling,
//! executors write progress, and completed records age out after a
//! retention window. Queue order is admission order; throughput is capped
//! by `max_concurrent_recoveries`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor;
use crate::orchestrator::Shared;
use crate::types::{
    ExecutionStatus, OrchestratorEvent, RecoveryExecution, RecoveryPhase, ServiceStatus,
};

// ============================================================================
// Execution Ledger
// ============================================================================

struct LedgerState {
    executions: HashMap<Uuid, RecoveryExecution>,
    queue: VecDeque<Uuid>,
}

/// Aggregate recovery counts for the statistics query.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ExecutionCounts {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub active: usize,
    pub queued: usize,
}

/// Owns every [`RecoveryExecution`] record and the pending FIFO queue.
pub struct ExecutionLedger {
    state: RwLock<LedgerState>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState {
                executions: HashMap::new(),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Append a new execution, unless the service already has one Pending
    /// or Running — triggers are idempotent per service, so the existing id
    /// is returned unchanged.
    ///
    /// Returns `(id, created)`.
    pub async fn insert_idempotent(&self, execution: RecoveryExecution) -> (Uuid, bool) {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .executions
            .values()
            .find(|e| e.service_name == execution.service_name && e.status.is_active())
        {
            debug!(
                service = %execution.service_name,
                execution = %existing.id,
                "Recovery already in flight, returning existing execution"
            );
            return (existing.id, false);
        }

        let id = execution.id;
        state.executions.insert(id, execution);
        state.queue.push_back(id);
        (id, true)
    }

    /// Snapshot of one execution.
    pub async fn get(&self, id: Uuid) -> Option<RecoveryExecution> {
        self.state.read().await.executions.get(&id).cloned()
    }

    /// The active (Pending/Running) execution for a service, if any.
    pub async fn active_for(&self, service: &str) -> Option<Uuid> {
        self.state
            .read()
            .await
            .executions
            .values()
            .find(|e| e.service_name == service && e.status.is_active())
            .map(|e| e.id)
    }

    /// Snapshot of all Pending/Running executions.
    pub async fn active_map(&self) -> HashMap<Uuid, RecoveryExecution> {
        self.state
            .read()
            .await
            .executions
            .iter()
            .filter(|(_, e)| e.status.is_active())
            .map(|(id, e)| (*id, e.clone()))
            .collect()
    }

    /// Transition a Pending or Running execution to Cancelled. The executor
    /// observes this cooperatively before its next step or attempt.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        match state.executions.get_mut(&id) {
            Some(e) if e.status.is_active() => {
                e.status = ExecutionStatus::Cancelled;
                e.ended_at = Some(Utc::now());
                info!(execution = %id, service = %e.service_name, "Recovery execution cancelled");
                true
            }
            _ => false,
        }
    }

    /// Pop the oldest Pending executions while the Running count stays
    /// below the ceiling, marking each Running. Returns snapshots for
    /// dispatch.
    pub(crate) async fn pop_dispatchable(&self, max_running: usize) -> Vec<RecoveryExecution> {
        let mut state = self.state.write().await;
        let mut running = state
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .count();

        let mut dispatched = Vec::new();
        while running < max_running {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            // Cancelled or purged entries may still sit in the queue; skip.
            let Some(execution) = state.executions.get_mut(&id) else {
                continue;
            };
            if execution.status != ExecutionStatus::Pending {
                continue;
            }
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
            running += 1;
            dispatched.push(execution.clone());
        }
        dispatched
    }

    /// Record the 1-based index of the step now executing.
    pub(crate) async fn set_current_step(&self, id: Uuid, step: usize) {
        if let Some(e) = self.state.write().await.executions.get_mut(&id) {
            e.current_step = step;
        }
    }

    /// Append an error message to the execution's error list.
    pub(crate) async fn record_error(&self, id: Uuid, message: String) {
        if let Some(e) = self.state.write().await.executions.get_mut(&id) {
            e.errors.push(message);
        }
    }

    /// Store a metric on the execution's metrics bag.
    pub(crate) async fn record_metric(&self, id: Uuid, key: &str, value: serde_json::Value) {
        if let Some(e) = self.state.write().await.executions.get_mut(&id) {
            e.metrics.insert(key.to_string(), value);
        }
    }

    /// Current status of an execution (for cooperative cancellation checks).
    pub(crate) async fn status_of(&self, id: Uuid) -> Option<ExecutionStatus> {
        self.state.read().await.executions.get(&id).map(|e| e.status)
    }

    /// Finish an execution with a terminal status and return its snapshot.
    /// Leaves already-cancelled executions untouched.
    pub(crate) async fn finish(&self, id: Uuid, status: ExecutionStatus) -> Option<RecoveryExecution> {
        let mut state = self.state.write().await;
        let e = state.executions.get_mut(&id)?;
        if e.status == ExecutionStatus::Cancelled && status != ExecutionStatus::RolledBack {
            return Some(e.clone());
        }
        e.status = status;
        e.ended_at = Some(Utc::now());
        Some(e.clone())
    }

    /// Drop completed executions whose grace window has elapsed.
    pub(crate) async fn purge_expired(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let now = Utc::now();
        let mut state = self.state.write().await;
        let before = state.executions.len();
        state.executions.retain(|_, e| {
            if e.status.is_active() {
                return true;
            }
            match e.ended_at {
                Some(ended) => now - ended < retention,
                None => true,
            }
        });
        before - state.executions.len()
    }

    /// Aggregate counts over the retained executions.
    pub async fn counts(&self) -> ExecutionCounts {
        let state = self.state.read().await;
        let mut counts = ExecutionCounts {
            total: state.executions.len(),
            ..ExecutionCounts::default()
        };
        for e in state.executions.values() {
            match e.status {
                ExecutionStatus::Success => counts.successful += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                ExecutionStatus::Running => counts.active += 1,
                ExecutionStatus::Pending => counts.queued += 1,
                ExecutionStatus::Cancelled | ExecutionStatus::RolledBack => {}
            }
        }
        counts
    }
}

impl Default for ExecutionLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Dispatch loop
// ============================================================================

/// Run the queue-dispatch loop until cancelled.
///
/// Each tick purges expired completed executions, then dequeues Pending
/// executions while the Running count is below the ceiling, handing each to
/// an independent executor task.
pub(crate) async fn run_dispatcher(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(shared.config.dispatch_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_ms = shared.config.dispatch_interval_ms,
        max_concurrent = shared.config.max_concurrent_recoveries,
        "[Dispatcher] Task starting"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Dispatcher] Shutdown signal received");
                return;
            }
            _ = interval.tick() => {
                dispatch_tick(&shared, &cancel).await;
            }
        }
    }
}

async fn dispatch_tick(shared: &Arc<Shared>, cancel: &CancellationToken) {
    let purged = shared
        .ledger
        .purge_expired(shared.config.execution_retention())
        .await;
    if purged > 0 {
        debug!(purged = purged, "Purged expired recovery executions");
    }

    let dispatched = shared
        .ledger
        .pop_dispatchable(shared.config.max_concurrent_recoveries)
        .await;

    for execution in dispatched {
        let Some(plan) = shared.catalog.get(&execution.plan_id).await else {
            // Plans are immutable once registered, so this only happens if
            // the execution outlived a test-constructed catalog.
            warn!(execution = %execution.id, plan = %execution.plan_id, "Plan vanished before dispatch");
            shared
                .ledger
                .record_error(execution.id, format!("plan '{}' not found", execution.plan_id))
                .await;
            shared.ledger.finish(execution.id, ExecutionStatus::Failed).await;
            continue;
        };

        // Mark the service Recovering for the duration of the execution.
        let old_status = shared
            .registry
            .update(&execution.service_name, |health| {
                let old = health.status;
                health.status = ServiceStatus::Recovering;
                old
            })
            .await;

        if let Some(old) = old_status {
            if old != ServiceStatus::Recovering {
                shared.emit(OrchestratorEvent::HealthChanged {
                    service: execution.service_name.clone(),
                    old_status: old,
                    new_status: ServiceStatus::Recovering,
                    timestamp: Utc::now(),
                });
            }
        } else {
            warn!(
                execution = %execution.id,
                service = %execution.service_name,
                "Service unregistered while queued, failing execution"
            );
            shared
                .ledger
                .record_error(execution.id, "service unregistered while queued".to_string())
                .await;
            shared.ledger.finish(execution.id, ExecutionStatus::Failed).await;
            continue;
        }

        info!(
            execution = %execution.id,
            service = %execution.service_name,
            plan = %plan.id,
            strategy = %execution.strategy,
            "Dispatching recovery execution"
        );

        shared.emit(OrchestratorEvent::RecoveryStarted {
            service: execution.service_name.clone(),
            execution_id: execution.id,
            strategy: execution.strategy,
            timestamp: Utc::now(),
        });
        shared
            .notify_users(
                &execution,
                plan.impact,
                RecoveryPhase::Started,
                format!(
                    "Recovery started for '{}' ({})",
                    execution.service_name, plan.id
                ),
            )
            .await;

        tokio::spawn(executor::run(
            Arc::clone(shared),
            execution.id,
            plan,
            cancel.child_token(),
        ));
    }
}
