//! Recovery plans: strategy tags, ordered steps, and retry policies.
//!
//! Plans are registered once (built-in catalog plus custom registrations)
//! and never mutated afterwards. Step actions are async closures over a
//! [`StepContext`], so the same generic plan works against any registered
//! service handle.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StepError;
use crate::service::ManagedService;

/// Category of remedy applied to a degraded service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Stop, clear, and restart the service in place.
    Restart,
    /// Keep the service up with reduced capability.
    Degrade,
    /// Cut the service off from its dependents to contain blast radius.
    Isolate,
    /// Move traffic and state to a designated backup.
    Failover,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Restart => write!(f, "restart"),
            Strategy::Degrade => write!(f, "degrade"),
            Strategy::Isolate => write!(f, "isolate"),
            Strategy::Failover => write!(f, "failover"),
        }
    }
}

/// Player-facing impact class of a plan. Anything other than `None` causes
/// user notifications to be emitted while the plan runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImpactClass {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ImpactClass {
    /// Notification severity carried to the user-facing notifier.
    pub fn severity(self) -> super::Severity {
        match self {
            ImpactClass::None | ImpactClass::Low => super::Severity::Info,
            ImpactClass::Medium => super::Severity::Warning,
            ImpactClass::High => super::Severity::Critical,
        }
    }
}

/// Which service(s) a plan applies to. Lookup prefers an exact service
/// match over a wildcard for the same strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlanTarget {
    /// Applies to any registered service.
    Any,
    /// Applies only to the named service.
    Service(String),
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Delay growth curve between retry attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

/// Inter-attempt delay policy, consumed by the executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Perturb each delay by a uniform ±10% offset.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the 1-based index of the attempt
    /// that just failed.
    ///
    /// Fixed → base; Linear → base × a; Exponential → base × 2^(a−1);
    /// clamped to `max_delay`, jittered ±10% when enabled, floored at zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let a = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(a),
            Backoff::Exponential => self.base_delay.saturating_mul(1u32 << (a - 1).min(31)),
        };
        let capped = raw.min(self.max_delay);

        if !self.jitter {
            return capped;
        }
        let range = capped.as_secs_f64() * 0.1;
        if range <= 0.0 {
            return capped;
        }
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((capped.as_secs_f64() + offset).max(0.0))
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Everything a step action needs to act on its target service.
#[derive(Clone)]
pub struct StepContext {
    /// Handle of the service under recovery.
    pub service: Arc<dyn ManagedService>,
    /// Registry name of the service.
    pub service_name: String,
    /// Id of the execution this step runs inside.
    pub execution_id: Uuid,
    /// Services that declared a dependency on the target (for reroute steps).
    pub dependents: Vec<String>,
}

/// An async step action. Actions must be idempotent: a retried attempt may
/// re-run an action whose previous attempt partially applied.
pub type StepFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync>;

/// Wrap an async closure as a [`StepFn`].
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), StepError>> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, Result<(), StepError>> { Box::pin(f(ctx)) })
}

/// One ordered step of a recovery plan.
#[derive(Clone)]
pub struct RecoveryStep {
    /// Short machine-friendly step name.
    pub name: String,
    /// Human-readable description, used in notifications and logs.
    pub description: String,
    /// The idempotent action itself.
    pub action: StepFn,
    /// Timeout for a single attempt of the action (and of its verification).
    pub timeout: Duration,
    /// Additional attempts after the first (total attempts = retries + 1).
    pub retries: u32,
    /// Optional check that the action reached its desired end-state. An
    /// attempt only counts as success if action and verification both pass.
    pub verify: Option<StepFn>,
    /// Optional compensating action, run best-effort when the step fails
    /// all its attempts.
    pub rollback: Option<StepFn>,
}

impl RecoveryStep {
    /// Step with defaults: 10 s timeout, 1 retry, no verify/rollback.
    pub fn new(name: impl Into<String>, description: impl Into<String>, action: StepFn) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
            timeout: Duration::from_secs(10),
            retries: 1,
            verify: None,
            rollback: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_verify(mut self, verify: StepFn) -> Self {
        self.verify = Some(verify);
        self
    }

    pub fn with_rollback(mut self, rollback: StepFn) -> Self {
        self.rollback = Some(rollback);
        self
    }
}

impl std::fmt::Debug for RecoveryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("has_verify", &self.verify.is_some())
            .field("has_rollback", &self.rollback.is_some())
            .finish()
    }
}

// ============================================================================
// Plans
// ============================================================================

/// An immutable, named recovery procedure.
#[derive(Clone)]
pub struct RecoveryPlan {
    /// Unique plan id (catalog key).
    pub id: String,
    /// Exact service or wildcard target.
    pub target: PlanTarget,
    /// Strategy this plan implements.
    pub strategy: Strategy,
    /// Dispatch priority; higher wins when plans compete (isolation plans
    /// carry the highest).
    pub priority: u8,
    /// Rough expected wall-clock duration, for operator dashboards.
    pub estimated_duration: Duration,
    /// Player-facing impact; drives user notifications.
    pub impact: ImpactClass,
    /// Ordered steps; executed strictly in sequence.
    pub steps: Vec<RecoveryStep>,
    /// Optional post-hoc rollback procedure for a completed execution.
    pub rollback_steps: Vec<RecoveryStep>,
    /// Deadline for the whole execution.
    pub timeout: Duration,
    /// Inter-attempt delay policy for every step.
    pub retry_policy: RetryPolicy,
}

impl RecoveryPlan {
    /// Whether this plan applies to the named service.
    pub fn matches(&self, service_name: &str) -> bool {
        match &self.target {
            PlanTarget::Any => true,
            PlanTarget::Service(name) => name == service_name,
        }
    }

    /// Serializable snapshot for catalog queries (plans themselves hold
    /// closures and are not serializable).
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id.clone(),
            target: match &self.target {
                PlanTarget::Any => "*".to_string(),
                PlanTarget::Service(name) => name.clone(),
            },
            strategy: self.strategy,
            priority: self.priority,
            impact: self.impact,
            estimated_duration_secs: self.estimated_duration.as_secs(),
            timeout_secs: self.timeout.as_secs(),
            step_names: self.steps.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

impl std::fmt::Debug for RecoveryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryPlan")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("strategy", &self.strategy)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

/// Serializable plan description returned by catalog queries.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub target: String,
    pub strategy: Strategy,
    pub priority: u8,
    pub impact: ImpactClass,
    pub estimated_duration_secs: u64,
    pub timeout_secs: u64,
    pub step_names: Vec<String>,
}
