//! Strategy selection — maps a service's health signal to a recovery
//! strategy.
//!
//! Deterministic and pure: same snapshot in, same strategy out. The clause
//! order is significant. Isolation is checked first because it is the
//! highest-blast-radius remedy, reserved for the worst case. Degradation is
//! checked before restart because it is cheaper. Failover requires a wired
//! backup, which most services lack, and a manually forced Unhealthy status
//! to be reached ahead of the restart clause.

use crate::config::SelectorThresholds;
use crate::types::{ServiceHealth, ServiceStatus, Strategy};

/// Choose the recovery strategy for a degraded service.
pub fn select_strategy(
    health: &ServiceHealth,
    has_failover_target: bool,
    thresholds: &SelectorThresholds,
) -> Strategy {
    let f = health.consecutive_failures;

    if health.status == ServiceStatus::Failed && f >= thresholds.failed_failures {
        return Strategy::Isolate;
    }
    if health.error_rate > thresholds.degrade_error_rate && health.status != ServiceStatus::Failed {
        return Strategy::Degrade;
    }
    if f >= thresholds.unhealthy_failures {
        return Strategy::Restart;
    }
    if has_failover_target && health.status == ServiceStatus::Unhealthy {
        return Strategy::Failover;
    }
    Strategy::Restart
}
