//! User-facing notification collaborator.
//!
//! The orchestrator never talks to players directly; it hands structured
//! payloads to whatever transport the embedding application wires in.

use async_trait::async_trait;
use tracing::info;

use crate::types::Notification;

/// External transport for user-facing recovery notifications.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Default notifier: emits notifications through structured logging.
pub struct LogNotifier;

#[async_trait]
impl UserNotifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        info!(
            service = %notification.service,
            phase = ?notification.phase,
            severity = ?notification.severity,
            execution = %notification.execution_id,
            "{}",
            notification.message
        );
    }
}
