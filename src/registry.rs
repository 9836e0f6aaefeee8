//! Service registry — monitored service handles plus their health records.
//!
//! The registry exclusively owns every [`ServiceHealth`] record. All queries
//! return clones, so callers can never mutate orchestrator state through a
//! returned snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::OrchestratorError;
use crate::service::ManagedService;
use crate::types::ServiceHealth;

pub(crate) struct ServiceEntry {
    pub handle: Arc<dyn ManagedService>,
    pub health: ServiceHealth,
}

/// Registry of supervised services, keyed by unique name.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service under a unique name with a fresh Healthy record.
    ///
    /// Re-registering an existing name replaces the handle and resets its
    /// health record. Fails only on an empty name.
    pub async fn register(
        &self,
        name: &str,
        handle: Arc<dyn ManagedService>,
        dependencies: Vec<String>,
    ) -> Result<(), OrchestratorError> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::EmptyServiceName);
        }

        let mut services = self.services.write().await;
        let replaced = services
            .insert(
                name.to_string(),
                ServiceEntry {
                    handle,
                    health: ServiceHealth::new(name, dependencies),
                },
            )
            .is_some();

        info!(service = %name, replaced = replaced, "Service registered");
        Ok(())
    }

    /// Remove a service and its health record. No-op on unknown names.
    pub async fn unregister(&self, name: &str) {
        let removed = self.services.write().await.remove(name).is_some();
        if removed {
            info!(service = %name, "Service unregistered");
        } else {
            debug!(service = %name, "Unregister of unknown service ignored");
        }
    }

    /// Snapshot of one service's health record.
    pub async fn get(&self, name: &str) -> Option<ServiceHealth> {
        self.services.read().await.get(name).map(|e| e.health.clone())
    }

    /// Snapshot of every health record.
    pub async fn get_all(&self) -> HashMap<String, ServiceHealth> {
        self.services
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.health.clone()))
            .collect()
    }

    /// The service's handle, for health checks and plan steps.
    pub(crate) async fn handle(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.services.read().await.get(name).map(|e| Arc::clone(&e.handle))
    }

    /// Registered names, for the monitor's per-tick sweep.
    pub(crate) async fn names(&self) -> Vec<String> {
        self.services.read().await.keys().cloned().collect()
    }

    /// Services that declared a dependency on `name` (reverse edges),
    /// consumed by isolation plans when rerouting.
    pub async fn dependents_of(&self, name: &str) -> Vec<String> {
        self.services
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.health.dependencies.iter().any(|d| d == name))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Mutate one health record in place; returns `None` for unknown names.
    pub(crate) async fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ServiceHealth) -> R,
    ) -> Option<R> {
        let mut services = self.services.write().await;
        services.get_mut(name).map(|entry| f(&mut entry.health))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
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
    async fn empty_name_is_rejected() {
        let registry = ServiceRegistry::new();
        let result = registry.register("  ", Arc::new(StubService), Vec::new()).await;
        assert!(matches!(result, Err(OrchestratorError::EmptyServiceName)));
    }

    #[tokio::test]
    async fn snapshots_do_not_alias_registry_state() {
        let registry = ServiceRegistry::new();
        registry
            .register("combat", Arc::new(StubService), Vec::new())
            .await
            .unwrap();

        let mut snapshot = registry.get("combat").await.unwrap();
        snapshot.consecutive_failures = 99;

        assert_eq!(registry.get("combat").await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let registry = ServiceRegistry::new();
        registry.unregister("ghost").await;
        assert!(registry.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn dependents_are_reverse_edges() {
        let registry = ServiceRegistry::new();
        registry
            .register("persistence", Arc::new(StubService), Vec::new())
            .await
            .unwrap();
        registry
            .register("combat", Arc::new(StubService), vec!["persistence".into()])
            .await
            .unwrap();
        registry
            .register("chat", Arc::new(StubService), vec!["persistence".into()])
            .await
            .unwrap();

        let mut dependents = registry.dependents_of("persistence").await;
        dependents.sort();
        assert_eq!(dependents, vec!["chat".to_string(), "combat".to_string()]);
        assert!(registry.dependents_of("combat").await.is_empty());
    }
}
