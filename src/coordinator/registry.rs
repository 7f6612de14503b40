//! Coordinator registry
//!
//! Process-wide map from instance name to its [`ConnectorCoordinator`].
//! Lookups create unconfigured coordinators on demand; only configured ones
//! count as existing connectors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::coordinator::{ConnectorCoordinator, CoordinatorContext};

// ============================================================================
// Registry Stats
// ============================================================================

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Coordinators known to the registry
    pub registered: usize,

    /// Coordinators with a configuration
    pub configured: usize,

    /// Coordinators with a batch in flight
    pub running: usize,
}

// ============================================================================
// Coordinator Registry
// ============================================================================

/// Concurrent name -> coordinator map
pub struct CoordinatorRegistry {
    context: Arc<CoordinatorContext>,
    coordinators: RwLock<HashMap<String, Arc<ConnectorCoordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new(context: Arc<CoordinatorContext>) -> Self {
        Self {
            context,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.context
    }

    /// Existing coordinator for `name`, or a freshly inserted unconfigured one
    pub async fn get_or_add(&self, name: &str) -> Arc<ConnectorCoordinator> {
        if let Some(coordinator) = self.coordinators.read().await.get(name) {
            return coordinator.clone();
        }

        let mut coordinators = self.coordinators.write().await;
        coordinators
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(connector = %name, "Registered coordinator");
                ConnectorCoordinator::new(name, self.context.clone())
            })
            .clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ConnectorCoordinator>> {
        self.coordinators.read().await.get(name).cloned()
    }

    /// Every registered coordinator, sorted by name
    pub async fn all(&self) -> Vec<Arc<ConnectorCoordinator>> {
        let mut all: Vec<_> = self.coordinators.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Names of configured connectors, sorted
    pub async fn connector_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for coordinator in self.all().await {
            if coordinator.exists().await {
                names.push(coordinator.name().to_string());
            }
        }
        names
    }

    pub async fn len(&self) -> usize {
        self.coordinators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.coordinators.read().await.is_empty()
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for coordinator in self.all().await {
            stats.registered += 1;
            if coordinator.exists().await {
                stats.configured += 1;
            }
            if coordinator.is_batch_running().await {
                stats.running += 1;
            }
        }
        stats
    }

    /// Shut down every coordinator
    pub async fn shutdown_all(&self) {
        for coordinator in self.all().await {
            coordinator.shutdown().await;
        }
    }
}
