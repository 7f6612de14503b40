//! Routes change events into coordinators

use async_trait::async_trait;
use std::sync::Arc;

use super::{ChangeEvent, ChangeListener};
use crate::coordinator::CoordinatorRegistry;

/// Applies detected changes to the local coordinators
pub struct ChangeHandler {
    registry: Arc<CoordinatorRegistry>,
}

impl ChangeHandler {
    pub fn new(registry: Arc<CoordinatorRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChangeListener for ChangeHandler {
    async fn on_change(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::InstanceAdded {
                name,
                configuration,
            } => {
                let coordinator = self.registry.get_or_add(&name).await;
                if let Err(e) = coordinator.connector_added(configuration).await {
                    tracing::warn!(connector = %name, error = %e, "Failed to load added connector");
                }
            }
            ChangeEvent::InstanceRemoved { name } => {
                if let Some(coordinator) = self.registry.get(&name).await {
                    coordinator.connector_removed().await;
                }
            }
            ChangeEvent::CheckpointChanged { name, checkpoint } => {
                if let Some(coordinator) = self.registry.get(&name).await {
                    coordinator.checkpoint_changed(checkpoint).await;
                }
            }
            ChangeEvent::ConfigurationChanged {
                name,
                configuration,
            } => {
                let coordinator = self.registry.get_or_add(&name).await;
                if let Err(e) = coordinator.configuration_changed(configuration).await {
                    tracing::warn!(
                        connector = %name,
                        error = %e,
                        "Failed to apply configuration change"
                    );
                }
            }
            ChangeEvent::ScheduleChanged { name, schedule } => {
                if let Some(coordinator) = self.registry.get(&name).await {
                    coordinator.schedule_changed(schedule).await;
                }
            }
        }
    }
}
