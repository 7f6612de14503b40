//! Change propagation between manager processes
//!
//! Several manager processes may share one store. Each runs a
//! [`ChangeDetector`] that diffs the store's stamp inventory against the
//! last one it saw and turns every difference into a [`ChangeEvent`]. The
//! [`ChangeHandler`] feeds those events into the local coordinators, whose
//! entry points ignore events describing state they already hold.

pub mod detector;
pub mod handler;

pub use detector::{diff, ChangeDetector, ChangeKind, InventoryChange};
pub use handler::ChangeHandler;

use async_trait::async_trait;

use crate::scheduler::Schedule;
use crate::storage::StoredConfiguration;

/// A change to persisted instance state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    InstanceAdded {
        name: String,
        configuration: StoredConfiguration,
    },
    InstanceRemoved {
        name: String,
    },
    CheckpointChanged {
        name: String,
        checkpoint: Option<String>,
    },
    ConfigurationChanged {
        name: String,
        configuration: StoredConfiguration,
    },
    ScheduleChanged {
        name: String,
        schedule: Option<Schedule>,
    },
}

impl ChangeEvent {
    /// Instance the event is about
    pub fn name(&self) -> &str {
        match self {
            Self::InstanceAdded { name, .. }
            | Self::InstanceRemoved { name }
            | Self::CheckpointChanged { name, .. }
            | Self::ConfigurationChanged { name, .. }
            | Self::ScheduleChanged { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::InstanceAdded { .. } => ChangeKind::Added,
            Self::InstanceRemoved { .. } => ChangeKind::Removed,
            Self::CheckpointChanged { .. } => ChangeKind::Checkpoint,
            Self::ConfigurationChanged { .. } => ChangeKind::Configuration,
            Self::ScheduleChanged { .. } => ChangeKind::Schedule,
        }
    }
}

/// Receives change events from a detector
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, event: ChangeEvent);
}
