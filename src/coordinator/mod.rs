//! Per-instance coordination
//!
//! This module serializes everything that happens to one connector
//! instance: configuration, scheduling, batch starts, result recording,
//! restarts, and removal.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        CoordinatorRegistry          │
//! │  name -> ConnectorCoordinator       │
//! └──────────────────┬──────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────┐
//! │       ConnectorCoordinator          │
//! │  UNCONFIGURED                       │
//! │    -> CONFIGURED_IDLE               │
//! │    <-> CONFIGURED_RUNNING           │
//! │    -> REMOVED | UNCONFIGURED        │
//! └──────────────────┬──────────────────┘
//!                    │ submit
//!                    ▼
//! ┌─────────────────────────────────────┐
//! │   TaskExecutor (TraversalTask)      │
//! │   login -> traverse -> push         │
//! └─────────────────────────────────────┘
//! ```

#[allow(clippy::module_inception)]
pub mod coordinator;
pub mod registry;
pub mod status;
mod traversal;

pub use coordinator::{ConfigureResponse, ConnectorCoordinator, CoordinatorContext};
pub use registry::{CoordinatorRegistry, RegistryStats};
pub use status::{ConnectorState, ConnectorStatus};
