//! tributary - connector manager
//!
//! Hosts independently configured connector instances, each traversing an
//! external repository in batches and pushing documents to an indexing sink.
//! Batches are scheduled by hour-of-day windows and a target rate, run under
//! a bounded executor with a lifetime limit, and resume from persisted
//! checkpoints. Several manager processes can share one store; each picks up
//! the others' mutations by diffing stamp inventories.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`connector`] - Connector contracts, types and the built-in filesystem type
//! - [`coordinator`] - Per-instance coordinators and their registry
//! - [`executor`] - Bounded task executor with lifetime enforcement
//! - [`scheduler`] - Schedules, load managers and batch results
//! - [`storage`] - Instance stores (memory, SQLite) and stamp inventories
//! - [`change`] - Inventory diffing and change routing
//! - [`manager`] - Facade wiring everything together
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Clocks and helpers
//!
//! # Example
//!
//! ```no_run
//! use tributary::config::Config;
//! use tributary::manager::ConnectorManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let manager = ConnectorManager::new(config)?;
//!     manager.initialize().await?;
//!     manager.start();
//!     tokio::signal::ctrl_c().await?;
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod change;
pub mod config;
pub mod connector;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod manager;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connector::{Connector, ConnectorType, Document, Pusher, TypeRegistry};
    pub use crate::coordinator::{ConfigureResponse, ConnectorState, ConnectorStatus};
    pub use crate::error::{Error, ErrorCategory, ManagerErrorTrait, Result};
    pub use crate::manager::ConnectorManager;
    pub use crate::scheduler::{BatchResult, DelayPolicy, Schedule};
    pub use crate::storage::{InstanceStore, MemoryStore, SqliteStore};
}

// Direct re-exports for convenience
pub use manager::ConnectorManager;
pub use scheduler::Schedule;
