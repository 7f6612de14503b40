//! Persistent instance state
//!
//! Three independent key-value stores keyed by instance name hold the
//! configuration, schedule, and checkpoint of every connector instance.
//! Each persisted value carries a [`Stamp`] so the change detector can tell
//! which aspects moved without decoding them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Coordinators, ChangeDetector, admin commands         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ConfigurationStore  ScheduleStore  CheckpointStore         │
//! │                      InventoryStore                         │
//! └─────────────────────────────────────────────────────────────┘
//!                  │                         │
//!                  ▼                         ▼
//!        ┌─────────────────┐       ┌─────────────────┐
//!        │   MemoryStore   │       │   SqliteStore   │
//!        └─────────────────┘       └─────────────────┘
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::scheduler::{Schedule, ScheduleError};

// ============================================================================
// Core Types
// ============================================================================

/// Version marker of one persisted value
///
/// Only ever compared; the value has no meaning beyond its order.
/// `Option<Stamp>` orders `None` below every concrete stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp(pub u64);

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stamps of the three persisted aspects of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StampTriple {
    pub checkpoint: Option<Stamp>,
    pub configuration: Option<Stamp>,
    pub schedule: Option<Stamp>,
}

impl StampTriple {
    pub fn new(
        checkpoint: Option<Stamp>,
        configuration: Option<Stamp>,
        schedule: Option<Stamp>,
    ) -> Self {
        Self {
            checkpoint,
            configuration,
            schedule,
        }
    }
}

/// Persisted instances sorted by name
pub type Inventory = BTreeMap<String, StampTriple>;

/// Persisted configuration of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfiguration {
    /// Connector type the instance was created with
    pub type_name: String,

    /// Type-specific properties
    pub properties: BTreeMap<String, String>,

    /// Opaque type-specific wiring, carried verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_xml: Option<String>,
}

impl StoredConfiguration {
    pub fn new(type_name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties,
            instance_xml: None,
        }
    }

    pub fn with_instance_xml(mut self, xml: impl Into<String>) -> Self {
        self.instance_xml = Some(xml.into());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted schedule no longer parses
    #[error("Stored schedule for '{name}' is invalid: {source}")]
    InvalidSchedule {
        name: String,
        #[source]
        source: ScheduleError,
    },

    /// A lock guarding the store was poisoned
    #[error("Store lock poisoned: {0}")]
    Poisoned(String),

    /// Generic error
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn poisoned(what: impl Into<String>) -> Self {
        Self::Poisoned(what.into())
    }
}

// ============================================================================
// Store Traits
// ============================================================================

/// Configuration store
pub trait ConfigurationStore: Send + Sync {
    fn get_configuration(&self, name: &str) -> StoreResult<Option<StoredConfiguration>>;

    fn set_configuration(&self, name: &str, config: &StoredConfiguration) -> StoreResult<()>;

    fn remove_configuration(&self, name: &str) -> StoreResult<()>;
}

/// Schedule store
pub trait ScheduleStore: Send + Sync {
    fn get_schedule(&self, name: &str) -> StoreResult<Option<Schedule>>;

    fn set_schedule(&self, name: &str, schedule: &Schedule) -> StoreResult<()>;

    fn remove_schedule(&self, name: &str) -> StoreResult<()>;
}

/// Checkpoint store
pub trait CheckpointStore: Send + Sync {
    fn get_checkpoint(&self, name: &str) -> StoreResult<Option<String>>;

    fn set_checkpoint(&self, name: &str, checkpoint: &str) -> StoreResult<()>;

    fn remove_checkpoint(&self, name: &str) -> StoreResult<()>;
}

/// Stamp listing used by change detection
pub trait InventoryStore: Send + Sync {
    /// Every configured instance with the stamps of its three aspects.
    ///
    /// Instances without a stored configuration are not listed.
    fn inventory(&self) -> StoreResult<Inventory>;
}

/// All of the instance stores behind one handle
pub trait InstanceStore: ConfigurationStore + ScheduleStore + CheckpointStore + InventoryStore {
    /// Remove every persisted aspect of an instance
    fn remove_instance(&self, name: &str) -> StoreResult<()> {
        self.remove_checkpoint(name)?;
        self.remove_schedule(name)?;
        self.remove_configuration(name)
    }
}

impl<T> InstanceStore for T where
    T: ConfigurationStore + ScheduleStore + CheckpointStore + InventoryStore
{
}

/// Shared store handle
pub type SharedStore = Arc<dyn InstanceStore>;
