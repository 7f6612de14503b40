//! Error types for connector instances

use crate::scheduler::ScheduleError;
use crate::storage::StoreError;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors raised by connector instances and their coordinators
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// No configured instance has this name
    #[error("Connector '{name}' not found")]
    NotFound { name: String },

    /// The instance is persisted but cannot be brought up
    #[error("Connector '{name}' exists but is misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },

    /// Create attempted on an already configured instance
    #[error("Connector '{name}' already exists")]
    AlreadyExists { name: String },

    /// Type name not present in the type registry
    #[error("Unknown connector type '{type_name}'")]
    UnknownType { type_name: String },

    /// Plugin failed to construct an instance
    #[error("Failed to instantiate connector of type '{type_name}': {reason}")]
    Instantiation { type_name: String, reason: String },

    /// Adapter failed while traversing
    #[error("Traversal failed: {0}")]
    Traversal(String),

    /// Document sink refused a document
    #[error("Push failed: {0}")]
    Push(String),

    /// I/O error inside an adapter
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Schedule could not be parsed or applied
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),
}

impl ConnectorError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn misconfigured(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Misconfigured {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            type_name: type_name.into(),
        }
    }

    pub fn instantiation(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instantiation {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn traversal(reason: impl Into<String>) -> Self {
        Self::Traversal(reason.into())
    }

    /// Whether the caller named an instance that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
