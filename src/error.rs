//! Unified error handling for the tributary crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`ManagerErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use tributary::error::{Error, ManagerErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Will retry: {err}");
//!     } else {
//!         eprintln!("Fatal error ({}): {err}", err.category());
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::connector::error::ConnectorError;
pub use crate::scheduler::error::ScheduleError;
pub use crate::storage::StoreError;

/// Common trait for all tributary error types
pub trait ManagerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (retrying later may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Referenced instance does not exist
    NotFound,
    /// Instance already exists
    Conflict,
    /// Connector type lookup or construction
    Plugin,
    /// Adapter or sink failure during a batch
    Traversal,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Schedule parsing errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Plugin => "plugin",
            Self::Traversal => "traversal",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ManagerErrorTrait for ConnectorError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Traversal(_) | Self::Push(_) | Self::Io(_) => true,
            Self::Store(e) => e.is_recoverable(),
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::UnknownType { .. } | Self::Instantiation { .. } => ErrorCategory::Plugin,
            Self::Misconfigured { .. } => ErrorCategory::Config,
            Self::Traversal(_) | Self::Push(_) => ErrorCategory::Traversal,
            Self::Io(_) | Self::Store(_) => ErrorCategory::Storage,
            Self::InvalidSchedule(_) => ErrorCategory::Scheduler,
        }
    }
}

impl ManagerErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        // Busy/locked databases clear up; corrupt values do not
        matches!(self, Self::Sqlite(_) | Self::Other(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl ManagerErrorTrait for ScheduleError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Scheduler
    }
}

/// Unified error type for the tributary crate
#[derive(Error, Debug)]
pub enum Error {
    /// Connector instance errors
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Schedule parsing errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ManagerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Connector(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
            Self::Schedule(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Connector(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Schedule(e) => e.category(),
            Self::Io(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the error names an instance that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Connector(ConnectorError::NotFound { .. }))
    }
}

/// Result type alias using the unified Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err: Error = ConnectorError::not_found("docs").into();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(err.is_not_found());
        assert!(!err.is_recoverable());

        let err: Error = ConnectorError::already_exists("docs").into();
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err: Error = ConnectorError::unknown_type("smb").into();
        assert_eq!(err.category(), ErrorCategory::Plugin);

        let err: Error = ScheduleError::invalid_hour(30).into();
        assert_eq!(err.category(), ErrorCategory::Scheduler);
    }

    #[test]
    fn test_traversal_errors_are_recoverable() {
        let err: Error = ConnectorError::traversal("connection reset").into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Traversal);
    }

    #[test]
    fn test_misconfigured_is_distinct_from_not_found() {
        let err: Error = ConnectorError::misconfigured("docs", "root missing").into();
        assert!(!err.is_not_found());
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_with_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err = Error::with_source("Failed to open store", io_err);
        assert_eq!(err.to_string(), "Failed to open store");
        assert!(std::error::Error::source(&err).is_some());
    }
}
