//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Schedule parsing and validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The schedule string does not have the `name:load:delay:intervals` shape
    Malformed {
        input: String,
        reason: String,
    },

    /// Invalid hour value (must be 0-24)
    InvalidHour {
        hour: u32,
    },

    /// An interval could not be parsed as `start-end`
    InvalidInterval {
        interval: String,
    },

    /// Two intervals cover the same hour
    OverlappingIntervals {
        first: String,
        second: String,
    },

    /// Numeric field failed to parse
    InvalidNumber {
        field: String,
        value: String,
    },

    /// Schedule belongs to a different connector than the one it was applied to
    NameMismatch {
        expected: String,
        found: String,
    },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { input, reason } => {
                write!(f, "Malformed schedule '{}': {}", input, reason)
            }
            Self::InvalidHour { hour } => {
                write!(f, "Invalid hour '{}'. Must be 0-24", hour)
            }
            Self::InvalidInterval { interval } => {
                write!(f, "Invalid interval '{}'. Expected START-END", interval)
            }
            Self::OverlappingIntervals { first, second } => {
                write!(f, "Intervals '{}' and '{}' overlap", first, second)
            }
            Self::InvalidNumber { field, value } => {
                write!(f, "Invalid value '{}' for schedule field '{}'", value, field)
            }
            Self::NameMismatch { expected, found } => {
                write!(
                    f,
                    "Schedule is for connector '{}', expected '{}'",
                    found, expected
                )
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

impl ScheduleError {
    /// Create a malformed schedule error
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid hour error
    pub fn invalid_hour(hour: u32) -> Self {
        Self::InvalidHour { hour }
    }

    /// Create an invalid number error
    pub fn invalid_number(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidNumber {
            field: field.into(),
            value: value.into(),
        }
    }
}
