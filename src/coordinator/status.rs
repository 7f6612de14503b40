//! Connector status reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a configured connector is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    /// Waiting for the next eligible batch
    Idle,

    /// A batch is running
    Running,

    /// Schedule is disabled
    Disabled,

    /// Held back by a delay policy until `delay_until`
    Delayed,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Disabled => "disabled",
            Self::Delayed => "delayed",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one configured connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub name: String,
    pub type_name: String,
    pub state: ConnectorState,

    /// Persisted schedule string
    pub schedule: Option<String>,

    pub has_checkpoint: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {:<12} {:<9} checkpoint={:<3} schedule={}",
            self.name,
            self.type_name,
            self.state,
            if self.has_checkpoint { "yes" } else { "no" },
            self.schedule.as_deref().unwrap_or("-"),
        )?;
        if let Some(until) = self.delay_until {
            write!(f, " until={}", until.to_rfc3339())?;
        }
        Ok(())
    }
}
