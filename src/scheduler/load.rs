//! Traversal rate governing
//!
//! Each connector instance owns a [`LoadManager`] that turns its schedule's
//! target load (documents per minute) into batch-size recommendations and
//! reports when recent throughput has already used up the budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::utils::SharedClock;

// ============================================================================
// Batch Types
// ============================================================================

/// Recommended size bounds for the next traversal call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSize {
    pub minimum: u64,
    pub maximum: u64,
}

impl BatchSize {
    pub fn new(minimum: u64, maximum: u64) -> Self {
        Self {
            minimum: minimum.min(maximum),
            maximum,
        }
    }

    /// A batch size that forbids traversal right now
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether traversal may proceed
    pub fn allows_traversal(&self) -> bool {
        self.maximum > 0
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.minimum, self.maximum)
    }
}

/// What the coordinator should do before the next batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayPolicy {
    /// More documents are waiting; run again as soon as allowed
    Immediate,
    /// Repository end reached; wait for the schedule's retry delay
    Poll,
    /// The batch failed; back off for the error interval
    Error,
}

impl DelayPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Poll => "poll",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DelayPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one traversal batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub policy: DelayPolicy,
    pub documents: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn new(
        policy: DelayPolicy,
        documents: u64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            policy,
            documents,
            started_at,
            ended_at,
        }
    }

    /// A result with no documents, stamped at `at`
    pub fn empty(policy: DelayPolicy, at: DateTime<Utc>) -> Self {
        Self::new(policy, 0, at, at)
    }
}

// ============================================================================
// Load Manager Contract
// ============================================================================

/// Rate governor for a single connector instance
pub trait LoadManager: Send + Sync {
    /// Update the target rate (documents per minute)
    fn set_load(&mut self, docs_per_minute: u32);

    /// Whether recent throughput already exceeds the budget
    fn should_delay(&mut self) -> bool;

    /// Recommend bounds for the next batch
    fn determine_batch_size(&mut self) -> BatchSize;

    /// Feed back an observed batch
    fn record_result(&mut self, result: &BatchResult);
}

/// Creates one load manager per connector instance
pub trait LoadManagerFactory: Send + Sync {
    fn create(&self, connector_name: &str) -> Box<dyn LoadManager>;
}

// ============================================================================
// Host Load Manager
// ============================================================================

/// Period-based load manager
///
/// The budget for a period is `load * period / 1 minute` documents. Batch
/// results are charged to the period in which the batch ended.
pub struct HostLoadManager {
    clock: SharedClock,
    period: Duration,
    batch_hint: u64,
    load: u32,
    period_start: DateTime<Utc>,
    traversed: u64,
}

impl HostLoadManager {
    pub fn new(clock: SharedClock, period: Duration, batch_hint: u64) -> Self {
        let period_start = clock.now();
        Self {
            clock,
            period,
            batch_hint,
            load: crate::scheduler::schedule::DEFAULT_LOAD,
            period_start,
            traversed: 0,
        }
    }

    /// Documents allowed per period at the current load
    pub fn budget(&self) -> u64 {
        let period_ms = self.period.as_millis() as u64;
        (self.load as u64 * period_ms) / 60_000
    }

    /// Documents already charged to the current period
    pub fn traversed_in_period(&self) -> u64 {
        self.traversed
    }

    fn roll_period(&mut self, at: DateTime<Utc>) {
        let period = chrono::Duration::from_std(self.period)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        if period <= chrono::Duration::zero() {
            return;
        }

        if at - self.period_start >= period {
            let elapsed = (at - self.period_start).num_milliseconds();
            let whole = elapsed / period.num_milliseconds().max(1);
            self.period_start += chrono::Duration::milliseconds(whole * period.num_milliseconds());
            self.traversed = 0;
        }
    }

    fn remaining(&self) -> u64 {
        self.budget().saturating_sub(self.traversed)
    }
}

impl LoadManager for HostLoadManager {
    fn set_load(&mut self, docs_per_minute: u32) {
        self.load = docs_per_minute;
    }

    fn should_delay(&mut self) -> bool {
        let now = self.clock.now();
        self.roll_period(now);
        self.remaining() == 0
    }

    fn determine_batch_size(&mut self) -> BatchSize {
        let now = self.clock.now();
        self.roll_period(now);

        let maximum = self.remaining().min(self.batch_hint);
        BatchSize::new(maximum / 2, maximum)
    }

    fn record_result(&mut self, result: &BatchResult) {
        self.roll_period(result.ended_at);
        self.traversed = self.traversed.saturating_add(result.documents);
    }
}

/// Factory for [`HostLoadManager`]s sharing one clock and configuration
pub struct HostLoadManagerFactory {
    clock: SharedClock,
    period: Duration,
    batch_hint: u64,
}

impl HostLoadManagerFactory {
    pub fn new(clock: SharedClock, period: Duration, batch_hint: u64) -> Self {
        Self {
            clock,
            period,
            batch_hint,
        }
    }
}

impl LoadManagerFactory for HostLoadManagerFactory {
    fn create(&self, _connector_name: &str) -> Box<dyn LoadManager> {
        Box::new(HostLoadManager::new(
            self.clock.clone(),
            self.period,
            self.batch_hint,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
