//! Traversal scheduling
//!
//! This module holds the value types and rate logic that decide when a
//! connector instance may traverse and how much it may fetch.
//!
//! # Overview
//!
//! - **Schedule**: hour intervals, target load, retry delay, disabled flag
//! - **BatchSize / BatchResult / DelayPolicy**: what a batch may do and how
//!   it ended
//! - **LoadManager**: per-instance rate governor turning a schedule's load
//!   into batch sizes and backpressure
//!
//! # Schedule format
//!
//! ```text
//! [#]name:load:retry_delay_ms:start-end[:start-end...]
//!
//! docs:200:300000:0-0          all day, poll every 5 minutes
//! #docs:200:-1:22-4            disabled, run once overnight
//! ```

pub mod error;
pub mod load;
pub mod schedule;

pub use error::{ScheduleError, ScheduleResult};
pub use load::{
    BatchResult, BatchSize, DelayPolicy, HostLoadManager, HostLoadManagerFactory, LoadManager,
    LoadManagerFactory,
};
pub use schedule::{
    Schedule, ScheduleInterval, DEFAULT_LOAD, DEFAULT_RETRY_DELAY_MILLIS, POLLING_DISABLED,
};
