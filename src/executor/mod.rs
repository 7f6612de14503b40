//! Task execution
//!
//! A small pool that runs cancelable tasks and enforces a maximum lifetime
//! on each of them through a separate guard. Failures inside tasks are
//! logged by the pool and never reach the submitter.

pub mod pool;
pub mod task;

pub use pool::TaskExecutor;
pub use task::{TaskHandle, TimedCancelable};
