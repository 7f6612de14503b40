//! Cancelable task contract and submission handles

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;

/// A unit of work the [`TaskExecutor`](super::TaskExecutor) can run under a
/// lifetime guard.
///
/// `cancel` and `timeout` are called from outside the worker, possibly while
/// `run` is still executing, so implementations must tolerate that.
#[async_trait]
pub trait TimedCancelable: Send + Sync + 'static {
    /// Task body
    async fn run(&self);

    /// Cooperative cancellation signal, independent of the worker abort
    fn cancel(&self);

    /// Called by the guard when the task outlives its maximum lifetime
    fn timeout(&self, handle: &TaskHandle);

    /// Label used in log lines
    fn label(&self) -> &str {
        "task"
    }
}

/// Handle to a submitted task
///
/// Cloning is cheap; all clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    abort: AbortHandle,
    task: Arc<dyn TimedCancelable>,
    created_at: DateTime<Utc>,
    canceled: AtomicBool,
}

impl TaskHandle {
    pub(crate) fn new(
        id: u64,
        abort: AbortHandle,
        task: Arc<dyn TimedCancelable>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                abort,
                task,
                created_at,
                canceled: AtomicBool::new(false),
            }),
        }
    }

    /// Executor-assigned task id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// When the task was submitted
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Abort the worker and signal the task's own cancel hook.
    ///
    /// Only the first call has an effect.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.abort.abort();
        self.inner.task.cancel();
    }

    /// Whether `cancel` has been called
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Whether the worker future has completed or been aborted
    pub fn is_done(&self) -> bool {
        self.inner.abort.is_finished()
    }

    pub fn label(&self) -> &str {
        self.inner.task.label()
    }

    pub(crate) fn task(&self) -> &Arc<dyn TimedCancelable> {
        &self.inner.task
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("label", &self.inner.task.label())
            .field("created_at", &self.inner.created_at)
            .field("canceled", &self.is_canceled())
            .field("done", &self.is_done())
            .finish()
    }
}
