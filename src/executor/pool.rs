//! Timeout-guarded worker pool

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::task::{TaskHandle, TimedCancelable};
use crate::metrics;

/// A submitted task that has not been drained yet
struct LiveTask {
    handle: TaskHandle,
    guard: AbortHandle,
}

/// Worker join handle forwarded to the drain loop
struct Completion {
    id: u64,
    label: String,
    join: JoinHandle<()>,
}

type LiveTasks = Arc<Mutex<HashMap<u64, LiveTask>>>;

/// Runs [`TimedCancelable`] tasks on a bounded set of workers, each under a
/// lifetime guard.
///
/// Must be created inside a Tokio runtime: construction spawns the drain
/// loop that collects finished workers.
pub struct TaskExecutor {
    max_lifetime: Duration,
    workers: Arc<Semaphore>,
    accepting: AtomicBool,
    next_id: AtomicU64,
    live: LiveTasks,
    completions: Mutex<Option<mpsc::UnboundedSender<Completion>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Create an executor running at most `max_workers` tasks at once
    pub fn new(max_workers: usize, max_lifetime: Duration) -> Self {
        let live: LiveTasks = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let drain = tokio::spawn(drain_completions(rx, live.clone()));

        tracing::debug!(
            max_workers,
            max_lifetime_secs = max_lifetime.as_secs_f64(),
            "Task executor started"
        );

        Self {
            max_lifetime,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            accepting: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            live,
            completions: Mutex::new(Some(tx)),
            drain: Mutex::new(Some(drain)),
        }
    }

    /// Maximum lifetime granted to each task
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }

    /// Number of submitted tasks not yet collected by the drain loop
    pub fn active_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// Submit a task.
    ///
    /// Returns `None` without running anything once the executor has been
    /// shut down.
    pub fn submit(&self, task: Arc<dyn TimedCancelable>) -> Option<TaskHandle> {
        if self.is_shutdown() {
            return None;
        }
        let sender = lock(&self.completions).as_ref()?.clone();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let workers = self.workers.clone();
        let body = task.clone();

        let join = tokio::spawn(async move {
            // Dropped on completion, panic, or abort; releases the guard.
            let _done = done_tx;
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            // The lifetime is measured from here, not from submission.
            let _ = started_tx.send(());
            body.run().await;
        });

        let label = task.label().to_string();
        let handle = TaskHandle::new(id, join.abort_handle(), task, Utc::now());
        let guard = spawn_guard(handle.clone(), started_rx, done_rx, self.max_lifetime);

        lock(&self.live).insert(
            id,
            LiveTask {
                handle: handle.clone(),
                guard: guard.clone(),
            },
        );

        if sender.send(Completion { id, label, join }).is_err() {
            // Shutdown raced with this submission.
            lock(&self.live).remove(&id);
            handle.cancel();
            guard.abort();
            return None;
        }

        tracing::debug!(task = handle.label(), id, "Task submitted");
        Some(handle)
    }

    /// Stop accepting tasks and wait up to `wait` for running ones.
    ///
    /// With `interrupt` set every live task is canceled first. Returns
    /// whether all tasks finished in time. Guards and the drain loop are
    /// released either way.
    pub async fn shutdown(&self, interrupt: bool, wait: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        drop(lock(&self.completions).take());

        if interrupt {
            let handles: Vec<TaskHandle> =
                lock(&self.live).values().map(|t| t.handle.clone()).collect();
            for handle in handles {
                handle.cancel();
            }
        }

        let drain = lock(&self.drain).take();
        let finished = match drain {
            Some(mut join) => {
                let finished = tokio::time::timeout(wait, &mut join).await.is_ok();
                join.abort();
                finished
            }
            None => true,
        };

        for (_, task) in lock(&self.live).drain() {
            task.guard.abort();
        }
        self.workers.close();

        if finished {
            tracing::info!(interrupt, "Task executor shut down");
        } else {
            tracing::warn!(
                interrupt,
                wait_secs = wait.as_secs_f64(),
                "Task executor shut down with tasks still running"
            );
        }

        finished
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn spawn_guard(
    handle: TaskHandle,
    started: oneshot::Receiver<()>,
    done: oneshot::Receiver<()>,
    lifetime: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        // Sender dropped unsent: the task ended while waiting for a worker.
        if started.await.is_err() {
            return;
        }

        tokio::select! {
            biased;
            _ = done => {}
            _ = tokio::time::sleep(lifetime) => {
                tracing::warn!(
                    task = handle.label(),
                    id = handle.id(),
                    lifetime_secs = lifetime.as_secs_f64(),
                    "Task exceeded its maximum lifetime"
                );
                metrics::record_task_timeout();
                handle.task().timeout(&handle);
                handle.cancel();
            }
        }
    })
    .abort_handle()
}

async fn drain_completions(mut rx: mpsc::UnboundedReceiver<Completion>, live: LiveTasks) {
    let mut running = FuturesUnordered::new();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(Completion { id, label, join }) => {
                    running.push(async move { (id, label, join.await) });
                }
                None => break,
            },
            Some((id, label, result)) = running.next(), if !running.is_empty() => {
                finish(&live, id, &label, result);
            }
        }
    }

    while let Some((id, label, result)) = running.next().await {
        finish(&live, id, &label, result);
    }
}

fn finish(live: &LiveTasks, id: u64, label: &str, result: Result<(), JoinError>) {
    if let Some(task) = lock(live).remove(&id) {
        task.guard.abort();
    }

    match result {
        Ok(()) => tracing::debug!(task = label, id, "Task finished"),
        Err(e) if e.is_cancelled() => {
            tracing::debug!(task = label, id, "Task interrupted");
        }
        Err(e) => {
            tracing::error!(task = label, id, error = %e, "Task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        runs: AtomicUsize,
        cancels: AtomicUsize,
        timeouts: AtomicUsize,
    }

    #[async_trait]
    impl TimedCancelable for Counting {
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }

        fn timeout(&self, _handle: &TaskHandle) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_done(handle: &TaskHandle) {
        for _ in 0..200 {
            if handle.is_done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not finish");
    }

    #[tokio::test]
    async fn test_submit_runs_task() {
        let executor = TaskExecutor::new(2, Duration::from_secs(5));
        let task = Arc::new(Counting::default());

        let handle = executor.submit(task.clone()).unwrap();
        wait_done(&handle).await;

        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.timeouts.load(Ordering::SeqCst), 0);
        assert!(!handle.is_canceled());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_returns_none() {
        let executor = TaskExecutor::new(2, Duration::from_secs(5));
        assert!(executor.shutdown(false, Duration::from_secs(1)).await);

        let task = Arc::new(Counting::default());
        assert!(executor.submit(task.clone()).is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let executor = TaskExecutor::new(1, Duration::from_secs(5));
        let task = Arc::new(Counting::default());
        let handle = executor.submit(task.clone()).unwrap();

        handle.cancel();
        handle.cancel();
        wait_done(&handle).await;

        assert_eq!(task.cancels.load(Ordering::SeqCst), 1);
        assert!(handle.is_canceled());
    }

    struct Sleeping {
        duration: Duration,
        runs: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl Sleeping {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                runs: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TimedCancelable for Sleeping {
        async fn run(&self) {
            tokio::time::sleep(self.duration).await;
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        fn cancel(&self) {}

        fn timeout(&self, _handle: &TaskHandle) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_lifetime_starts_when_worker_acquired() {
        let executor = TaskExecutor::new(1, Duration::from_millis(200));
        let first = Sleeping::new(Duration::from_millis(150));
        let second = Sleeping::new(Duration::from_millis(150));
        let quick = Sleeping::new(Duration::ZERO);

        executor.submit(first.clone()).unwrap();
        executor.submit(second.clone()).unwrap();
        let handle = executor.submit(quick.clone()).unwrap();

        // Queued ~300ms behind the others, longer than the lifetime
        wait_done(&handle).await;

        assert_eq!(quick.runs.load(Ordering::SeqCst), 1);
        assert!(!handle.is_canceled());
        for task in [&first, &second, &quick] {
            assert_eq!(task.timeouts.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_queued_task_canceled_before_start_never_times_out() {
        let executor = TaskExecutor::new(1, Duration::from_millis(50));
        let busy = Sleeping::new(Duration::from_millis(30));
        let queued = Sleeping::new(Duration::ZERO);

        executor.submit(busy.clone()).unwrap();
        let handle = executor.submit(queued.clone()).unwrap();
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queued.runs.load(Ordering::SeqCst), 0);
        assert_eq!(queued.timeouts.load(Ordering::SeqCst), 0);
    }
}
