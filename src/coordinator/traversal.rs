//! Traversal batch task
//!
//! One [`TraversalTask`] runs one batch on the executor: login, resume from
//! the checkpoint captured at start, traverse, push, flush, and hand the
//! outcome back to its coordinator.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::coordinator::ConnectorCoordinator;
use crate::connector::{Connector, ConnectorError, ConnectorResult, Pusher};
use crate::executor::{TaskHandle, TimedCancelable};
use crate::metrics;
use crate::scheduler::{BatchResult, BatchSize, DelayPolicy};
use crate::utils::SharedClock;

/// Outcome of a finished batch as reported to the coordinator
#[derive(Debug, Clone)]
pub(crate) struct BatchReport {
    pub result: BatchResult,
    pub checkpoint: Option<String>,
}

pub(crate) struct TraversalTask {
    pub(crate) batch_id: u64,
    name: String,
    label: String,
    coordinator: Weak<ConnectorCoordinator>,
    connector: Arc<dyn Connector>,
    pusher: Arc<dyn Pusher>,
    clock: SharedClock,
    checkpoint: Option<String>,
    batch_size: BatchSize,
    canceled: AtomicBool,
}

impl TraversalTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        batch_id: u64,
        name: &str,
        coordinator: Weak<ConnectorCoordinator>,
        connector: Arc<dyn Connector>,
        pusher: Arc<dyn Pusher>,
        clock: SharedClock,
        checkpoint: Option<String>,
        batch_size: BatchSize,
    ) -> Self {
        Self {
            batch_id,
            name: name.to_string(),
            label: format!("traversal:{name}"),
            coordinator,
            connector,
            pusher,
            clock,
            checkpoint,
            batch_size,
            canceled: AtomicBool::new(false),
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    async fn traverse(&self) -> ConnectorResult<(u64, Option<String>, DelayPolicy)> {
        let session = self.connector.login().await?;
        let mut manager = session.traversal_manager().await?;
        manager.resume_from(self.checkpoint.as_deref()).await?;

        let batch = manager.traverse(self.batch_size).await?;

        let mut pushed = 0u64;
        for document in &batch.documents {
            if self.is_canceled() {
                return Err(ConnectorError::traversal("batch canceled"));
            }
            self.pusher.take(&self.name, document).await?;
            pushed += 1;
        }
        self.pusher.flush(&self.name).await?;

        metrics::record_documents(&self.name, pushed);
        Ok((pushed, batch.checkpoint, batch.policy))
    }
}

#[async_trait]
impl TimedCancelable for TraversalTask {
    async fn run(&self) {
        let started_at = self.clock.now();
        tracing::debug!(
            connector = %self.name,
            batch = self.batch_id,
            size = %self.batch_size,
            "Batch started"
        );

        let report = match self.traverse().await {
            Ok((documents, checkpoint, policy)) => BatchReport {
                result: BatchResult::new(policy, documents, started_at, self.clock.now()),
                checkpoint,
            },
            Err(e) => {
                if !self.is_canceled() {
                    tracing::warn!(connector = %self.name, error = %e, "Traversal failed");
                }
                BatchReport {
                    result: BatchResult::new(DelayPolicy::Error, 0, started_at, self.clock.now()),
                    checkpoint: None,
                }
            }
        };

        if self.is_canceled() {
            tracing::debug!(
                connector = %self.name,
                batch = self.batch_id,
                "Discarding canceled batch"
            );
            return;
        }

        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.finish_batch(self.batch_id, report).await;
        }
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn timeout(&self, _handle: &TaskHandle) {
        let coordinator = self.coordinator.clone();
        let batch_id = self.batch_id;
        tokio::spawn(async move {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.batch_timed_out(batch_id).await;
            }
        });
    }

    fn label(&self) -> &str {
        &self.label
    }
}
