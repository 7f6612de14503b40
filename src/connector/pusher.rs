//! Document sinks

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ConnectorResult, Document};

/// Accepts traversed documents for delivery to the search index
#[async_trait]
pub trait Pusher: Send + Sync {
    /// Accept one document produced by `connector`
    async fn take(&self, connector: &str, document: &Document) -> ConnectorResult<()>;

    /// Deliver everything accepted so far for `connector`
    async fn flush(&self, connector: &str) -> ConnectorResult<()>;
}

/// Pusher that logs and counts accepted documents
#[derive(Debug, Default)]
pub struct LoggingPusher {
    accepted: AtomicU64,
    flushes: AtomicU64,
}

impl LoggingPusher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents accepted since creation
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Pusher for LoggingPusher {
    async fn take(&self, connector: &str, document: &Document) -> ConnectorResult<()> {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connector = %connector,
            document = %document.id,
            metadata = ?document.metadata,
            "Document accepted"
        );
        Ok(())
    }

    async fn flush(&self, connector: &str) -> ConnectorResult<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connector = %connector, total = self.accepted(), "Pusher flushed");
        Ok(())
    }
}
