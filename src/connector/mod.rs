//! Repository adapter contracts
//!
//! A connector type (see [`plugin`]) turns a stored configuration into a
//! [`Connector`]. Traversal then follows a fixed chain:
//!
//! ```text
//! Connector::login() -> Session
//! Session::traversal_manager() -> TraversalManager
//! TraversalManager::resume_from(checkpoint)
//! TraversalManager::traverse(batch_size) -> TraversalBatch
//! ```
//!
//! The documents of a batch go to a [`Pusher`]; the batch counts as done
//! once the pusher accepted and flushed them.

pub mod error;
pub mod filesystem;
pub mod plugin;
pub mod pusher;

pub use error::{ConnectorError, ConnectorResult};
pub use filesystem::FilesystemType;
pub use plugin::{ConnectorFactory, ConnectorType, Properties, TypeRegistry, ValidationOutcome};
pub use pusher::{LoggingPusher, Pusher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scheduler::{BatchSize, DelayPolicy};

/// A document found by a traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Repository-unique identifier
    pub id: String,

    /// Adapter-supplied metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// What one `traverse` call produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalBatch {
    pub documents: Vec<Document>,

    /// Resume position after this batch; `None` keeps the previous one
    pub checkpoint: Option<String>,

    /// When the next batch should run
    pub policy: DelayPolicy,
}

impl TraversalBatch {
    pub fn new(documents: Vec<Document>, checkpoint: Option<String>, policy: DelayPolicy) -> Self {
        Self {
            documents,
            checkpoint,
            policy,
        }
    }
}

/// A running, configured adapter
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session against the repository
    async fn login(&self) -> ConnectorResult<Box<dyn Session>>;

    /// Optional shutdown/delete capability
    fn lifecycle(&self) -> Option<&dyn ConnectorLifecycle> {
        None
    }
}

/// An authenticated repository session
#[async_trait]
pub trait Session: Send + Sync {
    async fn traversal_manager(&self) -> ConnectorResult<Box<dyn TraversalManager>>;
}

/// Cursor over a repository
#[async_trait]
pub trait TraversalManager: Send {
    /// Position the cursor; `None` starts from the beginning
    async fn resume_from(&mut self, checkpoint: Option<&str>) -> ConnectorResult<()>;

    /// Fetch up to `batch.maximum` documents from the cursor
    async fn traverse(&mut self, batch: BatchSize) -> ConnectorResult<TraversalBatch>;
}

/// Resource release hooks some connectors expose
#[async_trait]
pub trait ConnectorLifecycle: Send + Sync {
    /// The manager is stopping; release process resources
    async fn shutdown(&self) -> ConnectorResult<()>;

    /// The instance is being removed for good
    async fn delete(&self) -> ConnectorResult<()>;
}
