//! Common test utilities
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tributary::change::{ChangeEvent, ChangeListener};
use tributary::connector::plugin::Properties;
use tributary::connector::{
    Connector, ConnectorError, ConnectorFactory, ConnectorLifecycle, ConnectorResult,
    ConnectorType, Document, Pusher, Session, TraversalBatch, TraversalManager, TypeRegistry,
    ValidationOutcome,
};
use tributary::coordinator::{ConnectorCoordinator, CoordinatorContext, CoordinatorRegistry};
use tributary::executor::TaskExecutor;
use tributary::scheduler::{BatchSize, DelayPolicy, HostLoadManagerFactory};
use tributary::storage::{MemoryStore, SharedStore, StoredConfiguration};
use tributary::utils::ManualClock;

pub const MOCK_TYPE: &str = "mock";

/// Property that makes the mock type reject a configuration
pub const REJECT_PROPERTY: &str = "reject";

/// Property that makes the mock type fail to instantiate
pub const BROKEN_PROPERTY: &str = "broken";

// ============================================================================
// Mock Repository
// ============================================================================

/// Repository contents and behaviour shared by every mock connector
pub struct MockRepository {
    documents: Mutex<Vec<String>>,
    drained_policy: Mutex<DelayPolicy>,
    traverse_delay: Mutex<Duration>,
    fail: AtomicBool,
    resumed_from: Mutex<Vec<Option<String>>>,
    pub logins: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MockRepository {
    pub fn new(documents: &[&str]) -> Arc<Self> {
        let mut documents: Vec<String> = documents.iter().map(|d| d.to_string()).collect();
        documents.sort();
        Arc::new(Self {
            documents: Mutex::new(documents),
            drained_policy: Mutex::new(DelayPolicy::Poll),
            traverse_delay: Mutex::new(Duration::ZERO),
            fail: AtomicBool::new(false),
            resumed_from: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    /// Policy returned once the end of the repository is reached
    pub fn set_drained_policy(&self, policy: DelayPolicy) {
        *self.drained_policy.lock().unwrap() = policy;
    }

    /// Make every traverse call take this long
    pub fn set_traverse_delay(&self, delay: Duration) {
        *self.traverse_delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Checkpoints each traversal resumed from, in order
    pub fn resumed_from(&self) -> Vec<Option<String>> {
        self.resumed_from.lock().unwrap().clone()
    }

    fn batch_after(&self, position: Option<&str>, maximum: u64) -> TraversalBatch {
        let documents = self.documents.lock().unwrap();
        let remaining: Vec<&String> = documents
            .iter()
            .filter(|id| position.map_or(true, |p| id.as_str() > p))
            .collect();

        let take = (maximum as usize).min(remaining.len());
        let batch: Vec<Document> = remaining[..take]
            .iter()
            .map(|id| Document::new(id.as_str()))
            .collect();

        let policy = if take == remaining.len() {
            *self.drained_policy.lock().unwrap()
        } else {
            DelayPolicy::Immediate
        };
        let checkpoint = batch.last().map(|d| d.id.clone());

        TraversalBatch::new(batch, checkpoint, policy)
    }
}

// ============================================================================
// Mock Connector Type
// ============================================================================

pub struct MockType {
    repository: Arc<MockRepository>,
}

impl MockType {
    pub fn new(repository: Arc<MockRepository>) -> Self {
        Self { repository }
    }
}

impl ConnectorType for MockType {
    fn type_name(&self) -> &str {
        MOCK_TYPE
    }

    fn validate_config(
        &self,
        properties: &Properties,
        _locale: &str,
        factory: &dyn ConnectorFactory,
    ) -> ConnectorResult<ValidationOutcome> {
        if properties.contains_key(REJECT_PROPERTY) {
            let mut suggested = properties.clone();
            suggested.remove(REJECT_PROPERTY);
            return Ok(ValidationOutcome::from_response(
                Some("rejected by mock".to_string()),
                Some(suggested),
                properties,
            ));
        }

        // Trial instance, discarded
        factory.make_connector(properties)?;
        Ok(ValidationOutcome::Accepted(properties.clone()))
    }

    fn instantiate(
        &self,
        _name: &str,
        config: &StoredConfiguration,
    ) -> ConnectorResult<Arc<dyn Connector>> {
        if config.properties.contains_key(BROKEN_PROPERTY) {
            return Err(ConnectorError::instantiation(MOCK_TYPE, "broken property set"));
        }
        Ok(Arc::new(MockConnector {
            repository: self.repository.clone(),
        }))
    }
}

struct MockConnector {
    repository: Arc<MockRepository>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn login(&self) -> ConnectorResult<Box<dyn Session>> {
        self.repository.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            repository: self.repository.clone(),
        }))
    }

    fn lifecycle(&self) -> Option<&dyn ConnectorLifecycle> {
        Some(self)
    }
}

#[async_trait]
impl ConnectorLifecycle for MockConnector {
    async fn shutdown(&self) -> ConnectorResult<()> {
        self.repository.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self) -> ConnectorResult<()> {
        self.repository.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSession {
    repository: Arc<MockRepository>,
}

#[async_trait]
impl Session for MockSession {
    async fn traversal_manager(&self) -> ConnectorResult<Box<dyn TraversalManager>> {
        Ok(Box::new(MockTraversal {
            repository: self.repository.clone(),
            position: None,
        }))
    }
}

struct MockTraversal {
    repository: Arc<MockRepository>,
    position: Option<String>,
}

#[async_trait]
impl TraversalManager for MockTraversal {
    async fn resume_from(&mut self, checkpoint: Option<&str>) -> ConnectorResult<()> {
        self.repository
            .resumed_from
            .lock()
            .unwrap()
            .push(checkpoint.map(str::to_string));
        self.position = checkpoint.map(str::to_string);
        Ok(())
    }

    async fn traverse(&mut self, batch: BatchSize) -> ConnectorResult<TraversalBatch> {
        let delay = *self.repository.traverse_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.repository.fail.load(Ordering::SeqCst) {
            return Err(ConnectorError::traversal("mock repository unavailable"));
        }
        Ok(self
            .repository
            .batch_after(self.position.as_deref(), batch.maximum))
    }
}

// ============================================================================
// Collecting Pusher
// ============================================================================

/// Pusher that keeps every accepted `(connector, document id)` pair
#[derive(Default)]
pub struct CollectingPusher {
    documents: Mutex<Vec<(String, String)>>,
    flushes: AtomicUsize,
}

impl CollectingPusher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ids(&self, connector: &str) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == connector)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pusher for CollectingPusher {
    async fn take(&self, connector: &str, document: &Document) -> ConnectorResult<()> {
        self.documents
            .lock()
            .unwrap()
            .push((connector.to_string(), document.id.clone()));
        Ok(())
    }

    async fn flush(&self, _connector: &str) -> ConnectorResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Recording Listener
// ============================================================================

/// Change listener that records every event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl ChangeListener for RecordingListener {
    async fn on_change(&self, event: ChangeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Registry over a memory store with a manual clock and the mock type
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub repository: Arc<MockRepository>,
    pub pusher: Arc<CollectingPusher>,
    pub registry: Arc<CoordinatorRegistry>,
}

impl Harness {
    pub fn new(documents: &[&str]) -> Self {
        Self::with_lifetime(documents, Duration::from_secs(60))
    }

    pub fn with_lifetime(documents: &[&str], max_lifetime: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ));
        let repository = MockRepository::new(documents);
        let pusher = CollectingPusher::new();

        let context = mock_context(
            store.clone(),
            repository.clone(),
            pusher.clone(),
            clock.clone(),
            max_lifetime,
        );

        Self {
            store,
            clock,
            repository,
            pusher,
            registry: Arc::new(CoordinatorRegistry::new(context)),
        }
    }

    pub fn shared_store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn context(&self) -> &Arc<CoordinatorContext> {
        self.registry.context()
    }

    /// Coordinator for `name` configured with the mock type
    pub async fn configured(&self, name: &str) -> Arc<ConnectorCoordinator> {
        let coordinator = self.registry.get_or_add(name).await;
        let response = coordinator
            .set_connector_config(MOCK_TYPE, Properties::new(), "en", false)
            .await
            .unwrap();
        assert!(response.is_applied());
        coordinator
    }
}

/// Coordinator context over `store` with the mock type registered
pub fn mock_context(
    store: SharedStore,
    repository: Arc<MockRepository>,
    pusher: Arc<CollectingPusher>,
    clock: Arc<ManualClock>,
    max_lifetime: Duration,
) -> Arc<CoordinatorContext> {
    let mut types = TypeRegistry::new();
    types.register(Arc::new(MockType::new(repository)));

    Arc::new(CoordinatorContext {
        types: Arc::new(types),
        store,
        executor: Arc::new(TaskExecutor::new(4, max_lifetime)),
        load_managers: Arc::new(HostLoadManagerFactory::new(
            clock.clone(),
            Duration::from_secs(60),
            500,
        )),
        pusher,
        clock,
        error_backoff: Duration::from_secs(300),
        changes: Arc::default(),
    })
}

pub fn properties(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Wait until the coordinator has no batch in flight
pub async fn wait_idle(coordinator: &ConnectorCoordinator) {
    for _ in 0..200 {
        if !coordinator.is_batch_running().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch for '{}' did not finish", coordinator.name());
}

/// Run one batch to completion
pub async fn run_batch(coordinator: &ConnectorCoordinator) {
    assert!(coordinator.start_batch().await, "batch did not start");
    wait_idle(coordinator).await;
}
