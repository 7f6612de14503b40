//! Integration tests for change detection
//!
//! These tests verify:
//! - The inventory merge-diff against a naive reference
//! - Event delivery and snapshot handling in the detector
//! - Routing of external mutations into coordinators
//! - Propagation between two SQLite connections on one file

mod common;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{properties, run_batch, Harness, RecordingListener, MOCK_TYPE};
use tributary::change::{
    diff, ChangeDetector, ChangeEvent, ChangeHandler, ChangeKind, ChangeListener,
};
use tributary::coordinator::ConnectorCoordinator;
use tributary::utils::ManualClock;
use tributary::scheduler::Schedule;
use tributary::storage::{
    CheckpointStore, ConfigurationStore, InstanceStore, Inventory, InventoryStore, MemoryStore,
    ScheduleStore, SharedStore, SqliteStore, Stamp, StampTriple, StoreError, StoreResult,
    StoredConfiguration,
};

fn config(root: &str) -> StoredConfiguration {
    StoredConfiguration::new(MOCK_TYPE, properties(&[("root", root)]))
}

// ============================================================================
// Merge-Diff
// ============================================================================

/// Set-based reference: every (name, kind) the diff must report
fn reference_diff(previous: &Inventory, current: &Inventory) -> Vec<(String, ChangeKind)> {
    let names: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    let mut changes = Vec::new();

    for name in names {
        match (previous.get(name), current.get(name)) {
            (None, Some(_)) => changes.push((name.clone(), ChangeKind::Added)),
            (Some(_), None) => changes.push((name.clone(), ChangeKind::Removed)),
            (Some(before), Some(after)) => {
                if before.checkpoint != after.checkpoint {
                    changes.push((name.clone(), ChangeKind::Checkpoint));
                }
                if before.configuration != after.configuration {
                    changes.push((name.clone(), ChangeKind::Configuration));
                }
                if before.schedule != after.schedule {
                    changes.push((name.clone(), ChangeKind::Schedule));
                }
            }
            (None, None) => unreachable!(),
        }
    }

    changes
}

fn stamp_strategy() -> impl Strategy<Value = Option<Stamp>> {
    prop::option::of((0u64..3).prop_map(Stamp))
}

fn inventory_strategy() -> impl Strategy<Value = Inventory> {
    prop::collection::btree_map(
        "[a-f]",
        (stamp_strategy(), stamp_strategy(), stamp_strategy())
            .prop_map(|(c, f, s)| StampTriple::new(c, f, s)),
        0..6,
    )
}

proptest! {
    #[test]
    fn prop_diff_matches_reference(
        previous in inventory_strategy(),
        current in inventory_strategy(),
    ) {
        let changes: Vec<(String, ChangeKind)> = diff(&previous, &current)
            .into_iter()
            .map(|c| (c.name, c.kind))
            .collect();
        prop_assert_eq!(changes, reference_diff(&previous, &current));
    }

    #[test]
    fn prop_diff_with_self_is_empty(inventory in inventory_strategy()) {
        prop_assert!(diff(&inventory, &inventory).is_empty());
    }
}

#[test]
fn test_diff_example_scenario() {
    let s1 = Some(Stamp(1));
    let s2 = Some(Stamp(2));

    let previous: Inventory = BTreeMap::from([
        ("A".to_string(), StampTriple::new(s1, s1, s1)),
        ("B".to_string(), StampTriple::new(s1, s1, s1)),
    ]);
    let current: Inventory = BTreeMap::from([
        ("B".to_string(), StampTriple::new(s1, s2, s1)),
        ("C".to_string(), StampTriple::new(s1, s1, s1)),
    ]);

    let changes: Vec<(String, ChangeKind)> = diff(&previous, &current)
        .into_iter()
        .map(|c| (c.name, c.kind))
        .collect();

    assert_eq!(
        changes,
        vec![
            ("A".to_string(), ChangeKind::Removed),
            ("B".to_string(), ChangeKind::Configuration),
            ("C".to_string(), ChangeKind::Added),
        ]
    );
}

// ============================================================================
// Detector
// ============================================================================

#[tokio::test]
async fn test_detector_reports_store_mutations() {
    let store = Arc::new(MemoryStore::new());
    store.set_configuration("A", &config("/a")).unwrap();
    store.set_configuration("B", &config("/b")).unwrap();

    let listener = RecordingListener::new();
    let shared: SharedStore = store.clone();
    let detector = ChangeDetector::new(shared, listener.clone());
    detector.prime().unwrap();

    store.remove_instance("A").unwrap();
    store.set_configuration("B", &config("/b2")).unwrap();
    store.set_configuration("C", &config("/c")).unwrap();

    assert_eq!(detector.detect().await.unwrap(), 3);
    assert_eq!(
        listener.take(),
        vec![
            ChangeEvent::InstanceRemoved {
                name: "A".to_string()
            },
            ChangeEvent::ConfigurationChanged {
                name: "B".to_string(),
                configuration: config("/b2"),
            },
            ChangeEvent::InstanceAdded {
                name: "C".to_string(),
                configuration: config("/c"),
            },
        ]
    );

    // Snapshot replaced; nothing new
    assert_eq!(detector.detect().await.unwrap(), 0);
}

#[tokio::test]
async fn test_detector_reports_aspect_changes() {
    let store = Arc::new(MemoryStore::new());
    store.set_configuration("docs", &config("/docs")).unwrap();

    let listener = RecordingListener::new();
    let detector = ChangeDetector::new(store.clone(), listener.clone());
    detector.prime().unwrap();

    let schedule = Schedule::parse("docs:10:1000:1-2").unwrap();
    store.set_checkpoint("docs", "path/b").unwrap();
    store.set_schedule("docs", &schedule).unwrap();

    detector.detect().await.unwrap();
    assert_eq!(
        listener.take(),
        vec![
            ChangeEvent::CheckpointChanged {
                name: "docs".to_string(),
                checkpoint: Some("path/b".to_string()),
            },
            ChangeEvent::ScheduleChanged {
                name: "docs".to_string(),
                schedule: Some(schedule),
            },
        ]
    );

    store.remove_checkpoint("docs").unwrap();
    detector.detect().await.unwrap();
    assert_eq!(
        listener.take(),
        vec![ChangeEvent::CheckpointChanged {
            name: "docs".to_string(),
            checkpoint: None,
        }]
    );
}

/// Memory store whose inventory can be made to fail
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl ConfigurationStore for FlakyStore {
    fn get_configuration(&self, name: &str) -> StoreResult<Option<StoredConfiguration>> {
        self.inner.get_configuration(name)
    }

    fn set_configuration(&self, name: &str, config: &StoredConfiguration) -> StoreResult<()> {
        self.inner.set_configuration(name, config)
    }

    fn remove_configuration(&self, name: &str) -> StoreResult<()> {
        self.inner.remove_configuration(name)
    }
}

impl ScheduleStore for FlakyStore {
    fn get_schedule(&self, name: &str) -> StoreResult<Option<Schedule>> {
        self.inner.get_schedule(name)
    }

    fn set_schedule(&self, name: &str, schedule: &Schedule) -> StoreResult<()> {
        self.inner.set_schedule(name, schedule)
    }

    fn remove_schedule(&self, name: &str) -> StoreResult<()> {
        self.inner.remove_schedule(name)
    }
}

impl CheckpointStore for FlakyStore {
    fn get_checkpoint(&self, name: &str) -> StoreResult<Option<String>> {
        self.inner.get_checkpoint(name)
    }

    fn set_checkpoint(&self, name: &str, checkpoint: &str) -> StoreResult<()> {
        self.inner.set_checkpoint(name, checkpoint)
    }

    fn remove_checkpoint(&self, name: &str) -> StoreResult<()> {
        self.inner.remove_checkpoint(name)
    }
}

impl InventoryStore for FlakyStore {
    fn inventory(&self) -> StoreResult<Inventory> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Other("database unavailable".to_string()));
        }
        self.inner.inventory()
    }
}

#[tokio::test]
async fn test_store_failure_keeps_snapshot() {
    let store = Arc::new(FlakyStore::default());
    let listener = RecordingListener::new();
    let detector = ChangeDetector::new(store.clone(), listener.clone());
    detector.prime().unwrap();

    store.set_configuration("docs", &config("/docs")).unwrap();
    store.failing.store(true, Ordering::SeqCst);

    assert!(detector.detect().await.is_err());
    assert!(listener.take().is_empty());
    assert!(detector.snapshot().is_empty());

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(detector.detect().await.unwrap(), 1);
    assert_eq!(listener.take()[0].kind(), ChangeKind::Added);
}

// ============================================================================
// Routing Into Coordinators
// ============================================================================

#[tokio::test]
async fn test_handler_applies_external_mutations() {
    let harness = Harness::new(&["a", "b"]);
    let handler = Arc::new(ChangeHandler::new(harness.registry.clone()));
    let detector = ChangeDetector::new(harness.shared_store(), handler);
    detector.prime().unwrap();

    // Another process creates an instance
    harness.store.set_configuration("docs", &config("/docs")).unwrap();
    detector.detect().await.unwrap();

    let coordinator = harness.registry.get("docs").await.unwrap();
    assert!(coordinator.exists().await);
    assert_eq!(coordinator.schedule().await, Some(Schedule::default_for("docs")));

    // ... moves its checkpoint
    harness.store.set_checkpoint("docs", "b").unwrap();
    detector.detect().await.unwrap();
    assert_eq!(coordinator.checkpoint().await.as_deref(), Some("b"));

    // ... reschedules it
    let schedule = Schedule::parse("#docs:20:1000:3-4").unwrap();
    harness.store.set_schedule("docs", &schedule).unwrap();
    detector.detect().await.unwrap();
    assert_eq!(coordinator.schedule().await, Some(schedule));
    assert!(!coordinator.start_batch().await);

    // ... and removes it
    harness.store.remove_instance("docs").unwrap();
    detector.detect().await.unwrap();
    assert!(!coordinator.exists().await);
    assert_eq!(harness.registry.connector_names().await, Vec::<String>::new());
}

/// Completes another batch before handing each checkpoint event on, as when
/// a batch finishes while detection is still delivering
struct BatchBeforeDelivery {
    coordinator: Arc<ConnectorCoordinator>,
    clock: Arc<ManualClock>,
    handler: ChangeHandler,
}

#[async_trait]
impl ChangeListener for BatchBeforeDelivery {
    async fn on_change(&self, event: ChangeEvent) {
        if event.kind() == ChangeKind::Checkpoint {
            self.clock.advance(ChronoDuration::seconds(60));
            run_batch(&self.coordinator).await;
        }
        self.handler.on_change(event).await;
    }
}

#[tokio::test]
async fn test_stale_checkpoint_event_does_not_rewind() {
    let harness = Harness::new(&["a", "b", "c", "d"]);
    let coordinator = harness.configured("docs").await;
    coordinator
        .set_schedule(Schedule::parse("docs:2:5000:0-0").unwrap())
        .await
        .unwrap();

    let listener = Arc::new(BatchBeforeDelivery {
        coordinator: coordinator.clone(),
        clock: harness.clock.clone(),
        handler: ChangeHandler::new(harness.registry.clone()),
    });
    let detector = ChangeDetector::new(harness.shared_store(), listener);
    detector.prime().unwrap();

    run_batch(&coordinator).await;
    assert_eq!(
        harness.store.get_checkpoint("docs").unwrap().as_deref(),
        Some("b")
    );

    // The event carries "b"; the store already holds "d" when it arrives
    detector.detect().await.unwrap();
    assert_eq!(
        harness.store.get_checkpoint("docs").unwrap().as_deref(),
        Some("d")
    );
    assert_eq!(coordinator.checkpoint().await.as_deref(), Some("d"));

    harness.clock.advance(ChronoDuration::seconds(60));
    run_batch(&coordinator).await;
    assert_eq!(harness.pusher.ids("docs"), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_local_mutations_are_idempotent_when_observed() {
    let harness = Harness::new(&["a"]);
    let handler = Arc::new(ChangeHandler::new(harness.registry.clone()));
    let detector = ChangeDetector::new(harness.shared_store(), handler);
    detector.prime().unwrap();

    let coordinator = harness.configured("docs").await;
    let schedule = Schedule::parse("docs:30:2000:0-0").unwrap();
    coordinator.set_schedule(schedule.clone()).await.unwrap();
    let shutdowns = harness
        .repository
        .shutdowns
        .load(Ordering::SeqCst);

    // The detector sees our own writes; the coordinator keeps its instance
    detector.detect().await.unwrap();

    assert!(coordinator.exists().await);
    assert_eq!(coordinator.schedule().await, Some(schedule));
    assert_eq!(
        harness.repository.shutdowns.load(Ordering::SeqCst),
        shutdowns
    );
}

#[tokio::test]
async fn test_sqlite_change_seen_across_connections() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shared.db");

    let writer = SqliteStore::open(&path).unwrap();
    let reader: SharedStore = Arc::new(SqliteStore::open(&path).unwrap());

    let listener = RecordingListener::new();
    let detector = ChangeDetector::new(reader, listener.clone());
    detector.prime().unwrap();

    writer.set_configuration("docs", &config("/docs")).unwrap();
    writer.set_checkpoint("docs", "x").unwrap();

    detector.detect().await.unwrap();
    let kinds: Vec<ChangeKind> = listener.take().iter().map(ChangeEvent::kind).collect();
    assert_eq!(kinds, vec![ChangeKind::Added]);

    writer.set_checkpoint("docs", "y").unwrap();
    detector.detect().await.unwrap();
    assert_eq!(
        listener.take(),
        vec![ChangeEvent::CheckpointChanged {
            name: "docs".to_string(),
            checkpoint: Some("y".to_string()),
        }]
    );
}
