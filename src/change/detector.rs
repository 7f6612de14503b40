//! Inventory merge-diff

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::{ChangeEvent, ChangeListener};
use crate::metrics;
use crate::storage::{Inventory, SharedStore, StoreResult};

/// Which aspect of an instance changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    Checkpoint,
    Configuration,
    Schedule,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Checkpoint => "checkpoint",
            Self::Configuration => "configuration",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One difference between two inventories
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InventoryChange {
    pub name: String,
    pub kind: ChangeKind,
}

impl InventoryChange {
    fn new(name: &str, kind: ChangeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Sorted two-pointer diff of two inventories.
///
/// Names only in `current` are `Added`, names only in `previous` are
/// `Removed`; for shared names each differing stamp yields its own change,
/// in checkpoint, configuration, schedule order.
pub fn diff(previous: &Inventory, current: &Inventory) -> Vec<InventoryChange> {
    let mut changes = Vec::new();
    let mut prev = previous.iter().peekable();
    let mut curr = current.iter().peekable();

    loop {
        match (prev.peek().copied(), curr.peek().copied()) {
            (None, None) => break,
            (Some((name, _)), None) => {
                changes.push(InventoryChange::new(name, ChangeKind::Removed));
                prev.next();
            }
            (None, Some((name, _))) => {
                changes.push(InventoryChange::new(name, ChangeKind::Added));
                curr.next();
            }
            (Some((prev_name, before)), Some((curr_name, after))) => {
                match prev_name.cmp(curr_name) {
                    Ordering::Less => {
                        changes.push(InventoryChange::new(prev_name, ChangeKind::Removed));
                        prev.next();
                    }
                    Ordering::Greater => {
                        changes.push(InventoryChange::new(curr_name, ChangeKind::Added));
                        curr.next();
                    }
                    Ordering::Equal => {
                        if before.checkpoint != after.checkpoint {
                            changes.push(InventoryChange::new(curr_name, ChangeKind::Checkpoint));
                        }
                        if before.configuration != after.configuration {
                            changes
                                .push(InventoryChange::new(curr_name, ChangeKind::Configuration));
                        }
                        if before.schedule != after.schedule {
                            changes.push(InventoryChange::new(curr_name, ChangeKind::Schedule));
                        }
                        prev.next();
                        curr.next();
                    }
                }
            }
        }
    }

    changes
}

/// Detects persisted changes by diffing stamp inventories
pub struct ChangeDetector {
    store: SharedStore,
    listener: Arc<dyn ChangeListener>,
    snapshot: RwLock<Arc<Inventory>>,
}

impl ChangeDetector {
    /// Create a detector with an empty snapshot
    pub fn new(store: SharedStore, listener: Arc<dyn ChangeListener>) -> Self {
        Self {
            store,
            listener,
            snapshot: RwLock::new(Arc::new(Inventory::new())),
        }
    }

    /// Inventory seen by the last successful pass
    pub fn snapshot(&self) -> Arc<Inventory> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Adopt the store's current inventory without emitting events
    pub fn prime(&self) -> StoreResult<()> {
        let current = self.store.inventory()?;
        self.replace_snapshot(current);
        Ok(())
    }

    /// Run one detection pass.
    ///
    /// Returns the number of events delivered. On a store failure nothing is
    /// delivered and the snapshot is kept, so the next pass sees the same
    /// differences again.
    pub async fn detect(&self) -> StoreResult<usize> {
        let current = self.store.inventory()?;
        let previous = self.snapshot();

        let mut events = Vec::new();
        for change in diff(&previous, &current) {
            if let Some(event) = self.resolve(&change)? {
                events.push(event);
            }
        }

        self.replace_snapshot(current);

        let delivered = events.len();
        for event in events {
            tracing::debug!(connector = %event.name(), kind = %event.kind(), "Change detected");
            metrics::record_change_event(event.kind().as_str());
            self.listener.on_change(event).await;
        }

        Ok(delivered)
    }

    fn replace_snapshot(&self, inventory: Inventory) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(inventory);
    }

    /// Fetch the payload for a change; `None` if the value vanished since
    /// the inventory was read
    fn resolve(&self, change: &InventoryChange) -> StoreResult<Option<ChangeEvent>> {
        let name = change.name.clone();
        let event = match change.kind {
            ChangeKind::Added => self
                .store
                .get_configuration(&name)?
                .map(|configuration| ChangeEvent::InstanceAdded {
                    name,
                    configuration,
                }),
            ChangeKind::Removed => Some(ChangeEvent::InstanceRemoved { name }),
            ChangeKind::Checkpoint => {
                let checkpoint = self.store.get_checkpoint(&name)?;
                Some(ChangeEvent::CheckpointChanged { name, checkpoint })
            }
            ChangeKind::Configuration => self
                .store
                .get_configuration(&name)?
                .map(|configuration| ChangeEvent::ConfigurationChanged {
                    name,
                    configuration,
                }),
            ChangeKind::Schedule => {
                let schedule = self.store.get_schedule(&name)?;
                Some(ChangeEvent::ScheduleChanged { name, schedule })
            }
        };
        Ok(event)
    }
}
