//! In-process instance store

use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    CheckpointStore, ConfigurationStore, Inventory, InventoryStore, ScheduleStore, Stamp,
    StampTriple, StoreError, StoreResult, StoredConfiguration,
};
use crate::scheduler::Schedule;

#[derive(Default)]
struct State {
    next_stamp: u64,
    configurations: HashMap<String, (StoredConfiguration, Stamp)>,
    schedules: HashMap<String, (Schedule, Stamp)>,
    checkpoints: HashMap<String, (String, Stamp)>,
}

impl State {
    fn stamp(&mut self) -> Stamp {
        self.next_stamp += 1;
        Stamp(self.next_stamp)
    }
}

/// Store kept entirely in memory
///
/// Every write draws a fresh stamp from one counter, so rewriting an
/// identical value still registers as a change.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::poisoned("memory store"))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::poisoned("memory store"))
    }
}

impl ConfigurationStore for MemoryStore {
    fn get_configuration(&self, name: &str) -> StoreResult<Option<StoredConfiguration>> {
        Ok(self
            .read()?
            .configurations
            .get(name)
            .map(|(config, _)| config.clone()))
    }

    fn set_configuration(&self, name: &str, config: &StoredConfiguration) -> StoreResult<()> {
        let mut state = self.write()?;
        let stamp = state.stamp();
        state
            .configurations
            .insert(name.to_string(), (config.clone(), stamp));
        Ok(())
    }

    fn remove_configuration(&self, name: &str) -> StoreResult<()> {
        self.write()?.configurations.remove(name);
        Ok(())
    }
}

impl ScheduleStore for MemoryStore {
    fn get_schedule(&self, name: &str) -> StoreResult<Option<Schedule>> {
        Ok(self
            .read()?
            .schedules
            .get(name)
            .map(|(schedule, _)| schedule.clone()))
    }

    fn set_schedule(&self, name: &str, schedule: &Schedule) -> StoreResult<()> {
        let mut state = self.write()?;
        let stamp = state.stamp();
        state
            .schedules
            .insert(name.to_string(), (schedule.clone(), stamp));
        Ok(())
    }

    fn remove_schedule(&self, name: &str) -> StoreResult<()> {
        self.write()?.schedules.remove(name);
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn get_checkpoint(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self
            .read()?
            .checkpoints
            .get(name)
            .map(|(checkpoint, _)| checkpoint.clone()))
    }

    fn set_checkpoint(&self, name: &str, checkpoint: &str) -> StoreResult<()> {
        let mut state = self.write()?;
        let stamp = state.stamp();
        state
            .checkpoints
            .insert(name.to_string(), (checkpoint.to_string(), stamp));
        Ok(())
    }

    fn remove_checkpoint(&self, name: &str) -> StoreResult<()> {
        self.write()?.checkpoints.remove(name);
        Ok(())
    }
}

impl InventoryStore for MemoryStore {
    fn inventory(&self) -> StoreResult<Inventory> {
        let state = self.read()?;
        let inventory = state
            .configurations
            .iter()
            .map(|(name, (_, config_stamp))| {
                let triple = StampTriple::new(
                    state.checkpoints.get(name).map(|(_, s)| *s),
                    Some(*config_stamp),
                    state.schedules.get(name).map(|(_, s)| *s),
                );
                (name.clone(), triple)
            })
            .collect();
        Ok(inventory)
    }
}
