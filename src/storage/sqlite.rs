//! SQLite-backed instance store
//!
//! All three aspects live in one database file. Every write draws its stamp
//! from a counter row updated in the same transaction, so stamps stay
//! monotonic across every process sharing the file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{
    CheckpointStore, ConfigurationStore, Inventory, InventoryStore, ScheduleStore, Stamp,
    StampTriple, StoreError, StoreResult, StoredConfiguration,
};
use crate::scheduler::Schedule;

/// SQLite instance store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // WAL lets sibling processes read while one writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to configure SQLite journal")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set SQLite busy timeout")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS stamp_counter (
                    id INTEGER PRIMARY KEY CHECK (id = 0),
                    value INTEGER NOT NULL
                );

                INSERT OR IGNORE INTO stamp_counter (id, value) VALUES (0, 0);

                CREATE TABLE IF NOT EXISTS configurations (
                    name TEXT PRIMARY KEY,
                    type_name TEXT NOT NULL,
                    properties TEXT NOT NULL,
                    instance_xml TEXT,
                    stamp INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS schedules (
                    name TEXT PRIMARY KEY,
                    schedule TEXT NOT NULL,
                    stamp INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    name TEXT PRIMARY KEY,
                    checkpoint TEXT NOT NULL,
                    stamp INTEGER NOT NULL
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::poisoned("sqlite connection"))
    }

    /// Run `write` in an immediate transaction with a freshly drawn stamp
    fn write_stamped<F>(&self, write: F) -> StoreResult<()>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, i64) -> rusqlite::Result<usize>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp: i64 = tx
            .query_row(
                "UPDATE stamp_counter SET value = value + 1 WHERE id = 0 RETURNING value",
                [],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::Other("stamp counter row is missing".to_string()))?;
        write(&tx, stamp)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, sql: &str, name: &str) -> StoreResult<()> {
        self.lock()?.execute(sql, params![name])?;
        Ok(())
    }
}

fn to_stamp(raw: Option<i64>) -> Option<Stamp> {
    raw.map(|value| Stamp(value as u64))
}

impl ConfigurationStore for SqliteStore {
    fn get_configuration(&self, name: &str) -> StoreResult<Option<StoredConfiguration>> {
        let row = self
            .lock()?
            .query_row(
                "SELECT type_name, properties, instance_xml FROM configurations WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((type_name, properties, instance_xml)) => Ok(Some(StoredConfiguration {
                type_name,
                properties: serde_json::from_str(&properties)?,
                instance_xml,
            })),
            None => Ok(None),
        }
    }

    fn set_configuration(&self, name: &str, config: &StoredConfiguration) -> StoreResult<()> {
        let properties = serde_json::to_string(&config.properties)?;
        self.write_stamped(|tx, stamp| {
            tx.execute(
                r#"
                INSERT INTO configurations (name, type_name, properties, instance_xml, stamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(name) DO UPDATE SET
                    type_name = excluded.type_name,
                    properties = excluded.properties,
                    instance_xml = excluded.instance_xml,
                    stamp = excluded.stamp
                "#,
                params![
                    name,
                    config.type_name,
                    properties,
                    config.instance_xml,
                    stamp
                ],
            )
        })
    }

    fn remove_configuration(&self, name: &str) -> StoreResult<()> {
        self.delete("DELETE FROM configurations WHERE name = ?1", name)
    }
}

impl ScheduleStore for SqliteStore {
    fn get_schedule(&self, name: &str) -> StoreResult<Option<Schedule>> {
        let raw: Option<String> = self
            .lock()?
            .query_row(
                "SELECT schedule FROM schedules WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|text| {
            Schedule::parse(&text).map_err(|source| StoreError::InvalidSchedule {
                name: name.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn set_schedule(&self, name: &str, schedule: &Schedule) -> StoreResult<()> {
        let text = schedule.to_string();
        self.write_stamped(|tx, stamp| {
            tx.execute(
                r#"
                INSERT INTO schedules (name, schedule, stamp) VALUES (?1, ?2, ?3)
                ON CONFLICT(name) DO UPDATE SET
                    schedule = excluded.schedule,
                    stamp = excluded.stamp
                "#,
                params![name, text, stamp],
            )
        })
    }

    fn remove_schedule(&self, name: &str) -> StoreResult<()> {
        self.delete("DELETE FROM schedules WHERE name = ?1", name)
    }
}

impl CheckpointStore for SqliteStore {
    fn get_checkpoint(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lock()?
            .query_row(
                "SELECT checkpoint FROM checkpoints WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_checkpoint(&self, name: &str, checkpoint: &str) -> StoreResult<()> {
        self.write_stamped(|tx, stamp| {
            tx.execute(
                r#"
                INSERT INTO checkpoints (name, checkpoint, stamp) VALUES (?1, ?2, ?3)
                ON CONFLICT(name) DO UPDATE SET
                    checkpoint = excluded.checkpoint,
                    stamp = excluded.stamp
                "#,
                params![name, checkpoint, stamp],
            )
        })
    }

    fn remove_checkpoint(&self, name: &str) -> StoreResult<()> {
        self.delete("DELETE FROM checkpoints WHERE name = ?1", name)
    }
}

impl InventoryStore for SqliteStore {
    fn inventory(&self) -> StoreResult<Inventory> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.name, k.stamp, c.stamp, s.stamp
            FROM configurations c
            LEFT JOIN checkpoints k ON k.name = c.name
            LEFT JOIN schedules s ON s.name = c.name
            ORDER BY c.name
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                StampTriple::new(
                    to_stamp(row.get(1)?),
                    to_stamp(row.get(2)?),
                    to_stamp(row.get(3)?),
                ),
            ))
        })?;

        let mut inventory = Inventory::new();
        for row in rows {
            let (name, triple) = row?;
            inventory.insert(name, triple);
        }
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InstanceStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn config(root: &str) -> StoredConfiguration {
        let mut properties = BTreeMap::new();
        properties.insert("root".to_string(), root.to_string());
        StoredConfiguration::new("filesystem", properties)
    }

    #[test]
    fn test_configuration_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let stored = config("/srv/docs").with_instance_xml("<bean/>");
        store.set_configuration("alpha", &stored).unwrap();

        assert_eq!(store.get_configuration("alpha").unwrap(), Some(stored));
        assert!(store.get_configuration("missing").unwrap().is_none());
    }

    #[test]
    fn test_schedule_persists_disabled_flag() {
        let store = SqliteStore::in_memory().unwrap();
        let schedule = Schedule::parse("#alpha:100:-1:22-4").unwrap();
        store.set_schedule("alpha", &schedule).unwrap();

        let loaded = store.get_schedule("alpha").unwrap().unwrap();
        assert!(loaded.is_disabled());
        assert!(loaded.is_paused_run_once());
    }

    #[test]
    fn test_stamps_increase_across_tables() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_configuration("alpha", &config("/a")).unwrap();
        store.set_checkpoint("alpha", "one").unwrap();
        let first = store.inventory().unwrap()["alpha"];

        store.set_checkpoint("alpha", "two").unwrap();
        let second = store.inventory().unwrap()["alpha"];

        assert!(first.checkpoint > first.configuration);
        assert!(second.checkpoint > first.checkpoint);
        assert_eq!(second.configuration, first.configuration);
        assert!(second.schedule.is_none());
    }

    #[test]
    fn test_second_connection_sees_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.db");

        let writer = SqliteStore::open(&path).unwrap();
        let reader = SqliteStore::open(&path).unwrap();

        writer.set_configuration("alpha", &config("/a")).unwrap();
        assert!(reader.inventory().unwrap().contains_key("alpha"));

        writer.remove_instance("alpha").unwrap();
        assert!(reader.inventory().unwrap().is_empty());
    }

    #[test]
    fn test_missing_stamp_counter_fails_writes() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute("DELETE FROM stamp_counter", [])
            .unwrap();

        let err = store.set_checkpoint("alpha", "one").unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));
        assert!(store.get_checkpoint("alpha").unwrap().is_none());
    }
}
