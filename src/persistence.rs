//! Durable backend implementations
//!
//! `SqliteBackend` persists committed rows through rusqlite; the field map
//! is stored as JSON per row. `MemoryBackend` is an in-memory
//! implementation useful for tests and ephemeral runs. Both answer reads
//! inline on the calling thread — the callback contract leaves a backend
//! free to answer off-thread, but nothing here needs to.

use crate::backend::{KeysCallback, RowCallback, RowsCallback, StateBackend};
use crate::entry::{Entry, EntryStatus};
use crate::error::{Result, StateError};
use crate::schema::{Condition, TableInfo};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap};

/// Simple in-memory backend. Rows are kept per table in key order so
/// enumeration is deterministic.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, BTreeMap<String, Entry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing the overlay. Test setup helper.
    pub fn seed(&self, info: &TableInfo, key: &str, mut entry: Entry) {
        entry.status = EntryStatus::Normal;
        entry.set_field(info.primary_key.clone(), key.as_bytes().to_vec());
        self.tables
            .write()
            .entry(info.name.clone())
            .or_default()
            .insert(key.to_string(), entry);
    }
}

impl StateBackend for MemoryBackend {
    fn async_get_row(&self, info: &TableInfo, key: &str, callback: RowCallback) {
        let tables = self.tables.read();
        let row = tables
            .get(&info.name)
            .and_then(|rows| rows.get(key))
            .cloned();
        callback(Ok(row));
    }

    fn async_get_rows(&self, info: &TableInfo, keys: &[String], callback: RowsCallback) {
        let tables = self.tables.read();
        let mut result = HashMap::new();
        if let Some(rows) = tables.get(&info.name) {
            for key in keys {
                if let Some(entry) = rows.get(key) {
                    result.insert(key.clone(), entry.clone());
                }
            }
        }
        callback(Ok(result));
    }

    fn async_get_primary_keys(
        &self,
        info: &TableInfo,
        condition: &Condition,
        callback: KeysCallback,
    ) {
        let tables = self.tables.read();
        let keys = tables
            .get(&info.name)
            .map(|rows| {
                rows.keys()
                    .filter(|key| condition.matches(key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        callback(Ok(keys));
    }

    fn persist(&self, info: &TableInfo, rows: &HashMap<String, Entry>) -> Result<()> {
        let mut tables = self.tables.write();
        let stored = tables.entry(info.name.clone()).or_default();
        for (key, entry) in rows {
            match entry.status {
                EntryStatus::Deleted => {
                    stored.remove(key);
                }
                EntryStatus::Normal => {
                    stored.insert(key.clone(), entry.clone());
                }
                EntryStatus::Rollbacked => {
                    return Err(StateError::IntegrityViolation(format!(
                        "rollback marker for key '{}' reached persist",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// SQLite-backed durable storage. One `state_rows` table holds every
/// logical table's committed rows; the field map is serialized as JSON.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StateError::BackendFailure(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS state_rows (
                table_name TEXT NOT NULL,
                key TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (table_name, key)
            )",
            [],
        )
        .map_err(|e| {
            StateError::BackendFailure(format!("Failed to create state_rows table: {}", e))
        })?;

        Ok(SqliteBackend {
            conn: Mutex::new(conn),
        })
    }

    fn get_row_inner(&self, info: &TableInfo, key: &str) -> Result<Option<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT block_number, fields FROM state_rows WHERE table_name = ?1 AND key = ?2")
            .map_err(|e| StateError::BackendFailure(format!("Failed to prepare query: {}", e)))?;

        let mut rows = stmt
            .query(params![info.name, key])
            .map_err(|e| StateError::BackendFailure(format!("Failed to query row: {}", e)))?;

        let row = rows
            .next()
            .map_err(|e| StateError::BackendFailure(format!("Failed to read row: {}", e)))?;

        match row {
            Some(row) => {
                let block_number: i64 = row
                    .get(0)
                    .map_err(|e| StateError::BackendFailure(format!("Failed to read column: {}", e)))?;
                let fields_json: String = row
                    .get(1)
                    .map_err(|e| StateError::BackendFailure(format!("Failed to read column: {}", e)))?;
                Ok(Some(decode_entry(block_number, &fields_json)?))
            }
            None => Ok(None),
        }
    }

    fn get_keys_inner(&self, info: &TableInfo, condition: &Condition) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key FROM state_rows WHERE table_name = ?1 ORDER BY key ASC")
            .map_err(|e| StateError::BackendFailure(format!("Failed to prepare query: {}", e)))?;

        let key_iter = stmt
            .query_map(params![info.name], |row| row.get::<_, String>(0))
            .map_err(|e| StateError::BackendFailure(format!("Failed to query keys: {}", e)))?;

        let mut keys = Vec::new();
        for key in key_iter {
            let key =
                key.map_err(|e| StateError::BackendFailure(format!("Failed to read key: {}", e)))?;
            if condition.matches(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn decode_entry(block_number: i64, fields_json: &str) -> Result<Entry> {
    let fields: BTreeMap<String, Vec<u8>> = serde_json::from_str(fields_json)
        .map_err(|e| StateError::BackendFailure(format!("Failed to deserialize fields: {}", e)))?;
    Ok(Entry {
        fields,
        status: EntryStatus::Normal,
        block_number: block_number as u64,
    })
}

impl StateBackend for SqliteBackend {
    fn async_get_row(&self, info: &TableInfo, key: &str, callback: RowCallback) {
        callback(self.get_row_inner(info, key));
    }

    fn async_get_rows(&self, info: &TableInfo, keys: &[String], callback: RowsCallback) {
        let mut result = HashMap::new();
        for key in keys {
            match self.get_row_inner(info, key) {
                Ok(Some(entry)) => {
                    result.insert(key.clone(), entry);
                }
                Ok(None) => {}
                Err(err) => {
                    callback(Err(err));
                    return;
                }
            }
        }
        callback(Ok(result));
    }

    fn async_get_primary_keys(
        &self,
        info: &TableInfo,
        condition: &Condition,
        callback: KeysCallback,
    ) {
        callback(self.get_keys_inner(info, condition));
    }

    fn persist(&self, info: &TableInfo, rows: &HashMap<String, Entry>) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StateError::BackendFailure(format!("Failed to start transaction: {}", e)))?;

        for (key, entry) in rows {
            match entry.status {
                EntryStatus::Deleted => {
                    tx.execute(
                        "DELETE FROM state_rows WHERE table_name = ?1 AND key = ?2",
                        params![info.name, key],
                    )
                    .map_err(|e| {
                        StateError::BackendFailure(format!("Failed to delete row: {}", e))
                    })?;
                }
                EntryStatus::Normal => {
                    let fields_json = serde_json::to_string(&entry.fields).map_err(|e| {
                        StateError::BackendFailure(format!("Failed to serialize fields: {}", e))
                    })?;
                    tx.execute(
                        "INSERT OR REPLACE INTO state_rows (table_name, key, block_number, fields)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![info.name, key, entry.block_number as i64, fields_json],
                    )
                    .map_err(|e| {
                        StateError::BackendFailure(format!("Failed to save row: {}", e))
                    })?;
                }
                EntryStatus::Rollbacked => {
                    return Err(StateError::IntegrityViolation(format!(
                        "rollback marker for key '{}' reached persist",
                        key
                    )));
                }
            }
        }

        tx.commit()
            .map_err(|e| StateError::BackendFailure(format!("Failed to commit transaction: {}", e)))
    }
}
