//! Per-height execution state: open tables, shared change log, rollback
//!
//! A `StateStorage` represents one execution context at one block height.
//! Every table it opens records mutations into the same change log, so a
//! savepoint taken here can be rolled back across all of them. The
//! executor opens a fresh `StateStorage` for the next height after commit.

use crate::backend::StateBackend;
use crate::changelog::{ChangeLog, Recorder};
use crate::error::{Result, StateError};
use crate::hasher::Sha256Hash;
use crate::schema::TableInfo;
use crate::table::Table;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct StateStorage {
    backend: Arc<dyn StateBackend>,
    log: Arc<ChangeLog>,
    tables: HashMap<String, Table>,
    block_number: u64,
}

impl StateStorage {
    pub fn new(backend: Arc<dyn StateBackend>, block_number: u64) -> Self {
        Self {
            backend,
            log: Arc::new(ChangeLog::new()),
            tables: HashMap::new(),
            block_number,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.log
    }

    /// Open a table at this context's height, wired to the shared log.
    pub fn open_table(&mut self, info: Arc<TableInfo>) -> Result<()> {
        if self.tables.contains_key(&info.name) {
            return Err(StateError::InvalidInput(format!(
                "table '{}' already open",
                info.name
            )));
        }
        let table = Table::new(
            info.clone(),
            self.backend.clone(),
            self.log.clone() as Arc<dyn Recorder>,
            self.block_number,
        );
        self.tables.insert(info.name.clone(), table);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Marker for the current tail of the shared change log.
    pub fn savepoint(&self) -> usize {
        self.log.savepoint()
    }

    /// Undo every change after `savepoint`, strictly newest first. A
    /// change naming a table this context cannot reach means the log and
    /// the table set have diverged; that is fatal and nothing is skipped.
    pub fn rollback_to(&mut self, savepoint: usize) -> Result<()> {
        if savepoint > self.log.len() {
            return Err(StateError::IntegrityViolation(format!(
                "savepoint {} is beyond the log tail ({})",
                savepoint,
                self.log.len()
            )));
        }

        let mut undone = 0usize;
        while self.log.len() > savepoint {
            let change = self.log.pop().ok_or_else(|| {
                StateError::IntegrityViolation("change log drained during rollback".to_string())
            })?;
            let table = self.tables.get_mut(&change.table).ok_or_else(|| {
                warn!(table = %change.table, "rollback hit a change for an unopened table");
                StateError::IntegrityViolation(format!(
                    "change targets unreachable table '{}'",
                    change.table
                ))
            })?;
            table.undo(&change)?;
            undone += 1;
        }

        info!(savepoint, undone, "rollback complete");
        Ok(())
    }

    /// Recompute (or fetch the cached) aggregate hash of one table.
    pub fn hash(&mut self, name: &str) -> Result<Sha256Hash> {
        let table = self.tables.get_mut(name).ok_or_else(|| {
            StateError::InvalidInput(format!("table '{}' is not open", name))
        })?;
        table.hash()
    }

    /// Flush every table's overlay to the backend, then release the log:
    /// all savepoints taken at this height are dead after commit.
    pub fn commit(&mut self) -> Result<()> {
        for table in self.tables.values_mut() {
            table.commit()?;
        }
        self.log.clear();
        info!(block_number = self.block_number, "state committed");
        Ok(())
    }
}
