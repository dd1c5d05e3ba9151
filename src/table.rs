//! Table overlay: dirty rows over a durable backend
//!
//! A `Table` is one logical table's pending writes at one block height.
//! Reads consult the overlay first and fall back to the backend for keys
//! not yet overlaid; every accepted write emits a reversible [`Change`] to
//! the shared recorder. Writers must be serialized by the caller (the
//! per-block execution coordinator owns that); reads may run concurrently.

use crate::backend::{KeysCallback, RowCallback, RowsCallback, StateBackend};
use crate::changelog::{Change, ChangeKind, Recorder};
use crate::entry::{Entry, EntryStatus};
use crate::error::{Result, StateError};
use crate::hasher::{aggregate_hash, Sha256Hash, ZERO_HASH};
use crate::schema::{Condition, TableInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Block the calling thread on a single-shot callback, mirroring the
/// promise/future bridge the storage interface has always used for its
/// synchronous entry points.
fn block_on<T: Send + 'static>(
    start: impl FnOnce(Box<dyn FnOnce(Result<T>) + Send>),
) -> Result<T> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    start(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    rx.recv()
        .map_err(|_| StateError::BackendFailure("reply callback dropped without firing".to_string()))?
}

pub struct Table {
    info: Arc<TableInfo>,
    backend: Arc<dyn StateBackend>,
    recorder: Arc<dyn Recorder>,
    block_number: u64,
    /// Pending rows for the current height, shadowing the backend.
    dirty: HashMap<String, Entry>,
    /// Data changed since the table was opened at this height; captured
    /// into every change record so rollback restores it.
    data_dirty: bool,
    /// Data changed since the hash was last computed.
    hash_dirty: bool,
    cached_hash: Sha256Hash,
}

impl Table {
    pub fn new(
        info: Arc<TableInfo>,
        backend: Arc<dyn StateBackend>,
        recorder: Arc<dyn Recorder>,
        block_number: u64,
    ) -> Self {
        Self {
            info,
            backend,
            recorder,
            block_number,
            dirty: HashMap::new(),
            data_dirty: false,
            hash_dirty: true,
            cached_hash: ZERO_HASH,
        }
    }

    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn is_dirty(&self) -> bool {
        self.data_dirty
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Point read. An overlay entry with `Deleted` or `Rollbacked` status
    /// resolves to `None` without consulting the backend; a key absent
    /// from the overlay delegates to the backend. The callback fires
    /// exactly once.
    pub fn async_get_row(&self, key: &str, callback: RowCallback) {
        match self.dirty.get(key) {
            Some(entry) if entry.is_live() => callback(Ok(Some(entry.clone()))),
            Some(_) => callback(Ok(None)),
            None => self.backend.async_get_row(&self.info, key, callback),
        }
    }

    pub fn get_row(&self, key: &str) -> Result<Option<Entry>> {
        block_on(|callback| self.async_get_row(key, callback))
    }

    /// Multi-get. Keys are partitioned into overlay hits and backend
    /// misses; overlay results take precedence on collision and overlay
    /// tombstones are omitted rather than forwarded.
    pub fn async_get_rows(&self, keys: &[String], callback: RowsCallback) {
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for key in keys {
            match self.dirty.get(key) {
                Some(entry) if entry.is_live() => {
                    hits.insert(key.clone(), entry.clone());
                }
                Some(_) => {}
                None => misses.push(key.clone()),
            }
        }

        if misses.is_empty() {
            callback(Ok(hits));
            return;
        }

        self.backend.async_get_rows(
            &self.info,
            &misses,
            Box::new(move |result| match result {
                Ok(mut rows) => {
                    for (key, entry) in hits {
                        rows.insert(key, entry);
                    }
                    callback(Ok(rows));
                }
                Err(err) => callback(Err(err)),
            }),
        );
    }

    pub fn get_rows(&self, keys: &[String]) -> Result<HashMap<String, Entry>> {
        block_on(|callback| self.async_get_rows(keys, callback))
    }

    /// Enumerate visible keys under `condition`: live overlay keys first
    /// (sorted, since the overlay map itself has no order), then backend
    /// keys in backend order that are neither shadowed by an overlay
    /// tombstone nor already listed.
    pub fn async_get_primary_keys(&self, condition: &Condition, callback: KeysCallback) {
        let mut overlay_keys: Vec<String> = self
            .dirty
            .iter()
            .filter(|(key, entry)| entry.is_live() && condition.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        overlay_keys.sort();

        // Any key present in the overlay is settled locally, whatever its
        // status; the backend must not resurrect it.
        let overlaid: HashSet<String> = self.dirty.keys().cloned().collect();

        self.backend.async_get_primary_keys(
            &self.info,
            condition,
            Box::new(move |result| match result {
                Ok(backend_keys) => {
                    let mut keys = overlay_keys;
                    for key in backend_keys {
                        if !overlaid.contains(&key) {
                            keys.push(key);
                        }
                    }
                    callback(Ok(keys));
                }
                Err(err) => callback(Err(err)),
            }),
        );
    }

    pub fn get_primary_keys(&self, condition: &Condition) -> Result<Vec<String>> {
        block_on(|callback| self.async_get_primary_keys(condition, callback))
    }

    // ------------------------------------------------------------------
    // Write path (caller-serialized)
    // ------------------------------------------------------------------

    /// Insert or replace the row at `key`. Rejects empty entries and
    /// undeclared fields without mutating anything or emitting a change.
    /// Stamps the block number and the primary-key field on acceptance.
    pub fn set_row(&mut self, key: &str, mut entry: Entry) -> Result<()> {
        if entry.is_empty() {
            return Err(StateError::InvalidInput(format!(
                "empty entry for key '{}' in table '{}'",
                key, self.info.name
            )));
        }
        for field in entry.fields.keys() {
            if !self.info.is_valid_field(field) {
                return Err(StateError::InvalidInput(format!(
                    "field '{}' not declared in table '{}'",
                    field, self.info.name
                )));
            }
        }

        entry.block_number = self.block_number;
        entry.status = EntryStatus::Normal;
        entry.set_field(self.info.primary_key.clone(), key.as_bytes().to_vec());

        let previous = self.dirty.get(key).cloned();
        self.dirty.insert(key.to_string(), entry);

        debug!(table = %self.info.name, key = %key, "set_row");
        self.emit(key, ChangeKind::Set, previous);
        Ok(())
    }

    /// Remove the row at `key`. A live overlay entry is flipped to
    /// `Deleted` in place; an absent key gets a synthetic tombstone; an
    /// already dead key still produces a valid change, so repeated
    /// removes never error.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        let previous = match self.dirty.get_mut(key) {
            Some(entry) => {
                // Even an already dead slot (tombstone or rollback marker)
                // flips to Deleted so the commit flush issues the delete;
                // the captured previous entry restores it exactly on undo.
                let previous = entry.clone();
                entry.status = EntryStatus::Deleted;
                Some(previous)
            }
            None => {
                let mut tombstone = Entry::with_status(EntryStatus::Deleted);
                tombstone.block_number = self.block_number;
                tombstone.set_field(self.info.primary_key.clone(), key.as_bytes().to_vec());
                self.dirty.insert(key.to_string(), tombstone);
                None
            }
        };

        debug!(table = %self.info.name, key = %key, "remove");
        self.emit(key, ChangeKind::Remove, previous);
        Ok(())
    }

    fn emit(&mut self, key: &str, kind: ChangeKind, previous: Option<Entry>) {
        self.recorder.record(Change {
            table: self.info.name.clone(),
            key: key.to_string(),
            kind,
            previous,
            table_was_dirty: self.data_dirty,
        });
        self.data_dirty = true;
        self.hash_dirty = true;
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    /// Undo one change against this table's overlay. Afterwards the
    /// overlay reads, hash, and dirty flag match the state before the
    /// mutation was applied. A target key missing from the overlay means
    /// the log and the overlay have diverged, which is fatal.
    pub fn undo(&mut self, change: &Change) -> Result<()> {
        if change.table != self.info.name {
            return Err(StateError::IntegrityViolation(format!(
                "change targets table '{}' but was applied to '{}'",
                change.table, self.info.name
            )));
        }
        let current = self.dirty.get_mut(&change.key).ok_or_else(|| {
            StateError::IntegrityViolation(format!(
                "undo target '{}' missing from overlay of table '{}'",
                change.key, change.table
            ))
        })?;

        if change.kind == ChangeKind::Remove {
            current.status = EntryStatus::Normal;
        }

        match &change.previous {
            Some(previous) => {
                self.dirty.insert(change.key.clone(), previous.clone());
            }
            None => {
                // The key did not exist in the overlay before this change.
                // The marker keeps later reads from re-querying the backend
                // and picking up a stale hit.
                self.dirty
                    .insert(change.key.clone(), Entry::with_status(EntryStatus::Rollbacked));
            }
        }

        debug!(table = %change.table, key = %change.key, "undo");
        self.data_dirty = change.table_was_dirty;
        self.hash_dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hash & commit
    // ------------------------------------------------------------------

    /// Aggregate hash over the visible row set (overlay merged over
    /// backend). Recomputed lazily when dirty, cached until the next
    /// mutation. Tables outside consensus always report the zero hash.
    pub fn hash(&mut self) -> Result<Sha256Hash> {
        if !self.info.enable_consensus {
            return Ok(ZERO_HASH);
        }
        if !self.hash_dirty {
            return Ok(self.cached_hash);
        }

        let keys = self.get_primary_keys(&Condition::all())?;
        let rows = self.get_rows(&keys)?;
        let hash = aggregate_hash(&self.info, rows.into_iter().collect());
        debug!(table = %self.info.name, hash = %hex::encode(hash), "hash recomputed");

        self.cached_hash = hash;
        self.hash_dirty = false;
        Ok(hash)
    }

    /// Flush the overlay to the backend and clear dirty state for the
    /// next height. `Rollbacked` markers are overlay-internal and never
    /// persisted; `Deleted` rows delete in the backend. The overlay is
    /// only released once the flush succeeds, so a failed commit leaves
    /// every pending row in place and can be retried.
    pub fn commit(&mut self) -> Result<()> {
        let rows: HashMap<String, Entry> = self
            .dirty
            .iter()
            .filter(|(_, entry)| entry.status != EntryStatus::Rollbacked)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();

        if !rows.is_empty() {
            self.backend.persist(&self.info, &rows)?;
        }

        debug!(table = %self.info.name, rows = rows.len(), "commit");
        self.dirty.clear();
        self.data_dirty = false;
        self.hash_dirty = true;
        Ok(())
    }
}
