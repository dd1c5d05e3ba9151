//! Durable-storage seam consumed by the table overlay

use crate::entry::Entry;
use crate::error::Result;
use crate::schema::{Condition, TableInfo};
use std::collections::HashMap;

/// Completion callback for a point read. Fires exactly once; a missing key
/// is `Ok(None)`, never an error.
pub type RowCallback = Box<dyn FnOnce(Result<Option<Entry>>) + Send>;

/// Completion callback for a multi-get. Absent keys are omitted from the map.
pub type RowsCallback = Box<dyn FnOnce(Result<HashMap<String, Entry>>) + Send>;

/// Completion callback for key enumeration. Keys arrive in backend order.
pub type KeysCallback = Box<dyn FnOnce(Result<Vec<String>>) + Send>;

/// Durable storage behind a table's overlay.
///
/// Reads are callback-based so a backend is free to answer off-thread; the
/// table's synchronous wrappers block on a single-shot channel. Backend
/// errors pass through to the caller verbatim — no retry happens at this
/// layer. `persist` is the commit flush channel: it receives the overlay's
/// rows at commit time and must apply them atomically per table.
pub trait StateBackend: Send + Sync {
    fn async_get_row(&self, info: &TableInfo, key: &str, callback: RowCallback);

    fn async_get_rows(&self, info: &TableInfo, keys: &[String], callback: RowsCallback);

    fn async_get_primary_keys(
        &self,
        info: &TableInfo,
        condition: &Condition,
        callback: KeysCallback,
    );

    /// Flush committed overlay rows. Entries with `Deleted` status remove
    /// the key from durable storage; the caller never passes `Rollbacked`
    /// markers.
    fn persist(&self, info: &TableInfo, rows: &HashMap<String, Entry>) -> Result<()>;
}
