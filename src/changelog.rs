//! Append-only change log shared by every table in one execution context
//!
//! Each accepted mutation emits one [`Change`] carrying enough state to
//! undo itself. A savepoint is nothing more than the log length at the
//! moment it was taken; rollback walks the tail back down to that length.

use crate::entry::Entry;
use parking_lot::Mutex;

/// The kind of mutation a change record reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Remove,
}

/// A reversible record of one mutation.
///
/// `previous` is the overlay entry that occupied the key before the
/// mutation (cloned at capture time, so later overlay writes can never
/// reach it), or `None` when the key was absent from the overlay.
/// `table_was_dirty` is the table's data-dirty flag immediately before the
/// mutation, restored on undo. A change is never mutated after creation.
#[derive(Debug, Clone)]
pub struct Change {
    pub table: String,
    pub key: String,
    pub kind: ChangeKind,
    pub previous: Option<Entry>,
    pub table_was_dirty: bool,
}

/// Hook invoked once per accepted mutation, in mutation order. The table
/// is oblivious to savepoint boundaries; whatever implements this owns
/// sequencing and storage of the records.
pub trait Recorder: Send + Sync {
    fn record(&self, change: Change);
}

/// The default recorder: an in-memory append-only log with savepoints.
///
/// Appends may come from whichever thread performs a mutation; rollback
/// reads only run after mutation activity for the savepoint has quiesced.
#[derive(Default)]
pub struct ChangeLog {
    changes: Mutex<Vec<Change>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current log length, usable as a savepoint marker.
    pub fn savepoint(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }

    /// Pop the most recent change. Rollback consumes the log strictly in
    /// reverse chronological order through this.
    pub fn pop(&self) -> Option<Change> {
        self.changes.lock().pop()
    }

    /// Discard every record; called after a successful commit releases
    /// all savepoints.
    pub fn clear(&self) {
        self.changes.lock().clear();
    }
}

impl Recorder for ChangeLog {
    fn record(&self, change: Change) {
        self.changes.lock().push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str) -> Change {
        Change {
            table: "t".to_string(),
            key: key.to_string(),
            kind: ChangeKind::Set,
            previous: None,
            table_was_dirty: false,
        }
    }

    #[test]
    fn test_savepoint_is_log_length() {
        let log = ChangeLog::new();
        assert_eq!(log.savepoint(), 0);

        log.record(change("a"));
        log.record(change("b"));
        assert_eq!(log.savepoint(), 2);
    }

    #[test]
    fn test_pop_is_reverse_order() {
        let log = ChangeLog::new();
        log.record(change("a"));
        log.record(change("b"));
        log.record(change("c"));

        assert_eq!(log.pop().unwrap().key, "c");
        assert_eq!(log.pop().unwrap().key, "b");
        assert_eq!(log.pop().unwrap().key, "a");
        assert!(log.pop().is_none());
    }

    #[test]
    fn test_clear_releases_everything() {
        let log = ChangeLog::new();
        log.record(change("a"));
        log.clear();
        assert!(log.is_empty());
    }
}
