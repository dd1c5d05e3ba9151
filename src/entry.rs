//! Versioned row records held by a table's dirty overlay

use std::collections::BTreeMap;

/// Lifecycle status of an overlay entry.
///
/// `Rollbacked` only ever exists inside the overlay: it marks a key as
/// proven absent before the current savepoint, so reads resolve it to
/// not-found without consulting the backend. It is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryStatus {
    Normal,
    Deleted,
    Rollbacked,
}

impl EntryStatus {
    /// Single-byte encoding used in the row hash span. Stable across
    /// versions; never reorder.
    pub fn as_byte(&self) -> u8 {
        match self {
            EntryStatus::Normal => 0,
            EntryStatus::Deleted => 1,
            EntryStatus::Rollbacked => 2,
        }
    }
}

/// One versioned row: an ordered field map, a lifecycle status, and the
/// block height at which this version was written.
///
/// Field values are uninterpreted bytes. The field map is a `BTreeMap` so
/// iteration order is fixed, which the hasher relies on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Entry {
    pub fields: BTreeMap<String, Vec<u8>>,
    pub status: EntryStatus,
    /// Stamped by the table on every accepted write; callers never set it.
    pub block_number: u64,
}

impl Entry {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            status: EntryStatus::Normal,
            block_number: 0,
        }
    }

    /// A tombstone or rollback marker entry with no fields.
    pub fn with_status(status: EntryStatus) -> Self {
        Self {
            fields: BTreeMap::new(),
            status,
            block_number: 0,
        }
    }

    pub fn get_field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(|v| v.as_slice())
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Live entries are visible to reads; `Deleted` and `Rollbacked` both
    /// resolve to not-found.
    pub fn is_live(&self) -> bool {
        self.status == EntryStatus::Normal
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Into<String>, V: Into<Vec<u8>>> FromIterator<(S, V)> for Entry {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut entry = Entry::new();
        for (name, value) in iter {
            entry.set_field(name, value);
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_fields_are_ordered() {
        let mut entry = Entry::new();
        entry.set_field("zeta", b"1".to_vec());
        entry.set_field("alpha", b"2".to_vec());
        entry.set_field("mid", b"3".to_vec());

        let names: Vec<&str> = entry.fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_status_bytes_are_stable() {
        assert_eq!(EntryStatus::Normal.as_byte(), 0);
        assert_eq!(EntryStatus::Deleted.as_byte(), 1);
        assert_eq!(EntryStatus::Rollbacked.as_byte(), 2);
    }

    #[test]
    fn test_liveness() {
        assert!(Entry::new().is_live());
        assert!(!Entry::with_status(EntryStatus::Deleted).is_live());
        assert!(!Entry::with_status(EntryStatus::Rollbacked).is_live());
    }

    #[test]
    fn test_from_iterator() {
        let entry: Entry = [("id", "alice"), ("balance", "100")].into_iter().collect();
        assert_eq!(entry.get_field("id"), Some(b"alice".as_slice()));
        assert_eq!(entry.get_field("balance"), Some(b"100".as_slice()));
        assert!(!entry.is_empty());
    }
}
