//! End-to-end overlay, rollback, and hashing behavior

use statetable::backend::{KeysCallback, RowCallback, RowsCallback};
use statetable::{
    Condition, Entry, MemoryBackend, Result, SqliteBackend, StateBackend, StateError,
    StateStorage, TableInfo,
};
use std::collections::HashMap;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn accounts() -> Arc<TableInfo> {
    TableInfo::new("accounts", "id", vec!["balance".to_string()])
}

fn balance(value: &str) -> Entry {
    [("balance", value)].into_iter().collect()
}

fn open_accounts(backend: Arc<dyn StateBackend>, height: u64) -> StateStorage {
    let mut state = StateStorage::new(backend, height);
    state.open_table(accounts()).unwrap();
    state
}

#[test]
fn rollback_restores_key_set_values_and_hash() {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(&accounts(), "carol", balance("7"));

    let mut state = open_accounts(backend, 1);
    let table = state.table_mut("accounts").unwrap();
    table.set_row("alice", balance("100")).unwrap();

    let keys_before = state
        .table("accounts")
        .unwrap()
        .get_primary_keys(&Condition::all())
        .unwrap();
    let hash_before = state.hash("accounts").unwrap();

    let sp = state.savepoint();
    let table = state.table_mut("accounts").unwrap();
    table.set_row("bob", balance("50")).unwrap();
    table.set_row("alice", balance("200")).unwrap();
    table.remove("dave").unwrap();
    assert_ne!(state.hash("accounts").unwrap(), hash_before);

    state.rollback_to(sp).unwrap();

    let table = state.table("accounts").unwrap();
    assert_eq!(table.get_primary_keys(&Condition::all()).unwrap(), keys_before);
    let alice = table.get_row("alice").unwrap().unwrap();
    assert_eq!(alice.get_field("balance"), Some(b"100".as_slice()));
    assert!(table.get_row("bob").unwrap().is_none());
    let carol = table.get_row("carol").unwrap().unwrap();
    assert_eq!(carol.get_field("balance"), Some(b"7".as_slice()));
    assert_eq!(state.hash("accounts").unwrap(), hash_before);
}

#[test]
fn hash_is_independent_of_write_order() {
    let mut forward = open_accounts(Arc::new(MemoryBackend::new()), 1);
    let table = forward.table_mut("accounts").unwrap();
    table.set_row("alice", balance("100")).unwrap();
    table.set_row("bob", balance("50")).unwrap();
    table.set_row("carol", balance("7")).unwrap();

    let mut reversed = open_accounts(Arc::new(MemoryBackend::new()), 1);
    let table = reversed.table_mut("accounts").unwrap();
    table.set_row("carol", balance("7")).unwrap();
    table.set_row("bob", balance("99")).unwrap();
    table.set_row("alice", balance("100")).unwrap();
    // Overwrite so the final tuples match the forward run.
    table.set_row("bob", balance("50")).unwrap();

    assert_eq!(
        forward.hash("accounts").unwrap(),
        reversed.hash("accounts").unwrap()
    );
}

#[test]
fn balance_update_then_rollback_restores_prior_hash() {
    init_tracing();
    let mut state = open_accounts(Arc::new(MemoryBackend::new()), 1);

    state
        .table_mut("accounts")
        .unwrap()
        .set_row("alice", balance("100"))
        .unwrap();
    let h1 = state.hash("accounts").unwrap();

    let sp = state.savepoint();
    state
        .table_mut("accounts")
        .unwrap()
        .set_row("alice", balance("200"))
        .unwrap();
    let h2 = state.hash("accounts").unwrap();
    assert_ne!(h1, h2);

    state.rollback_to(sp).unwrap();
    let alice = state
        .table("accounts")
        .unwrap()
        .get_row("alice")
        .unwrap()
        .unwrap();
    assert_eq!(alice.get_field("balance"), Some(b"100".as_slice()));
    assert_eq!(state.hash("accounts").unwrap(), h1);
}

#[test]
fn get_rows_skips_overlay_deleted_and_reaches_backend() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(&accounts(), "a", balance("1"));
    backend.seed(&accounts(), "b", balance("2"));

    let mut state = open_accounts(backend, 1);
    state.table_mut("accounts").unwrap().remove("a").unwrap();

    let rows = state
        .table("accounts")
        .unwrap()
        .get_rows(&["a".to_string(), "b".to_string()])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows.get("b").unwrap().get_field("balance"),
        Some(b"2".as_slice())
    );
}

#[test]
fn double_remove_of_absent_key_survives_partial_rollback() {
    let mut state = open_accounts(Arc::new(MemoryBackend::new()), 1);

    state.table_mut("accounts").unwrap().remove("k").unwrap();
    let sp = state.savepoint();
    state.table_mut("accounts").unwrap().remove("k").unwrap();
    assert_eq!(state.change_log().len(), 2);

    assert!(state.table("accounts").unwrap().get_row("k").unwrap().is_none());

    // Undo only the second remove: the first remove's tombstone persists.
    state.rollback_to(sp).unwrap();
    assert!(state.table("accounts").unwrap().get_row("k").unwrap().is_none());
    assert_eq!(state.change_log().len(), 1);
}

#[test]
fn commit_then_next_height_reads_through_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.db");
    let backend: Arc<dyn StateBackend> =
        Arc::new(SqliteBackend::open(path.to_str().unwrap()).unwrap());

    let mut state = open_accounts(backend.clone(), 1);
    let table = state.table_mut("accounts").unwrap();
    table.set_row("alice", balance("100")).unwrap();
    table.set_row("bob", balance("50")).unwrap();
    table.remove("bob").unwrap();
    state.commit().unwrap();

    // Fresh context at the next height sees only committed state.
    let mut next = open_accounts(backend, 2);
    let table = next.table("accounts").unwrap();
    let alice = table.get_row("alice").unwrap().unwrap();
    assert_eq!(alice.get_field("balance"), Some(b"100".as_slice()));
    assert_eq!(alice.block_number, 1);
    assert!(table.get_row("bob").unwrap().is_none());
    assert_eq!(
        table.get_primary_keys(&Condition::all()).unwrap(),
        vec!["alice".to_string()]
    );

    let table = next.table_mut("accounts").unwrap();
    table.set_row("alice", balance("150")).unwrap();
    let alice = table.get_row("alice").unwrap().unwrap();
    assert_eq!(alice.block_number, 2);
}

#[test]
fn rejected_write_leaves_everything_untouched() {
    let mut state = open_accounts(Arc::new(MemoryBackend::new()), 1);
    state
        .table_mut("accounts")
        .unwrap()
        .set_row("alice", balance("100"))
        .unwrap();
    let hash = state.hash("accounts").unwrap();
    let log_len = state.change_log().len();

    let bad: Entry = [("owner", "mallory")].into_iter().collect();
    assert!(state
        .table_mut("accounts")
        .unwrap()
        .set_row("alice", bad)
        .is_err());

    assert_eq!(state.change_log().len(), log_len);
    assert_eq!(state.hash("accounts").unwrap(), hash);
    let alice = state
        .table("accounts")
        .unwrap()
        .get_row("alice")
        .unwrap()
        .unwrap();
    assert_eq!(alice.get_field("balance"), Some(b"100".as_slice()));
}

/// Backend that refuses every operation, standing in for a store that has
/// gone away mid-block.
struct UnavailableBackend;

impl StateBackend for UnavailableBackend {
    fn async_get_row(&self, _info: &TableInfo, _key: &str, callback: RowCallback) {
        callback(Err(StateError::BackendFailure("store offline".to_string())));
    }

    fn async_get_rows(&self, _info: &TableInfo, _keys: &[String], callback: RowsCallback) {
        callback(Err(StateError::BackendFailure("store offline".to_string())));
    }

    fn async_get_primary_keys(
        &self,
        _info: &TableInfo,
        _condition: &Condition,
        callback: KeysCallback,
    ) {
        callback(Err(StateError::BackendFailure("store offline".to_string())));
    }

    fn persist(&self, _info: &TableInfo, _rows: &HashMap<String, Entry>) -> Result<()> {
        Err(StateError::BackendFailure("store offline".to_string()))
    }
}

#[test]
fn backend_failure_propagates_and_overlay_survives() {
    init_tracing();
    let mut state = open_accounts(Arc::new(UnavailableBackend), 1);
    state
        .table_mut("accounts")
        .unwrap()
        .set_row("alice", balance("100"))
        .unwrap();

    let table = state.table("accounts").unwrap();
    // Overlay hits never touch the backend; misses surface its error
    // verbatim rather than swallowing it.
    assert!(table.get_row("alice").unwrap().is_some());
    let err = table.get_row("missing").unwrap_err();
    assert_eq!(err, StateError::BackendFailure("store offline".to_string()));

    let err = state.commit().unwrap_err();
    assert!(matches!(err, StateError::BackendFailure(_)));

    // Nothing was torn down by the failed flush: the pending row, the
    // dirty flag, and the change log are all intact for a retry.
    let table = state.table("accounts").unwrap();
    let alice = table.get_row("alice").unwrap().unwrap();
    assert_eq!(alice.get_field("balance"), Some(b"100".as_slice()));
    assert!(table.is_dirty());
    assert_eq!(state.change_log().len(), 1);
}
