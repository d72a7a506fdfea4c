use burrow::{DatabaseFlags, Environment, Error, WriteFlags};
use libc::c_void;
use tempfile::tempdir;

#[test]
fn put_get_del() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"key1", b"val1", WriteFlags::empty()).unwrap();
    db.put(&txn, b"key2", b"val2", WriteFlags::empty()).unwrap();
    db.put(&txn, b"key3", b"val3", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key1").unwrap(), Some(b"val1".to_vec()));
    assert_eq!(db.get(&txn, b"key2").unwrap(), Some(b"val2".to_vec()));
    assert_eq!(db.get(&txn, b"key").unwrap(), None);
    assert_eq!(db.stat(&txn).unwrap().entries(), 3);

    assert!(db.del(&txn, b"key1", None).unwrap());
    assert!(!db.del(&txn, b"key1", None).unwrap());
    assert_eq!(db.get(&txn, b"key1").unwrap(), None);
    txn.commit().unwrap();
}

#[test]
fn last_write_wins_within_a_transaction() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    for value in [&b"first"[..], b"second", b"third"] {
        db.put(&txn, b"key", value, WriteFlags::empty()).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"third".to_vec()));
}

#[test]
fn abort_discards_writes() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    // Materialize the main map first so the aborted write is the only loss.
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"keep", b"1", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"discard", b"2", WriteFlags::empty()).unwrap();
    txn.abort().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"keep").unwrap(), Some(b"1".to_vec()));
    assert_eq!(db.get(&txn, b"discard").unwrap(), None);
}

#[test]
fn terminal_operations_invalidate_the_transaction_and_its_cursors() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"key", b"val", WriteFlags::empty()).unwrap();
    let cursor = txn.cursor(&db).unwrap();
    assert!(cursor.first().unwrap().is_some());

    txn.commit().unwrap();

    assert_eq!(cursor.first().unwrap_err(), Error::CursorUnavailable);
    assert_eq!(cursor.count().unwrap_err(), Error::CursorUnavailable);
    assert_eq!(txn.commit().unwrap_err(), Error::TransactionUnavailable);
    assert_eq!(txn.abort().unwrap_err(), Error::TransactionUnavailable);
    assert_eq!(txn.open_map(None).unwrap_err(), Error::TransactionUnavailable);
    assert!(txn.env().is_none());

    // Closing an already-cascaded cursor stays a no-op.
    cursor.close().unwrap();
}

#[test]
fn commit_with_latency_reports_timings() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"key", b"val", WriteFlags::empty()).unwrap();
    let latency = txn.commit_with_latency().unwrap();
    assert!(latency.whole() >= latency.sync());

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"val".to_vec()));
}

#[test]
fn nested_transactions_commit_and_abort_independently() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"k1", b"v1", WriteFlags::empty()).unwrap();

    let child = txn.begin_nested().unwrap();
    db.put(&child, b"k2", b"v2", WriteFlags::empty()).unwrap();
    child.commit().unwrap();

    let child = txn.begin_nested().unwrap();
    db.put(&child, b"k3", b"v3", WriteFlags::empty()).unwrap();
    child.abort().unwrap();

    // The parent is untouched by its children ending.
    assert_eq!(db.get(&txn, b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(db.get(&txn, b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(&txn, b"k3").unwrap(), None);
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(db.get(&txn, b"k3").unwrap(), None);
}

#[test]
fn reset_and_renew_recycle_a_read_transaction() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();
    env.insert(b"key", b"val").unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"val".to_vec()));

    txn.reset().unwrap();
    txn.renew().unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"val".to_vec()));
}

#[test]
fn break_makes_operations_fail_instead_of_block() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"before", b"1", WriteFlags::empty()).unwrap();

    txn.break_txn().unwrap();
    assert!(db.put(&txn, b"after", b"2", WriteFlags::empty()).is_err());

    // The handle still has to be ended explicitly.
    txn.abort().unwrap();
    assert_eq!(txn.abort().unwrap_err(), Error::TransactionUnavailable);
}

#[test]
fn replace_returns_the_previous_value() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"key", b"old", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    let old = db.replace(&txn, b"key", b"new", WriteFlags::empty()).unwrap();
    assert_eq!(old, b"old".to_vec());
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"new".to_vec()));
}

#[test]
fn delete_specific_duplicate_value() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(2).open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.create_map(Some("multi"), DatabaseFlags::DUP_SORT).unwrap();
    db.put(&txn, b"key", b"a", WriteFlags::empty()).unwrap();
    db.put(&txn, b"key", b"b", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(Some("multi")).unwrap();
    assert!(db.del(&txn, b"key", Some(b"a")).unwrap());
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"b".to_vec()));
    assert!(db.del(&txn, b"key", None).unwrap());
    assert_eq!(db.get(&txn, b"key").unwrap(), None);
    txn.commit().unwrap();
}

#[test]
fn map_open_failures_are_classified() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(4).open(dir.path()).unwrap();

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.open_map(Some("missing")).unwrap_err(), Error::NotFound);
    drop(txn);

    let txn = env.begin_rw_txn().unwrap();
    txn.create_map(Some("plain"), DatabaseFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_rw_txn().unwrap();
    assert_eq!(
        txn.open_map_with_flags(Some("plain"), DatabaseFlags::DUP_SORT).unwrap_err(),
        Error::Incompatible
    );
    txn.abort().unwrap();
}

#[test]
fn map_flags_are_reported() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(2).open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.create_map(Some("dups"), DatabaseFlags::DUP_SORT).unwrap();
    assert!(db.flags(&txn).unwrap().contains(DatabaseFlags::DUP_SORT));
    txn.commit().unwrap();
}

#[test]
fn drop_map_empties_and_deletes() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(4).open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.create_map(Some("doomed"), DatabaseFlags::empty()).unwrap();
    db.put(&txn, b"key", b"val", WriteFlags::empty()).unwrap();
    // Workaround for the MDBX dbi-drop quirk when the dropped map is the
    // only named one.
    txn.create_map(Some("canary"), DatabaseFlags::empty()).unwrap();
    txn.commit().unwrap();

    // delete = false empties the map but keeps it.
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(Some("doomed")).unwrap();
    db.drop_map(&txn, false).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), None);
    txn.commit().unwrap();

    // delete = true removes the map itself.
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(Some("doomed")).unwrap();
    db.drop_map(&txn, true).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.open_map(Some("doomed")).unwrap_err(), Error::NotFound);
}

#[test]
fn sequence_read_increment_and_rollback() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    // A zero increment is a pure read, legal in a read-only transaction.
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 0).unwrap(), 0);
    drop(txn);

    // Aborted increments are not observed afterwards.
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 1).unwrap(), 0);
    assert_eq!(db.sequence(&txn, 1).unwrap(), 1);
    txn.abort().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 0).unwrap(), 0);
    drop(txn);

    // Committed increments accumulate.
    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 1).unwrap(), 0);
    assert_eq!(db.sequence(&txn, 1).unwrap(), 1);
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 0).unwrap(), 2);
}

#[test]
fn sequence_overflow_is_its_own_error() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.sequence(&txn, 1).unwrap(), 0);
    assert_eq!(db.sequence(&txn, u64::MAX).unwrap_err(), Error::SequenceOverflow);
    // The failed increment left the counter untouched.
    assert_eq!(db.sequence(&txn, 0).unwrap(), 1);
}

#[test]
fn transaction_ids_and_info() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let id = txn.id().unwrap();
    assert!(id > 0);
    assert_eq!(txn.info(false).unwrap().txn_id(), id);
    assert!(!txn.is_read_only());
    txn.abort().unwrap();
    assert_eq!(txn.id().unwrap_err(), Error::TransactionUnavailable);

    let txn = env.begin_ro_txn().unwrap();
    assert!(txn.is_read_only());
}

#[test]
fn reserve_writes_through_the_engine_buffer() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    {
        let buf = db.reserve(&txn, b"key", 4, WriteFlags::empty()).unwrap();
        buf.copy_from_slice(b"val1");
    }
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"val1".to_vec()));
}

#[test]
fn transaction_user_context() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    txn.set_user_ctx(7u32);
    assert_eq!(txn.user_ctx().unwrap().downcast_ref::<u32>(), Some(&7));

    let marker = 0x7a7usize as *mut c_void;
    txn.set_user_ctx_ptr(marker).unwrap();
    assert_eq!(txn.user_ctx_ptr().unwrap(), marker);
    txn.abort().unwrap();
    assert_eq!(txn.user_ctx_ptr().unwrap_err(), Error::TransactionUnavailable);
}
