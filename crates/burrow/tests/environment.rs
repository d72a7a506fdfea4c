use burrow::{
    CopyFlags, DatabaseFlags, DeleteMode, EnvOption, Environment, Error, Geometry,
    TransactionFlags, WriteFlags,
};
use libc::c_void;
use std::{fs::File, sync::mpsc, thread};
use tempfile::tempdir;

#[test]
fn open_write_reopen() {
    let dir = tempdir().unwrap();
    {
        let env = Environment::builder().open(dir.path()).unwrap();
        let txn = env.begin_rw_txn().unwrap();
        let db = txn.open_map(None).unwrap();
        db.put(&txn, b"key", b"val", WriteFlags::empty()).unwrap();
        txn.commit().unwrap();
        env.close().unwrap();
    }

    let env = Environment::builder().open(dir.path()).unwrap();
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    assert_eq!(db.get(&txn, b"key").unwrap(), Some(b"val".to_vec()));
}

#[test]
fn open_with_geometry_and_flags() {
    let dir = tempdir().unwrap();
    let env = Environment::builder()
        .set_geometry(Geometry {
            size_upper: Some(1 << 30),
            ..Default::default()
        })
        .set_max_dbs(4)
        .set_max_readers(16)
        .set_sync_bytes(1 << 20)
        .open(dir.path())
        .unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let info = env.info(&txn).unwrap();
    assert!(info.map_size() > 0);
    assert_eq!(info.max_readers(), 16);
}

#[test]
fn open_failure_leaves_nothing_allocated() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("not-a-directory");
    std::fs::write(&file, b"plain file").unwrap();

    // Opening a plain file without no_sub_dir fails; the builder must still
    // come back cleanly and the path must stay usable.
    assert!(Environment::builder().open(&file).is_err());
    assert_eq!(std::fs::read(&file).unwrap(), b"plain file");
}

#[test]
fn close_cascades_to_transactions_and_cursors() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"key", b"val", WriteFlags::empty()).unwrap();
    let cursor = txn.cursor(&db).unwrap();

    env.close().unwrap();

    assert_eq!(cursor.first().unwrap_err(), Error::CursorUnavailable);
    assert_eq!(txn.commit().unwrap_err(), Error::TransactionUnavailable);
    assert_eq!(db.get(&txn, b"key").unwrap_err(), Error::TransactionUnavailable);
    assert_eq!(env.begin_ro_txn().unwrap_err(), Error::EnvironmentUnavailable);
    assert!(txn.env().is_none());

    // Closing again is a no-op.
    env.close().unwrap();
}

#[test]
fn default_map_facade() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(4).open(dir.path()).unwrap();

    assert_eq!(env.get(b"missing"), None);
    env.insert(b"alpha", b"1").unwrap();
    env.insert(b"beta", b"2").unwrap();
    assert_eq!(env.get(b"alpha"), Some(b"1".to_vec()));

    let entries: Vec<_> = env.iter().unwrap().map(Result::unwrap).collect();
    assert_eq!(
        entries,
        vec![(b"alpha".to_vec(), b"1".to_vec()), (b"beta".to_vec(), b"2".to_vec())]
    );

    // Point the facade at a named map; the write path creates it on demand.
    env.set_default_map(Some("side"));
    assert_eq!(env.get(b"alpha"), None);
    env.insert(b"gamma", b"3").unwrap();
    assert_eq!(env.get(b"gamma"), Some(b"3".to_vec()));

    env.set_default_map(None);
    assert_eq!(env.get(b"alpha"), Some(b"1".to_vec()));

    // The read accessor is exception-free by design, even after close.
    env.close().unwrap();
    assert_eq!(env.get(b"alpha"), None);
}

#[test]
fn database_names_lists_named_maps() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().set_max_dbs(4).open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    txn.create_map(Some("alpha"), DatabaseFlags::empty()).unwrap();
    txn.create_map(Some("beta"), DatabaseFlags::empty()).unwrap();
    txn.commit().unwrap();

    assert_eq!(env.database_names().unwrap(), vec!["alpha".to_string(), "beta".to_string()]);
}

#[test]
fn stat_and_sync() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let txn = env.begin_rw_txn().unwrap();
    let db = txn.open_map(None).unwrap();
    db.put(&txn, b"k1", b"v1", WriteFlags::empty()).unwrap();
    db.put(&txn, b"k2", b"v2", WriteFlags::empty()).unwrap();
    db.put(&txn, b"k3", b"v3", WriteFlags::empty()).unwrap();
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let stat = env.stat(&txn).unwrap();
    assert_eq!(stat.entries(), 3);
    assert!(stat.page_size() > 0);
    drop(txn);

    env.sync(true, false).unwrap();
}

#[test]
fn option_roundtrip() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    env.set_option(EnvOption::TxnDpInitial, 2048).unwrap();
    assert_eq!(env.option(EnvOption::TxnDpInitial).unwrap(), 2048);
}

#[test]
fn path_reports_open_location() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();
    assert_eq!(env.path().unwrap(), dir.path());
}

#[cfg(unix)]
#[test]
fn copy_to_fd_produces_a_backup() {
    use std::os::unix::io::AsRawFd;

    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();
    env.insert(b"key", b"val").unwrap();

    let backup = dir.path().join("backup");
    let file = File::create(&backup).unwrap();
    env.copy_to_fd(file.as_raw_fd(), CopyFlags::FORCE_DYNAMIC_SIZE).unwrap();
    assert!(file.metadata().unwrap().len() > 0);
}

#[test]
fn remove_deletes_environment_files() {
    let dir = tempdir().unwrap();
    {
        let env = Environment::builder().open(dir.path()).unwrap();
        env.insert(b"key", b"val").unwrap();
        env.close().unwrap();
    }

    assert!(Environment::remove(dir.path(), DeleteMode::JustDelete).unwrap());
    // Nothing left to delete the second time around.
    assert!(!Environment::remove(dir.path(), DeleteMode::JustDelete).unwrap());
}

#[test]
fn try_write_transaction_fails_fast_when_contended() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let writer_env = env.clone();
    let writer = thread::spawn(move || {
        let txn = writer_env.begin_rw_txn().unwrap();
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        txn.abort().unwrap();
    });

    started_rx.recv().unwrap();
    assert_eq!(
        env.begin_txn(TransactionFlags::TRY, None).unwrap_err(),
        Error::Busy
    );

    release_tx.send(()).unwrap();
    writer.join().unwrap();

    // With the writer gone the same begin succeeds.
    let txn = env.begin_txn(TransactionFlags::TRY, None).unwrap();
    txn.abort().unwrap();
}

#[test]
fn user_context_host_and_raw() {
    let dir = tempdir().unwrap();
    let env = Environment::builder().open(dir.path()).unwrap();

    assert!(env.user_ctx().is_none());
    env.set_user_ctx(String::from("ctx"));
    let ctx = env.user_ctx().unwrap();
    assert_eq!(ctx.downcast_ref::<String>().map(String::as_str), Some("ctx"));

    let marker = 0x5150usize as *mut c_void;
    env.set_user_ctx_ptr(marker).unwrap();
    assert_eq!(env.user_ctx_ptr().unwrap(), marker);
}
