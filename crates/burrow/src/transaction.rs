//! Transaction handle: a unit of work against an environment.

use crate::{
    cursor::{Cursor, CursorInner},
    database::Database,
    deps::{CascadeClose, Dependents},
    environment::Environment,
    error::{mdbx_result, Error, Result},
    flags::{DatabaseFlags, TransactionFlags},
};
use libc::{c_int, c_void};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    ptr::{self, NonNull},
    sync::Arc,
    time::Duration,
};

#[derive(Clone, Copy)]
struct TxnPtr(NonNull<ffi::MDBX_txn>);

// SAFETY: access to the handle is serialized by the mutex holding it.
unsafe impl Send for TxnPtr {}

/// A read-only or read-write transaction.
///
/// The native handle is valid only between begin and the first successful
/// terminal operation ([`commit`](Self::commit), [`abort`](Self::abort) or
/// the latency-reporting commit). A terminal operation first force-closes
/// every live [`Cursor`] opened under this transaction, then leaves the
/// object permanently inert: all further operations fail with
/// [`Error::TransactionUnavailable`].
///
/// A transaction that is dropped without being ended is aborted.
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

pub(crate) struct TransactionInner {
    state: Mutex<TxnState>,
    flags: TransactionFlags,
    cursors: Dependents<CursorInner>,
    ctx: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

struct TxnState {
    txn: Option<TxnPtr>,
    env: Option<Environment>,
}

impl TransactionInner {
    pub(crate) fn txn_execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(*mut ffi::MDBX_txn) -> T,
    {
        let guard = self.state.lock();
        let txn = guard.txn.ok_or(Error::TransactionUnavailable)?;
        Ok(f(txn.0.as_ptr()))
    }

    pub(crate) fn register_cursor(&self, cursor: &Arc<CursorInner>) {
        self.cursors.register(cursor);
    }

    pub(crate) fn unregister_cursor(&self, cursor: &Arc<CursorInner>) {
        self.cursors.unregister(cursor);
    }

    /// Runs a terminal engine call. Live cursors are force-closed first;
    /// afterwards the handle and the environment backlink are cleared,
    /// making the transaction permanently inert. The state is cleared even
    /// when the native call fails: the engine releases the handle on a
    /// failed commit, so it must never be touched again either way.
    fn finalize<F>(&self, op: &'static str, f: F) -> Result<bool>
    where
        F: FnOnce(*mut ffi::MDBX_txn) -> c_int,
    {
        let mut state = self.state.lock();
        let Some(txn) = state.txn else { return Err(Error::TransactionUnavailable) };

        self.cursors.cascade();
        let result = mdbx_result(f(txn.0.as_ptr()));

        state.txn = None;
        let env = state.env.take();
        drop(state);
        // The backlink is released outside the state lock: if this was the
        // last handle to the environment, its teardown must not run under
        // our lock.
        drop(env);

        tracing::debug!(target: "burrow", op, ok = result.is_ok(), "transaction finished");
        result
    }
}

impl CascadeClose for TransactionInner {
    fn cascade_close(&self) {
        match self.finalize("cascade-abort", |txn| unsafe { ffi::mdbx_txn_abort(txn) }) {
            Ok(_) | Err(Error::TransactionUnavailable) => {}
            Err(err) => {
                tracing::debug!(target: "burrow", %err, "abort failed during cascade");
            }
        }
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        // Every cursor holds a strong reference to this transaction, so by
        // the time this runs the dependent set is empty and a plain abort of
        // the native handle suffices.
        let state = self.state.get_mut();
        if let Some(txn) = state.txn.take() {
            tracing::debug!(target: "burrow", "aborting transaction on teardown");
            unsafe { ffi::mdbx_txn_abort(txn.0.as_ptr()) };
            state.env = None;
        }
    }
}

impl Transaction {
    pub(crate) fn begin(
        env: &Environment,
        flags: TransactionFlags,
        parent: Option<&Self>,
    ) -> Result<Self> {
        let begin_raw = |env_ptr: *mut ffi::MDBX_env,
                         parent_ptr: *mut ffi::MDBX_txn|
         -> Result<*mut ffi::MDBX_txn> {
            let mut txn: *mut ffi::MDBX_txn = ptr::null_mut();
            mdbx_result(unsafe {
                ffi::mdbx_txn_begin_ex(env_ptr, parent_ptr, flags.bits(), &mut txn, ptr::null_mut())
            })?;
            Ok(txn)
        };

        let txn = env.inner().env_execute(|env_ptr| match parent {
            Some(parent) => {
                parent.inner.txn_execute(|parent_ptr| begin_raw(env_ptr, parent_ptr))?
            }
            None => begin_raw(env_ptr, ptr::null_mut()),
        })??;

        let inner = Arc::new(TransactionInner {
            state: Mutex::new(TxnState {
                txn: Some(TxnPtr(NonNull::new(txn).ok_or(Error::Invalid)?)),
                env: Some(env.clone()),
            }),
            flags,
            cursors: Dependents::new(),
            ctx: Mutex::new(None),
        });
        env.inner().register_transaction(&inner);

        tracing::debug!(
            target: "burrow",
            read_only = flags.is_read_only(),
            nested = parent.is_some(),
            "transaction started"
        );
        Ok(Self { inner })
    }

    /// Commits the transaction, invalidating it and every cursor opened
    /// under it.
    pub fn commit(&self) -> Result<bool> {
        self.inner
            .finalize("commit", |txn| unsafe { ffi::mdbx_txn_commit_ex(txn, ptr::null_mut()) })
    }

    /// Commits like [`commit`](Self::commit) and reports the engine's timing
    /// breakdown of the commit stages.
    pub fn commit_with_latency(&self) -> Result<CommitLatency> {
        let mut latency = CommitLatency::new();
        self.inner.finalize("commit", |txn| unsafe {
            ffi::mdbx_txn_commit_ex(txn, latency.mdb_commit_latency())
        })?;
        Ok(latency)
    }

    /// Aborts the transaction, discarding its writes and invalidating it and
    /// every cursor opened under it.
    pub fn abort(&self) -> Result<bool> {
        self.inner.finalize("abort", |txn| unsafe { ffi::mdbx_txn_abort(txn) })
    }

    /// Resets a read-only transaction, releasing its snapshot but keeping
    /// the handle for a later [`renew`](Self::renew).
    pub fn reset(&self) -> Result<()> {
        let rc = self.txn_execute(|txn| unsafe { ffi::mdbx_txn_reset(txn) })?;
        mdbx_result(rc).map(drop)
    }

    /// Renews a reset read-only transaction on a fresh snapshot.
    pub fn renew(&self) -> Result<()> {
        let rc = self.txn_execute(|txn| unsafe { ffi::mdbx_txn_renew(txn) })?;
        mdbx_result(rc).map(drop)
    }

    /// Marks the transaction as broken: subsequent operations fail instead
    /// of blocking. The handle still has to be ended by commit or abort.
    pub fn break_txn(&self) -> Result<()> {
        let rc = self.txn_execute(|txn| unsafe { ffi::mdbx_txn_break(txn) })?;
        mdbx_result(rc).map(drop)
    }

    /// The engine-assigned transaction id.
    pub fn id(&self) -> Result<u64> {
        self.txn_execute(|txn| unsafe { ffi::mdbx_txn_id(txn) })
    }

    /// Snapshot of the engine's bookkeeping for this transaction.
    ///
    /// `scan_reader_lag` additionally scans the reader table to compute the
    /// lag of this snapshot behind the newest committed one.
    pub fn info(&self, scan_reader_lag: bool) -> Result<TransactionInfo> {
        let mut info = TransactionInfo(unsafe { std::mem::zeroed() });
        let rc = self.txn_execute(|txn| unsafe {
            ffi::mdbx_txn_info(txn, &mut info.0, scan_reader_lag)
        })?;
        mdbx_result(rc)?;
        Ok(info)
    }

    /// The owning environment, or `None` once the transaction has ended.
    pub fn env(&self) -> Option<Environment> {
        self.inner.state.lock().env.clone()
    }

    /// The flags this transaction was started with.
    pub fn flags(&self) -> TransactionFlags {
        self.inner.flags
    }

    /// Whether this is a read-only transaction.
    pub fn is_read_only(&self) -> bool {
        self.inner.flags.is_read_only()
    }

    /// Opens an existing named map; `None` opens the unnamed main map.
    pub fn open_map(&self, name: Option<&str>) -> Result<Database> {
        Database::new(self, name, DatabaseFlags::empty())
    }

    /// Opens a named map with explicit flags.
    ///
    /// Fails with a classified error when the map is absent (without
    /// [`DatabaseFlags::CREATE`]) or when the flags are incompatible with an
    /// existing map.
    pub fn open_map_with_flags(&self, name: Option<&str>, flags: DatabaseFlags) -> Result<Database> {
        Database::new(self, name, flags)
    }

    /// Opens a named map, creating it if absent. Only legal in a read-write
    /// transaction.
    pub fn create_map(&self, name: Option<&str>, flags: DatabaseFlags) -> Result<Database> {
        Database::new(self, name, flags | DatabaseFlags::CREATE)
    }

    /// Opens a cursor on the given map.
    pub fn cursor(&self, db: &Database) -> Result<Cursor> {
        Cursor::open(self, db)
    }

    /// Opens a cursor on a map by name, opening the map first.
    ///
    /// In a read-only transaction the map is opened non-creating; in a
    /// read-write transaction it is created if absent, since creating is
    /// only meaningful (and only legal) inside a write transaction.
    pub fn cursor_named(&self, name: Option<&str>) -> Result<Cursor> {
        let db = if self.is_read_only() {
            self.open_map(name)?
        } else {
            self.create_map(name, DatabaseFlags::empty())?
        };
        self.cursor(&db)
    }

    /// Starts a nested transaction under this read-write transaction.
    ///
    /// Committing or aborting the child never touches the parent handle.
    pub fn begin_nested(&self) -> Result<Self> {
        let env = self.env().ok_or(Error::TransactionUnavailable)?;
        Self::begin(&env, self.inner.flags, Some(self))
    }

    /// Attaches an arbitrary host-side value to the transaction.
    pub fn set_user_ctx<T: Any + Send + Sync>(&self, ctx: T) {
        *self.inner.ctx.lock() = Some(Arc::new(ctx));
    }

    /// The attached host-side context value, if any.
    pub fn user_ctx(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.ctx.lock().clone()
    }

    /// Stores an opaque pointer in the engine's native user-context slot.
    pub fn set_user_ctx_ptr(&self, ctx: *mut c_void) -> Result<()> {
        let rc = self.txn_execute(|txn| unsafe { ffi::mdbx_txn_set_userctx(txn, ctx) })?;
        mdbx_result(rc).map(drop)
    }

    /// Reads the engine's native user-context slot.
    pub fn user_ctx_ptr(&self) -> Result<*mut c_void> {
        self.txn_execute(|txn| unsafe { ffi::mdbx_txn_get_userctx(txn) })
    }

    pub(crate) fn txn_execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(*mut ffi::MDBX_txn) -> T,
    {
        self.inner.txn_execute(f)
    }

    pub(crate) fn inner_arc(&self) -> Arc<TransactionInner> {
        Arc::clone(&self.inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("read_only", &self.is_read_only())
            .field("live", &self.inner.state.lock().txn.is_some())
            .finish_non_exhaustive()
    }
}

/// Engine timing breakdown of a commit, reported in 1/65536 second units
/// and converted to [`Duration`].
#[repr(transparent)]
pub struct CommitLatency(ffi::MDBX_commit_latency);

impl CommitLatency {
    pub(crate) fn new() -> Self {
        Self(unsafe { std::mem::zeroed() })
    }

    pub(crate) fn mdb_commit_latency(&mut self) -> *mut ffi::MDBX_commit_latency {
        &mut self.0
    }

    /// Preparation stage: committing children, destroying cursors.
    pub const fn preparation(&self) -> Duration {
        Self::time_to_duration(self.0.preparation)
    }

    /// Garbage-collection update, by wall clock.
    pub const fn gc_wallclock(&self) -> Duration {
        Self::time_to_duration(self.0.gc_wallclock)
    }

    /// Internal audit, if enabled.
    pub const fn audit(&self) -> Duration {
        Self::time_to_duration(self.0.audit)
    }

    /// Writing dirty pages to the filesystem.
    pub const fn write(&self) -> Duration {
        Self::time_to_duration(self.0.write)
    }

    /// Syncing written data to durable storage.
    pub const fn sync(&self) -> Duration {
        Self::time_to_duration(self.0.sync)
    }

    /// Releasing resources at the end of the commit.
    pub const fn ending(&self) -> Duration {
        Self::time_to_duration(self.0.ending)
    }

    /// The whole commit.
    pub const fn whole(&self) -> Duration {
        Self::time_to_duration(self.0.whole)
    }

    /// User-mode CPU time of the garbage-collection update.
    pub const fn gc_cputime(&self) -> Duration {
        Self::time_to_duration(self.0.gc_cputime)
    }

    const fn time_to_duration(time: u32) -> Duration {
        Duration::from_nanos(time as u64 * (1_000_000_000 / 65_536))
    }
}

impl fmt::Debug for CommitLatency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitLatency").field("whole", &self.whole()).finish_non_exhaustive()
    }
}

/// Engine bookkeeping for one transaction.
#[repr(transparent)]
pub struct TransactionInfo(ffi::MDBX_txn_info);

impl TransactionInfo {
    /// Id of the snapshot this transaction observes.
    pub const fn txn_id(&self) -> u64 {
        self.0.txn_id
    }

    /// For read-only transactions: snapshots committed since this one began.
    pub const fn reader_lag(&self) -> u64 {
        self.0.txn_reader_lag
    }

    /// Bytes of the data file used by the observed snapshot.
    pub const fn space_used(&self) -> u64 {
        self.0.txn_space_used
    }

    /// For read-write transactions: bytes of dirty, not yet committed pages.
    pub const fn space_dirty(&self) -> u64 {
        self.0.txn_space_dirty
    }
}

impl fmt::Debug for TransactionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInfo").field("txn_id", &self.txn_id()).finish_non_exhaustive()
    }
}
