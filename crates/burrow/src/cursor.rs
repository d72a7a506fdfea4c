//! Cursor handle: a movable position inside a named map.

use crate::{
    database::{empty_val, owned_val, to_val, Database},
    deps::CascadeClose,
    error::{mdbx_result, Error, Result},
    flags::WriteFlags,
    iter::{Iter, IterDup, IterDupRows, IterOps},
    transaction::{Transaction, TransactionInner},
};
use libc::c_void;
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    ptr::{self, NonNull},
    sync::Arc,
};

/// Positioning operation for [`Cursor::get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorOp {
    /// Position at the first key/value pair.
    First,
    /// Position at the first value of the current key (duplicate-sorted).
    FirstDup,
    /// Position at the given key and value (duplicate-sorted).
    GetBoth,
    /// Position at the given key, nearest value (duplicate-sorted).
    GetBothRange,
    /// Return the pair at the current position.
    GetCurrent,
    /// Return up to a page of duplicate values from the current position
    /// (duplicate-fixed).
    GetMultiple,
    /// Position at the last key/value pair.
    Last,
    /// Position at the last value of the current key (duplicate-sorted).
    LastDup,
    /// Position at the next pair.
    Next,
    /// Position at the next value of the current key (duplicate-sorted).
    NextDup,
    /// Return the next page of duplicate values (duplicate-fixed).
    NextMultiple,
    /// Position at the first value of the next key.
    NextNoDup,
    /// Position at the previous pair.
    Prev,
    /// Position at the previous value of the current key (duplicate-sorted).
    PrevDup,
    /// Position at the last value of the previous key.
    PrevNoDup,
    /// Position at the given key.
    Set,
    /// Position at the given key and return it.
    SetKey,
    /// Position at the first key greater than or equal to the given key.
    SetRange,
    /// Position at the previous page of duplicate values (duplicate-fixed).
    PrevMultiple,
    /// Position at the first pair greater than or equal to the given
    /// key/value.
    SetLowerBound,
    /// Position at the first pair strictly greater than the given key/value.
    SetUpperBound,
}

impl CursorOp {
    pub(crate) const fn raw(self) -> ffi::MDBX_cursor_op {
        match self {
            Self::First => ffi::MDBX_FIRST,
            Self::FirstDup => ffi::MDBX_FIRST_DUP,
            Self::GetBoth => ffi::MDBX_GET_BOTH,
            Self::GetBothRange => ffi::MDBX_GET_BOTH_RANGE,
            Self::GetCurrent => ffi::MDBX_GET_CURRENT,
            Self::GetMultiple => ffi::MDBX_GET_MULTIPLE,
            Self::Last => ffi::MDBX_LAST,
            Self::LastDup => ffi::MDBX_LAST_DUP,
            Self::Next => ffi::MDBX_NEXT,
            Self::NextDup => ffi::MDBX_NEXT_DUP,
            Self::NextMultiple => ffi::MDBX_NEXT_MULTIPLE,
            Self::NextNoDup => ffi::MDBX_NEXT_NODUP,
            Self::Prev => ffi::MDBX_PREV,
            Self::PrevDup => ffi::MDBX_PREV_DUP,
            Self::PrevNoDup => ffi::MDBX_PREV_NODUP,
            Self::Set => ffi::MDBX_SET,
            Self::SetKey => ffi::MDBX_SET_KEY,
            Self::SetRange => ffi::MDBX_SET_RANGE,
            Self::PrevMultiple => ffi::MDBX_PREV_MULTIPLE,
            Self::SetLowerBound => ffi::MDBX_SET_LOWERBOUND,
            Self::SetUpperBound => ffi::MDBX_SET_UPPERBOUND,
        }
    }
}

#[derive(Clone, Copy)]
struct CursorPtr(NonNull<ffi::MDBX_cursor>);

// SAFETY: access to the handle is serialized by the mutex holding it.
unsafe impl Send for CursorPtr {}

/// A position inside a named map, bound to one transaction.
///
/// A cursor must never be used after its owning transaction ends; the
/// transaction enforces this by force-closing its cursors before any
/// terminal call, after which every operation here fails with
/// [`Error::CursorUnavailable`]. A live cursor in turn keeps its transaction
/// from being torn down by a plain drop.
pub struct Cursor {
    inner: Arc<CursorInner>,
}

pub(crate) struct CursorInner {
    state: Mutex<CursorState>,
    ctx: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

struct CursorState {
    cursor: Option<CursorPtr>,
    txn: Option<Arc<TransactionInner>>,
    db: Option<Database>,
}

impl CascadeClose for CursorInner {
    fn cascade_close(&self) {
        let (ptr, backlink) = {
            let mut state = self.state.lock();
            match state.cursor.take() {
                None => return,
                Some(ptr) => {
                    state.db = None;
                    (ptr, state.txn.take())
                }
            }
        };
        unsafe { ffi::mdbx_cursor_close(ptr.0.as_ptr()) };
        drop(backlink);
    }
}

impl Drop for CursorInner {
    fn drop(&mut self) {
        if let Some(ptr) = self.state.get_mut().cursor.take() {
            unsafe { ffi::mdbx_cursor_close(ptr.0.as_ptr()) };
        }
        // The transaction backlink drops afterwards; if this was the last
        // handle keeping the transaction alive, its teardown runs then.
    }
}

impl Cursor {
    pub(crate) fn open(txn: &Transaction, db: &Database) -> Result<Self> {
        Self::open_on(&txn.inner_arc(), db)
    }

    /// Opens a cursor directly against a transaction's shared state; used by
    /// [`Cursor::dup`] and the duplicate-row driver, where no `Transaction`
    /// object is at hand.
    pub(crate) fn open_on(txn: &Arc<TransactionInner>, db: &Database) -> Result<Self> {
        let mut ptr: *mut ffi::MDBX_cursor = ptr::null_mut();
        let rc =
            txn.txn_execute(|txn| unsafe { ffi::mdbx_cursor_open(txn, db.dbi(), &mut ptr) })?;
        mdbx_result(rc)?;

        let inner = Arc::new(CursorInner {
            state: Mutex::new(CursorState {
                cursor: Some(CursorPtr(NonNull::new(ptr).ok_or(Error::Invalid)?)),
                txn: Some(Arc::clone(txn)),
                db: Some(db.clone()),
            }),
            ctx: Mutex::new(None),
        });
        txn.register_cursor(&inner);
        Ok(Self { inner })
    }

    /// Creates an unbound cursor, to be attached later with
    /// [`bind`](Self::bind).
    pub fn unbound() -> Result<Self> {
        let ptr = unsafe { ffi::mdbx_cursor_create(ptr::null_mut()) };
        let cursor = NonNull::new(ptr).ok_or(Error::Other(libc::ENOMEM))?;
        Ok(Self {
            inner: Arc::new(CursorInner {
                state: Mutex::new(CursorState {
                    cursor: Some(CursorPtr(cursor)),
                    txn: None,
                    db: None,
                }),
                ctx: Mutex::new(None),
            }),
        })
    }

    /// Binds the cursor to a transaction and map, registering it for the
    /// transaction's terminal cascade. Rebinding an already-bound cursor is
    /// allowed; `None` keeps the currently bound map.
    pub fn bind(&self, txn: &Transaction, db: Option<&Database>) -> Result<()> {
        let db = match db {
            Some(db) => db.clone(),
            None => self.inner.state.lock().db.clone().ok_or(Error::Invalid)?,
        };
        let cursor = self.raw()?;
        let rc = txn
            .txn_execute(|txn| unsafe { ffi::mdbx_cursor_bind(txn, cursor.0.as_ptr(), db.dbi()) })?;
        mdbx_result(rc)?;

        let previous = {
            let mut state = self.inner.state.lock();
            let previous = state.txn.replace(txn.inner_arc());
            state.db = Some(db);
            previous
        };
        if let Some(previous) = &previous {
            previous.unregister_cursor(&self.inner);
        }
        txn.register_cursor(&self.inner);
        // A displaced backlink is released outside the state lock.
        drop(previous);
        Ok(())
    }

    /// Closes the cursor.
    ///
    /// Idempotent: closing an already-closed cursor is a no-op. Closing also
    /// removes the cursor from further cascade sweeps of its transaction.
    pub fn close(&self) -> Result<()> {
        self.inner.cascade_close();
        Ok(())
    }

    /// Duplicates the cursor: an independent cursor on the same transaction
    /// and map, sharing the current logical position. Moving one never moves
    /// the other, which decouples nested iteration from a shared cursor's
    /// subsequent movement.
    pub fn dup(&self) -> Result<Self> {
        let (src, txn, db) = {
            let state = self.inner.state.lock();
            (
                state.cursor.ok_or(Error::CursorUnavailable)?,
                state.txn.clone().ok_or(Error::CursorUnavailable)?,
                state.db.clone().ok_or(Error::CursorUnavailable)?,
            )
        };
        let dup = Self::open_on(&txn, &db)?;
        let rc = dup
            .cursor_execute(|dst| unsafe { ffi::mdbx_cursor_copy(src.0.as_ptr(), dst) })?;
        mdbx_result(rc)?;
        Ok(dup)
    }

    /// Copies this cursor's position onto another open cursor of the same
    /// transaction.
    pub fn copy_to(&self, dest: &Self) -> Result<()> {
        let src = self.raw()?;
        let rc = dest
            .cursor_execute(|dst| unsafe { ffi::mdbx_cursor_copy(src.0.as_ptr(), dst) })?;
        mdbx_result(rc).map(drop)
    }

    /// Positions the cursor and returns the pair at the new position.
    ///
    /// Both "not found" and "no data" come back as `(None, None)` rather
    /// than an error. For operations that do not report a key (for example
    /// the duplicate-value positioning ops) the returned key echoes the
    /// input, if any. Returned buffers are owned copies, taken before the
    /// engine's call-scoped memory goes away.
    pub fn get(
        &self,
        key: Option<&[u8]>,
        op: CursorOp,
    ) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let mut key_val = key.map_or_else(empty_val, to_val);
        let mut data_val = empty_val();
        self.cursor_execute(|cursor| unsafe {
            match ffi::mdbx_cursor_get(cursor, &mut key_val, &mut data_val, op.raw()) {
                ffi::MDBX_SUCCESS => Ok((maybe_owned(&key_val), maybe_owned(&data_val))),
                ffi::MDBX_NOTFOUND | ffi::MDBX_ENODATA | ffi::MDBX_RESULT_TRUE => Ok((None, None)),
                code => Err(Error::from_err_code(code)),
            }
        })?
    }

    /// Positions at the first pair of the map.
    pub fn first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(pair(self.get(None, CursorOp::First)?))
    }

    /// Positions at the last pair of the map.
    pub fn last(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(pair(self.get(None, CursorOp::Last)?))
    }

    /// Positions at the first value of the current key.
    pub fn first_dup(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.get(None, CursorOp::FirstDup)?.1)
    }

    /// Positions at the last value of the current key.
    pub fn last_dup(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.get(None, CursorOp::LastDup)?.1)
    }

    /// Stores a pair through the cursor and positions at it.
    pub fn put(&self, key: &[u8], value: &[u8], flags: WriteFlags) -> Result<()> {
        let key_val = to_val(key);
        let mut data_val = to_val(value);
        let rc = self.cursor_execute(|cursor| unsafe {
            ffi::mdbx_cursor_put(cursor, &key_val, &mut data_val, flags.bits())
        })?;
        mdbx_result(rc).map(drop)
    }

    /// Deletes the pair at the current position.
    ///
    /// [`WriteFlags::ALL_DUPS`] deletes all values of the current key.
    pub fn del(&self, flags: WriteFlags) -> Result<()> {
        let rc =
            self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_del(cursor, flags.bits()) })?;
        mdbx_result(rc).map(drop)
    }

    /// Number of duplicate values of the current key.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0usize;
        let rc =
            self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_count(cursor, &mut count) })?;
        mdbx_result(rc)?;
        Ok(count)
    }

    /// Whether the cursor is past the end of the map (or unpositioned).
    pub fn eof(&self) -> Result<bool> {
        let rc = self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_eof(cursor) })?;
        mdbx_result(rc)
    }

    /// Whether the cursor stands on the first pair.
    pub fn on_first(&self) -> Result<bool> {
        let rc = self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_on_first(cursor) })?;
        mdbx_result(rc)
    }

    /// Whether the cursor stands on the last pair.
    pub fn on_last(&self) -> Result<bool> {
        let rc = self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_on_last(cursor) })?;
        mdbx_result(rc)
    }

    /// Rebinds the cursor onto another read-only transaction over the same
    /// map, keeping the allocated cursor but resetting its position.
    pub fn renew(&self, txn: &Transaction) -> Result<()> {
        let cursor = self.raw()?;
        let rc =
            txn.txn_execute(|txn| unsafe { ffi::mdbx_cursor_renew(txn, cursor.0.as_ptr()) })?;
        mdbx_result(rc)?;

        let previous = {
            let mut state = self.inner.state.lock();
            state.txn.replace(txn.inner_arc())
        };
        if let Some(previous) = &previous {
            previous.unregister_cursor(&self.inner);
        }
        txn.register_cursor(&self.inner);
        drop(previous);
        Ok(())
    }

    /// The map this cursor is bound to, if any.
    pub fn database(&self) -> Option<Database> {
        self.inner.state.lock().db.clone()
    }

    /// Iterates from the start of the map: FIRST once, then NEXT.
    ///
    /// The sequence moves this cursor; to leave its position untouched,
    /// iterate over a duplicate instead: `cursor.dup()?.iter()`.
    pub fn iter(&self) -> Iter {
        Iter::new(self.shared(), IterOps { first: CursorOp::First, subsequent: CursorOp::Next })
    }

    /// Iterates from the first key greater than or equal to `start_key`.
    ///
    /// Positioning happens here, as a side effect on the cursor; the
    /// returned sequence then reads the current pair once and advances with
    /// NEXT.
    pub fn iter_from(&self, start_key: &[u8]) -> Result<Iter> {
        self.get(Some(start_key), CursorOp::SetRange)?;
        Ok(Iter::new(
            self.shared(),
            IterOps { first: CursorOp::GetCurrent, subsequent: CursorOp::Next },
        ))
    }

    /// Resumes iteration after an external positioning call: NEXT both
    /// initially and subsequently.
    pub fn iter_from_next(&self) -> Iter {
        Iter::new(self.shared(), IterOps { first: CursorOp::Next, subsequent: CursorOp::Next })
    }

    /// Iterates a duplicate-sorted map as one inner sequence per distinct
    /// key, starting at the first key.
    pub fn iter_dup_rows(&self) -> IterDupRows {
        IterDupRows::new(self.shared(), CursorOp::First)
    }

    /// Like [`iter_dup_rows`](Self::iter_dup_rows), starting at the first
    /// key greater than or equal to `start_key`.
    pub fn iter_dup_rows_from(&self, start_key: &[u8]) -> Result<IterDupRows> {
        self.get(Some(start_key), CursorOp::SetRange)?;
        Ok(IterDupRows::new(self.shared(), CursorOp::GetCurrent))
    }

    /// Like [`iter_dup_rows`](Self::iter_dup_rows), resuming after an
    /// external positioning call.
    pub fn iter_dup_rows_from_next(&self) -> IterDupRows {
        IterDupRows::new(self.shared(), CursorOp::Next)
    }

    /// Iterates a duplicate-sorted map as flat `(key, value)` pairs, one
    /// pair per stored value.
    pub fn iter_dup(&self) -> IterDup {
        IterDup::new(self.iter_dup_rows())
    }

    /// Flattened variant of [`iter_dup_rows_from`](Self::iter_dup_rows_from).
    pub fn iter_dup_from(&self, start_key: &[u8]) -> Result<IterDup> {
        Ok(IterDup::new(self.iter_dup_rows_from(start_key)?))
    }

    /// Flattened variant of
    /// [`iter_dup_rows_from_next`](Self::iter_dup_rows_from_next).
    pub fn iter_dup_from_next(&self) -> IterDup {
        IterDup::new(self.iter_dup_rows_from_next())
    }

    /// Attaches an arbitrary host-side value to the cursor.
    pub fn set_user_ctx<T: Any + Send + Sync>(&self, ctx: T) {
        *self.inner.ctx.lock() = Some(Arc::new(ctx));
    }

    /// The attached host-side context value, if any.
    pub fn user_ctx(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.ctx.lock().clone()
    }

    /// Stores an opaque pointer in the engine's native user-context slot.
    pub fn set_user_ctx_ptr(&self, ctx: *mut c_void) -> Result<()> {
        let rc = self
            .cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_set_userctx(cursor, ctx) })?;
        mdbx_result(rc).map(drop)
    }

    /// Reads the engine's native user-context slot.
    pub fn user_ctx_ptr(&self) -> Result<*mut c_void> {
        self.cursor_execute(|cursor| unsafe { ffi::mdbx_cursor_get_userctx(cursor) })
    }

    /// Runs a native call against the cursor handle, failing if the cursor
    /// has been closed. The transaction lock is never taken here, keeping
    /// the lock order strictly parent-before-child.
    fn cursor_execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(*mut ffi::MDBX_cursor) -> T,
    {
        let guard = self.inner.state.lock();
        let cursor = guard.cursor.ok_or(Error::CursorUnavailable)?;
        Ok(f(cursor.0.as_ptr()))
    }

    fn raw(&self) -> Result<CursorPtr> {
        self.inner.state.lock().cursor.ok_or(Error::CursorUnavailable)
    }

    /// Another handle to the same cursor; used by the iteration adapters,
    /// which share the position with this cursor by design.
    pub(crate) fn shared(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

fn pair(
    (key, value): (Option<Vec<u8>>, Option<Vec<u8>>),
) -> Option<(Vec<u8>, Vec<u8>)> {
    match (key, value) {
        (Some(key), Some(value)) => Some((key, value)),
        _ => None,
    }
}

unsafe fn maybe_owned(val: &ffi::MDBX_val) -> Option<Vec<u8>> {
    if val.iov_base.is_null() {
        return None;
    }
    Some(unsafe { owned_val(val) })
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Cursor")
            .field("open", &state.cursor.is_some())
            .field("bound", &state.txn.is_some())
            .finish_non_exhaustive()
    }
}
