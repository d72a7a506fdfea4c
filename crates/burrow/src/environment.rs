//! Environment handle: the root of the resource hierarchy.

use crate::{
    deps::Dependents,
    error::{mdbx_result, Error, Result},
    flags::{CopyFlags, DatabaseFlags, DeleteMode, EnvOption, EnvironmentFlags, WriteFlags},
    iter::Iter,
    transaction::{Transaction, TransactionInner},
    TransactionFlags,
};
use indexmap::IndexSet;
use libc::c_void;
use parking_lot::Mutex;
use std::{
    any::Any,
    ffi::{CStr, CString},
    fmt,
    mem::size_of,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    sync::Arc,
};

/// Callback invoked by the engine when a stalled reader blocks reclamation.
///
/// This is the raw native callback type, passed through unchanged; it cannot
/// carry host-side state beyond the engine's own user-context pointer.
pub type HandleSlowReadersCallback = ffi::MDBX_hsr_func;

#[derive(Clone, Copy)]
struct EnvPtr(NonNull<ffi::MDBX_env>);

// SAFETY: access to the handle is serialized by the mutex holding it.
unsafe impl Send for EnvPtr {}

/// An open storage instance: one data file or directory.
///
/// `Environment` is a cheaply cloneable handle. The native environment stays
/// open until [`Environment::close`] is called or the last handle is dropped;
/// closing cascades through every live [`Transaction`] started from it, so no
/// dependent can observe a dangling native pointer afterwards.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

pub(crate) struct EnvironmentInner {
    handle: Mutex<Option<EnvPtr>>,
    txns: Dependents<TransactionInner>,
    /// Named-map handles opened through this environment. The engine aliases
    /// these integers across concurrent opens, so they are never closed one
    /// by one; the whole set is released when the environment closes.
    dbis: Mutex<IndexSet<ffi::MDBX_dbi>>,
    default_map: Mutex<Option<String>>,
    ctx: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl EnvironmentInner {
    pub(crate) fn env_execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(*mut ffi::MDBX_env) -> T,
    {
        let guard = self.handle.lock();
        let env = guard.ok_or(Error::EnvironmentUnavailable)?;
        Ok(f(env.0.as_ptr()))
    }

    pub(crate) fn register_transaction(&self, txn: &Arc<TransactionInner>) {
        self.txns.register(txn);
    }

    pub(crate) fn register_dbi(&self, dbi: ffi::MDBX_dbi) {
        self.dbis.lock().insert(dbi);
    }
}

impl Drop for EnvironmentInner {
    fn drop(&mut self) {
        // Live transactions hold a strong reference to this environment, so
        // by the time this runs the dependent set is empty.
        if let Some(env) = self.handle.get_mut().take() {
            let rc = unsafe { ffi::mdbx_env_close_ex(env.0.as_ptr(), false) };
            if rc != ffi::MDBX_SUCCESS {
                tracing::debug!(target: "burrow", code = rc, "environment close failed on drop");
            }
        }
    }
}

impl Environment {
    /// Starts configuring a new environment.
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// Starts a transaction with the given flags, optionally nested under a
    /// parent read-write transaction.
    ///
    /// A [`TransactionFlags::TRY`] write begin surfaces writer contention as
    /// [`Error::Busy`] instead of blocking.
    pub fn begin_txn(
        &self,
        flags: TransactionFlags,
        parent: Option<&Transaction>,
    ) -> Result<Transaction> {
        Transaction::begin(self, flags, parent)
    }

    /// Starts a read-only transaction.
    pub fn begin_ro_txn(&self) -> Result<Transaction> {
        self.begin_txn(TransactionFlags::READ_ONLY, None)
    }

    /// Starts a read-write transaction.
    pub fn begin_rw_txn(&self) -> Result<Transaction> {
        self.begin_txn(TransactionFlags::empty(), None)
    }

    /// Closes the environment.
    ///
    /// Idempotent: closing an already-closed environment is a no-op. Every
    /// live transaction (and, transitively, cursor) found through the
    /// dependent registry is force-closed first, best-effort.
    ///
    /// If the engine refuses to close because handles are still outstanding,
    /// the native handle is deliberately left intact and [`Error::Busy`] is
    /// returned: busy means "retry later, the handle is still valid". Any
    /// other failure releases the handle and is reported.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.handle.lock();
        let Some(env) = *guard else { return Ok(()) };

        let live = self.inner.txns.live_count();
        if live > 0 {
            tracing::debug!(target: "burrow", transactions = live, "cascading close");
        }
        self.inner.txns.cascade();
        self.inner.dbis.lock().clear();

        match unsafe { ffi::mdbx_env_close_ex(env.0.as_ptr(), false) } {
            ffi::MDBX_BUSY => Err(Error::Busy),
            code => {
                *guard = None;
                mdbx_result(code).map(drop)
            }
        }
    }

    /// Selects the named map used by [`Environment::get`],
    /// [`Environment::insert`] and [`Environment::iter`]. `None` selects the
    /// unnamed main map, which is also the initial default.
    pub fn set_default_map(&self, name: Option<&str>) {
        *self.inner.default_map.lock() = name.map(Into::into);
    }

    /// Looks up a key in the default map through an ephemeral read-only
    /// transaction, which is always aborted before returning.
    ///
    /// By design this accessor is exception-free: a missing key, a missing
    /// default map and a closed environment all come back as `None`. Use the
    /// transaction API when failures need to be told apart.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let read = || -> Result<Option<Vec<u8>>> {
            let txn = self.begin_ro_txn()?;
            let db = txn.open_map(self.default_map_name().as_deref())?;
            let value = db.get(&txn, key)?;
            txn.abort()?;
            Ok(value)
        };
        read().ok().flatten()
    }

    /// Stores a key/value pair in the default map through an ephemeral
    /// read-write transaction, which is committed before returning.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.begin_rw_txn()?;
        let db =
            txn.create_map(self.default_map_name().as_deref(), DatabaseFlags::empty())?;
        db.put(&txn, key, value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    /// Iterates the default map in key order through an ephemeral read-only
    /// transaction, which stays alive for as long as the iterator does.
    pub fn iter(&self) -> Result<Iter> {
        let txn = self.begin_ro_txn()?;
        let db = txn.open_map(self.default_map_name().as_deref())?;
        let cursor = txn.cursor(&db)?;
        Ok(cursor.iter())
    }

    /// Names of all named maps in the environment.
    pub fn database_names(&self) -> Result<Vec<String>> {
        let txn = self.begin_ro_txn()?;
        let db = txn.open_map(None)?;
        let cursor = txn.cursor(&db)?;
        let mut names = Vec::new();
        for entry in cursor.iter() {
            let (key, _) = entry?;
            names.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(names)
    }

    /// Flushes buffered data to disk.
    ///
    /// Returns `true` if a sync was actually performed.
    pub fn sync(&self, force: bool, nonblock: bool) -> Result<bool> {
        let rc =
            self.inner.env_execute(|env| unsafe { ffi::mdbx_env_sync_ex(env, force, nonblock) })?;
        mdbx_result(rc)
    }

    /// Statistics for the whole environment, as of the given transaction's
    /// snapshot.
    pub fn stat(&self, txn: &Transaction) -> Result<Stat> {
        let mut stat = Stat::new();
        let rc = self.inner.env_execute(|env| {
            txn.txn_execute(|txn_ptr| unsafe {
                ffi::mdbx_env_stat_ex(env, txn_ptr, stat.mdb_stat(), size_of::<ffi::MDBX_stat>())
            })
        })??;
        mdbx_result(rc)?;
        Ok(stat)
    }

    /// Runtime information about the environment, as of the given
    /// transaction's snapshot.
    pub fn info(&self, txn: &Transaction) -> Result<Info> {
        let mut info = Info(unsafe { std::mem::zeroed() });
        let rc = self.inner.env_execute(|env| {
            txn.txn_execute(|txn_ptr| unsafe {
                ffi::mdbx_env_info_ex(env, txn_ptr, &mut info.0, size_of::<ffi::MDBX_envinfo>())
            })
        })??;
        mdbx_result(rc)?;
        Ok(info)
    }

    /// Path the environment was opened at.
    pub fn path(&self) -> Result<PathBuf> {
        let path = self.inner.env_execute(|env| unsafe {
            let mut path: *const libc::c_char = ptr::null();
            mdbx_result(ffi::mdbx_env_get_path(env, &mut path))?;
            Ok(CStr::from_ptr(path).to_string_lossy().into_owned())
        })??;
        Ok(PathBuf::from(path))
    }

    /// Copies the environment to a new location.
    pub fn copy_to_path(&self, dest: &Path, flags: CopyFlags) -> Result<()> {
        let dest = path_to_cstring(dest)?;
        let rc = self
            .inner
            .env_execute(|env| unsafe { ffi::mdbx_env_copy(env, dest.as_ptr(), flags.bits()) })?;
        mdbx_result(rc).map(drop)
    }

    /// Copies the environment into an already-open file descriptor.
    #[cfg(unix)]
    pub fn copy_to_fd(&self, fd: std::os::unix::io::RawFd, flags: CopyFlags) -> Result<()> {
        let rc = self
            .inner
            .env_execute(|env| unsafe { ffi::mdbx_env_copy2fd(env, fd as _, flags.bits()) })?;
        mdbx_result(rc).map(drop)
    }

    /// Adjusts the environment geometry after opening.
    pub fn set_geometry(&self, geometry: Geometry) -> Result<()> {
        self.inner.env_execute(|env| apply_geometry(env, geometry))?
    }

    /// Sets a runtime option.
    pub fn set_option(&self, option: EnvOption, value: u64) -> Result<()> {
        let rc = self
            .inner
            .env_execute(|env| unsafe { ffi::mdbx_env_set_option(env, option.raw(), value) })?;
        mdbx_result(rc).map(drop)
    }

    /// Reads back a runtime option.
    pub fn option(&self, option: EnvOption) -> Result<u64> {
        let mut value = 0u64;
        let rc = self.inner.env_execute(|env| unsafe {
            ffi::mdbx_env_get_option(env, option.raw(), &mut value)
        })?;
        mdbx_result(rc)?;
        Ok(value)
    }

    /// Deletes the files of a non-open environment at `path`.
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn remove(path: &Path, mode: DeleteMode) -> Result<bool> {
        let path = path_to_cstring(path)?;
        let rc = unsafe { ffi::mdbx_env_delete(path.as_ptr(), mode.raw()) };
        mdbx_result(rc).map(|nothing_found| !nothing_found)
    }

    /// Attaches an arbitrary host-side value to the environment.
    ///
    /// This value never crosses the native boundary; for the engine's own
    /// user-context pointer see [`Environment::set_user_ctx_ptr`].
    pub fn set_user_ctx<T: Any + Send + Sync>(&self, ctx: T) {
        *self.inner.ctx.lock() = Some(Arc::new(ctx));
    }

    /// The attached host-side context value, if any.
    pub fn user_ctx(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.ctx.lock().clone()
    }

    /// Stores an opaque pointer in the engine's native user-context slot.
    pub fn set_user_ctx_ptr(&self, ctx: *mut c_void) -> Result<()> {
        let rc =
            self.inner.env_execute(|env| unsafe { ffi::mdbx_env_set_userctx(env, ctx) })?;
        mdbx_result(rc).map(drop)
    }

    /// Reads the engine's native user-context slot.
    pub fn user_ctx_ptr(&self) -> Result<*mut c_void> {
        self.inner.env_execute(|env| unsafe { ffi::mdbx_env_get_userctx(env) })
    }

    /// Installs the engine's handle-slow-readers callback.
    pub fn set_handle_slow_readers(&self, hsr: HandleSlowReadersCallback) -> Result<()> {
        let rc = self.inner.env_execute(|env| unsafe { ffi::mdbx_env_set_hsr(env, hsr) })?;
        mdbx_result(rc).map(drop)
    }

    /// The currently installed handle-slow-readers callback.
    pub fn handle_slow_readers(&self) -> Result<HandleSlowReadersCallback> {
        self.inner.env_execute(|env| unsafe { ffi::mdbx_env_get_hsr(env) })
    }

    pub(crate) fn inner(&self) -> &Arc<EnvironmentInner> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: Arc<EnvironmentInner>) -> Self {
        Self { inner }
    }

    fn default_map_name(&self) -> Option<String> {
        self.inner.default_map.lock().clone()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("open", &self.inner.handle.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// Requested size and growth behavior of the data file.
///
/// `None` fields keep the engine's current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Geometry {
    /// Lower bound of the data file size.
    pub size_lower: Option<usize>,
    /// Size to set right now.
    pub size_now: Option<usize>,
    /// Upper bound of the data file size.
    pub size_upper: Option<usize>,
    /// Granularity for growing the data file.
    pub growth_step: Option<usize>,
    /// Threshold for shrinking the data file.
    pub shrink_threshold: Option<usize>,
    /// Page size of the database.
    pub page_size: Option<PageSize>,
}

/// Database page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageSize {
    /// Let the engine pick the smallest page size it accepts.
    MinimalAcceptable,
    /// A fixed page size in bytes; must be a power of two.
    Set(usize),
}

fn apply_geometry(env: *mut ffi::MDBX_env, geometry: Geometry) -> Result<()> {
    fn dim(value: Option<usize>) -> isize {
        value.map_or(-1, |value| value as isize)
    }
    let page_size = match geometry.page_size {
        None => -1,
        Some(PageSize::MinimalAcceptable) => 0,
        Some(PageSize::Set(size)) => size as isize,
    };
    let rc = unsafe {
        ffi::mdbx_env_set_geometry(
            env,
            dim(geometry.size_lower) as _,
            dim(geometry.size_now) as _,
            dim(geometry.size_upper) as _,
            dim(geometry.growth_step) as _,
            dim(geometry.shrink_threshold) as _,
            page_size as _,
        )
    };
    mdbx_result(rc).map(drop)
}

/// Configuration collected before opening an [`Environment`].
#[derive(Clone, Copy, Debug)]
pub struct EnvironmentBuilder {
    flags: EnvironmentFlags,
    geometry: Option<Geometry>,
    max_readers: Option<u32>,
    max_dbs: Option<u64>,
    sync_bytes: Option<u64>,
    sync_period: Option<u64>,
    permissions: u32,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self {
            flags: EnvironmentFlags::default(),
            geometry: None,
            max_readers: None,
            max_dbs: None,
            sync_bytes: None,
            sync_period: None,
            permissions: 0o755,
        }
    }
}

impl EnvironmentBuilder {
    /// Sets the open flags.
    pub fn set_flags(&mut self, flags: EnvironmentFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Sets the size and growth behavior of the data file.
    pub fn set_geometry(&mut self, geometry: Geometry) -> &mut Self {
        self.geometry = Some(geometry);
        self
    }

    /// Sets the maximum number of concurrent readers.
    pub fn set_max_readers(&mut self, max_readers: u32) -> &mut Self {
        self.max_readers = Some(max_readers);
        self
    }

    /// Sets the maximum number of named maps.
    pub fn set_max_dbs(&mut self, max_dbs: u64) -> &mut Self {
        self.max_dbs = Some(max_dbs);
        self
    }

    /// Sets the written-bytes threshold for background syncs.
    pub fn set_sync_bytes(&mut self, sync_bytes: u64) -> &mut Self {
        self.sync_bytes = Some(sync_bytes);
        self
    }

    /// Sets the periodic background sync interval, in 1/65536 seconds.
    pub fn set_sync_period(&mut self, sync_period: u64) -> &mut Self {
        self.sync_period = Some(sync_period);
        self
    }

    /// Unix permission bits for newly created files.
    pub fn set_permissions(&mut self, permissions: u32) -> &mut Self {
        self.permissions = permissions;
        self
    }

    /// Creates and opens the environment at `path`.
    ///
    /// On any failure the partially-created native handle is released before
    /// returning, so a failed open leaves nothing allocated.
    pub fn open(&self, path: &Path) -> Result<Environment> {
        let path_c = path_to_cstring(path)?;
        let mut env: *mut ffi::MDBX_env = ptr::null_mut();
        unsafe {
            mdbx_result(ffi::mdbx_env_create(&mut env))?;
        }

        let configure = |env: *mut ffi::MDBX_env| -> Result<()> {
            if let Some(geometry) = self.geometry {
                apply_geometry(env, geometry)?;
            }
            if let Some(max_readers) = self.max_readers {
                mdbx_result(unsafe { ffi::mdbx_env_set_maxreaders(env, max_readers as _) })?;
            }
            if let Some(max_dbs) = self.max_dbs {
                mdbx_result(unsafe { ffi::mdbx_env_set_maxdbs(env, max_dbs as _) })?;
            }
            mdbx_result(unsafe {
                ffi::mdbx_env_open(
                    env,
                    path_c.as_ptr(),
                    self.flags.make_flags(),
                    self.permissions as _,
                )
            })?;
            if let Some(sync_bytes) = self.sync_bytes {
                mdbx_result(unsafe {
                    ffi::mdbx_env_set_option(env, EnvOption::SyncBytes.raw(), sync_bytes)
                })?;
            }
            if let Some(sync_period) = self.sync_period {
                mdbx_result(unsafe {
                    ffi::mdbx_env_set_option(env, EnvOption::SyncPeriod.raw(), sync_period)
                })?;
            }
            Ok(())
        };

        if let Err(err) = configure(env) {
            unsafe { ffi::mdbx_env_close_ex(env, false) };
            return Err(err);
        }

        tracing::debug!(target: "burrow", path = %path.display(), "environment opened");
        // SAFETY: a successful mdbx_env_create never leaves a null pointer.
        let env = unsafe { NonNull::new_unchecked(env) };
        Ok(Environment {
            inner: Arc::new(EnvironmentInner {
                handle: Mutex::new(Some(EnvPtr(env))),
                txns: Dependents::new(),
                dbis: Mutex::new(IndexSet::new()),
                default_map: Mutex::new(None),
                ctx: Mutex::new(None),
            }),
        })
    }
}

/// Environment-wide statistics.
#[repr(transparent)]
pub struct Stat(ffi::MDBX_stat);

impl Stat {
    pub(crate) fn new() -> Self {
        Self(unsafe { std::mem::zeroed() })
    }

    pub(crate) fn mdb_stat(&mut self) -> *mut ffi::MDBX_stat {
        &mut self.0
    }

    /// Size of a database page in bytes.
    pub const fn page_size(&self) -> u32 {
        self.0.ms_psize
    }

    /// Depth of the B-tree.
    pub const fn depth(&self) -> u32 {
        self.0.ms_depth
    }

    /// Number of internal (non-leaf) pages.
    pub const fn branch_pages(&self) -> usize {
        self.0.ms_branch_pages as usize
    }

    /// Number of leaf pages.
    pub const fn leaf_pages(&self) -> usize {
        self.0.ms_leaf_pages as usize
    }

    /// Number of overflow pages.
    pub const fn overflow_pages(&self) -> usize {
        self.0.ms_overflow_pages as usize
    }

    /// Number of entries.
    pub const fn entries(&self) -> usize {
        self.0.ms_entries as usize
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stat")
            .field("page_size", &self.page_size())
            .field("depth", &self.depth())
            .field("entries", &self.entries())
            .finish_non_exhaustive()
    }
}

/// Runtime information about an environment.
#[repr(transparent)]
pub struct Info(ffi::MDBX_envinfo);

impl Info {
    /// Current size of the memory map.
    pub const fn map_size(&self) -> usize {
        self.0.mi_geo.current as usize
    }

    /// Number of the last used page.
    pub const fn last_pgno(&self) -> usize {
        self.0.mi_last_pgno as usize
    }

    /// Id of the most recently committed transaction.
    pub const fn last_txnid(&self) -> u64 {
        self.0.mi_recent_txnid
    }

    /// Configured limit of reader slots.
    pub const fn max_readers(&self) -> u32 {
        self.0.mi_maxreaders
    }

    /// Reader slots currently in use.
    pub const fn num_readers(&self) -> u32 {
        self.0.mi_numreaders
    }
}

impl fmt::Debug for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Info")
            .field("map_size", &self.map_size())
            .field("last_txnid", &self.last_txnid())
            .field("num_readers", &self.num_readers())
            .finish_non_exhaustive()
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    path.to_str().and_then(|path| CString::new(path).ok()).ok_or(Error::Invalid)
}
