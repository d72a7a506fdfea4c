//! Named-map references: integer handles into an environment.

use crate::{
    environment::{Environment, EnvironmentInner, Stat},
    error::{mdbx_result, Error, Result},
    flags::{DatabaseFlags, WriteFlags},
    transaction::Transaction,
};
use libc::c_void;
use std::{
    ffi::CString,
    ptr, slice,
    sync::{Arc, Weak},
};

/// A handle to a named map (sub-collection) inside an environment.
///
/// The integer handle is only meaningful for the environment that produced
/// it. Handles are deliberately never closed one by one: the engine aliases
/// the same integer across independently opened references, so all handles
/// are released together when the environment closes. Dropping or
/// [`close`](Self::close)-ing a `Database` is therefore a no-op.
#[derive(Clone, Debug)]
pub struct Database {
    dbi: ffi::MDBX_dbi,
    env: Weak<EnvironmentInner>,
}

impl Database {
    pub(crate) fn new(txn: &Transaction, name: Option<&str>, flags: DatabaseFlags) -> Result<Self> {
        let name = name.map(CString::new).transpose().map_err(|_| Error::Invalid)?;
        let name_ptr = name.as_ref().map_or(ptr::null(), |name| name.as_ptr());

        let mut dbi: ffi::MDBX_dbi = 0;
        let rc =
            txn.txn_execute(|txn| unsafe { ffi::mdbx_dbi_open(txn, name_ptr, flags.bits(), &mut dbi) })?;
        mdbx_result(rc)?;

        let env = txn.env().ok_or(Error::TransactionUnavailable)?;
        env.inner().register_dbi(dbi);
        Ok(Self { dbi, env: Arc::downgrade(env.inner()) })
    }

    /// The raw integer handle.
    pub const fn dbi(&self) -> ffi::MDBX_dbi {
        self.dbi
    }

    /// The environment this handle belongs to, if it is still open.
    pub fn env(&self) -> Option<Environment> {
        self.env.upgrade().map(Environment::from_inner)
    }

    /// Looks up a key.
    ///
    /// On a duplicate-sorted map this returns the first value of the key;
    /// the other values are reachable through a cursor. A missing key is
    /// `None`, not an error.
    pub fn get(&self, txn: &Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_val = to_val(key);
        let mut data_val = empty_val();
        txn.txn_execute(|txn| unsafe {
            match ffi::mdbx_get(txn, self.dbi, &key_val, &mut data_val) {
                ffi::MDBX_SUCCESS => Ok(Some(owned_val(&data_val))),
                ffi::MDBX_NOTFOUND | ffi::MDBX_ENODATA => Ok(None),
                code => Err(Error::from_err_code(code)),
            }
        })?
    }

    /// Stores a key/value pair.
    ///
    /// The default is an upsert: an existing key is replaced, or gains an
    /// additional value on a duplicate-sorted map.
    pub fn put(&self, txn: &Transaction, key: &[u8], value: &[u8], flags: WriteFlags) -> Result<()> {
        let key_val = to_val(key);
        let mut data_val = to_val(value);
        let rc = txn.txn_execute(|txn| unsafe {
            ffi::mdbx_put(txn, self.dbi, &key_val, &mut data_val, flags.bits())
        })?;
        mdbx_result(rc).map(drop)
    }

    /// Reserves `len` bytes for the value of `key` and returns the engine's
    /// buffer to be filled by the caller before the transaction ends.
    pub fn reserve<'txn>(
        &self,
        txn: &'txn Transaction,
        key: &[u8],
        len: usize,
        flags: WriteFlags,
    ) -> Result<&'txn mut [u8]> {
        let key_val = to_val(key);
        let mut data_val = ffi::MDBX_val { iov_len: len, iov_base: ptr::null_mut() };
        txn.txn_execute(|txn| unsafe {
            mdbx_result(ffi::mdbx_put(
                txn,
                self.dbi,
                &key_val,
                &mut data_val,
                flags.bits() | ffi::MDBX_RESERVE,
            ))?;
            Ok(slice::from_raw_parts_mut(data_val.iov_base as *mut u8, data_val.iov_len))
        })?
    }

    /// Deletes a key, or one specific value of a key on a duplicate-sorted
    /// map.
    ///
    /// Returns `true` if a matching entry was present.
    pub fn del(&self, txn: &Transaction, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        let key_val = to_val(key);
        let data_val = value.map(to_val);
        let rc = txn.txn_execute(|txn| unsafe {
            match &data_val {
                Some(data_val) => ffi::mdbx_del(txn, self.dbi, &key_val, data_val),
                None => ffi::mdbx_del(txn, self.dbi, &key_val, ptr::null()),
            }
        })?;
        match mdbx_result(rc) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Atomically replaces the value of `key` and returns the previous one.
    ///
    /// For an absent key this behaves as an insert and the returned previous
    /// value is empty.
    pub fn replace(
        &self,
        txn: &Transaction,
        key: &[u8],
        new_value: &[u8],
        flags: WriteFlags,
    ) -> Result<Vec<u8>> {
        let key_val = to_val(key);
        let mut new_val = to_val(new_value);
        let mut old_val = empty_val();
        txn.txn_execute(|txn| unsafe {
            mdbx_result(ffi::mdbx_replace(
                txn,
                self.dbi,
                &key_val,
                &mut new_val,
                &mut old_val,
                flags.bits(),
            ))?;
            Ok(owned_val(&old_val))
        })?
    }

    /// Empties the map, or also deletes it from the environment when
    /// `delete` is set.
    pub fn drop_map(&self, txn: &Transaction, delete: bool) -> Result<()> {
        let rc = txn.txn_execute(|txn| unsafe { ffi::mdbx_drop(txn, self.dbi, delete) })?;
        mdbx_result(rc).map(drop)
    }

    /// Statistics for this map, as of the transaction's snapshot.
    pub fn stat(&self, txn: &Transaction) -> Result<Stat> {
        let mut stat = Stat::new();
        let rc = txn.txn_execute(|txn| unsafe {
            ffi::mdbx_dbi_stat(txn, self.dbi, stat.mdb_stat(), std::mem::size_of::<ffi::MDBX_stat>())
        })?;
        mdbx_result(rc)?;
        Ok(stat)
    }

    /// The flags this map was created with.
    pub fn flags(&self, txn: &Transaction) -> Result<DatabaseFlags> {
        let mut flags: libc::c_uint = 0;
        let mut state: libc::c_uint = 0;
        let rc = txn.txn_execute(|txn| unsafe {
            ffi::mdbx_dbi_flags_ex(txn, self.dbi, &mut flags, &mut state)
        })?;
        mdbx_result(rc)?;
        Ok(DatabaseFlags::from_bits_truncate(flags))
    }

    /// Reads, and optionally advances, the map's persistent counter.
    ///
    /// With `increment == 0` this is a pure read and is legal in a read-only
    /// transaction. A non-zero increment returns the previous value; an
    /// increment that would overflow the counter fails with
    /// [`Error::SequenceOverflow`] and leaves the counter untouched.
    pub fn sequence(&self, txn: &Transaction, increment: u64) -> Result<u64> {
        let mut value = 0u64;
        let rc = txn.txn_execute(|txn| unsafe {
            ffi::mdbx_dbi_sequence(txn, self.dbi, &mut value, increment)
        })?;
        match mdbx_result(rc) {
            Ok(false) => Ok(value),
            Ok(true) => Err(Error::SequenceOverflow),
            Err(err) => Err(err),
        }
    }

    /// Deliberate no-op.
    ///
    /// The engine reuses handle integers across concurrent opens, so closing
    /// one reference could invalidate another live alias. All handles of an
    /// environment are released together when the environment closes.
    pub fn close(self) {}
}

pub(crate) fn to_val(bytes: &[u8]) -> ffi::MDBX_val {
    ffi::MDBX_val { iov_len: bytes.len(), iov_base: bytes.as_ptr() as *mut c_void }
}

pub(crate) fn empty_val() -> ffi::MDBX_val {
    ffi::MDBX_val { iov_len: 0, iov_base: ptr::null_mut() }
}

/// Copies a call-scoped engine value into an owned buffer. Must run before
/// the native call that produced it goes out of scope.
pub(crate) unsafe fn owned_val(val: &ffi::MDBX_val) -> Vec<u8> {
    if val.iov_base.is_null() {
        return Vec::new();
    }
    unsafe { slice::from_raw_parts(val.iov_base as *const u8, val.iov_len).to_vec() }
}
