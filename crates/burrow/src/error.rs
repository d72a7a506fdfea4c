//! Classification of engine result codes into a typed error taxonomy.

use libc::c_int;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the access layer.
///
/// Every non-success result code returned by the engine is classified into a
/// named variant; codes without an engine-specific meaning are inherited from
/// the operating system and carried as [`Error::Other`]. The `*Unavailable`
/// variants are raised by this layer itself when an operation targets a
/// handle that has already been released, before any native call is made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Key/data pair already exists.
    #[error("key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found.
    #[error("no matching key/data pair found")]
    NotFound,
    /// The cursor is already at the end of data.
    #[error("the cursor is already at the end of data")]
    NoData,
    /// Requested page not found.
    #[error("requested page not found")]
    PageNotFound,
    /// Database is corrupted.
    #[error("database is corrupted")]
    Corrupted,
    /// Environment had a fatal error.
    #[error("environment had a fatal error")]
    Panic,
    /// Database version mismatch.
    #[error("database version mismatch")]
    VersionMismatch,
    /// File is not an MDBX file, or a handle/argument is invalid.
    #[error("file is not an MDBX file, or a handle or argument is invalid")]
    Invalid,
    /// Environment map size limit reached.
    #[error("environment map size limit reached")]
    MapFull,
    /// Too many named-map handles open.
    #[error("too many named-map handles open")]
    DbsFull,
    /// Reader slot table is full.
    #[error("reader slot table is full")]
    ReadersFull,
    /// Transaction has too many dirty pages.
    #[error("transaction has too many dirty pages")]
    TxnFull,
    /// Cursor stack limit reached.
    #[error("cursor stack limit reached")]
    CursorFull,
    /// Internal page has no more space.
    #[error("internal page has no more space")]
    PageFull,
    /// The engine was unable to extend the memory mapping.
    #[error("unable to extend the memory mapping")]
    UnableExtendMapSize,
    /// Requested operation or flags are incompatible with the named map.
    #[error("operation or flags incompatible with the named map")]
    Incompatible,
    /// Invalid reuse of a reader locktable slot.
    #[error("invalid reuse of a reader locktable slot")]
    BadReaderSlot,
    /// Transaction is not valid for the requested operation.
    #[error("transaction is not valid for the requested operation")]
    BadTransaction,
    /// Invalid size or alignment of key or data for the target map.
    #[error("invalid size or alignment of key or data for the target map")]
    BadValSize,
    /// The specified named-map handle is wrong.
    #[error("the specified named-map handle is wrong")]
    BadDbi,
    /// Unexpected internal engine error.
    #[error("unexpected internal engine error")]
    Problem,
    /// Another write transaction is running, or the environment is busy.
    #[error("another write transaction is running or the environment is busy")]
    Busy,
    /// The key has more than one associated value.
    #[error("the key has more than one associated value")]
    MultipleValues,
    /// Wrong signature of a runtime object.
    #[error("wrong signature of a runtime object")]
    BadSignature,
    /// The database needs recovery but is opened read-only.
    #[error("database needs recovery but is opened read-only")]
    WannaRecovery,
    /// The given key does not match the current cursor position.
    #[error("key does not match the current cursor position")]
    KeyMismatch,
    /// Database is too large for the current system.
    #[error("database is too large for the current system")]
    TooLarge,
    /// A thread attempted to use an object it does not own.
    #[error("a thread attempted to use an object it does not own")]
    ThreadMismatch,
    /// Overlapping read and write transactions on the current thread.
    #[error("overlapping read and write transactions on the current thread")]
    TxnOverlapping,
    /// The environment handle has already been closed.
    #[error("the environment handle has already been closed")]
    EnvironmentUnavailable,
    /// The transaction has already been committed or aborted.
    #[error("the transaction has already been committed or aborted")]
    TransactionUnavailable,
    /// The cursor has already been closed.
    #[error("the cursor has already been closed")]
    CursorUnavailable,
    /// A sequence increment would overflow the counter.
    #[error("sequence increment would overflow the counter")]
    SequenceOverflow,
    /// An OS-inherited result code without an engine-specific meaning.
    #[error("{}", std::io::Error::from_raw_os_error(*.0))]
    Other(i32),
}

impl Error {
    /// Classifies a raw engine result code.
    pub fn from_err_code(err_code: c_int) -> Self {
        match err_code {
            ffi::MDBX_KEYEXIST => Self::KeyExist,
            ffi::MDBX_NOTFOUND => Self::NotFound,
            ffi::MDBX_ENODATA => Self::NoData,
            ffi::MDBX_PAGE_NOTFOUND => Self::PageNotFound,
            ffi::MDBX_CORRUPTED => Self::Corrupted,
            ffi::MDBX_PANIC => Self::Panic,
            ffi::MDBX_VERSION_MISMATCH => Self::VersionMismatch,
            ffi::MDBX_INVALID => Self::Invalid,
            ffi::MDBX_MAP_FULL => Self::MapFull,
            ffi::MDBX_DBS_FULL => Self::DbsFull,
            ffi::MDBX_READERS_FULL => Self::ReadersFull,
            ffi::MDBX_TXN_FULL => Self::TxnFull,
            ffi::MDBX_CURSOR_FULL => Self::CursorFull,
            ffi::MDBX_PAGE_FULL => Self::PageFull,
            ffi::MDBX_UNABLE_EXTEND_MAPSIZE => Self::UnableExtendMapSize,
            ffi::MDBX_INCOMPATIBLE => Self::Incompatible,
            ffi::MDBX_BAD_RSLOT => Self::BadReaderSlot,
            ffi::MDBX_BAD_TXN => Self::BadTransaction,
            ffi::MDBX_BAD_VALSIZE => Self::BadValSize,
            ffi::MDBX_BAD_DBI => Self::BadDbi,
            ffi::MDBX_PROBLEM => Self::Problem,
            ffi::MDBX_BUSY => Self::Busy,
            ffi::MDBX_EMULTIVAL => Self::MultipleValues,
            ffi::MDBX_EBADSIGN => Self::BadSignature,
            ffi::MDBX_WANNA_RECOVERY => Self::WannaRecovery,
            ffi::MDBX_EKEYMISMATCH => Self::KeyMismatch,
            ffi::MDBX_TOO_LARGE => Self::TooLarge,
            ffi::MDBX_THREAD_MISMATCH => Self::ThreadMismatch,
            ffi::MDBX_TXN_OVERLAPPING => Self::TxnOverlapping,
            other => Self::Other(other),
        }
    }

    /// Returns the numeric result code this error was classified from.
    ///
    /// Layer-local variants map onto the engine's generic invalid-handle and
    /// overflow codes so the value is always meaningful to the engine.
    pub fn to_err_code(&self) -> c_int {
        match self {
            Self::KeyExist => ffi::MDBX_KEYEXIST,
            Self::NotFound => ffi::MDBX_NOTFOUND,
            Self::NoData => ffi::MDBX_ENODATA,
            Self::PageNotFound => ffi::MDBX_PAGE_NOTFOUND,
            Self::Corrupted => ffi::MDBX_CORRUPTED,
            Self::Panic => ffi::MDBX_PANIC,
            Self::VersionMismatch => ffi::MDBX_VERSION_MISMATCH,
            Self::Invalid | Self::EnvironmentUnavailable => ffi::MDBX_INVALID,
            Self::MapFull => ffi::MDBX_MAP_FULL,
            Self::DbsFull => ffi::MDBX_DBS_FULL,
            Self::ReadersFull => ffi::MDBX_READERS_FULL,
            Self::TxnFull => ffi::MDBX_TXN_FULL,
            Self::CursorFull | Self::CursorUnavailable => ffi::MDBX_CURSOR_FULL,
            Self::PageFull => ffi::MDBX_PAGE_FULL,
            Self::UnableExtendMapSize => ffi::MDBX_UNABLE_EXTEND_MAPSIZE,
            Self::Incompatible => ffi::MDBX_INCOMPATIBLE,
            Self::BadReaderSlot => ffi::MDBX_BAD_RSLOT,
            Self::BadTransaction | Self::TransactionUnavailable => ffi::MDBX_BAD_TXN,
            Self::BadValSize => ffi::MDBX_BAD_VALSIZE,
            Self::BadDbi => ffi::MDBX_BAD_DBI,
            Self::Problem => ffi::MDBX_PROBLEM,
            Self::Busy => ffi::MDBX_BUSY,
            Self::MultipleValues => ffi::MDBX_EMULTIVAL,
            Self::BadSignature => ffi::MDBX_EBADSIGN,
            Self::WannaRecovery => ffi::MDBX_WANNA_RECOVERY,
            Self::KeyMismatch => ffi::MDBX_EKEYMISMATCH,
            Self::TooLarge => ffi::MDBX_TOO_LARGE,
            Self::ThreadMismatch => ffi::MDBX_THREAD_MISMATCH,
            Self::TxnOverlapping => ffi::MDBX_TXN_OVERLAPPING,
            Self::SequenceOverflow => ffi::MDBX_RESULT_TRUE,
            Self::Other(code) => *code,
        }
    }

    /// True for the two codes the engine uses for "no matching entry".
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoData)
    }
}

/// Converts a raw result code into `Ok(false)` for success, `Ok(true)` for
/// the engine's latched RESULT_TRUE, and a classified error otherwise.
#[inline]
pub(crate) fn mdbx_result(err_code: c_int) -> Result<bool> {
    match err_code {
        ffi::MDBX_SUCCESS => Ok(false),
        ffi::MDBX_RESULT_TRUE => Ok(true),
        other => Err(Error::from_err_code(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_roundtrip() {
        for code in [
            ffi::MDBX_KEYEXIST,
            ffi::MDBX_NOTFOUND,
            ffi::MDBX_ENODATA,
            ffi::MDBX_CORRUPTED,
            ffi::MDBX_BUSY,
            ffi::MDBX_INCOMPATIBLE,
            ffi::MDBX_TXN_OVERLAPPING,
        ] {
            assert_eq!(Error::from_err_code(code).to_err_code(), code);
        }
    }

    #[test]
    fn os_codes_fall_through() {
        let err = Error::from_err_code(libc::ENOENT);
        assert_eq!(err, Error::Other(libc::ENOENT));
        assert_eq!(err.to_err_code(), libc::ENOENT);
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn result_classification() {
        assert_eq!(mdbx_result(ffi::MDBX_SUCCESS), Ok(false));
        assert_eq!(mdbx_result(ffi::MDBX_RESULT_TRUE), Ok(true));
        assert_eq!(mdbx_result(ffi::MDBX_NOTFOUND), Err(Error::NotFound));
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::Busy.is_not_found());
    }
}
