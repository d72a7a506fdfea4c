//! Typed views over the engine's flag and option words.

use bitflags::bitflags;
use libc::c_uint;

/// Durability level for committed transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Default robust and durable sync mode. No data loss on system crash.
    #[default]
    Durable,
    /// Don't sync the meta-page after commit.
    NoMetaSync,
    /// Don't sync anything but keep previous steady commits.
    SafeNoSync,
    /// Don't sync anything and wipe previous steady commits.
    UtterlyNoSync,
}

/// Access mode requested when opening an environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Read-only; no write transactions can be started.
    ReadOnly,
    /// Read-write with the given durability level.
    ReadWrite {
        /// Durability of committed transactions.
        sync_mode: SyncMode,
    },
}

impl Default for Mode {
    fn default() -> Self {
        Self::ReadWrite { sync_mode: SyncMode::default() }
    }
}

impl Mode {
    /// Whether this mode forbids write transactions.
    pub const fn is_read_only(&self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

/// Flags applied when opening an environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentFlags {
    /// Store the data and lock files directly at the given path instead of
    /// inside a directory.
    pub no_sub_dir: bool,
    /// Claim exclusive ownership of the environment.
    pub exclusive: bool,
    /// Open the environment with the flags it was created with.
    pub accede: bool,
    /// Read-only or read-write access with a durability level.
    pub mode: Mode,
    /// Disable readahead for the memory map.
    pub no_rdahead: bool,
    /// Skip zeroing freshly allocated pages.
    pub no_meminit: bool,
    /// Coalesce freed pages during garbage collection.
    pub coalesce: bool,
    /// Reclaim garbage-collected pages in LIFO order.
    pub liforeclaim: bool,
}

impl EnvironmentFlags {
    pub(crate) fn make_flags(&self) -> ffi::MDBX_env_flags_t {
        let mut flags = 0;

        if self.no_sub_dir {
            flags |= ffi::MDBX_NOSUBDIR;
        }
        if self.exclusive {
            flags |= ffi::MDBX_EXCLUSIVE;
        }
        if self.accede {
            flags |= ffi::MDBX_ACCEDE;
        }
        match self.mode {
            Mode::ReadOnly => flags |= ffi::MDBX_RDONLY,
            Mode::ReadWrite { sync_mode } => match sync_mode {
                SyncMode::Durable => flags |= ffi::MDBX_SYNC_DURABLE,
                SyncMode::NoMetaSync => flags |= ffi::MDBX_NOMETASYNC,
                SyncMode::SafeNoSync => flags |= ffi::MDBX_SAFE_NOSYNC,
                SyncMode::UtterlyNoSync => flags |= ffi::MDBX_UTTERLY_NOSYNC,
            },
        }
        if self.no_rdahead {
            flags |= ffi::MDBX_NORDAHEAD;
        }
        if self.no_meminit {
            flags |= ffi::MDBX_NOMEMINIT;
        }
        if self.coalesce {
            flags |= ffi::MDBX_COALESCE;
        }
        if self.liforeclaim {
            flags |= ffi::MDBX_LIFORECLAIM;
        }

        flags
    }
}

bitflags! {
    /// Flags for starting a transaction.
    ///
    /// `TransactionFlags::empty()` starts an ordinary blocking read-write
    /// transaction.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct TransactionFlags: c_uint {
        /// Start a read-only transaction observing a consistent snapshot.
        const READ_ONLY = ffi::MDBX_TXN_RDONLY;
        /// Fail with a busy classification instead of blocking on the
        /// single-writer lock.
        const TRY = ffi::MDBX_TXN_TRY;
        /// Exactly the effect of [`SyncMode::NoMetaSync`] for this one commit.
        const NO_META_SYNC = ffi::MDBX_TXN_NOMETASYNC;
        /// Exactly the effect of [`SyncMode::SafeNoSync`] for this one commit.
        const NO_SYNC = ffi::MDBX_TXN_NOSYNC;
    }
}

impl TransactionFlags {
    /// Whether these flags describe a read-only transaction.
    pub const fn is_read_only(&self) -> bool {
        self.contains(Self::READ_ONLY)
    }

    /// Whether these flags describe a read-write transaction.
    pub const fn is_read_write(&self) -> bool {
        !self.is_read_only()
    }
}

bitflags! {
    /// Flags for opening or creating a named map.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DatabaseFlags: c_uint {
        /// Keys are compared in reverse byte order.
        const REVERSE_KEY = ffi::MDBX_REVERSEKEY;
        /// The map stores multiple sorted values per key.
        const DUP_SORT = ffi::MDBX_DUPSORT;
        /// Keys are binary integers in native byte order.
        const INTEGER_KEY = ffi::MDBX_INTEGERKEY;
        /// With [`DatabaseFlags::DUP_SORT`], all values have the same size.
        const DUP_FIXED = ffi::MDBX_DUPFIXED;
        /// With [`DatabaseFlags::DUP_FIXED`], values are binary integers.
        const INTEGER_DUP = ffi::MDBX_INTEGERDUP;
        /// With [`DatabaseFlags::DUP_SORT`], values are compared in reverse
        /// byte order.
        const REVERSE_DUP = ffi::MDBX_REVERSEDUP;
        /// Create the map if it does not exist.
        const CREATE = ffi::MDBX_CREATE;
        /// Open the map with the flags it was created with.
        const ACCEDE = ffi::MDBX_DB_ACCEDE;
    }
}

bitflags! {
    /// Flags for put-style operations.
    ///
    /// `WriteFlags::empty()` performs an ordinary upsert.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct WriteFlags: c_uint {
        /// Fail with a key-exists classification instead of overwriting.
        const NO_OVERWRITE = ffi::MDBX_NOOVERWRITE;
        /// On a duplicate-sorted map, don't add the value if it is already
        /// present for the key.
        const NO_DUP_DATA = ffi::MDBX_NODUPDATA;
        /// Replace the value at the current cursor position.
        const CURRENT = ffi::MDBX_CURRENT;
        /// With [`WriteFlags::CURRENT`], replace all values of the current
        /// key.
        const ALL_DUPS = ffi::MDBX_ALLDUPS;
        /// Reserve space for the value and return a buffer to fill in.
        const RESERVE = ffi::MDBX_RESERVE;
        /// Append the pair at the end of the map without comparisons.
        const APPEND = ffi::MDBX_APPEND;
        /// As [`WriteFlags::APPEND`], for the values of one key.
        const APPEND_DUP = ffi::MDBX_APPENDDUP;
        /// Store multiple contiguous fixed-size values in one call.
        const MULTIPLE = ffi::MDBX_MULTIPLE;
    }
}

bitflags! {
    /// Flags for backup copies of an environment.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CopyFlags: c_uint {
        /// Omit free space and renumber pages while copying.
        const COMPACT = ffi::MDBX_CP_COMPACT;
        /// Force the destination to use a dynamic geometry.
        const FORCE_DYNAMIC_SIZE = ffi::MDBX_CP_FORCE_DYNAMIC_SIZE;
    }
}

/// How aggressively [`Environment::remove`] waits for other users.
///
/// [`Environment::remove`]: crate::Environment::remove
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Delete the files without checking for other processes.
    #[default]
    JustDelete,
    /// Fail if the environment is in use by another process.
    EnsureUnused,
    /// Wait until no other process uses the environment, then delete.
    WaitForUnused,
}

impl DeleteMode {
    pub(crate) const fn raw(self) -> ffi::MDBX_env_delete_mode_t {
        match self {
            Self::JustDelete => ffi::MDBX_ENV_JUST_DELETE,
            Self::EnsureUnused => ffi::MDBX_ENV_ENSURE_UNUSED,
            Self::WaitForUnused => ffi::MDBX_ENV_WAIT_FOR_UNUSED,
        }
    }
}

/// Runtime-tunable environment options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvOption {
    /// Maximum number of named maps.
    MaxDbs,
    /// Maximum number of reader slots.
    MaxReaders,
    /// Threshold of written bytes that triggers a background sync.
    SyncBytes,
    /// Period in 1/65536 seconds that triggers a background sync.
    SyncPeriod,
    /// Limit of pages examined when reclaiming garbage.
    RpAugmentLimit,
    /// Limit of loose pages kept for reuse.
    LooseLimit,
    /// Number of dirty pages kept preallocated.
    DpReserveLimit,
    /// Per-transaction dirty page limit.
    TxnDpLimit,
    /// Initial allocation for a transaction's dirty page list.
    TxnDpInitial,
    /// Upper bound of the dirty page spill fraction.
    SpillMaxDenominator,
    /// Lower bound of the dirty page spill fraction.
    SpillMinDenominator,
    /// Spill fraction applied to a nested transaction's parent.
    SpillParentForChildDenominator,
    /// Page merge threshold in 16dot16 fixed point.
    MergeThreshold,
}

impl EnvOption {
    pub(crate) const fn raw(self) -> ffi::MDBX_option_t {
        match self {
            Self::MaxDbs => ffi::MDBX_opt_max_db,
            Self::MaxReaders => ffi::MDBX_opt_max_readers,
            Self::SyncBytes => ffi::MDBX_opt_sync_bytes,
            Self::SyncPeriod => ffi::MDBX_opt_sync_period,
            Self::RpAugmentLimit => ffi::MDBX_opt_rp_augment_limit,
            Self::LooseLimit => ffi::MDBX_opt_loose_limit,
            Self::DpReserveLimit => ffi::MDBX_opt_dp_reserve_limit,
            Self::TxnDpLimit => ffi::MDBX_opt_txn_dp_limit,
            Self::TxnDpInitial => ffi::MDBX_opt_txn_dp_initial,
            Self::SpillMaxDenominator => ffi::MDBX_opt_spill_max_denominator,
            Self::SpillMinDenominator => ffi::MDBX_opt_spill_min_denominator,
            Self::SpillParentForChildDenominator => {
                ffi::MDBX_opt_spill_parent4child_denominator
            }
            Self::MergeThreshold => ffi::MDBX_opt_merge_threshold_16dot16_percent,
        }
    }
}
