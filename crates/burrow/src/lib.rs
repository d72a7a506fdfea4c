//! Safe, cascading-ownership access layer for [libmdbx].
//!
//! # Overview
//!
//! [libmdbx] is an embedded, transactional, B-tree key-value engine exposed
//! through a C handle API. Its handles form a strict ownership hierarchy —
//! environment → transaction → cursor — and the engine performs no reference
//! counting of its own: use a handle after its ancestor ended and you get
//! undefined behavior, not an error.
//!
//! This crate turns those raw handles into a safe hierarchy of owned
//! resources:
//!
//! - Parents track their children through weak references and force-close
//!   them before any terminal native call, so ending a [`Transaction`]
//!   (commit or abort) can never leave a live [`Cursor`] pointing at freed
//!   engine state, and closing an [`Environment`] can never leave a live
//!   transaction behind.
//! - Children keep strong backlinks upward, so a cursor that is still
//!   reachable keeps its transaction's native handle alive; teardown order
//!   falls out of drop order with no cycles.
//! - After a cascade, orphaned wrappers stay usable objects: every operation
//!   on them fails with a classified `*Unavailable` error instead of
//!   touching a dangling pointer.
//!
//! On top of the cursor primitive the crate layers composable iteration,
//! including grouped iteration over duplicate-sorted maps (multiple values
//! per key).
//!
//! # Quick start
//!
//! ```no_run
//! use burrow::{DatabaseFlags, Environment, WriteFlags};
//! use std::path::Path;
//!
//! fn main() -> burrow::Result<()> {
//!     let env = Environment::builder()
//!         .set_max_dbs(8)
//!         .open(Path::new("/tmp/burrow-demo"))?;
//!
//!     // Write in a read-write transaction.
//!     let txn = env.begin_rw_txn()?;
//!     let db = txn.create_map(Some("tasks"), DatabaseFlags::empty())?;
//!     db.put(&txn, b"hello", b"world", WriteFlags::empty())?;
//!     txn.commit()?;
//!
//!     // Read back in a read-only transaction.
//!     let txn = env.begin_ro_txn()?;
//!     let db = txn.open_map(Some("tasks"))?;
//!     assert_eq!(db.get(&txn, b"hello")?.as_deref(), Some(&b"world"[..]));
//!
//!     // Iterate with a cursor.
//!     for entry in txn.cursor(&db)?.iter() {
//!         let (key, value) = entry?;
//!         println!("{key:?} => {value:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Key concepts
//!
//! - [`Environment`] — one open storage instance (a data file or directory),
//!   created via [`Environment::builder()`]. Also carries a small
//!   dictionary-style facade ([`Environment::get`], [`Environment::insert`],
//!   [`Environment::iter`]) over a configurable default map.
//! - [`Transaction`] — a read-only or read-write unit of work, optionally
//!   nested. Terminal operations leave the object permanently inert.
//! - [`Database`] — a reference to a named map. Data operations take the
//!   transaction explicitly; the reference itself is never closed
//!   individually (the engine aliases handle integers).
//! - [`Cursor`] — a movable position inside a named map, with duplication
//!   ([`Cursor::dup`]) for independent nested iteration.
//! - [`Iter`], [`IterDupRows`], [`IterDup`] — fused, non-restartable
//!   sequences built from an explicit first-op/subsequent-op pair.
//!
//! # Concurrency
//!
//! Calls are synchronous pass-throughs into the engine; nothing is cached,
//! reordered or retried. The wrappers are `Send + Sync` with mutex-guarded
//! handle slots, but a given transaction or cursor instance must be used
//! serially, and a write transaction must run start-to-finish on one thread
//! (an engine constraint). Distinct transactions on distinct threads are
//! safe; writers are serialized by the engine's single-writer lock, with
//! [`TransactionFlags::TRY`] to fail fast instead of blocking.
//!
//! [libmdbx]: https://libmdbx.dqdkfa.ru

#![warn(missing_debug_implementations, missing_docs, unreachable_pub, rustdoc::all)]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![deny(unused_must_use, rust_2018_idioms)]

/// Raw bindings to the engine, re-exported for advanced interop.
pub extern crate ffi;

mod cursor;
pub use cursor::{Cursor, CursorOp};

mod database;
pub use database::Database;

mod deps;

mod environment;
pub use environment::{
    Environment, EnvironmentBuilder, Geometry, HandleSlowReadersCallback, Info, PageSize, Stat,
};

mod error;
pub use error::{Error, Result};

mod flags;
pub use flags::{
    CopyFlags, DatabaseFlags, DeleteMode, EnvOption, EnvironmentFlags, Mode, SyncMode,
    TransactionFlags, WriteFlags,
};

mod iter;
pub use iter::{Iter, IterDup, IterDupRows};

mod transaction;
pub use transaction::{CommitLatency, Transaction, TransactionInfo};

#[cfg(test)]
mod tests {
    use super::*;

    const fn assert_send_sync<T: Send + Sync>() {}

    #[allow(dead_code)]
    const fn wrappers_are_send_sync() {
        assert_send_sync::<Environment>();
        assert_send_sync::<Transaction>();
        assert_send_sync::<Database>();
        assert_send_sync::<Cursor>();
    }
}
