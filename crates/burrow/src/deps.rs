//! Weak-reference bookkeeping for parent resources that must be able to
//! force-close their children.
//!
//! Ancestors (environment, transaction) hold only weak references downward,
//! while children keep strong backlinks upward, so the reference graph has no
//! cycles and native teardown order falls out of drop order. An explicit
//! terminal operation on a parent sweeps this registry first.

use parking_lot::Mutex;
use std::{
    fmt,
    sync::{Arc, Weak},
};

/// A resource that can be force-closed when its parent ends.
pub(crate) trait CascadeClose {
    /// Releases the native handle. Must be best-effort: failures are logged
    /// by the implementation and never propagate into the sweep.
    fn cascade_close(&self);
}

/// Registry of weakly-referenced child resources.
pub(crate) struct Dependents<T> {
    entries: Mutex<Vec<Weak<T>>>,
}

impl<T: CascadeClose> Dependents<T> {
    pub(crate) fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// Tracks a new child. Entries whose child is already gone are pruned on
    /// the way, keeping the registry proportional to the live set.
    pub(crate) fn register(&self, child: &Arc<T>) {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.push(Arc::downgrade(child));
    }

    /// Stops tracking a child, e.g. when it is rebound to another parent.
    pub(crate) fn unregister(&self, child: &Arc<T>) {
        let target = Arc::as_ptr(child);
        self.entries.lock().retain(|entry| entry.as_ptr() != target && entry.strong_count() > 0);
    }

    /// Number of children still alive.
    pub(crate) fn live_count(&self) -> usize {
        self.entries.lock().iter().filter(|entry| entry.strong_count() > 0).count()
    }

    /// Force-closes every still-live child and clears the registry.
    ///
    /// The list is taken out of the lock first so a child that unregisters
    /// itself while closing cannot observe the sweep in progress.
    pub(crate) fn cascade(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for child in entries.iter().filter_map(Weak::upgrade) {
            child.cascade_close();
        }
    }
}

impl<T> fmt::Debug for Dependents<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependents").field("entries", &self.entries.lock().len()).finish()
    }
}
