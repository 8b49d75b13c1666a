//! Global debug counters.
//!
//! Relaxed, process-wide counters bumped on the slow paths of the tree. They
//! exist for stress-test diagnostics; nothing in the tree reads them.

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Optimistic reads that had to step back or restart.
pub static READ_RETRY_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Writer attempts that failed revalidation and stepped back or restarted.
pub static UPDATE_RETRY_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Rotations performed (single and double).
pub static ROTATION_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Nodes spliced out of the tree.
pub static UNLINK_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Of [`UNLINK_COUNT`], those performed by the rebalancer rather than by the
/// removing writer.
pub static DEFERRED_UNLINK_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Retired nodes the collector has actually freed.
pub static FREED_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of all debug counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugCounters {
    /// See [`READ_RETRY_COUNT`].
    pub read_retries: usize,
    /// See [`UPDATE_RETRY_COUNT`].
    pub update_retries: usize,
    /// See [`ROTATION_COUNT`].
    pub rotations: usize,
    /// See [`UNLINK_COUNT`].
    pub unlinks: usize,
    /// See [`DEFERRED_UNLINK_COUNT`].
    pub deferred_unlinks: usize,
    /// See [`FREED_COUNT`].
    pub freed: usize,
}

/// Read every counter.
#[must_use]
pub fn get_debug_counters() -> DebugCounters {
    DebugCounters {
        read_retries: READ_RETRY_COUNT.load(AtomicOrdering::Relaxed),
        update_retries: UPDATE_RETRY_COUNT.load(AtomicOrdering::Relaxed),
        rotations: ROTATION_COUNT.load(AtomicOrdering::Relaxed),
        unlinks: UNLINK_COUNT.load(AtomicOrdering::Relaxed),
        deferred_unlinks: DEFERRED_UNLINK_COUNT.load(AtomicOrdering::Relaxed),
        freed: FREED_COUNT.load(AtomicOrdering::Relaxed),
    }
}

/// Zero every counter.
pub fn reset_debug_counters() {
    READ_RETRY_COUNT.store(0, AtomicOrdering::Relaxed);
    UPDATE_RETRY_COUNT.store(0, AtomicOrdering::Relaxed);
    ROTATION_COUNT.store(0, AtomicOrdering::Relaxed);
    UNLINK_COUNT.store(0, AtomicOrdering::Relaxed);
    DEFERRED_UNLINK_COUNT.store(0, AtomicOrdering::Relaxed);
    FREED_COUNT.store(0, AtomicOrdering::Relaxed);
}

#[inline]
pub(crate) fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, AtomicOrdering::Relaxed);
}
