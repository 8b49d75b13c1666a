//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering usage consistent across the read path, the
//! locked writer path, and the rebalancer, and make the intent clear at each
//! access point.

use std::sync::atomic::Ordering;

/// Ordering for reading node links and values during optimistic traversal.
/// Pairs with the writer's Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for writing node links, values, and heights under a node lock.
/// Pairs with the reader's Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for loads made while the relevant lock is already held.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for loading a version word.
/// Must observe shrink and unlink transitions published by writers.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Ordering for publishing a version transition (begin shrink, commit, unlink).
pub const PUBLISH_ORD: Ordering = Ordering::Release;

/// Ordering for the full fence issued after a bounded wait gives up spinning.
pub const FENCE_ORD: Ordering = Ordering::SeqCst;
