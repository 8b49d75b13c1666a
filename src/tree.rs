//! Filepath: src/tree.rs
//! `AvlTree` - a concurrent ordered map on an optimistic AVL tree.
//!
//! This module provides the main [`AvlTree`] type. The work is split by path:
//!
//! - `optimistic`: lock-free lookups.
//! - `locked`: insert / remove / put / replace under per-node locks.
//! - `unlink`: splicing value-less nodes out of the tree.
//! - `rebalance`: height repair and the four rotation shapes.
//! - `validate`: quiescent size, structural validation, pretty printer.
//!
//! The tree hangs off a permanent holder node whose `right` link is the real
//! root, so a rotation at the root relinks through the holder like any other
//! parent.

use std::alloc::{Layout, handle_alloc_error};
use std::fmt as StdFmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use seize::{Collector, LocalGuard};

use crate::alloc::{NodeAllocator, SeizeAllocator};
use crate::node::Node;

mod locked;
mod optimistic;
mod path;
mod rebalance;
mod stats;
mod unlink;
mod validate;



pub use stats::{
    DEFERRED_UNLINK_COUNT, DebugCounters, FREED_COUNT, READ_RETRY_COUNT, ROTATION_COUNT,
    UNLINK_COUNT, UPDATE_RETRY_COUNT, get_debug_counters, reset_debug_counters,
};
pub use validate::{InvariantViolation, ValidationReport};

// ============================================================================
//  AvlTree
// ============================================================================

/// A concurrent ordered map from `K` to non-zero `usize` values.
///
/// Lookups take no locks. Writers lock only the one to three nodes they
/// relink. All operations are linearizable.
///
/// # Type Parameters
///
/// - `K` - Key type, totally ordered and `Copy`.
/// - `A` - Allocator type (must implement [`NodeAllocator`])
///
/// # Example
///
/// ```rust
/// use optavl::AvlTree;
///
/// let tree: AvlTree<u64> = AvlTree::new();
///
/// assert!(tree.insert(5, 1));
/// assert!(!tree.insert(5, 2));
/// assert_eq!(tree.get(&5), Some(1));
/// assert_eq!(tree.remove(&5), Some(1));
/// assert_eq!(tree.remove(&5), None);
/// ```
pub struct AvlTree<K, A = SeizeAllocator<K>>
where
    A: NodeAllocator<K>,
{
    /// Memory reclamation collector for safe concurrent access.
    collector: Collector,

    /// Node allocator.
    allocator: A,

    /// Permanent root holder. Never unlinked, never retired.
    holder: NonNull<Node<K>>,

    /// Number of keys with a value (maintained under node locks).
    count: AtomicUsize,
}

// SAFETY: the holder and every node below it are shared through atomics and
// per-node locks; node memory is owned by `allocator`/`collector`, both of
// which are Send + Sync.
unsafe impl<K: Send + Sync, A: NodeAllocator<K>> Send for AvlTree<K, A> {}
unsafe impl<K: Send + Sync, A: NodeAllocator<K>> Sync for AvlTree<K, A> {}

impl<K, A> StdFmt::Debug for AvlTree<K, A>
where
    A: NodeAllocator<K>,
{
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("AvlTree")
            .field("holder", &self.holder)
            .field("count", &self.count.load(AtomicOrdering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K> AvlTree<K>
where
    K: Ord + Copy + Default + Send + Sync,
{
    /// Create a new empty tree with the default [`SeizeAllocator`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(SeizeAllocator::new())
    }
}

impl<K> Default for AvlTree<K>
where
    K: Ord + Copy + Default + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    /// Create a new empty tree with the given allocator.
    #[must_use]
    pub fn with_allocator(allocator: A) -> Self {
        let raw: *mut Node<K> = allocator.alloc_node(Node::new_holder());

        // Box::into_raw (and every allocator built on it) never returns null.
        let holder: NonNull<Node<K>> =
            NonNull::new(raw).unwrap_or_else(|| handle_alloc_error(Layout::new::<Node<K>>()));

        Self {
            collector: Collector::new(),
            allocator,
            holder,
            count: AtomicUsize::new(0),
        }
    }

    /// Enter a protected region and return a guard.
    ///
    /// The guard protects any node loaded during its lifetime from being
    /// reclaimed. Use it with the `_with_guard` methods to amortize guard
    /// creation over many operations.
    #[must_use]
    #[inline]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Number of keys with a value.
    ///
    /// O(1). Exact at quiescence; under concurrent writes it is a snapshot
    /// of a relaxed counter.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(AtomicOrdering::Relaxed)
    }

    /// True if no key has a value.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The allocator backing this tree.
    #[must_use]
    pub const fn allocator(&self) -> &A {
        &self.allocator
    }

    // ========================================================================
    //  Internal Helpers
    // ========================================================================

    /// The holder, borrowed for the guard's lifetime.
    #[inline]
    pub(crate) fn holder<'g>(&'g self, _guard: &'g LocalGuard<'_>) -> &'g Node<K> {
        // SAFETY: the holder is allocated in `with_allocator` and freed only
        // in `Drop`, which cannot run while `self` is borrowed.
        unsafe { self.holder.as_ref() }
    }

    #[inline]
    pub(crate) fn count_inserted(&self) {
        self.count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    #[inline]
    pub(crate) fn count_removed(&self) {
        self.count.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

impl<K, A> Drop for AvlTree<K, A>
where
    A: NodeAllocator<K>,
{
    fn drop(&mut self) {
        // No concurrent access is possible here (Drop requires unique access).
        // Reachable nodes go through the allocator; retired ones are freed
        // when the collector drops.
        self.allocator.teardown(self.holder.as_ptr());
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;
    use crate::alloc::ArenaAllocator;
    use std::collections::BTreeMap;

    fn _assert_send_sync()
    where
        AvlTree<u64>: Send + Sync,
        AvlTree<i32, ArenaAllocator<i32>>: Send + Sync,
    {
    }

    fn root_key(tree: &AvlTree<u64>) -> Option<u64> {
        let guard = tree.guard();
        tree.holder(&guard)
            .child(crate::node::Direction::Right, &guard)
            .map(|n| *n.key())
    }

    fn assert_valid<A: NodeAllocator<u64>>(tree: &AvlTree<u64, A>) {
        let report = tree.validate();
        assert!(report.is_valid(), "{report}");
    }

    // ========================================================================
    //  Basic Tests
    // ========================================================================

    #[test]
    fn test_new_tree_is_empty() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.get(&1), None);
    }

    #[test]
    fn test_default_trait() {
        let tree: AvlTree<u64> = AvlTree::default();

        assert!(tree.is_empty());
        assert_valid(&tree);
    }

    #[test]
    fn test_debug_format() {
        let tree: AvlTree<u64> = AvlTree::new();
        tree.insert(1, 1);

        let s = format!("{tree:?}");
        assert!(s.contains("AvlTree"));
        assert!(s.contains("count: 1"));
    }

    #[test]
    fn test_basic_scenario() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert!(tree.insert(5, 1));
        assert!(tree.insert(3, 1));
        assert!(tree.insert(8, 1));
        assert!(!tree.insert(3, 1));

        assert_eq!(tree.get(&3), Some(1));
        assert_eq!(tree.remove(&3), Some(1));
        assert_eq!(tree.get(&3), None);
        assert_eq!(tree.remove(&3), None);

        assert_eq!(tree.size(), 2);
        assert_eq!(tree.len(), 2);
        assert_valid(&tree);
    }

    #[test]
    fn test_insert_zero_is_rejected() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert!(!tree.insert(4, 0));
        assert_eq!(tree.get(&4), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_duplicate_insert_keeps_first_value() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert!(tree.insert(9, 100));
        assert!(!tree.insert(9, 200));
        assert_eq!(tree.get(&9), Some(100));
        assert_eq!(tree.len(), 1);
    }

    // ========================================================================
    //  Rotation Shapes
    // ========================================================================

    #[test]
    fn test_ascending_triggers_left_rotation() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [1, 2, 3] {
            assert!(tree.insert(k, k as usize));
        }

        assert_eq!(root_key(&tree), Some(2));
        assert_valid(&tree);
    }

    #[test]
    fn test_descending_triggers_right_rotation() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [3, 2, 1] {
            assert!(tree.insert(k, k as usize));
        }

        assert_eq!(root_key(&tree), Some(2));
        assert_valid(&tree);
    }

    #[test]
    fn test_zigzag_triggers_right_over_left() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [3, 1, 2] {
            assert!(tree.insert(k, k as usize));
        }

        assert_eq!(root_key(&tree), Some(2));
        assert_valid(&tree);
    }

    #[test]
    fn test_zagzig_triggers_left_over_right() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [1, 3, 2] {
            assert!(tree.insert(k, k as usize));
        }

        assert_eq!(root_key(&tree), Some(2));
        assert_valid(&tree);
    }

    // ========================================================================
    //  Larger Sequences
    // ========================================================================

    #[test]
    fn test_insert_1000_sequential_stays_balanced() {
        let tree: AvlTree<u64> = AvlTree::new();

        for k in 0..1000u64 {
            assert!(tree.insert(k, (k + 1) as usize));
        }

        let report = tree.validate();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.value_nodes, 1000);
        // AVL height bound: 1.44 * log2(1001) < 15
        assert!(report.height <= 15, "height {}", report.height);

        for k in 0..1000u64 {
            assert_eq!(tree.get(&k), Some((k + 1) as usize));
        }
    }

    #[test]
    fn test_remove_everything() {
        let tree: AvlTree<u64> = AvlTree::new();

        for k in 0..500u64 {
            tree.insert(k, 1);
        }
        for k in (0..500u64).rev() {
            assert_eq!(tree.remove(&k), Some(1), "key {k}");
        }

        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
        assert_valid(&tree);
    }

    #[test]
    fn test_differential_against_btreemap() {
        let tree: AvlTree<i32> = AvlTree::new();
        let mut model: BTreeMap<i32, usize> = BTreeMap::new();

        // Deterministic pseudo-random mix.
        let mut x: u32 = 0x9E37_79B9;
        for _ in 0..5000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;

            let key = (x % 200) as i32 - 100;
            let value = (x as usize % 7) + 1;

            match x % 4 {
                0 | 1 => {
                    let inserted = tree.insert(key, value);
                    let expected = !model.contains_key(&key);
                    if expected {
                        model.insert(key, value);
                    }
                    assert_eq!(inserted, expected);
                }
                2 => assert_eq!(tree.remove(&key), model.remove(&key)),
                _ => assert_eq!(tree.put(key, value), model.insert(key, value)),
            }
        }

        for (k, v) in &model {
            assert_eq!(tree.get(k), Some(*v));
        }
        assert_eq!(tree.size(), model.len());
        assert_eq!(tree.len(), model.len());

        let report = tree.validate();
        assert!(report.is_valid(), "{report}");
    }

    #[test]
    fn test_arena_allocator_tree() {
        let tree: AvlTree<u64, ArenaAllocator<u64>> =
            AvlTree::with_allocator(ArenaAllocator::new());

        for k in 0..64 {
            tree.insert(k, 1);
        }
        for k in 0..64 {
            if k % 2 == 0 {
                tree.remove(&k);
            }
        }

        assert_eq!(tree.size(), 32);
        assert_valid(&tree);
        assert!(tree.allocator().retired_count() > 0);
        // Holder + 64 nodes: the arena never frees before drop.
        assert_eq!(tree.allocator().node_count(), 65);
    }

    #[test]
    fn test_seize_allocator_retires_unlinked_nodes() {
        let tree: AvlTree<u64> = AvlTree::new();

        for k in 0..10 {
            tree.insert(k, 1);
        }
        for k in 0..10 {
            tree.remove(&k);
        }

        assert_eq!(tree.allocator().allocated_count(), 11);
        assert_eq!(tree.allocator().retired_count(), 10);
        assert!(tree.get(&0).is_none());
    }

    #[test]
    fn test_guard_amortized_ops() {
        let tree: AvlTree<u64> = AvlTree::new();
        let guard = tree.guard();

        for k in 0..100 {
            assert!(tree.insert_with_guard(k, 7, &guard));
        }
        for k in 0..100 {
            assert_eq!(tree.get_with_guard(&k, &guard), Some(7));
        }
        for k in 0..50 {
            assert_eq!(tree.remove_with_guard(&k, &guard), Some(7));
        }
        drop(guard);

        assert_eq!(tree.len(), 50);
        assert!(tree.contains_key(&75));
        assert!(!tree.contains_key(&25));
    }

    #[test]
    fn test_concurrent_smoke() {
        use std::sync::Arc;
        use std::thread;

        let tree: Arc<AvlTree<u64>> = Arc::new(AvlTree::new());

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        assert!(tree.insert(t * 10_000 + i, 1));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tree.len(), 4000);
        assert_eq!(tree.size(), 4000);
        assert_valid(&tree);
    }
}
