//! Node allocation and reclamation for [`AvlTree`](crate::AvlTree).
//!
//! This module provides the [`NodeAllocator`] trait that abstracts how nodes
//! are allocated, how unlinked nodes are retired, and how the tree is torn
//! down. Two implementations:
//!
//! - [`SeizeAllocator`] (default): unlinked nodes are handed to the tree's
//!   `seize::Collector` and freed once no guard can still observe them.
//! - [`ArenaAllocator`]: every node lives until the tree is dropped. Useful
//!   for debugging and under Miri, where deferred frees are noise.

mod reclaim;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use seize::{Guard, LocalGuard};

use crate::node::Node;

pub(crate) use reclaim::reclaim_subtree_impl;

/// Trait for allocating, retiring and tearing down tree nodes.
///
/// Implementations must guarantee:
///
/// 1. **Pointer stability**: Returned pointers remain valid until the node is
///    retired and every guard that could observe it has been dropped, or until
///    [`teardown`](Self::teardown).
///
/// 2. **Provenance**: Returned pointers have valid provenance for the
///    allocated memory (Stacked Borrows compliant).
///
/// 3. **Thread safety**: `alloc_node` and `retire_node` take `&self` and are
///    called concurrently by writers.
pub trait NodeAllocator<K>: Send + Sync {
    /// Allocate a node and return a stable raw pointer.
    fn alloc_node(&self, node: Box<Node<K>>) -> *mut Node<K>;

    /// Retire a node that has been unlinked from the tree.
    ///
    /// # Safety
    ///
    /// - `ptr` must have been allocated by this allocator.
    /// - `ptr` must be unreachable from the tree by any new traversal.
    /// - `ptr` must not be retired twice.
    unsafe fn retire_node(&self, ptr: *mut Node<K>, guard: &LocalGuard<'_>);

    /// Free all nodes still owned by the tree. Called once, from the tree's
    /// `Drop`, with exclusive access.
    fn teardown(&mut self, holder: *mut Node<K>);
}

// ============================================================================
//  SeizeAllocator
// ============================================================================

/// Default allocator: `Box` allocation with seize-deferred frees.
///
/// At teardown, every node reachable from the holder is freed directly.
/// Retired nodes are owned by the collector and freed when it drops.
#[derive(Debug)]
pub struct SeizeAllocator<K> {
    allocated: AtomicUsize,
    retired: AtomicUsize,
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K> SeizeAllocator<K> {
    /// Create a new allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    /// Nodes allocated so far, including the holder.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated.load(AtomicOrdering::Relaxed)
    }

    /// Nodes handed to the collector so far.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.load(AtomicOrdering::Relaxed)
    }
}

impl<K> Default for SeizeAllocator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> NodeAllocator<K> for SeizeAllocator<K> {
    fn alloc_node(&self, node: Box<Node<K>>) -> *mut Node<K> {
        self.allocated.fetch_add(1, AtomicOrdering::Relaxed);
        Box::into_raw(node)
    }

    unsafe fn retire_node(&self, ptr: *mut Node<K>, guard: &LocalGuard<'_>) {
        self.retired.fetch_add(1, AtomicOrdering::Relaxed);

        // SAFETY: Caller ensures ptr is valid, unreachable, and retired once.
        unsafe { guard.defer_retire(ptr, reclaim::reclaim_node_boxed::<K>) };
    }

    fn teardown(&mut self, holder: *mut Node<K>) {
        // SAFETY: `&mut self` is only handed out by the tree's Drop, so no
        // guard is alive and no reachable node has been retired.
        let _freed: usize = unsafe { reclaim_subtree_impl(holder) };
    }
}

// ============================================================================
//  ArenaAllocator
// ============================================================================

/// Arena-style allocator: nodes are never freed before the tree drops.
///
/// Every allocation is tracked; retiring a node only counts it. Teardown
/// frees everything that was ever allocated, reachable or not.
#[derive(Debug)]
pub struct ArenaAllocator<K> {
    nodes: Mutex<Vec<*mut Node<K>>>,
    retired: AtomicUsize,
}

// SAFETY: Raw pointers are owned by this allocator and protected by Mutex.
unsafe impl<K: Send + Sync> Send for ArenaAllocator<K> {}
unsafe impl<K: Send + Sync> Sync for ArenaAllocator<K> {}

impl<K> ArenaAllocator<K> {
    /// Create a new arena allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            retired: AtomicUsize::new(0),
        }
    }

    /// Create a new arena allocator with pre-allocated tracking capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Mutex::new(Vec::with_capacity(capacity)),
            retired: AtomicUsize::new(0),
        }
    }

    /// Number of nodes in the arena, including the holder.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Number of nodes unlinked from the tree but still parked here.
    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.retired.load(AtomicOrdering::Relaxed)
    }
}

impl<K> Default for ArenaAllocator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Send + Sync> NodeAllocator<K> for ArenaAllocator<K> {
    fn alloc_node(&self, node: Box<Node<K>>) -> *mut Node<K> {
        let ptr: *mut Node<K> = Box::into_raw(node);
        self.nodes.lock().push(ptr);
        ptr
    }

    unsafe fn retire_node(&self, _ptr: *mut Node<K>, _guard: &LocalGuard<'_>) {
        self.retired.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn teardown(&mut self, _holder: *mut Node<K>) {
        let nodes: Vec<*mut Node<K>> = std::mem::take(self.nodes.get_mut());

        for ptr in nodes {
            // SAFETY: ptr came from Box::into_raw in alloc_node and is in the
            // arena exactly once.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

impl<K> Drop for ArenaAllocator<K> {
    fn drop(&mut self) {
        // An arena dropped without teardown (never attached to a tree).
        for ptr in std::mem::take(self.nodes.get_mut()) {
            // SAFETY: same as teardown.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
