//! Reclaim helpers for seize-based memory reclamation.
//!
//! This module provides:
//! - A single-node reclaimer for `guard.defer_retire()`
//! - Subtree traversal for tree teardown

// This module is private, so pub(crate) is effectively the same as pub.
// We use pub to satisfy clippy::redundant_pub_crate while keeping intent clear.
#![allow(clippy::redundant_pub_crate)]

use std::collections::HashSet;

use std::sync::atomic::Ordering as AtomicOrdering;

use seize::Collector;

use crate::node::{Direction, Node};
use crate::tree::FREED_COUNT;

// ============================================================================
//  Single-Node Reclaimer (seize callback signature)
// ============================================================================

/// Reclaim a boxed tree node (seize callback).
///
/// # Safety
///
/// - `ptr` must point to a valid `Node<K>` allocated via `Box::into_raw`.
/// - Must only be called after seize determines it's safe (no readers).
pub(crate) unsafe fn reclaim_node_boxed<K>(ptr: *mut Node<K>, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw.
    // Seize ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
    FREED_COUNT.fetch_add(1, AtomicOrdering::Relaxed);
}

// ============================================================================
//  Subtree Reclamation
// ============================================================================

/// Free every node reachable from `root_ptr` through child links.
///
/// Iterative DFS, so a degenerate tree cannot overflow the stack. Parent links
/// are never followed. Returns the number of nodes freed.
///
/// # Safety
///
/// - `root_ptr` must be null or point to a valid `Node<K>` from `Box::into_raw`.
/// - The caller must have exclusive access: no guard may still reference any
///   node of the subtree, and none of them may have been retired.
pub(crate) unsafe fn reclaim_subtree_impl<K>(root_ptr: *mut Node<K>) -> usize {
    if root_ptr.is_null() {
        return 0;
    }

    let mut stack: Vec<*mut Node<K>> = Vec::with_capacity(64);
    stack.push(root_ptr);

    // Track visited nodes to avoid double-free if tree has corruption.
    // Uses ptr.addr() for identity (strict provenance compliant).
    let mut visited: HashSet<usize> = HashSet::new();
    let mut freed: usize = 0;

    while let Some(node) = stack.pop() {
        if node.is_null() {
            continue;
        }

        if !visited.insert(node.addr()) {
            continue;
        }

        // SAFETY: node is valid (caller contract) and not yet freed (visited).
        let (left, right) = unsafe {
            (
                (*node).child_ptr(Direction::Left),
                (*node).child_ptr(Direction::Right),
            )
        };

        // Collect children BEFORE dropping the node.
        stack.push(left);
        stack.push(right);

        // SAFETY: node came from Box::into_raw and is freed exactly once.
        unsafe { drop(Box::from_raw(node)) };
        freed += 1;
    }

    freed
}

// ============================================================================
//  Tests
// ============================================================================
