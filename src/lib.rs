//! # `optavl`
//!
//! A concurrent ordered map on an optimistic, relaxed-balance AVL tree.
//!
//! Lookups take no locks: they descend hand-over-hand, validating each child
//! link against the parent's version stamp, and step back one level when a
//! concurrent rotation invalidates what they read. Writers lock only the nodes
//! they relink, then repair heights and rotate on the way back up.
//!
//! | Operation | Locks | Notes |
//! |-----------|-------|-------|
//! | `get` / `contains_key` | none | linearizable, may spin briefly on a rotation |
//! | `insert` | parent of the new leaf | fails on an existing key |
//! | `remove` | node (+ parent when splicing) | two-child nodes become routing nodes |
//! | `put` / `replace` | as above | upsert / overwrite-if-present |
//! | `size` / `validate` / `dump` | none | only meaningful at quiescence |
//!
//! The four writers share one internal update routine. Its write policy is
//! not part of the API:
//!
//! ```compile_fail
//! use optavl::tree::UpdatePolicy;
//! ```
//!
//! ## Thread Safety
//!
//! `AvlTree<K>` is `Send + Sync`. Every method takes `&self`; share the tree
//! behind an `Arc`. For many operations in a row, enter the reclamation
//! epoch once with [`AvlTree::guard`] and use the `_with_guard` methods:
//!
//! ```rust
//! use optavl::AvlTree;
//!
//! let tree: AvlTree<i64> = AvlTree::new();
//! let guard = tree.guard();
//!
//! assert!(tree.insert_with_guard(7, 70, &guard));
//! assert_eq!(tree.get_with_guard(&7, &guard), Some(70));
//! assert_eq!(tree.remove_with_guard(&7, &guard), Some(70));
//! ```
//!
//! ## Values
//!
//! Values are `usize` (pointer-sized). [`ABSENT`] (`0`) marks a key without a
//! value, so `0` cannot be stored: `insert(k, 0)` returns `false`.
//!
//! ## Memory Reclamation
//!
//! Unlinked nodes are retired through the tree's [`NodeAllocator`]. The
//! default [`SeizeAllocator`] frees them once no guard can still see them;
//! [`ArenaAllocator`] keeps every node until the tree drops.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod alloc;
pub mod node;
pub mod nodeversion;
pub mod ordering;
pub mod tree;

mod tracing_helpers;

// Re-export main types for convenience
pub use alloc::{ArenaAllocator, NodeAllocator, SeizeAllocator};
pub use node::ABSENT;
pub use tree::{
    AvlTree, DebugCounters, InvariantViolation, ValidationReport, get_debug_counters,
    reset_debug_counters,
};
