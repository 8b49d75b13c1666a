//! Filepath: src/node.rs
//!
//! Tree node for the optimistic AVL map.
//!
//! A [`Node`] carries an immutable key, an atomic value (0 = absent), a cached
//! height, a [`NodeVersion`], atomic child/parent links and a per-node mutex.
//!
//! # Field ownership
//! - `key` never changes after construction.
//! - `value`, `height`, `left`, `right`, `parent` are written only while the
//!   node's lock is held. Readers load them without locks and validate with
//!   the node's version.
//! - `version` transitions are made only by the lock holder (see
//!   [`NodeVersion::begin_shrink`]).
//!
//! Child and parent links are loaded through [`Guard::protect`] so a node
//! unlinked and retired concurrently stays allocated for the guard's lifetime.

use std::cmp::Ordering;
use std::ptr as StdPtr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize};

use parking_lot::{Mutex, MutexGuard};
use seize::{Guard, LocalGuard};

use crate::nodeversion::NodeVersion;
use crate::ordering::{READ_ORD, WRITE_ORD};

/// Reserved value meaning "no value stored at this key".
pub const ABSENT: usize = 0;

// ============================================================================
//  Direction
// ============================================================================

/// Which child slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Keys less than the node's key.
    Left,

    /// Keys greater than the node's key.
    Right,
}

impl Direction {
    /// Direction to descend for a key that compared `ord` against a node key.
    ///
    /// Returns `None` on `Equal`: the key lives at this node.
    #[inline]
    #[must_use]
    pub const fn from_ordering(ord: Ordering) -> Option<Self> {
        match ord {
            Ordering::Less => Some(Self::Left),
            Ordering::Greater => Some(Self::Right),
            Ordering::Equal => None,
        }
    }
}

// ============================================================================
//  Condition
// ============================================================================

/// What the rebalancer must do at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Value absent with at most one child: splice the node out.
    UnlinkRequired,

    /// Child heights differ by more than one.
    RebalanceRequired,

    /// Cached height is wrong; the payload is the repaired height.
    HeightStale(i32),

    /// Nothing to repair here.
    Nothing,
}

// ============================================================================
//  Node
// ============================================================================

/// A node of the AVL tree.
#[derive(Debug)]
pub struct Node<K> {
    version: NodeVersion,
    key: K,
    value: AtomicUsize,
    height: AtomicI32,
    parent: AtomicPtr<Node<K>>,
    left: AtomicPtr<Node<K>>,
    right: AtomicPtr<Node<K>>,
    lock: Mutex<()>,
}

impl<K> Node<K> {
    /// A fresh leaf with height 1, attached below `parent`.
    pub(crate) fn new_leaf(key: K, value: usize, parent: *mut Self) -> Box<Self> {
        Box::new(Self {
            version: NodeVersion::new(),
            key,
            value: AtomicUsize::new(value),
            height: AtomicI32::new(1),
            parent: AtomicPtr::new(parent),
            left: AtomicPtr::new(StdPtr::null_mut()),
            right: AtomicPtr::new(StdPtr::null_mut()),
            lock: Mutex::new(()),
        })
    }

    /// The root holder: key unused, no parent, the real root hangs off `right`.
    pub(crate) fn new_holder() -> Box<Self>
    where
        K: Default,
    {
        Box::new(Self {
            version: NodeVersion::new(),
            key: K::default(),
            value: AtomicUsize::new(ABSENT),
            height: AtomicI32::new(0),
            parent: AtomicPtr::new(StdPtr::null_mut()),
            left: AtomicPtr::new(StdPtr::null_mut()),
            right: AtomicPtr::new(StdPtr::null_mut()),
            lock: Mutex::new(()),
        })
    }

    // ========================================================================
    //  Plain accessors
    // ========================================================================

    /// The node's key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Current value, [`ABSENT`] for a routing node.
    #[inline]
    #[must_use]
    pub fn value(&self) -> usize {
        self.value.load(READ_ORD)
    }

    /// Cached subtree height (a leaf is 1).
    #[inline]
    #[must_use]
    pub fn height(&self) -> i32 {
        self.height.load(READ_ORD)
    }

    /// The node's version word.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> &NodeVersion {
        &self.version
    }

    /// Acquire the node's lock.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    #[inline]
    pub(crate) fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Raw child pointer, for quiescent walks and emptiness checks.
    #[inline]
    pub(crate) fn child_ptr(&self, dir: Direction) -> *mut Self {
        self.link(dir).load(READ_ORD)
    }

    #[inline]
    const fn link(&self, dir: Direction) -> &AtomicPtr<Self> {
        match dir {
            Direction::Left => &self.left,
            Direction::Right => &self.right,
        }
    }

    // ========================================================================
    //  Guarded link loads
    // ========================================================================

    /// Load a child under `guard`.
    #[inline]
    pub(crate) fn child<'g>(
        &'g self,
        dir: Direction,
        guard: &'g LocalGuard<'_>,
    ) -> Option<&'g Self> {
        let ptr: *mut Self = guard.protect(self.link(dir), READ_ORD);

        // SAFETY: children are allocated by the tree's allocator and only
        // retired after being unlinked; `protect` keeps them alive for 'g.
        unsafe { ptr.as_ref() }
    }

    /// Load the parent under `guard`. `None` only for the holder.
    #[inline]
    pub(crate) fn parent<'g>(&'g self, guard: &'g LocalGuard<'_>) -> Option<&'g Self> {
        let ptr: *mut Self = guard.protect(&self.parent, READ_ORD);

        // SAFETY: same as `child`.
        unsafe { ptr.as_ref() }
    }

    /// True if `child` is currently linked in slot `dir`.
    #[inline]
    pub(crate) fn is_child(&self, dir: Direction, child: &Self) -> bool {
        StdPtr::eq(self.link(dir).load(READ_ORD), child)
    }

    /// True if `parent` is this node's recorded parent.
    #[inline]
    pub(crate) fn has_parent(&self, parent: &Self) -> bool {
        StdPtr::eq(self.parent.load(READ_ORD), parent)
    }

    /// Height of an optional child, 0 for null.
    #[inline]
    pub(crate) fn height_of(node: Option<&Self>) -> i32 {
        node.map_or(0, Self::height)
    }

    // ========================================================================
    //  Mutation (node lock must be held)
    // ========================================================================

    #[inline]
    pub(crate) fn set_child(&self, dir: Direction, child: Option<&Self>) {
        debug_assert!(self.lock.is_locked(), "set_child() without the node lock");
        self.link(dir).store(as_mut_ptr(child), WRITE_ORD);
    }

    /// Store a freshly allocated child pointer.
    #[inline]
    pub(crate) fn set_child_ptr(&self, dir: Direction, child: *mut Self) {
        debug_assert!(self.lock.is_locked(), "set_child_ptr() without the node lock");
        self.link(dir).store(child, WRITE_ORD);
    }

    /// Re-point the parent link.
    ///
    /// Writers hold the lock of the old or the new parent (or both); the
    /// child's own lock is not required.
    #[inline]
    pub(crate) fn set_parent(&self, parent: &Self) {
        self.parent.store(StdPtr::from_ref(parent).cast_mut(), WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_height(&self, height: i32) {
        debug_assert!(self.lock.is_locked(), "set_height() without the node lock");
        self.height.store(height, WRITE_ORD);
    }

    #[inline]
    pub(crate) fn set_value(&self, value: usize) {
        debug_assert!(self.lock.is_locked(), "set_value() without the node lock");
        self.value.store(value, WRITE_ORD);
    }

    // ========================================================================
    //  Condition
    // ========================================================================

    /// Classify the repair this node needs, from a racy look at its children.
    pub(crate) fn condition(&self, guard: &LocalGuard<'_>) -> Condition {
        let nl: Option<&Self> = self.child(Direction::Left, guard);
        let nr: Option<&Self> = self.child(Direction::Right, guard);

        if (nl.is_none() || nr.is_none()) && self.value() == ABSENT {
            return Condition::UnlinkRequired;
        }

        let hn: i32 = self.height();
        let hl0: i32 = Self::height_of(nl);
        let hr0: i32 = Self::height_of(nr);
        let hnrepl: i32 = 1 + hl0.max(hr0);
        let bal: i32 = hl0 - hr0;

        if !(-1..=1).contains(&bal) {
            return Condition::RebalanceRequired;
        }

        if hn == hnrepl {
            Condition::Nothing
        } else {
            Condition::HeightStale(hnrepl)
        }
    }
}

#[inline]
fn as_mut_ptr<K>(node: Option<&Node<K>>) -> *mut Node<K> {
    node.map_or(StdPtr::null_mut(), |n| StdPtr::from_ref(n).cast_mut())
}
