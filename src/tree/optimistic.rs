//! Optimistic Read Support for [`AvlTree`]
//!
//! Implements lock-free lookups using:
//! 1. **seize guards** for protected link loads (prevents use-after-free)
//! 2. **Hand-over-hand version validation**: a child link is trusted only if
//!    the parent's version did not change while it was read
//! 3. **Local retry**: a failed validation steps back one level, not to the root
//!
//! # Protocol
//!
//! ```text
//! 1. guard = tree.collector.enter()
//! 2. root = holder.right; v = root.version   (wait if shrinking)
//! 3. at node n with snapshot v:
//!      child = n.child(dir)
//!      child == null  -> validate v, return not found
//!      child.key == k -> return child.value
//!      cv = child.version                    (wait if shrinking)
//!      validate v, descend into (child, cv)
//!    any failed validation pops back to n's parent frame
//! 4. drop(guard)
//! ```
//!
//! Keys are immutable and the value is a single atomic word, so a key match
//! needs no further validation.

use seize::LocalGuard;

use crate::alloc::NodeAllocator;
use crate::node::{ABSENT, Direction, Node};
use crate::nodeversion::Version;
use crate::tracing_helpers::trace_log;

use super::AvlTree;
use super::path::{Frame, PathStack};
use super::stats::{READ_RETRY_COUNT, bump};

/// Value of a node that matched the searched key.
#[inline]
fn present(node: &Node<impl Sized>) -> Option<usize> {
    match node.value() {
        ABSENT => None,
        value => Some(value),
    }
}

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    /// Look up the value stored at `key`.
    ///
    /// Creates a guard internally. For bulk operations, prefer
    /// [`get_with_guard`](Self::get_with_guard) to amortize guard creation cost.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<usize> {
        let guard = self.guard();
        self.get_with_guard(key, &guard)
    }

    /// True if `key` has a value.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Look up a key using an explicit guard.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to look up
    /// * `guard` - A guard from [`AvlTree::guard()`]
    ///
    /// # Example
    ///
    /// ```rust
    /// use optavl::AvlTree;
    ///
    /// let tree: AvlTree<u32> = AvlTree::new();
    /// tree.insert(1, 10);
    ///
    /// let guard = tree.guard();
    /// for key in [1, 2] {
    ///     let _ = tree.get_with_guard(&key, &guard);
    /// }
    /// // guard dropped, reclamation can proceed
    /// ```
    #[must_use]
    pub fn get_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<usize> {
        let holder: &Node<K> = self.holder(guard);
        let mut path: PathStack<'_, K> = PathStack::new();

        loop {
            let Some(right) = holder.child(Direction::Right, guard) else {
                return None;
            };

            let Some(dir) = Direction::from_ordering(key.cmp(right.key())) else {
                return present(right);
            };

            let ovl: Version = right.version().load();
            if ovl.is_shrinking_or_unlinked() {
                right.version().wait_until_not_changing();
                continue;
            }

            if !holder.is_child(Direction::Right, right) {
                continue;
            }

            path.clear();
            path.push(Frame {
                node: right,
                parent: holder,
                version: ovl,
            });

            if let Some(result) = Self::attempt_get(key, dir, &mut path, guard) {
                return result;
            }

            bump(&READ_RETRY_COUNT);
            trace_log!(depth_overflowed = path.overflowed(), "get: restart from holder");
        }
    }

    /// Descend from the frame on top of `path`.
    ///
    /// Returns `Some(result)` on a definitive answer and `None` when every
    /// frame has been invalidated (the caller restarts from the holder).
    fn attempt_get<'g>(
        key: &K,
        first_dir: Direction,
        path: &mut PathStack<'g, K>,
        guard: &'g LocalGuard<'_>,
    ) -> Option<Option<usize>> {
        let mut dir: Direction = first_dir;

        while let Some(frame) = path.top() {
            let node: &'g Node<K> = frame.node;

            let Some(child) = node.child(dir, guard) else {
                if node.version().has_changed(frame.version) {
                    Self::step_back(key, path, &mut dir);
                    continue;
                }

                return Some(None);
            };

            let Some(child_dir) = Direction::from_ordering(key.cmp(child.key())) else {
                return Some(present(child));
            };

            let child_v: Version = child.version().load();

            if child_v.is_shrinking_or_unlinked() {
                child.version().wait_until_not_changing();
                if node.version().has_changed(frame.version) {
                    Self::step_back(key, path, &mut dir);
                }
                continue;
            }

            if !node.is_child(dir, child) {
                if node.version().has_changed(frame.version) {
                    Self::step_back(key, path, &mut dir);
                }
                continue;
            }

            if node.version().has_changed(frame.version) {
                Self::step_back(key, path, &mut dir);
                continue;
            }

            path.push(Frame {
                node: child,
                parent: node,
                version: child_v,
            });
            dir = child_dir;
        }

        None
    }

    /// Discard the top frame and recompute the direction for the new top.
    #[inline]
    fn step_back(key: &K, path: &mut PathStack<'_, K>, dir: &mut Direction) {
        bump(&READ_RETRY_COUNT);
        path.pop();

        if let Some(frame) = path.top() {
            // A frame is only pushed after its key compared unequal.
            *dir = Direction::from_ordering(key.cmp(frame.node.key())).unwrap_or(Direction::Right);
        }
    }
}
