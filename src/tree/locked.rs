//! Locked Update Support for [`AvlTree`]
//!
//! One routine, [`AvlTree::update`], implements insert, remove, put and
//! replace. It repeats the optimistic descent of the read path and, once it
//! knows which node must change, locks only that node (or the node and its
//! parent for a removal that splices) and revalidates under the lock.
//!
//! # Write Protocol
//!
//! ```text
//! 1. guard = tree.collector.enter()
//! 2. Optimistic descent (as in get), one frame per level
//! 3. Key found at n:
//!      remove with <= 1 child : lock(parent), lock(n), revalidate, unlink n
//!      otherwise              : lock(n), revalidate, store value
//!    Empty child slot under n (insert):
//!      lock(n), revalidate version + empty slot, link new leaf
//! 4. unlock, then fix_height_and_rebalance(repair), starting at the parent
//! 5. Any failed revalidation: pop one frame and retry from the parent
//! ```

use std::ptr as StdPtr;

use seize::LocalGuard;

use crate::alloc::NodeAllocator;
use crate::node::{ABSENT, Direction, Node};
use crate::nodeversion::Version;
use crate::tracing_helpers::trace_log;

use super::AvlTree;
use super::path::{Frame, PathStack};
use super::rebalance::Repair;
use super::stats::{UPDATE_RETRY_COUNT, bump};

// ============================================================================
//  UpdatePolicy
// ============================================================================

/// When a write should take effect, given the value currently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum UpdatePolicy {
    /// Only if the key has no value (insert).
    IfAbsent,

    /// Only if the key has a value (remove, replace).
    IfPresent,

    /// Unconditionally (put).
    Always,
}

impl UpdatePolicy {
    /// Should a write apply over `previous`?
    #[inline]
    #[must_use]
    pub(crate) const fn should_update(self, previous: usize) -> bool {
        match self {
            Self::IfAbsent => previous == ABSENT,
            Self::IfPresent => previous != ABSENT,
            Self::Always => true,
        }
    }
}

/// Result of a completed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    /// The write happened; payload is the previous value.
    Applied(usize),

    /// The policy rejected the write; payload is the value observed.
    Skipped(usize),
}

/// Result of one locked attempt.
enum Attempt {
    Done(UpdateOutcome),
    /// Revalidation failed: pop a frame and retry from the parent.
    Retry,
    /// Nothing was decided; retry the same frame.
    Again,
}

// ============================================================================
//  Public API
// ============================================================================

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    /// Insert `value` at `key` if the key has no value.
    ///
    /// Returns `true` iff a new entry was created. A `value` of 0 is the
    /// absent sentinel and is never inserted.
    pub fn insert(&self, key: K, value: usize) -> bool {
        let guard = self.guard();
        self.insert_with_guard(key, value, &guard)
    }

    /// [`insert`](Self::insert) using an explicit guard.
    pub fn insert_with_guard(&self, key: K, value: usize, guard: &LocalGuard<'_>) -> bool {
        if value == ABSENT {
            return false;
        }

        matches!(
            self.update(key, UpdatePolicy::IfAbsent, value, guard),
            UpdateOutcome::Applied(_)
        )
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&self, key: &K) -> Option<usize> {
        let guard = self.guard();
        self.remove_with_guard(key, &guard)
    }

    /// [`remove`](Self::remove) using an explicit guard.
    pub fn remove_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<usize> {
        match self.update(*key, UpdatePolicy::IfPresent, ABSENT, guard) {
            UpdateOutcome::Applied(previous) => non_absent(previous),
            UpdateOutcome::Skipped(_) => None,
        }
    }

    /// Insert or overwrite, returning the previous value.
    ///
    /// A `value` of 0 is rejected and returns `None`.
    pub fn put(&self, key: K, value: usize) -> Option<usize> {
        if value == ABSENT {
            return None;
        }

        let guard = self.guard();
        match self.update(key, UpdatePolicy::Always, value, &guard) {
            UpdateOutcome::Applied(previous) | UpdateOutcome::Skipped(previous) => {
                non_absent(previous)
            }
        }
    }

    /// Overwrite the value of an existing key, returning the previous value.
    ///
    /// Does nothing and returns `None` if the key has no value or `value` is 0.
    pub fn replace(&self, key: K, value: usize) -> Option<usize> {
        if value == ABSENT {
            return None;
        }

        let guard = self.guard();
        match self.update(key, UpdatePolicy::IfPresent, value, &guard) {
            UpdateOutcome::Applied(previous) => non_absent(previous),
            UpdateOutcome::Skipped(_) => None,
        }
    }

    // ========================================================================
    //  Update engine
    // ========================================================================

    /// Apply `new_value` at `key` under `policy`. `new_value == ABSENT` removes.
    pub(crate) fn update(
        &self,
        key: K,
        policy: UpdatePolicy,
        new_value: usize,
        guard: &LocalGuard<'_>,
    ) -> UpdateOutcome {
        let holder: &Node<K> = self.holder(guard);
        let mut path: PathStack<'_, K> = PathStack::new();

        loop {
            let Some(right) = holder.child(Direction::Right, guard) else {
                if !policy.should_update(ABSENT) {
                    return UpdateOutcome::Skipped(ABSENT);
                }

                if new_value == ABSENT || self.attempt_insert_into_empty(key, new_value, guard) {
                    return UpdateOutcome::Applied(ABSENT);
                }

                continue;
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

            if let Some(outcome) = self.attempt_update(key, policy, new_value, &mut path, guard) {
                return outcome;
            }

            bump(&UPDATE_RETRY_COUNT);
            trace_log!(depth_overflowed = path.overflowed(), "update: restart from holder");
        }
    }

    /// Descend from the frame on top of `path` and commit the update.
    ///
    /// Returns `None` once every frame has been invalidated.
    fn attempt_update<'g>(
        &self,
        key: K,
        policy: UpdatePolicy,
        new_value: usize,
        path: &mut PathStack<'g, K>,
        guard: &'g LocalGuard<'_>,
    ) -> Option<UpdateOutcome> {
        while let Some(frame) = path.top() {
            let node: &'g Node<K> = frame.node;

            let attempt: Attempt = match Direction::from_ordering(key.cmp(node.key())) {
                None => self.attempt_node_update(policy, new_value, frame.parent, node, guard),
                Some(dir) => {
                    self.attempt_child_step(key, policy, new_value, frame, dir, path, guard)
                }
            };

            match attempt {
                Attempt::Done(outcome) => return Some(outcome),
                Attempt::Retry => {
                    bump(&UPDATE_RETRY_COUNT);
                    path.pop();
                }
                Attempt::Again => {}
            }
        }

        None
    }

    /// One iteration of the search loop at `frame.node`, looking in `dir`.
    ///
    /// Either descends (pushes a frame and returns `Again`), inserts a new
    /// leaf, or reports a retry.
    #[expect(clippy::too_many_arguments, reason = "mirrors the descent state")]
    fn attempt_child_step<'g>(
        &self,
        key: K,
        policy: UpdatePolicy,
        new_value: usize,
        frame: Frame<'g, K>,
        dir: Direction,
        path: &mut PathStack<'g, K>,
        guard: &'g LocalGuard<'_>,
    ) -> Attempt {
        let node: &'g Node<K> = frame.node;
        let child: Option<&'g Node<K>> = node.child(dir, guard);

        if node.version().has_changed(frame.version) {
            return Attempt::Retry;
        }

        let Some(child) = child else {
            if new_value == ABSENT {
                return Attempt::Done(UpdateOutcome::Skipped(ABSENT));
            }

            return self.attempt_insert_child(
                key,
                policy,
                new_value,
                node,
                frame.version,
                dir,
                guard,
            );
        };

        let child_v: Version = child.version().load();

        if child_v.is_shrinking_or_unlinked() {
            child.version().wait_until_not_changing();
            return Attempt::Again;
        }

        if !node.is_child(dir, child) {
            return Attempt::Again;
        }

        if node.version().has_changed(frame.version) {
            return Attempt::Retry;
        }

        path.push(Frame {
            node: child,
            parent: node,
            version: child_v,
        });
        Attempt::Again
    }

    /// Link a new leaf into the empty slot `dir` of `node`.
    #[expect(clippy::too_many_arguments, reason = "mirrors the descent state")]
    fn attempt_insert_child(
        &self,
        key: K,
        policy: UpdatePolicy,
        new_value: usize,
        node: &Node<K>,
        node_v: Version,
        dir: Direction,
        guard: &LocalGuard<'_>,
    ) -> Attempt {
        let damaged: Repair<'_, K> = {
            let _lock = node.lock();

            if node.version().has_changed(node_v) {
                return Attempt::Retry;
            }

            if !node.child_ptr(dir).is_null() {
                // Somebody else filled the slot; look again.
                return Attempt::Again;
            }

            if !policy.should_update(ABSENT) {
                return Attempt::Done(UpdateOutcome::Skipped(ABSENT));
            }

            let parent_ptr: *mut Node<K> = StdPtr::from_ref(node).cast_mut();
            let leaf: *mut Node<K> = self
                .allocator
                .alloc_node(Node::new_leaf(key, new_value, parent_ptr));
            node.set_child_ptr(dir, leaf);
            self.count_inserted();

            Self::fix_height_nl(node, guard)
        };

        self.fix_height_and_rebalance(damaged, guard);
        Attempt::Done(UpdateOutcome::Applied(ABSENT))
    }

    /// Install the first node below the holder.
    fn attempt_insert_into_empty(&self, key: K, value: usize, guard: &LocalGuard<'_>) -> bool {
        let holder: &Node<K> = self.holder(guard);
        let _lock = holder.lock();

        if !holder.child_ptr(Direction::Right).is_null() {
            return false;
        }

        let parent_ptr: *mut Node<K> = StdPtr::from_ref(holder).cast_mut();
        let leaf: *mut Node<K> = self
            .allocator
            .alloc_node(Node::new_leaf(key, value, parent_ptr));
        holder.set_child_ptr(Direction::Right, leaf);
        holder.set_height(2);
        self.count_inserted();

        true
    }

    /// Update the value at `node`, whose key matched.
    ///
    /// A removal that leaves `node` with at most one child unlinks it under
    /// the locks of `parent` and `node`. Every other change locks `node` only.
    fn attempt_node_update(
        &self,
        policy: UpdatePolicy,
        new_value: usize,
        parent: &Node<K>,
        node: &Node<K>,
        guard: &LocalGuard<'_>,
    ) -> Attempt {
        if new_value == ABSENT && node.value() == ABSENT {
            return Attempt::Done(UpdateOutcome::Skipped(ABSENT));
        }

        let may_splice: bool = new_value == ABSENT
            && (node.child_ptr(Direction::Left).is_null()
                || node.child_ptr(Direction::Right).is_null());

        if may_splice {
            return self.attempt_remove_and_unlink(policy, parent, node, guard);
        }

        let _lock = node.lock();

        if node.version().is_unlinked() {
            return Attempt::Retry;
        }

        let prev: usize = node.value();
        if !policy.should_update(prev) {
            return Attempt::Done(UpdateOutcome::Skipped(prev));
        }

        if new_value == ABSENT
            && (node.child_ptr(Direction::Left).is_null()
                || node.child_ptr(Direction::Right).is_null())
        {
            // Lost a child since the unlocked look: must splice instead.
            return Attempt::Retry;
        }

        node.set_value(new_value);
        match (prev == ABSENT, new_value == ABSENT) {
            (true, false) => self.count_inserted(),
            (false, true) => self.count_removed(),
            _ => {}
        }

        Attempt::Done(UpdateOutcome::Applied(prev))
    }

    /// Remove the value at `node` and splice it out of `parent`.
    fn attempt_remove_and_unlink(
        &self,
        policy: UpdatePolicy,
        parent: &Node<K>,
        node: &Node<K>,
        guard: &LocalGuard<'_>,
    ) -> Attempt {
        let (prev, damaged) = {
            let _parent_lock = parent.lock();

            if parent.version().is_unlinked() || !node.has_parent(parent) {
                return Attempt::Retry;
            }

            let prev: usize = {
                let _node_lock = node.lock();

                if node.version().is_unlinked() {
                    return Attempt::Retry;
                }

                let prev: usize = node.value();

                if !policy.should_update(prev) {
                    return Attempt::Done(UpdateOutcome::Skipped(prev));
                }

                if prev == ABSENT {
                    return Attempt::Done(UpdateOutcome::Applied(prev));
                }

                if !self.attempt_unlink_nl(parent, node, guard) {
                    return Attempt::Retry;
                }

                self.count_removed();
                prev
            };

            (prev, Self::fix_height_nl(parent, guard))
        };

        self.fix_height_and_rebalance(damaged, guard);
        Attempt::Done(UpdateOutcome::Applied(prev))
    }
}

#[inline]
const fn non_absent(value: usize) -> Option<usize> {
    if value == ABSENT { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_should_update() {
        assert!(UpdatePolicy::IfAbsent.should_update(ABSENT));
        assert!(!UpdatePolicy::IfAbsent.should_update(3));
        assert!(!UpdatePolicy::IfPresent.should_update(ABSENT));
        assert!(UpdatePolicy::IfPresent.should_update(3));
        assert!(UpdatePolicy::Always.should_update(ABSENT));
        assert!(UpdatePolicy::Always.should_update(3));
    }

    #[test]
    fn test_insert_then_remove_twice() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert!(tree.insert(1, 11));
        assert_eq!(tree.remove(&1), Some(11));
        assert_eq!(tree.remove(&1), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_missing_key() {
        let tree: AvlTree<u64> = AvlTree::new();
        assert_eq!(tree.remove(&1), None);

        tree.insert(5, 1);
        assert_eq!(tree.remove(&4), None);
        assert_eq!(tree.remove(&6), None);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_put_inserts_and_overwrites() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert_eq!(tree.put(3, 30), None);
        assert_eq!(tree.put(3, 31), Some(30));
        assert_eq!(tree.get(&3), Some(31));
        assert_eq!(tree.len(), 1);

        assert_eq!(tree.put(3, 0), None);
        assert_eq!(tree.get(&3), Some(31));
    }

    #[test]
    fn test_replace_only_when_present() {
        let tree: AvlTree<u64> = AvlTree::new();

        assert_eq!(tree.replace(8, 80), None);
        assert_eq!(tree.get(&8), None);

        tree.insert(8, 80);
        assert_eq!(tree.replace(8, 81), Some(80));
        assert_eq!(tree.get(&8), Some(81));
        assert_eq!(tree.replace(8, 0), None);
        assert_eq!(tree.get(&8), Some(81));
    }

    #[test]
    fn test_reinsert_into_routing_node() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [20, 10, 30] {
            tree.insert(k, 1);
        }

        assert_eq!(tree.remove(&20), Some(1));
        assert_eq!(tree.len(), 2);

        // The routing node for 20 takes the value again; no new node.
        let allocated = tree.allocator().allocated_count();
        assert!(tree.insert(20, 5));
        assert_eq!(tree.allocator().allocated_count(), allocated);
        assert_eq!(tree.get(&20), Some(5));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_routing_node_unlinked_after_child_removal() {
        let tree: AvlTree<u64> = AvlTree::new();
        for k in [20, 10, 30] {
            tree.insert(k, 1);
        }

        tree.remove(&20);
        tree.remove(&10);

        let report = tree.validate();
        assert!(report.is_valid(), "{report}");
        assert_eq!(report.unlink_eligible, 0);
        assert_eq!(report.value_nodes, 1);
        assert_eq!(tree.get(&30), Some(1));
    }

    #[test]
    fn test_len_tracks_every_path() {
        let tree: AvlTree<u64> = AvlTree::new();

        for k in 0..100 {
            tree.insert(k, 1);
        }
        for k in 0..100 {
            if k % 3 == 0 {
                tree.remove(&k);
            }
        }
        for k in 0..100 {
            if k % 5 == 0 {
                tree.put(k, 2);
            }
        }

        assert_eq!(tree.len(), tree.size());
    }
}
