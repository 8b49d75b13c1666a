//! Splicing value-less nodes out of the tree.

use std::ptr as StdPtr;

use seize::LocalGuard;

use crate::alloc::NodeAllocator;
use crate::node::{ABSENT, Direction, Node};
use crate::tracing_helpers::debug_log;

use super::AvlTree;
use super::stats::{UNLINK_COUNT, bump};

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    /// Replace `node` in `parent` by its only child (or by nothing).
    ///
    /// Both locks must be held. Fails without side effects if `node` is no
    /// longer a child of `parent` or has two children. On success `node` is
    /// marked unlinked, its value cleared, and it is retired through the
    /// allocator.
    pub(super) fn attempt_unlink_nl(
        &self,
        parent: &Node<K>,
        node: &Node<K>,
        guard: &LocalGuard<'_>,
    ) -> bool {
        debug_assert!(parent.is_locked() && node.is_locked());

        let dir: Direction = if parent.is_child(Direction::Left, node) {
            Direction::Left
        } else if parent.is_child(Direction::Right, node) {
            Direction::Right
        } else {
            return false;
        };

        let left: Option<&Node<K>> = node.child(Direction::Left, guard);
        let right: Option<&Node<K>> = node.child(Direction::Right, guard);

        if left.is_some() && right.is_some() {
            return false;
        }

        let splice: Option<&Node<K>> = left.or(right);

        parent.set_child(dir, splice);
        if let Some(child) = splice {
            child.set_parent(parent);
        }

        node.version().mark_unlinked();
        node.set_value(ABSENT);

        bump(&UNLINK_COUNT);
        debug_log!(spliced_child = splice.is_some(), "unlinked node");

        // SAFETY: node came from this tree's allocator, is no longer reachable
        // from the holder, and the Unlinked version is terminal so it cannot
        // be unlinked (and retired) again.
        unsafe {
            self.allocator
                .retire_node(StdPtr::from_ref(node).cast_mut(), guard);
        }

        true
    }
}
