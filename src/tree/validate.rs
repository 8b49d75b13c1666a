//! Quiescent diagnostics: [`AvlTree::size`], [`AvlTree::validate`] and
//! [`AvlTree::dump`].
//!
//! None of these take node locks. They are memory-safe under concurrent
//! writes (every link is loaded through the guard) but their answers are only
//! meaningful when no writer is running.
//!
//! Walks use explicit stacks so a degenerate tree cannot overflow the call
//! stack.

use std::collections::HashMap;
use std::fmt as StdFmt;
use std::fmt::Write as _;

use seize::LocalGuard;

use crate::alloc::NodeAllocator;
use crate::node::{ABSENT, Direction, Node};

use super::AvlTree;

// ============================================================================
//  InvariantViolation
// ============================================================================

/// A structural invariant found broken by [`AvlTree::validate`].
///
/// Indicates a bug in the tree, not a condition callers are expected to
/// handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvariantViolation {
    /// Keys out of order.
    BstOrder {
        /// Number of nodes outside the key range implied by their ancestors.
        violations: usize,
    },

    /// Sibling subtrees differ in height by more than one.
    AvlBalance {
        /// Number of unbalanced nodes.
        violations: usize,
    },
}

impl StdFmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::BstOrder { violations } => {
                write!(f, "BST order violated at {violations} node(s)")
            }
            Self::AvlBalance { violations } => {
                write!(f, "AVL balance violated at {violations} node(s)")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

// ============================================================================
//  ValidationReport
// ============================================================================

/// Result of a structural walk over the tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationReport {
    /// Nodes below the holder, routing nodes included.
    pub total_nodes: usize,

    /// Nodes holding a value.
    pub value_nodes: usize,

    /// Nodes without a value (left behind by removals).
    pub routing_nodes: usize,

    /// Routing nodes with fewer than two children. Zero at quiescence.
    pub unlink_eligible: usize,

    /// Nodes with at least one missing child.
    pub total_paths: usize,

    /// Shallowest depth of a node with a missing child (root is depth 1).
    pub min_path_len: usize,

    /// Deepest depth of a node with a missing child.
    pub max_path_len: usize,

    /// Height of the root, recomputed from the links (0 when empty).
    pub height: usize,

    /// Nodes outside the key range implied by their ancestors.
    pub bst_violations: usize,

    /// Nodes whose recomputed child heights differ by more than one.
    pub avl_violations: usize,

    /// Nodes whose cached height differs from the recomputed one.
    pub height_mismatches: usize,
}

impl ValidationReport {
    /// True if keys are ordered and every node is balanced.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.bst_violations == 0 && self.avl_violations == 0
    }

    /// Convert into a `Result`, reporting key order before balance.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    pub const fn into_result(self) -> Result<Self, InvariantViolation> {
        if self.bst_violations > 0 {
            return Err(InvariantViolation::BstOrder {
                violations: self.bst_violations,
            });
        }

        if self.avl_violations > 0 {
            return Err(InvariantViolation::AvlBalance {
                violations: self.avl_violations,
            });
        }

        Ok(self)
    }
}

const fn verdict(ok: bool) -> &'static str {
    if ok { "No [OK]" } else { "Yes [ERROR]" }
}

impl StdFmt::Display for ValidationReport {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        writeln!(f, "Validation:")?;
        writeln!(f, "=======================")?;
        writeln!(
            f,
            "  Valid AVL Tree: {}",
            if self.is_valid() { "Yes [OK]" } else { "No [ERROR]" }
        )?;
        writeln!(f, "  AVL Violation: {}", verdict(self.avl_violations == 0))?;
        writeln!(f, "  BST Violation: {}", verdict(self.bst_violations == 0))?;
        writeln!(f, "  Total nodes: {}", self.total_nodes)?;
        writeln!(
            f,
            "  Value/routing nodes: {}/{} ({} unlinkable)",
            self.value_nodes, self.routing_nodes, self.unlink_eligible
        )?;
        writeln!(f, "  Total paths: {}", self.total_paths)?;
        writeln!(
            f,
            "  Min/max paths length: {}/{}",
            self.min_path_len, self.max_path_len
        )?;
        writeln!(f, "  Height: {}", self.height)?;
        write!(f, "  Stale cached heights: {}", self.height_mismatches)
    }
}

// ============================================================================
//  Walks
// ============================================================================

/// A node visited by [`AvlTree::validate`], in pre-order.
struct Visit<'g, K> {
    node: &'g Node<K>,
    depth: usize,
}

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    /// The real root, if the tree has one.
    fn root<'g>(&'g self, guard: &'g LocalGuard<'_>) -> Option<&'g Node<K>> {
        self.holder(guard).child(Direction::Right, guard)
    }

    /// Count the keys that hold a value by walking the tree.
    ///
    /// O(n). Only exact when no writer is running; prefer [`len`](Self::len)
    /// for a cheap estimate.
    #[must_use]
    pub fn size(&self) -> usize {
        let guard = self.guard();
        let mut stack: Vec<&Node<K>> = self.root(&guard).into_iter().collect();
        let mut count: usize = 0;

        while let Some(node) = stack.pop() {
            if node.version().is_unlinked() {
                continue;
            }

            if node.value() != ABSENT {
                count += 1;
            }

            stack.extend(node.child(Direction::Left, &guard));
            stack.extend(node.child(Direction::Right, &guard));
        }

        count
    }

    /// Check key order and AVL balance, and gather shape statistics.
    ///
    /// Balance is checked on heights recomputed from the links, not on the
    /// cached heights; stale caches are counted separately in
    /// [`ValidationReport::height_mismatches`].
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let guard = self.guard();
        let mut report = ValidationReport {
            min_path_len: usize::MAX,
            ..ValidationReport::default()
        };

        // Pre-order with the key range each node must fall in.
        let mut order: Vec<Visit<'_, K>> = Vec::new();
        let mut stack: Vec<(&Node<K>, usize, Option<K>, Option<K>)> = Vec::new();
        if let Some(root) = self.root(&guard) {
            stack.push((root, 1, None, None));
        }

        while let Some((node, depth, lo, hi)) = stack.pop() {
            let key: K = *node.key();
            let left: Option<&Node<K>> = node.child(Direction::Left, &guard);
            let right: Option<&Node<K>> = node.child(Direction::Right, &guard);

            report.total_nodes += 1;

            if lo.is_some_and(|lo| key <= lo) || hi.is_some_and(|hi| key >= hi) {
                report.bst_violations += 1;
            }

            if node.value() == ABSENT {
                report.routing_nodes += 1;
                if left.is_none() || right.is_none() {
                    report.unlink_eligible += 1;
                }
            } else {
                report.value_nodes += 1;
            }

            if left.is_none() || right.is_none() {
                report.total_paths += 1;
                report.min_path_len = report.min_path_len.min(depth);
                report.max_path_len = report.max_path_len.max(depth);
            }

            if let Some(right) = right {
                stack.push((right, depth + 1, Some(key), hi));
            }
            if let Some(left) = left {
                stack.push((left, depth + 1, lo, Some(key)));
            }

            order.push(Visit { node, depth });
        }

        if report.total_paths == 0 {
            report.min_path_len = 0;
        }

        // Children come after their parent in pre-order, so a reverse pass
        // sees every child before its parent.
        let mut heights: HashMap<*const Node<K>, usize> = HashMap::with_capacity(order.len());
        let height_of = |heights: &HashMap<*const Node<K>, usize>, child: Option<&Node<K>>| {
            child.map_or(0, |c| heights.get(&std::ptr::from_ref(c)).copied().unwrap_or(0))
        };

        for visit in order.iter().rev() {
            let node: &Node<K> = visit.node;
            let hl: usize = height_of(&heights, node.child(Direction::Left, &guard));
            let hr: usize = height_of(&heights, node.child(Direction::Right, &guard));

            if hl.abs_diff(hr) > 1 {
                report.avl_violations += 1;
            }

            let height: usize = 1 + hl.max(hr);
            if usize::try_from(node.height()).ok() != Some(height) {
                report.height_mismatches += 1;
            }

            heights.insert(std::ptr::from_ref(node), height);
        }

        report.height = order
            .first()
            .filter(|visit| visit.depth == 1)
            .map_or(0, |root| height_of(&heights, Some(root.node)));

        report
    }
}

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync + StdFmt::Debug,
    A: NodeAllocator<K>,
{
    /// Render the tree sideways: right subtree first, one `|--` per level,
    /// each node as `key[height]`, and `NULL` for a missing child.
    ///
    /// ```rust
    /// use optavl::AvlTree;
    ///
    /// let tree: AvlTree<u32> = AvlTree::new();
    /// assert_eq!(tree.dump(), "[empty]\n");
    ///
    /// tree.insert(1, 1);
    /// assert_eq!(tree.dump(), "|--NULL\n1[1]\n|--NULL\n");
    /// ```
    #[must_use]
    pub fn dump(&self) -> String {
        let guard = self.guard();
        let mut out = String::new();

        let Some(root) = self.root(&guard) else {
            out.push_str("[empty]\n");
            return out;
        };

        // Reverse in-order: right, node, left.
        enum Step<'g, K> {
            Expand(Option<&'g Node<K>>, usize),
            Emit(&'g Node<K>, usize),
        }

        let mut stack: Vec<Step<'_, K>> = vec![Step::Expand(Some(root), 0)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Expand(None, level) => {
                    out.push_str(&"|--".repeat(level));
                    out.push_str("NULL\n");
                }
                Step::Expand(Some(node), level) => {
                    stack.push(Step::Expand(node.child(Direction::Left, &guard), level + 1));
                    stack.push(Step::Emit(node, level));
                    stack.push(Step::Expand(node.child(Direction::Right, &guard), level + 1));
                }
                Step::Emit(node, level) => {
                    out.push_str(&"|--".repeat(level));
                    // Writing to a String cannot fail.
                    let _ = writeln!(out, "{:?}[{}]", node.key(), node.height());
                }
            }
        }

        out
    }
}
