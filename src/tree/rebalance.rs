//! Height repair and rotations.
//!
//! After every structural change the writer hands a [`Repair`] to
//! [`AvlTree::fix_height_and_rebalance`], which climbs toward the holder:
//!
//! | condition           | locks taken        | action                        |
//! |---------------------|--------------------|-------------------------------|
//! | `Nothing`           | node               | stop                          |
//! | `HeightStale(h)`    | node               | store `h`, recheck the parent |
//! | `UnlinkRequired`    | parent, node       | splice node out               |
//! | `RebalanceRequired` | parent, node, +1-2 | rotate                        |
//!
//! Rotations use heights read under the locks they hold. A node whose subtree
//! loses keys (it moves down) is put into `Shrinking` for the duration of the
//! relink, so optimistic readers that passed through it retry. Nodes that move
//! up only gain keys and are not versioned.
//!
//! A child's height is only read under its parent's lock, and a child's
//! parent link only changes under its old parent's lock. After storing a new
//! height the climb therefore locks the parent and checks that the child still
//! hangs there ([`Repair::ParentOf`]). If a rotation moved it, the climb
//! follows it to the new parent, which may hold a height computed from the
//! old value.
//!
//! Every `*_nl` function requires the locks of the nodes it mutates and
//! returns where the climb goes next.

use seize::LocalGuard;

use crate::alloc::NodeAllocator;
use crate::node::{ABSENT, Condition, Direction, Node};
use crate::nodeversion::ShrinkGuard;
use crate::tracing_helpers::trace_log;

use super::AvlTree;
use super::stats::{DEFERRED_UNLINK_COUNT, ROTATION_COUNT, bump};

// ============================================================================
//  Repair
// ============================================================================

/// Where the climb goes next.
pub(super) enum Repair<'g, K> {
    /// Nothing left to do on this path.
    Done,

    /// The node itself needs a look: unlink, rotation or height.
    Node(&'g Node<K>),

    /// The node's height changed under its own lock. Its current parent must
    /// be rechecked under the parent's lock.
    ParentOf(&'g Node<K>),
}

impl<K> Clone for Repair<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Repair<'_, K> {}

impl<K> Repair<'_, K> {
    #[inline]
    const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A rotation can leave a node below it and the parent above it to revisit.
type Followup<'g, K> = (Repair<'g, K>, Repair<'g, K>);

#[inline]
const fn only<K>(next: Repair<'_, K>) -> Followup<'_, K> {
    (next, Repair::Done)
}

#[inline]
const fn out_of_balance(bal: i32) -> bool {
    bal < -1 || bal > 1
}

/// Which slot of `parent` holds `child`, read under `parent`'s lock.
#[inline]
fn slot_of<K>(parent: &Node<K>, child: &Node<K>) -> Direction {
    if parent.is_child(Direction::Left, child) {
        Direction::Left
    } else {
        Direction::Right
    }
}

impl<K, A> AvlTree<K, A>
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    // ========================================================================
    //  Height repair
    // ========================================================================

    /// Repair `node`'s height if that is all it needs. Requires `node`'s lock.
    pub(super) fn fix_height_nl<'g>(
        node: &'g Node<K>,
        guard: &'g LocalGuard<'_>,
    ) -> Repair<'g, K> {
        match node.condition(guard) {
            Condition::RebalanceRequired | Condition::UnlinkRequired => Repair::Node(node),
            Condition::Nothing => Repair::Done,
            Condition::HeightStale(height) => {
                node.set_height(height);
                Repair::ParentOf(node)
            }
        }
    }

    /// Climb from `start` toward the holder, repairing as needed.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub(super) fn fix_height_and_rebalance<'g>(
        &self,
        start: Repair<'g, K>,
        guard: &'g LocalGuard<'_>,
    ) {
        // Rarely more than one entry deep.
        let mut pending: Vec<Repair<'g, K>> = Vec::new();
        let mut next: Repair<'g, K> = start;

        loop {
            let (first, second) = match next {
                Repair::Done => match pending.pop() {
                    Some(later) => {
                        next = later;
                        continue;
                    }
                    None => return,
                },
                Repair::ParentOf(child) => only(Self::recheck_parent(child, guard)),
                Repair::Node(n) => self.repair_node(n, guard),
            };

            if !second.is_done() {
                pending.push(second);
            }
            next = first;
        }
    }

    /// `child`'s height changed: recheck whichever node is its parent now.
    fn recheck_parent<'g>(child: &'g Node<K>, guard: &'g LocalGuard<'_>) -> Repair<'g, K> {
        if child.version().is_unlinked() {
            // Whoever unlinked it rechecks the node it spliced into.
            return Repair::Done;
        }

        let Some(parent) = child.parent(guard) else {
            return Repair::Done;
        };

        let _lock = parent.lock();

        if !child.has_parent(parent) {
            // Moved by a rotation after we loaded the parent.
            return Repair::ParentOf(child);
        }

        if parent.parent(guard).is_none() {
            // The holder carries no height.
            return Repair::Done;
        }

        Self::fix_height_nl(parent, guard)
    }

    /// Look at `n` itself and do what its condition asks for.
    fn repair_node<'g>(&self, n: &'g Node<K>, guard: &'g LocalGuard<'_>) -> Followup<'g, K> {
        let Some(n_parent) = n.parent(guard) else {
            return only(Repair::Done);
        };

        if n.version().is_unlinked() {
            return only(Repair::Done);
        }

        match n.condition(guard) {
            Condition::Nothing | Condition::HeightStale(_) => {
                let _lock = n.lock();
                if n.version().is_unlinked() {
                    return only(Repair::Done);
                }
                only(Self::fix_height_nl(n, guard))
            }
            Condition::UnlinkRequired | Condition::RebalanceRequired => {
                let _parent_lock = n_parent.lock();

                if n_parent.version().is_unlinked() || !n.has_parent(n_parent) {
                    // The parent moved: reload it and try again.
                    return only(Repair::Node(n));
                }

                let _lock = n.lock();
                self.rebalance_nl(n_parent, n, guard)
            }
        }
    }

    /// Unlink or rotate `n`. Requires the locks of `n_parent` and `n`.
    fn rebalance_nl<'g>(
        &self,
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let nl: Option<&'g Node<K>> = n.child(Direction::Left, guard);
        let nr: Option<&'g Node<K>> = n.child(Direction::Right, guard);

        if (nl.is_none() || nr.is_none()) && n.value() == ABSENT {
            if self.attempt_unlink_nl(n_parent, n, guard) {
                bump(&DEFERRED_UNLINK_COUNT);
                return only(Self::fix_height_nl(n_parent, guard));
            }

            return only(Repair::Node(n));
        }

        let hn: i32 = n.height();
        let hl0: i32 = Node::height_of(nl);
        let hr0: i32 = Node::height_of(nr);
        let hnrepl: i32 = 1 + hl0.max(hr0);
        let bal: i32 = hl0 - hr0;

        match (nl, nr) {
            (Some(nl), _) if bal > 1 => Self::rebalance_to_right_nl(n_parent, n, nl, hr0, guard),
            (_, Some(nr)) if bal < -1 => Self::rebalance_to_left_nl(n_parent, n, nr, hl0, guard),
            _ if hnrepl != hn => {
                n.set_height(hnrepl);
                only(Self::fix_height_nl(n_parent, guard))
            }
            _ => only(Repair::Done),
        }
    }

    // ========================================================================
    //  Rotation selection
    // ========================================================================

    /// `n` is left-heavy. Requires the locks of `n_parent` and `n`.
    fn rebalance_to_right_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        nl: &'g Node<K>,
        hr0: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let _nl_lock = nl.lock();

        let hl: i32 = nl.height();
        if hl - hr0 <= 1 {
            return only(Repair::Node(n));
        }

        let nlr: Option<&'g Node<K>> = nl.child(Direction::Right, guard);
        let hll0: i32 = Node::height_of(nl.child(Direction::Left, guard));
        let hlr0: i32 = Node::height_of(nlr);

        if hll0 >= hlr0 {
            return Self::rotate_right_nl(n_parent, n, nl, hr0, hll0, nlr, hlr0, guard);
        }

        // hlr0 > hll0 >= 0, so nl has a right child.
        let Some(nlr) = nlr else {
            return only(Repair::Node(n));
        };

        {
            let _nlr_lock = nlr.lock();

            let hlr: i32 = nlr.height();
            if hll0 >= hlr {
                return Self::rotate_right_nl(n_parent, n, nl, hr0, hll0, Some(nlr), hlr, guard);
            }

            let hlrl: i32 = Node::height_of(nlr.child(Direction::Left, guard));
            let b: i32 = hll0 - hlrl;

            // A double rotation that leaves nl as an unlinkable routing node
            // would be wasted; rotate nl first instead.
            if !out_of_balance(b) && !((hll0 == 0 || hlrl == 0) && nl.value() == ABSENT) {
                return Self::rotate_right_over_left_nl(
                    n_parent, n, nl, hr0, hll0, nlr, hlrl, guard,
                );
            }
        }

        // n_parent, n and nl stay locked while nl is rotated under n. With
        // nlr and its child that is up to five locks, all taken top-down.
        Self::rebalance_to_left_nl(n, nl, nlr, hll0, guard)
    }

    /// `n` is right-heavy. Requires the locks of `n_parent` and `n`.
    fn rebalance_to_left_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        nr: &'g Node<K>,
        hl0: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let _nr_lock = nr.lock();

        let hr: i32 = nr.height();
        if hl0 - hr >= -1 {
            return only(Repair::Node(n));
        }

        let nrl: Option<&'g Node<K>> = nr.child(Direction::Left, guard);
        let hrl0: i32 = Node::height_of(nrl);
        let hrr0: i32 = Node::height_of(nr.child(Direction::Right, guard));

        if hrr0 >= hrl0 {
            return Self::rotate_left_nl(n_parent, n, hl0, nr, nrl, hrl0, hrr0, guard);
        }

        let Some(nrl) = nrl else {
            return only(Repair::Node(n));
        };

        {
            let _nrl_lock = nrl.lock();

            let hrl: i32 = nrl.height();
            if hrr0 >= hrl {
                return Self::rotate_left_nl(n_parent, n, hl0, nr, Some(nrl), hrl, hrr0, guard);
            }

            let hrlr: i32 = Node::height_of(nrl.child(Direction::Right, guard));
            let b: i32 = hrr0 - hrlr;

            if !out_of_balance(b) && !((hrr0 == 0 || hrlr == 0) && nr.value() == ABSENT) {
                return Self::rotate_left_over_right_nl(
                    n_parent, n, hl0, nr, nrl, hrr0, hrlr, guard,
                );
            }
        }

        // Mirror of the fallback above: up to five locks, taken top-down.
        Self::rebalance_to_right_nl(n, nr, nrl, hrr0, guard)
    }

    // ========================================================================
    //  Rotations
    // ========================================================================

    /// ```text
    ///        n              nl
    ///       / \            /  \
    ///     nl   r   =>    ll    n
    ///    /  \                 / \
    ///  ll    nlr            nlr  r
    /// ```
    #[expect(clippy::too_many_arguments, reason = "heights are captured under lock")]
    fn rotate_right_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        nl: &'g Node<K>,
        hr: i32,
        hll: i32,
        nlr: Option<&'g Node<K>>,
        hlr: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let slot: Direction = slot_of(n_parent, n);
        let shrink: ShrinkGuard<'_> = n.version().begin_shrink();

        n.set_child(Direction::Left, nlr);
        if let Some(nlr) = nlr {
            nlr.set_parent(n);
        }

        nl.set_child(Direction::Right, Some(n));
        n.set_parent(nl);

        n_parent.set_child(slot, Some(nl));
        nl.set_parent(n_parent);

        let hnrepl: i32 = 1 + hlr.max(hr);
        n.set_height(hnrepl);
        nl.set_height(1 + hll.max(hnrepl));

        drop(shrink);
        bump(&ROTATION_COUNT);
        trace_log!(shape = "right", "rotation");

        let up: Repair<'g, K> = Self::fix_height_nl(n_parent, guard);

        if out_of_balance(hlr - hr) || ((nlr.is_none() || hr == 0) && n.value() == ABSENT) {
            return (Repair::Node(n), up);
        }

        if out_of_balance(hll - hnrepl) || (hll == 0 && nl.value() == ABSENT) {
            return (Repair::Node(nl), up);
        }

        only(up)
    }

    /// Mirror of [`rotate_right_nl`](Self::rotate_right_nl).
    #[expect(clippy::too_many_arguments, reason = "heights are captured under lock")]
    fn rotate_left_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        hl: i32,
        nr: &'g Node<K>,
        nrl: Option<&'g Node<K>>,
        hrl: i32,
        hrr: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let slot: Direction = slot_of(n_parent, n);
        let shrink: ShrinkGuard<'_> = n.version().begin_shrink();

        n.set_child(Direction::Right, nrl);
        if let Some(nrl) = nrl {
            nrl.set_parent(n);
        }

        nr.set_child(Direction::Left, Some(n));
        n.set_parent(nr);

        n_parent.set_child(slot, Some(nr));
        nr.set_parent(n_parent);

        let hnrepl: i32 = 1 + hl.max(hrl);
        n.set_height(hnrepl);
        nr.set_height(1 + hnrepl.max(hrr));

        drop(shrink);
        bump(&ROTATION_COUNT);
        trace_log!(shape = "left", "rotation");

        let up: Repair<'g, K> = Self::fix_height_nl(n_parent, guard);

        if out_of_balance(hrl - hl) || ((nrl.is_none() || hl == 0) && n.value() == ABSENT) {
            return (Repair::Node(n), up);
        }

        if out_of_balance(hrr - hnrepl) || (hrr == 0 && nr.value() == ABSENT) {
            return (Repair::Node(nr), up);
        }

        only(up)
    }

    /// ```text
    ///         n                 nlr
    ///        / \              /     \
    ///      nl   r    =>     nl       n
    ///     /  \             /  \     / \
    ///   ll   nlr         ll  nlrl nlrr r
    ///        /  \
    ///     nlrl  nlrr
    /// ```
    #[expect(clippy::too_many_arguments, reason = "heights are captured under lock")]
    fn rotate_right_over_left_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        nl: &'g Node<K>,
        hr: i32,
        hll: i32,
        nlr: &'g Node<K>,
        hlrl: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let slot: Direction = slot_of(n_parent, n);
        let nlrl: Option<&'g Node<K>> = nlr.child(Direction::Left, guard);
        let nlrr: Option<&'g Node<K>> = nlr.child(Direction::Right, guard);
        let hlrr: i32 = Node::height_of(nlrr);

        let n_shrink: ShrinkGuard<'_> = n.version().begin_shrink();
        let nl_shrink: ShrinkGuard<'_> = nl.version().begin_shrink();

        n.set_child(Direction::Left, nlrr);
        if let Some(nlrr) = nlrr {
            nlrr.set_parent(n);
        }

        nl.set_child(Direction::Right, nlrl);
        if let Some(nlrl) = nlrl {
            nlrl.set_parent(nl);
        }

        nlr.set_child(Direction::Left, Some(nl));
        nl.set_parent(nlr);
        nlr.set_child(Direction::Right, Some(n));
        n.set_parent(nlr);

        n_parent.set_child(slot, Some(nlr));
        nlr.set_parent(n_parent);

        let hnrepl: i32 = 1 + hlrr.max(hr);
        n.set_height(hnrepl);
        let hlrepl: i32 = 1 + hll.max(hlrl);
        nl.set_height(hlrepl);
        nlr.set_height(1 + hlrepl.max(hnrepl));

        drop(n_shrink);
        drop(nl_shrink);
        bump(&ROTATION_COUNT);
        trace_log!(shape = "right-over-left", "rotation");

        let up: Repair<'g, K> = Self::fix_height_nl(n_parent, guard);

        if out_of_balance(hlrr - hr) || ((nlrr.is_none() || hr == 0) && n.value() == ABSENT) {
            return (Repair::Node(n), up);
        }

        if out_of_balance(hlrepl - hnrepl) {
            return (Repair::Node(nlr), up);
        }

        only(up)
    }

    /// Mirror of [`rotate_right_over_left_nl`](Self::rotate_right_over_left_nl).
    #[expect(clippy::too_many_arguments, reason = "heights are captured under lock")]
    fn rotate_left_over_right_nl<'g>(
        n_parent: &'g Node<K>,
        n: &'g Node<K>,
        hl: i32,
        nr: &'g Node<K>,
        nrl: &'g Node<K>,
        hrr: i32,
        hrlr: i32,
        guard: &'g LocalGuard<'_>,
    ) -> Followup<'g, K> {
        let slot: Direction = slot_of(n_parent, n);
        let nrll: Option<&'g Node<K>> = nrl.child(Direction::Left, guard);
        let nrlr: Option<&'g Node<K>> = nrl.child(Direction::Right, guard);
        let hrll: i32 = Node::height_of(nrll);

        let n_shrink: ShrinkGuard<'_> = n.version().begin_shrink();
        let nr_shrink: ShrinkGuard<'_> = nr.version().begin_shrink();

        n.set_child(Direction::Right, nrll);
        if let Some(nrll) = nrll {
            nrll.set_parent(n);
        }

        nr.set_child(Direction::Left, nrlr);
        if let Some(nrlr) = nrlr {
            nrlr.set_parent(nr);
        }

        nrl.set_child(Direction::Right, Some(nr));
        nr.set_parent(nrl);
        nrl.set_child(Direction::Left, Some(n));
        n.set_parent(nrl);

        n_parent.set_child(slot, Some(nrl));
        nrl.set_parent(n_parent);

        let hnrepl: i32 = 1 + hl.max(hrll);
        n.set_height(hnrepl);
        let hrrepl: i32 = 1 + hrlr.max(hrr);
        nr.set_height(hrrepl);
        nrl.set_height(1 + hnrepl.max(hrrepl));

        drop(n_shrink);
        drop(nr_shrink);
        bump(&ROTATION_COUNT);
        trace_log!(shape = "left-over-right", "rotation");

        let up: Repair<'g, K> = Self::fix_height_nl(n_parent, guard);

        if out_of_balance(hrll - hl) || ((nrll.is_none() || hl == 0) && n.value() == ABSENT) {
            return (Repair::Node(n), up);
        }

        if out_of_balance(hrrepl - hnrepl) {
            return (Repair::Node(nrl), up);
        }

        only(up)
    }
}
