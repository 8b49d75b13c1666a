//! Property-based tests for `AvlTree`.
//!
//! Single-threaded operation sequences are checked against `BTreeMap` as an
//! oracle, and the tree is validated after every sequence: keys in order,
//! every node balanced, cached heights exact, no unlinkable routing node left
//! behind.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use std::collections::BTreeMap;

use optavl::{ArenaAllocator, AvlTree, InvariantViolation, NodeAllocator};
use proptest::prelude::*;

// ============================================================================
//  Strategies
// ============================================================================

/// Small key space so sequences hit existing keys often.
fn key() -> impl Strategy<Value = i32> {
    -64..64i32
}

/// Non-zero values (0 is the absent sentinel).
fn value() -> impl Strategy<Value = usize> {
    1..=1_000usize
}

/// Operations for random testing.
#[derive(Debug, Clone)]
enum Op {
    Insert(i32, usize),
    Remove(i32),
    Get(i32),
    Put(i32, usize),
    Replace(i32, usize),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            4 => (key(), value()).prop_map(|(k, v)| Op::Insert(k, v)),
            3 => key().prop_map(Op::Remove),
            2 => key().prop_map(Op::Get),
            1 => (key(), value()).prop_map(|(k, v)| Op::Put(k, v)),
            1 => (key(), value()).prop_map(|(k, v)| Op::Replace(k, v)),
        ],
        0..=max_ops,
    )
}

/// Apply `ops` to the tree and the oracle, asserting every result matches.
fn run_differential<A: NodeAllocator<i32>>(
    tree: &AvlTree<i32, A>,
    ops: Vec<Op>,
) -> Result<BTreeMap<i32, usize>, TestCaseError> {
    let mut oracle: BTreeMap<i32, usize> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(k, v) => {
                let expected = !oracle.contains_key(&k);
                if expected {
                    oracle.insert(k, v);
                }
                prop_assert_eq!(tree.insert(k, v), expected, "insert {}", k);
            }
            Op::Remove(k) => {
                prop_assert_eq!(tree.remove(&k), oracle.remove(&k), "remove {}", k);
            }
            Op::Get(k) => {
                prop_assert_eq!(tree.get(&k), oracle.get(&k).copied(), "get {}", k);
            }
            Op::Put(k, v) => {
                prop_assert_eq!(tree.put(k, v), oracle.insert(k, v), "put {}", k);
            }
            Op::Replace(k, v) => {
                let expected = oracle.get_mut(&k).map(|slot| std::mem::replace(slot, v));
                prop_assert_eq!(tree.replace(k, v), expected, "replace {}", k);
            }
        }
    }

    Ok(oracle)
}

fn check_quiescent<A: NodeAllocator<i32>>(
    tree: &AvlTree<i32, A>,
    oracle: &BTreeMap<i32, usize>,
) -> Result<(), TestCaseError> {
    let report = tree.validate();

    prop_assert!(report.is_valid(), "{}", report);
    prop_assert_eq!(report.height_mismatches, 0, "{}", report);
    prop_assert_eq!(report.unlink_eligible, 0, "{}", report);
    prop_assert_eq!(report.value_nodes, oracle.len());
    prop_assert_eq!(tree.size(), oracle.len());
    prop_assert_eq!(tree.len(), oracle.len());

    for (k, v) in oracle {
        prop_assert_eq!(tree.get(k), Some(*v));
    }

    Ok(())
}

// ============================================================================
//  Differential Testing Against BTreeMap
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Random operation sequences should match BTreeMap behavior.
    #[test]
    fn differential_random_ops(ops in operations(200)) {
        common::init_tracing();

        let tree: AvlTree<i32> = AvlTree::new();
        let oracle = run_differential(&tree, ops)?;
        check_quiescent(&tree, &oracle)?;
    }

    /// The arena allocator changes reclamation only, never results.
    #[test]
    fn differential_with_arena(ops in operations(200)) {
        let tree: AvlTree<i32, ArenaAllocator<i32>> =
            AvlTree::with_allocator(ArenaAllocator::new());
        let oracle = run_differential(&tree, ops)?;
        check_quiescent(&tree, &oracle)?;
    }

    /// Every retired node was once allocated, and the holder is never retired.
    #[test]
    fn retired_never_exceeds_allocated(ops in operations(200)) {
        let tree: AvlTree<i32> = AvlTree::new();
        run_differential(&tree, ops)?;

        let alloc = tree.allocator();
        prop_assert!(alloc.retired_count() < alloc.allocated_count());
        prop_assert_eq!(
            alloc.allocated_count() - alloc.retired_count() - 1,
            tree.validate().total_nodes
        );
    }
}

// ============================================================================
//  Shape Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any insertion order of n distinct keys yields an AVL-height tree.
    #[test]
    fn height_is_logarithmic(keys in prop::collection::hash_set(any::<u32>(), 1..500)) {
        let tree: AvlTree<u32> = AvlTree::new();
        for &k in &keys {
            prop_assert!(tree.insert(k, 1));
        }

        let report = tree.validate();
        prop_assert!(report.is_valid(), "{}", report);

        // AVL bound: h < 1.4405 * log2(n + 2) - 0.3277
        let n = keys.len() as f64;
        let bound = 1.4405f64.mul_add((n + 2.0).log2(), -0.3277);
        prop_assert!(
            (report.height as f64) < bound,
            "height {} for {} keys",
            report.height,
            keys.len()
        );
    }

    /// Removing every key leaves an empty tree with no nodes at all.
    #[test]
    fn remove_all_empties_tree(keys in prop::collection::vec(key(), 0..200)) {
        let tree: AvlTree<i32> = AvlTree::new();
        for &k in &keys {
            tree.insert(k, 1);
        }
        for &k in &keys {
            tree.remove(&k);
        }

        let report = tree.validate();
        prop_assert_eq!(report.total_nodes, 0, "{}", report);
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.dump(), "[empty]\n");
    }

    /// Zero is never stored, whatever the entry point.
    #[test]
    fn zero_value_is_rejected(k in key(), v in value()) {
        let tree: AvlTree<i32> = AvlTree::new();

        prop_assert!(!tree.insert(k, 0));
        prop_assert_eq!(tree.put(k, 0), None);
        prop_assert!(tree.is_empty());

        tree.insert(k, v);
        prop_assert_eq!(tree.replace(k, 0), None);
        prop_assert_eq!(tree.get(&k), Some(v));
    }
}

// ============================================================================
//  Report Plumbing
// ============================================================================

#[test]
fn valid_report_converts_to_ok() {
    let tree: AvlTree<i32> = AvlTree::new();
    for k in 0..100 {
        tree.insert(k, 1);
    }

    let report = tree.validate().into_result().unwrap();
    assert_eq!(report.value_nodes, 100);

    let err: Box<dyn std::error::Error> = Box::new(InvariantViolation::BstOrder { violations: 1 });
    assert_eq!(err.to_string(), "BST order violated at 1 node(s)");
}
