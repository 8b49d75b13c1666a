//! Loom tests for NodeVersion.
//!
//! Loom provides deterministic concurrency testing by exploring all possible
//! thread interleavings. This catches subtle race conditions that random
//! testing might miss.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --lib nodeversion::loom_tests`
//!
//! NOTE: Loom tests use loom's own atomic types, so we mirror the version word
//! with loom atomics to test the shrink/validate protocol itself.

use loom::sync::Arc;
use loom::sync::atomic::{AtomicU64, Ordering};
use loom::thread;

// Bit constants (same as main module)
const UNLINKED: u64 = 1 << 0;
const SHRINKING_BIT: u64 = 1 << 1;
const GENERATION_LOWBIT: u64 = 1 << 2;

/// Version word plus one protected link, mirrored with loom atomics.
struct LoomNode {
    version: AtomicU64,
    link: AtomicU64,
}

impl LoomNode {
    fn new(link: u64) -> Self {
        Self {
            version: AtomicU64::new(0),
            link: AtomicU64::new(link),
        }
    }

    /// Writer side: shrink, relink, commit. Caller is the only writer.
    fn relink(&self, link: u64) {
        let before = self.version.load(Ordering::Relaxed);
        self.version
            .store(before | SHRINKING_BIT, Ordering::Release);
        self.link.store(link, Ordering::Release);
        self.version.store(
            (before & !SHRINKING_BIT) + GENERATION_LOWBIT,
            Ordering::Release,
        );
    }

    fn unlink(&self) {
        self.version.store(UNLINKED, Ordering::Release);
    }

    /// Reader side: one validated attempt.
    fn try_read(&self) -> Option<u64> {
        let v = self.version.load(Ordering::Acquire);
        if v & (SHRINKING_BIT | UNLINKED) != 0 {
            return None;
        }

        let link = self.link.load(Ordering::Acquire);

        if self.version.load(Ordering::Acquire) != v {
            return None;
        }

        Some(link)
    }
}

/// A validated read observes either the old link or the new one, never a link
/// that was published while the reader's snapshot still looked current.
#[test]
fn test_loom_validated_read_is_not_torn() {
    loom::model(|| {
        let node = Arc::new(LoomNode::new(10));

        let writer = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.relink(20))
        };

        let reader = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.try_read())
        };

        writer.join().unwrap();

        if let Some(link) = reader.join().unwrap() {
            assert!(link == 10 || link == 20);
        }

        // After the writer finished, a fresh read must see the new link.
        assert_eq!(node.try_read(), Some(20));
    });
}

/// Readers never validate against an unlinked node.
#[test]
fn test_loom_unlinked_never_validates() {
    loom::model(|| {
        let node = Arc::new(LoomNode::new(7));

        let writer = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.unlink())
        };

        let reader = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.try_read())
        };

        writer.join().unwrap();
        let _ = reader.join().unwrap();

        assert_eq!(node.try_read(), None);
    });
}

/// Two relinks serialized by the caller bump the generation twice.
#[test]
fn test_loom_generation_counts_commits() {
    loom::model(|| {
        let node = Arc::new(LoomNode::new(0));

        let writer = {
            let node = Arc::clone(&node);
            thread::spawn(move || {
                node.relink(1);
                node.relink(2);
            })
        };

        let reader = {
            let node = Arc::clone(&node);
            thread::spawn(move || node.try_read())
        };

        writer.join().unwrap();
        if let Some(link) = reader.join().unwrap() {
            assert!(link <= 2);
        }

        assert_eq!(node.version.load(Ordering::Acquire), 2 * GENERATION_LOWBIT);
    });
}
