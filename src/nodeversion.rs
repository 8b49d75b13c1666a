//! Filepath: src/nodeversion.rs
//!
//! Node version for optimistic concurrency control.
//!
//! [`NodeVersion`] packs a node's structural state into a single `u64` so that
//! "read version, decide, act" stays one atomic observation. The packed word
//! decodes into a [`VersionState`]:
//!
//! - `Stable { generation }`: the shape below this node is not being shrunk.
//!   The generation increases every time a shrink commits.
//! - `Shrinking`: a rotation is moving keys out of this node's subtree.
//! - `Unlinked`: terminal. The node has been spliced out of the tree.
//!
//! # Concurrency Model
//! 1. Readers: call [`NodeVersion::load`], read a child link, then call
//!    [`NodeVersion::has_changed`] with the snapshot. Any change means the
//!    read may have raced a rotation and must be retried.
//! 2. Writers: hold the node's lock, call [`NodeVersion::begin_shrink`] to get a
//!    [`ShrinkGuard`], relink, and let the guard drop to commit
//!    `Stable { generation + 1 }`.
//!
//! # Type-State Pattern
//! The [`ShrinkGuard`] is the only way to put a node into the `Shrinking` state,
//! and the only way out of it. The guard commits on drop (panic-safe), so a
//! node can never be left shrinking.
//!
//! ```rust,ignore
//! let _lock = node.lock();
//! let shrink = node.version().begin_shrink();
//! // relink children
//! drop(shrink); // Stable { generation + 1 }
//! ```

use std::marker::PhantomData;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, fence};

use crate::ordering::{FENCE_ORD, PUBLISH_ORD, RELAXED, VERSION_ORD};


#[cfg(loom)]
mod loom_tests;

// ============================================================================
//  Bit Constants
// ============================================================================

/// Raw value of the terminal unlinked state. Never produced by a shrink.
const UNLINKED: u64 = 1 << 0;

/// Shrinking bit: a rotation is in flight below this node.
const SHRINKING_BIT: u64 = 1 << 1;

/// Either shrinking or unlinked: the node cannot be trusted mid-read.
const UNSTABLE_MASK: u64 = UNLINKED | SHRINKING_BIT;

/// Low bit of the generation counter.
const GENERATION_LOWBIT: u64 = 1 << 2;

/// Shift from the raw word to the generation counter.
const GENERATION_SHIFT: u32 = GENERATION_LOWBIT.trailing_zeros();

/// Spin iterations before [`NodeVersion::wait_until_not_changing`] gives up.
pub const DEFAULT_SPIN_COUNT: u32 = 100;

/// Spin budget for waiting on an in-flight shrink.
///
/// Read once from `OPTAVL_SPIN_COUNT`, falling back to [`DEFAULT_SPIN_COUNT`].
#[inline]
pub fn spin_count() -> u32 {
    static SPIN_COUNT: OnceLock<u32> = OnceLock::new();
    *SPIN_COUNT.get_or_init(|| {
        std::env::var("OPTAVL_SPIN_COUNT")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_SPIN_COUNT)
    })
}

// ============================================================================
//  VersionState / Version
// ============================================================================

/// Decoded state of a version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionState {
    /// Shape below the node is not changing.
    Stable {
        /// Number of shrinks committed on this node (wrapping).
        generation: u64,
    },

    /// A shrink is in flight.
    Shrinking,

    /// The node has been removed from the tree for good.
    Unlinked,
}

/// A snapshot of a [`NodeVersion`].
///
/// Snapshots are compared for exact equality: any transition, including a
/// shrink that began and committed between two loads, changes the raw word.
///
/// # Example
///
/// ```rust
/// use optavl::nodeversion::{NodeVersion, VersionState};
///
/// let v = NodeVersion::new();
/// let snapshot = v.load();
///
/// assert_eq!(snapshot.state(), VersionState::Stable { generation: 0 });
/// assert!(!v.has_changed(snapshot));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(u64);

impl Version {
    /// The terminal unlinked version.
    pub const UNLINKED: Self = Self(UNLINKED);

    /// Build a snapshot from a decoded state.
    ///
    /// A `Shrinking` state is built on top of generation 0.
    #[must_use]
    pub const fn from_state(state: VersionState) -> Self {
        match state {
            VersionState::Stable { generation } => Self(generation << GENERATION_SHIFT),
            VersionState::Shrinking => Self(SHRINKING_BIT),
            VersionState::Unlinked => Self(UNLINKED),
        }
    }

    /// Raw packed word.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Decode the packed word.
    #[inline]
    #[must_use]
    pub const fn state(self) -> VersionState {
        if self.0 == UNLINKED {
            VersionState::Unlinked
        } else if self.0 & SHRINKING_BIT != 0 {
            VersionState::Shrinking
        } else {
            VersionState::Stable {
                generation: self.0 >> GENERATION_SHIFT,
            }
        }
    }

    /// True if a reader must not trust links read under this snapshot.
    #[inline]
    #[must_use]
    pub const fn is_shrinking_or_unlinked(self) -> bool {
        self.0 & UNSTABLE_MASK != 0
    }

    /// True while a shrink is in flight.
    #[inline]
    #[must_use]
    pub const fn is_shrinking(self) -> bool {
        self.0 & SHRINKING_BIT != 0
    }

    /// True once the node has been unlinked.
    #[inline]
    #[must_use]
    pub const fn is_unlinked(self) -> bool {
        self.0 == UNLINKED
    }

    /// Shrink-committed generation, if stable.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> Option<u64> {
        match self.state() {
            VersionState::Stable { generation } => Some(generation),
            VersionState::Shrinking | VersionState::Unlinked => None,
        }
    }

    #[inline]
    const fn begin_shrink(self) -> Self {
        Self(self.0 | SHRINKING_BIT)
    }

    #[inline]
    const fn end_shrink(self) -> Self {
        Self((self.0 & !SHRINKING_BIT).wrapping_add(GENERATION_LOWBIT))
    }
}

// ============================================================================
//  NodeVersion
// ============================================================================

/// The atomic version word of a tree node.
///
/// # Layout
/// Bits 2-63: `generation` | Bit 1: `shrinking` | Bit 0: `unlinked` (only ever
/// set alone: the unlinked word is exactly `1`).
#[derive(Debug)]
pub struct NodeVersion {
    value: AtomicU64,
}

// ============================================================================
//  ShrinkGuard (Type-State Pattern)
// ============================================================================

/// Proof that a shrink is in flight on a node.
///
/// Cannot be constructed except by [`NodeVersion::begin_shrink()`]. Dropping
/// the guard commits the shrink: the version becomes
/// `Stable { generation + 1 }`, which every optimistic reader that started
/// before the shrink will notice.
///
/// # Thread Safety
/// Guards are `!Send` and `!Sync` via `PhantomData<*mut ()>`. The shrink must
/// be committed by the thread holding the node's lock.
#[derive(Debug)]
#[must_use = "dropping the guard immediately commits an empty shrink"]
pub struct ShrinkGuard<'a> {
    version: &'a NodeVersion,
    before: Version,
    _marker: PhantomData<*mut ()>,
}

impl ShrinkGuard<'_> {
    /// The stable version that was current when the shrink began.
    #[inline]
    #[must_use]
    pub const fn before(&self) -> Version {
        self.before
    }
}

impl Drop for ShrinkGuard<'_> {
    fn drop(&mut self) {
        self.version
            .value
            .store(self.before.end_shrink().raw(), PUBLISH_ORD);
    }
}

impl NodeVersion {
    /// Create a version in `Stable { generation: 0 }`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Create a node version from a snapshot.
    ///
    ///  WARN: ONLY FOR TESTING.
    #[must_use]
    pub const fn from_version(version: Version) -> Self {
        Self {
            value: AtomicU64::new(version.raw()),
        }
    }

    /// Load the current version.
    #[inline]
    #[must_use]
    pub fn load(&self) -> Version {
        Version(self.value.load(VERSION_ORD))
    }

    /// Check whether the version differs from `old`.
    #[inline]
    #[must_use]
    pub fn has_changed(&self, old: Version) -> bool {
        self.value.load(VERSION_ORD) != old.raw()
    }

    /// Check whether the node has been unlinked.
    #[inline]
    #[must_use]
    pub fn is_unlinked(&self) -> bool {
        self.value.load(VERSION_ORD) == UNLINKED
    }

    /// Decode the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> VersionState {
        self.load().state()
    }

    // ========================================================================
    //  Transitions (node lock must be held)
    // ========================================================================

    /// Enter the `Shrinking` state.
    ///
    /// The caller must hold the owning node's lock. The returned guard commits
    /// `Stable { generation + 1 }` when dropped.
    #[inline]
    pub fn begin_shrink(&self) -> ShrinkGuard<'_> {
        // INVARIANT: lock is held, so no other writer can transition this word.
        let before = Version(self.value.load(RELAXED));

        debug_assert!(
            !before.is_shrinking_or_unlinked(),
            "begin_shrink() on a node that is {:?}",
            before.state()
        );

        self.value.store(before.begin_shrink().raw(), PUBLISH_ORD);

        ShrinkGuard {
            version: self,
            before,
            _marker: PhantomData,
        }
    }

    /// Move to the terminal `Unlinked` state.
    ///
    /// The caller must hold the owning node's lock.
    #[inline]
    pub fn mark_unlinked(&self) {
        debug_assert!(
            !Version(self.value.load(RELAXED)).is_shrinking(),
            "mark_unlinked() while a shrink is in flight"
        );

        self.value.store(UNLINKED, PUBLISH_ORD);
    }

    // ========================================================================
    //  Waiting
    // ========================================================================

    /// Wait briefly for an in-flight shrink to finish.
    ///
    /// Spins up to [`spin_count()`] loads. If the version is still the same
    /// shrinking word afterwards, issues a full fence and returns anyway: the
    /// caller always revalidates, so this never needs the node's lock.
    pub fn wait_until_not_changing(&self) {
        let observed: Version = self.load();

        if !observed.is_shrinking() {
            return;
        }

        for _ in 0..spin_count() {
            if self.has_changed(observed) {
                return;
            }

            std::hint::spin_loop();
        }

        fence(FENCE_ORD);
    }
}

impl Default for NodeVersion {
    fn default() -> Self {
        Self::new()
    }
}
