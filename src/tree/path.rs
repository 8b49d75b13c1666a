//! Fixed-capacity descent stack.
//!
//! The optimistic search is naturally recursive: a failed validation at depth
//! `d` returns to depth `d - 1`, which re-reads its child and tries again.
//! [`PathStack`] keeps the frames of that recursion in a ring of
//! [`PATH_CAPACITY`] entries on the caller's stack, so the read path never
//! allocates. When a descent is deeper than the ring, the oldest frames are
//! overwritten; popping past the retained frames empties the stack and the
//! caller restarts from the holder.

use crate::node::Node;
use crate::nodeversion::Version;
use crate::tracing_helpers::debug_log;

/// Frames kept before the oldest are overwritten.
pub(crate) const PATH_CAPACITY: usize = 64;

/// One level of an optimistic descent.
#[derive(Debug)]
pub(crate) struct Frame<'g, K> {
    /// Node being searched at this level.
    pub(crate) node: &'g Node<K>,

    /// The node this one was reached from (the holder for the root).
    pub(crate) parent: &'g Node<K>,

    /// `node`'s version when it was entered.
    pub(crate) version: Version,
}

impl<K> Clone for Frame<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Frame<'_, K> {}

/// Ring-buffer stack of [`Frame`]s.
#[derive(Debug)]
pub(crate) struct PathStack<'g, K> {
    frames: [Option<Frame<'g, K>>; PATH_CAPACITY],
    /// Index one past the top frame.
    head: usize,
    len: usize,
    overflowed: bool,
}

impl<'g, K> PathStack<'g, K> {
    pub(crate) const fn new() -> Self {
        Self {
            frames: [const { None }; PATH_CAPACITY],
            head: 0,
            len: 0,
            overflowed: false,
        }
    }

    /// Push a frame, overwriting the oldest one when full.
    #[inline]
    pub(crate) fn push(&mut self, frame: Frame<'g, K>) {
        if let Some(slot) = self.frames.get_mut(self.head) {
            *slot = Some(frame);
        }
        self.head = (self.head + 1) % PATH_CAPACITY;

        if self.len < PATH_CAPACITY {
            self.len += 1;
        } else if !self.overflowed {
            self.overflowed = true;
            debug_log!(capacity = PATH_CAPACITY, "descent deeper than path stack");
        }
    }

    /// Pop the top frame.
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Frame<'g, K>> {
        if self.len == 0 {
            return None;
        }

        self.head = (self.head + PATH_CAPACITY - 1) % PATH_CAPACITY;
        self.len -= 1;
        self.frames.get_mut(self.head).and_then(Option::take)
    }

    /// Peek at the top frame.
    #[inline]
    pub(crate) fn top(&self) -> Option<Frame<'g, K>> {
        if self.len == 0 {
            return None;
        }

        let idx: usize = (self.head + PATH_CAPACITY - 1) % PATH_CAPACITY;
        self.frames.get(idx).copied().flatten()
    }

    /// Drop every frame.
    #[inline]
    pub(crate) fn clear(&mut self) {
        self.len = 0;
        self.head = 0;
        self.overflowed = false;
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// True if frames have been overwritten since the last `clear`.
    #[inline]
    pub(crate) const fn overflowed(&self) -> bool {
        self.overflowed
    }
}
