//! Filepath: src/range.rs
//!
//! `RangeTree`: a disjoint interval map layered on the ordered set.
//!
//! Each stored interval `[s, e]` occupies two leaves of the underlying
//! set: a `RangeEnd` leaf at `e` whose payload word is `s` (a key-valued
//! back-reference, never a pointer), and a `RangeStart` leaf at `s`
//! carrying the user payload. Single keys occupy one `Point` leaf. A
//! query key `k` resolves through one successor walk: landing on a
//! `RangeEnd` means `k` is inside that interval; landing on a `Point` or
//! `RangeStart` answers only on exact match.
//!
//! The writer keeps a strict endpoint ordering (end inserted before
//! start, start removed before end) so a reader inside an interval
//! never resolves to a start without its end. The converse transient
//! (an end whose start is not yet visible, or already gone) is
//! observable by design and reads as "no interval here".
//!
//! Payloads are opaque 64-bit words; callers storing heap data keep
//! ownership and pass the address as the word.

use crate::node::{LeafKind, Retry};
use crate::set::{MlpSet, ReadSnapshot, prefix3};
use crate::bitmap::Level;
use crate::key;

mod writer;

pub use writer::RangeWriter;

// ============================================================================
//  RangeTree
// ============================================================================

/// A map from disjoint `u64` intervals (and single keys) to word-sized
/// payloads, with one writer and any number of concurrent readers.
///
/// `capacity` counts stored endpoint keys: an interval consumes two, a
/// point one.
///
/// # Example
///
/// ```rust
/// use mlptrie::RangeTree;
///
/// let tree = RangeTree::new(1024);
/// {
///     let mut w = tree.writer();
///     assert!(w.store_range(100, 200, 7));
///     assert!(w.store(500, 8));
/// }
/// assert_eq!(tree.load(150), Some(7));
/// assert_eq!(tree.load(201), None);
/// assert_eq!(tree.find_next(300), Some((500, 500, 8)));
/// ```
pub struct RangeTree {
    set: MlpSet,
}

/// One consistent read of a leaf: its overlay role and payload word.
#[derive(Clone, Copy, Debug)]
struct LeafView {
    kind: LeafKind,
    word: u64,
}

impl RangeTree {
    /// Allocate a tree able to hold `capacity` endpoint keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            set: MlpSet::new(capacity),
        }
    }

    /// Take the single-writer permit.
    ///
    /// # Panics
    ///
    /// Panics if a writer permit is already outstanding.
    #[must_use]
    pub fn writer(&self) -> RangeWriter<'_> {
        RangeWriter::new(self)
    }

    /// The underlying key set (endpoints and points).
    #[must_use]
    pub fn set(&self) -> &MlpSet {
        &self.set
    }

    // ------------------------------------------------------------------
    //  Reads
    // ------------------------------------------------------------------

    /// Payload of the interval or point containing `key`, or `None`.
    #[must_use]
    pub fn load(&self, key: u64) -> Option<u64> {
        self.set.read_op(|snap| {
            let Some(m) = self.lower_bound_key(key, snap)? else {
                return Ok(None);
            };
            let Some(view) = self.leaf_view(m, snap)? else {
                return Err(Retry);
            };
            match view.kind {
                LeafKind::Point | LeafKind::RangeStart => Ok((m == key).then_some(view.word)),
                LeafKind::RangeEnd => {
                    // Inside the interval ending at `m`; the payload
                    // lives on the start leaf.
                    match self.leaf_view(view.word, snap)? {
                        Some(start) if start.kind == LeafKind::RangeStart => Ok(Some(start.word)),
                        // Start not visible: the interval is mid-insert
                        // or mid-erase, so it is not here yet / anymore.
                        _ => Ok(None),
                    }
                }
            }
        })
    }

    /// Smallest stored entry `(start, end, payload)` whose end is
    /// `>= from`. Points report `start == end`.
    #[must_use]
    pub fn find_next(&self, from: u64) -> Option<(u64, u64, u64)> {
        self.set.read_op(|snap| self.entry_at_or_after(from, snap))
    }

    /// Iterate every stored entry in ascending order.
    #[must_use]
    pub fn iter(&self) -> RangeIter<'_> {
        self.iter_from(0)
    }

    /// Iterate stored entries whose end is `>= start`, ascending.
    #[must_use]
    pub fn iter_from(&self, start: u64) -> RangeIter<'_> {
        RangeIter {
            tree: self,
            next_from: Some(start),
        }
    }

    /// Visit every entry intersecting `[start, end]`, clamped to the
    /// window.
    pub fn for_each_in(&self, start: u64, end: u64, mut visit: impl FnMut(u64, u64, u64)) {
        for (s, e, v) in self.iter_from(start) {
            if s > end {
                break;
            }
            visit(s.max(start), e.min(end), v);
        }
    }

    /// Number of stored entries (intervals and points).
    #[must_use]
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.find_next(0).is_none()
    }

    // ------------------------------------------------------------------
    //  Snapshot-consistent building blocks
    // ------------------------------------------------------------------

    fn entry_at_or_after(
        &self,
        from: u64,
        snap: ReadSnapshot,
    ) -> Result<Option<(u64, u64, u64)>, Retry> {
        let Some(m) = self.lower_bound_key(from, snap)? else {
            return Ok(None);
        };
        let Some(view) = self.leaf_view(m, snap)? else {
            return Err(Retry);
        };
        match view.kind {
            LeafKind::Point => Ok(Some((m, m, view.word))),
            LeafKind::RangeStart => {
                // The matching end is the next key up.
                let Some(after) = m.checked_add(1) else {
                    return Err(Retry);
                };
                let Some(end) = self.lower_bound_key(after, snap)? else {
                    return Err(Retry);
                };
                match self.leaf_view(end, snap)? {
                    Some(ev) if ev.kind == LeafKind::RangeEnd => {
                        Ok(Some((m, end, view.word)))
                    }
                    _ => Err(Retry),
                }
            }
            LeafKind::RangeEnd => {
                let start: u64 = view.word;
                match self.leaf_view(start, snap)? {
                    Some(sv) if sv.kind == LeafKind::RangeStart => {
                        Ok(Some((start, m, sv.word)))
                    }
                    // Endpoint pair half-visible; reads as absent.
                    _ => Ok(None),
                }
            }
        }
    }

    /// Successor query within the caller's snapshot.
    fn lower_bound_key(&self, key: u64, snap: ReadSnapshot) -> Result<Option<u64>, Retry> {
        match self.set.lower_bound_walk(key, snap)? {
            None => Ok(None),
            Some(promise) => {
                let answer: u64 = promise.resolve();
                if promise.generation_valid(snap.generation) {
                    Ok(Some(answer))
                } else {
                    Err(Retry)
                }
            }
        }
    }

    /// Read the leaf for `key` (which must be a stored key) under the
    /// caller's snapshot.
    fn leaf_view(&self, key: u64, snap: ReadSnapshot) -> Result<Option<LeafView>, Retry> {
        if !self.set.levels().test(Level::L2, prefix3(key)) {
            return Ok(None);
        }
        match self.set.query_lcp(key, snap.generation)? {
            Some(hit) if hit.matched == key::KEY_BYTES => {
                let kind: LeafKind = hit.node.leaf_kind();
                let word: u64 = hit.node.child_map_word();
                hit.node.validate(snap.generation)?;
                Ok(Some(LeafView { kind, word }))
            }
            _ => Ok(None),
        }
    }
}

// ============================================================================
//  Iterator
// ============================================================================

/// Ascending iterator over stored entries. Each step is an independent
/// snapshot read; entries inserted or erased mid-iteration may or may
/// not be observed.
pub struct RangeIter<'a> {
    tree: &'a RangeTree,
    next_from: Option<u64>,
}

impl Iterator for RangeIter<'_> {
    type Item = (u64, u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let from: u64 = self.next_from?;
        match self.tree.find_next(from) {
            None => {
                self.next_from = None;
                None
            }
            Some((s, e, v)) => {
                self.next_from = e.checked_add(1);
                Some((s, e, v))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree() {
        let tree = RangeTree::new(16);
        assert_eq!(tree.load(0), None);
        assert_eq!(tree.find_next(0), None);
        assert!(tree.is_empty());
        assert_eq!(tree.count(), 0);
    }

    #[test]
    fn point_resolution_is_exact() {
        let tree = RangeTree::new(16);
        tree.writer().store(100, 7);
        assert_eq!(tree.load(100), Some(7));
        assert_eq!(tree.load(99), None);
        assert_eq!(tree.load(101), None);
    }

    #[test]
    fn interval_contains_every_inner_key() {
        let tree = RangeTree::new(16);
        tree.writer().store_range(100, 110, 42);
        for k in 100..=110 {
            assert_eq!(tree.load(k), Some(42), "key {k}");
        }
        assert_eq!(tree.load(99), None);
        assert_eq!(tree.load(111), None);
    }

    #[test]
    fn iter_visits_entries_in_order() {
        let tree = RangeTree::new(64);
        {
            let mut w = tree.writer();
            w.store(5, 1);
            w.store_range(10, 20, 2);
            w.store_range(100, 200, 3);
        }
        let all: Vec<(u64, u64, u64)> = tree.iter().collect();
        assert_eq!(all, vec![(5, 5, 1), (10, 20, 2), (100, 200, 3)]);
        let tail: Vec<(u64, u64, u64)> = tree.iter_from(15).collect();
        assert_eq!(tail, vec![(10, 20, 2), (100, 200, 3)]);
        assert_eq!(tree.count(), 3);
        assert!(!tree.is_empty());
    }

    #[test]
    fn for_each_in_clamps_to_window() {
        let tree = RangeTree::new(64);
        {
            let mut w = tree.writer();
            w.store_range(10, 20, 1);
            w.store_range(30, 40, 2);
            w.store(60, 3);
        }
        let mut seen: Vec<(u64, u64, u64)> = Vec::new();
        tree.for_each_in(15, 35, |s, e, v| seen.push((s, e, v)));
        assert_eq!(seen, vec![(15, 20, 1), (30, 35, 2)]);
    }
}
