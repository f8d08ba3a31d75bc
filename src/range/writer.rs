//! Filepath: src/range/writer.rs
//!
//! The single-writer side of [`RangeTree`].
//!
//! Endpoint ordering discipline, on which concurrent readers depend:
//! installing an interval writes the end leaf before the start leaf, and
//! erasing one removes the start leaf before the end leaf. A reader whose
//! walk lands inside an interval therefore always finds the end (and
//! through it the start, or a clean "being inserted / being erased"
//! transient), never a dangling start.

use crate::node::LeafKind;
use crate::range::RangeTree;
use crate::set::SetWriter;

/// The writer permit for a [`RangeTree`]. At most one exists at a time;
/// dropping it returns the permit.
pub struct RangeWriter<'a> {
    tree: &'a RangeTree,
    set_writer: SetWriter<'a>,
}

impl<'a> RangeWriter<'a> {
    pub(crate) fn new(tree: &'a RangeTree) -> Self {
        Self {
            tree,
            set_writer: tree.set().writer(),
        }
    }

    // ------------------------------------------------------------------
    //  Store (overwrite) operations
    // ------------------------------------------------------------------

    /// Install a point at `key`, removing whatever interval or point
    /// contained it first.
    pub fn store(&mut self, key: u64, value: u64) -> bool {
        self.erase(key);
        let inserted: bool = self.set_writer.insert_leaf(key, LeafKind::Point, value);
        debug_assert!(inserted, "key still present after erase");
        inserted
    }

    /// Install the interval `[start, end]`, removing every interval or
    /// point intersecting it first. Returns `false` for `start > end`.
    pub fn store_range(&mut self, start: u64, end: u64, value: u64) -> bool {
        if start > end {
            return false;
        }
        self.clear_span(start, end);
        self.install(start, end, value);
        true
    }

    /// Remove every interval or point intersecting `[start, end]`.
    /// Returns `false` for `start > end`.
    pub fn erase_range(&mut self, start: u64, end: u64) -> bool {
        if start > end {
            return false;
        }
        self.clear_span(start, end);
        true
    }

    // ------------------------------------------------------------------
    //  Insert (refuse-on-overlap) operations
    // ------------------------------------------------------------------

    /// Install a point at `key` only if nothing contains `key`.
    pub fn insert_point(&mut self, key: u64, value: u64) -> bool {
        if self.tree.load(key).is_some() {
            return false;
        }
        self.set_writer.insert_leaf(key, LeafKind::Point, value)
    }

    /// Install `[start, end]` only if it overlaps nothing. Returns
    /// `false` for `start > end` or on any overlap, leaving the tree
    /// unchanged.
    pub fn insert_range(&mut self, start: u64, end: u64, value: u64) -> bool {
        if start > end {
            return false;
        }
        if let Some(m) = self.tree.set().lower_bound(start) {
            if m <= end {
                // A stored endpoint inside the window.
                return false;
            }
            if self.leaf_parts(m).map(|(kind, _)| kind) == Some(LeafKind::RangeEnd) {
                // `start` sits inside an interval that spills past `end`.
                return false;
            }
        }
        self.install(start, end, value);
        true
    }

    // ------------------------------------------------------------------
    //  Erase
    // ------------------------------------------------------------------

    /// Remove the interval or point containing `key`. Returns `true` iff
    /// something was removed.
    pub fn erase(&mut self, key: u64) -> bool {
        let Some(m) = self.tree.set().lower_bound(key) else {
            return false;
        };
        let Some((kind, word)) = self.leaf_parts(m) else {
            return false;
        };
        match kind {
            LeafKind::Point => {
                if m == key {
                    self.set_writer.remove(key)
                } else {
                    false
                }
            }
            LeafKind::RangeStart => {
                if m != key {
                    return false;
                }
                // Start first, then end.
                let end: u64 = match key.checked_add(1).and_then(|n| self.tree.set().lower_bound(n))
                {
                    Some(end) => end,
                    None => unreachable!("interval start without an end leaf"),
                };
                self.set_writer.remove(key);
                self.set_writer.remove(end);
                true
            }
            LeafKind::RangeEnd => {
                let start: u64 = word;
                self.set_writer.remove(start);
                self.set_writer.remove(m);
                true
            }
        }
    }

    // ------------------------------------------------------------------
    //  Internals
    // ------------------------------------------------------------------

    /// Install `[start, end]` into ground known to be clear. End leaf
    /// first; a degenerate interval is a point.
    fn install(&mut self, start: u64, end: u64, value: u64) {
        if start == end {
            let inserted: bool = self.set_writer.insert_leaf(start, LeafKind::Point, value);
            debug_assert!(inserted);
            return;
        }
        let end_ok: bool = self.set_writer.insert_leaf(end, LeafKind::RangeEnd, start);
        debug_assert!(end_ok);
        let start_ok: bool = self.set_writer.insert_leaf(start, LeafKind::RangeStart, value);
        debug_assert!(start_ok);
    }

    /// Collect every entry intersecting `[start, end]`, then remove them
    /// pair by pair (start leaf before end leaf).
    fn clear_span(&mut self, start: u64, end: u64) {
        let set = self.tree.set();
        let mut points: Vec<u64> = Vec::new();
        let mut ranges: Vec<(u64, u64)> = Vec::new();

        let mut cursor: Option<u64> = set.lower_bound(start);

        // An interval spilling in from the left of the window.
        if let Some(m) = cursor {
            if let Some((LeafKind::RangeEnd, range_start)) = self.leaf_parts(m) {
                ranges.push((range_start, m));
                cursor = m.checked_add(1).and_then(|n| set.lower_bound(n));
            }
        }

        while let Some(m) = cursor {
            if m > end {
                break;
            }
            let mut next_from: Option<u64> = m.checked_add(1);
            match self.leaf_parts(m) {
                Some((LeafKind::Point, _)) => points.push(m),
                Some((LeafKind::RangeStart, _)) => {
                    let range_end: u64 = match next_from.and_then(|n| set.lower_bound(n)) {
                        Some(range_end) => range_end,
                        None => unreachable!("interval start without an end leaf"),
                    };
                    ranges.push((m, range_end));
                    next_from = range_end.checked_add(1);
                }
                Some((LeafKind::RangeEnd, range_start)) => {
                    // Only reachable if the window opened exactly on an
                    // end leaf handled above; keep it for symmetry.
                    ranges.push((range_start, m));
                }
                None => {}
            }
            cursor = next_from.and_then(|n| set.lower_bound(n));
        }

        for (range_start, range_end) in ranges {
            self.set_writer.remove(range_start);
            self.set_writer.remove(range_end);
        }
        for point in points {
            self.set_writer.remove(point);
        }
    }

    /// Writer-side read of a stored leaf's role and payload word.
    fn leaf_parts(&self, key: u64) -> Option<(LeafKind, u64)> {
        self.set_writer
            .leaf_for(key)
            .map(|leaf| (leaf.leaf_kind(), leaf.child_map_word()))
    }
}
