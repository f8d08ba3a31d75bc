//! Filepath: src/harness.rs
//!
//! The contract external benchmark harnesses drive this crate through: a
//! function-pointer vtable over an opaque tree handle, plus the two
//! single-threaded canned workloads. The threaded workloads (one writer
//! with pinned readers) live with the stress tests and benches, where
//! threads can be spawned.

use crate::range::RangeTree;

/// Function-pointer operation table over a tree handle `T`.
///
/// Mirrors the shape benchmark drivers expect: five entry points, no
/// generics at the call site, handle passed back on every call.
pub struct TreeOps<T> {
    /// Insert an entry into the range `[key, key]`.
    pub insert: fn(&mut T, key: u64, entry: u64) -> bool,
    /// Insert an entry into the range `[first, last]`.
    pub insert_range: fn(&mut T, first: u64, last: u64, entry: u64) -> bool,
    /// Find the first entry between `*index` and `max`; on a hit,
    /// `*index` is advanced to the first key beyond the found range.
    pub find: fn(&T, index: &mut u64, max: u64) -> Option<u64>,
    /// Load the entry at `index`.
    pub load: fn(&T, index: u64) -> Option<u64>,
    /// Erase the range containing `index`.
    pub erase: fn(&mut T, index: u64) -> bool,
}

/// Owning handle pairing a [`RangeTree`] with the vtable's expectations.
pub struct BenchTree {
    tree: RangeTree,
}

impl BenchTree {
    /// Allocate a tree for `capacity` endpoint keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tree: RangeTree::new(capacity),
        }
    }

    /// The wrapped tree.
    #[must_use]
    pub fn tree(&self) -> &RangeTree {
        &self.tree
    }
}

/// The vtable binding [`BenchTree`] to the interval overlay.
#[must_use]
pub fn range_tree_ops() -> TreeOps<BenchTree> {
    TreeOps {
        insert: |t, key, entry| t.tree.writer().insert_point(key, entry),
        insert_range: |t, first, last, entry| t.tree.writer().insert_range(first, last, entry),
        find: |t, index, max| {
            let (s, e, v) = t.tree.find_next(*index)?;
            if s > max {
                return None;
            }
            *index = e.saturating_add(1);
            Some(v)
        },
        load: |t, index| t.tree.load(index),
        erase: |t, index| t.tree.writer().erase(index),
    }
}

/// Workload A: 1 000 sequential inserts.
pub fn run_workload_a<T>(ops: &TreeOps<T>, tree: &mut T) {
    for key in 0..1_000u64 {
        (ops.insert)(tree, key, key + 1);
    }
}

/// Workload B: 10 000 inserts followed by 10 000 erases of the same keys.
pub fn run_workload_b<T>(ops: &TreeOps<T>, tree: &mut T) {
    for key in 0..10_000u64 {
        (ops.insert)(tree, key, key + 1);
    }
    for key in 0..10_000u64 {
        (ops.erase)(tree, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtable_round_trip() {
        let ops = range_tree_ops();
        let mut t = BenchTree::new(1024);
        assert!((ops.insert)(&mut t, 10, 101));
        assert!((ops.insert_range)(&mut t, 20, 30, 102));
        assert_eq!((ops.load)(&t, 10), Some(101));
        assert_eq!((ops.load)(&t, 25), Some(102));

        let mut cursor: u64 = 0;
        assert_eq!((ops.find)(&t, &mut cursor, u64::MAX), Some(101));
        assert_eq!(cursor, 11);
        assert_eq!((ops.find)(&t, &mut cursor, u64::MAX), Some(102));
        assert_eq!(cursor, 31);
        assert_eq!((ops.find)(&t, &mut cursor, u64::MAX), None);

        assert!((ops.erase)(&mut t, 25));
        assert_eq!((ops.load)(&t, 25), None);
    }

    #[test]
    fn workload_a_populates() {
        let ops = range_tree_ops();
        let mut t = BenchTree::new(4096);
        run_workload_a(&ops, &mut t);
        assert_eq!(t.tree().count(), 1_000);
    }

    #[test]
    fn workload_b_round_trips_to_empty() {
        let ops = range_tree_ops();
        let mut t = BenchTree::new(32_768);
        run_workload_b(&ops, &mut t);
        assert!(t.tree().is_empty());
    }
}
