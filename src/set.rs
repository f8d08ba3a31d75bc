//! Filepath: src/set.rs
//!
//! `MlpSet`: the ordered set of `u64` keys.
//!
//! This module holds the structure and its read path; mutation lives in
//! [`writer`] behind the single-writer permit.
//!
//! # Read path
//!
//! A query touches three tiers. The bitmap levels answer everything about
//! prefixes of one to three bytes. Below that, the longest-common-prefix
//! probe computes all six `(H1, H2)` candidate pairs for prefix lengths
//! 3..=8 in one batch, prefetches every candidate line at once, and scans
//! from length 8 down, so the whole probe costs one concurrent round of
//! cache misses rather than a pointer chase. A successor walk combines
//! the two: bitmap descent above depth 3, LCP below, child lower-bound
//! steps downward and parent-path steps upward, finishing at a node whose
//! `min_key` is the answer.
//!
//! # Consistency protocol
//!
//! Readers never lock on the fast path. Each operation samples the set's
//! generation counter (its *consistency horizon*) and the reset epoch,
//! then re-validates every node it dereferences: fields are loaded first,
//! the node's generation last, and a stamp above the horizon aborts the
//! attempt. The writer stamps nodes *before* mutating them and publishes
//! the new generation only after all stores, so a validated read saw a
//! fully-published state. After [`READER_RETRY_LIMIT`] failed attempts a
//! reader takes the displacement coordination lock in shared mode for the
//! remainder of the attempt, which shuts out node moves and bounds the
//! spin under a pathological writer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::bitmap::{BitmapLevels, Level};
use crate::hashing::{self, Candidates};
use crate::key;
use crate::node::{ChildMapFields, ChildMapView, CuckooNode, Retry};
use crate::prefetch::prefetch_read;
use crate::stats::SetStats;
use crate::table::{CuckooTable, LookupPromise};

mod writer;

pub use writer::SetWriter;

/// Failed read attempts before a reader promotes to the shared side of
/// the displacement coordination lock.
pub(crate) const READER_RETRY_LIMIT: usize = 64;

// ============================================================================
//  MlpSet
// ============================================================================

/// An ordered set of `u64` keys supporting membership, successor
/// (lower-bound) and deferred lower-bound queries, with one writer and
/// any number of concurrent readers.
///
/// All memory is sized by `new(capacity)`; the set never resizes.
/// Exceeding the capacity is an operator error and aborts.
///
/// # Example
///
/// ```rust
/// use mlptrie::MlpSet;
///
/// let set = MlpSet::new(1024);
/// {
///     let mut w = set.writer();
///     assert!(w.insert(17));
///     assert!(!w.insert(17));
/// }
/// assert!(set.exist(17));
/// assert_eq!(set.lower_bound(5), Some(17));
/// assert_eq!(set.lower_bound(18), None);
/// ```
pub struct MlpSet {
    levels: BitmapLevels,
    table: CuckooTable,
    /// Published version of the latest completed mutation (24 bits).
    generation: AtomicU32,
    /// Even when stable; odd while a quiesce-and-reset is in progress.
    reset_epoch: AtomicU32,
    /// Single-writer permit flag.
    writer_taken: AtomicBool,
    stats: SetStats,
}

/// Snapshot a reader operates under: the generation horizon plus the
/// reset epoch it must still match at the end.
#[derive(Clone, Copy)]
pub(crate) struct ReadSnapshot {
    pub generation: u32,
    pub epoch: u32,
}

/// Outcome of a longest-common-prefix probe: the deepest node whose
/// index prefix matches the query, plus how far the query agrees with
/// the node's compressed run.
pub(crate) struct LcpHit<'a> {
    pub node: &'a CuckooNode,
    pub index_len: usize,
    pub full_key_len: usize,
    /// First divergent byte position in `[index_len, full_key_len]`;
    /// equals `full_key_len` when the whole run matches, and 8 exactly
    /// when the query key itself is present.
    pub matched: usize,
    pub min_key: u64,
}

impl MlpSet {
    /// Allocate a set able to hold up to `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: BitmapLevels::new(),
            table: CuckooTable::new(capacity),
            generation: AtomicU32::new(0),
            reset_epoch: AtomicU32::new(0),
            writer_taken: AtomicBool::new(false),
            stats: SetStats::new(),
        }
    }

    /// Take the single-writer permit.
    ///
    /// # Panics
    ///
    /// Panics if a writer permit is already outstanding.
    #[must_use]
    pub fn writer(&self) -> SetWriter<'_> {
        assert!(
            !self.writer_taken.swap(true, Ordering::Acquire),
            "mlptrie: second writer permit requested; the set is single-writer"
        );
        SetWriter::new(self)
    }

    /// Instrumentation counters (populated with the `stats` feature).
    #[must_use]
    pub fn stats(&self) -> &SetStats {
        &self.stats
    }

    pub(crate) fn levels(&self) -> &BitmapLevels {
        &self.levels
    }

    pub(crate) fn table(&self) -> &CuckooTable {
        &self.table
    }

    pub(crate) fn generation_cell(&self) -> &AtomicU32 {
        &self.generation
    }

    pub(crate) fn reset_epoch_cell(&self) -> &AtomicU32 {
        &self.reset_epoch
    }

    pub(crate) fn release_writer(&self) {
        self.writer_taken.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------
    //  Public read operations
    // ------------------------------------------------------------------

    /// Whether `key` is in the set.
    #[must_use]
    pub fn exist(&self, key: u64) -> bool {
        self.read_op(|snap| {
            if !self.levels.test(Level::L2, prefix3(key)) {
                return Ok(false);
            }
            match self.query_lcp(key, snap.generation)? {
                Some(hit) => Ok(hit.matched == key::KEY_BYTES),
                // The level-2 bit promises a depth-3 node; missing means
                // we raced a mutation.
                None => Err(Retry),
            }
        })
    }

    /// Smallest member `>= key`, or `None` if every member is smaller.
    #[must_use]
    pub fn lower_bound(&self, key: u64) -> Option<u64> {
        self.read_op(|snap| {
            match self.lower_bound_walk(key, snap)? {
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
        })
    }

    /// Deferred lower-bound: the caller may [`prefetch`] the candidate
    /// lines, interleave other work, then [`resolve`].
    ///
    /// An invalid promise means no member is `>= key`.
    ///
    /// [`prefetch`]: LookupPromise::prefetch
    /// [`resolve`]: LookupPromise::resolve
    #[must_use]
    pub fn lower_bound_promise(&self, key: u64) -> LookupPromise<'_> {
        self.read_op(|snap| {
            match self.lower_bound_walk(key, snap)? {
                None => Ok(LookupPromise::invalid(self.table.displacement_lock())),
                Some(promise) => {
                    if promise.generation_valid(snap.generation) {
                        Ok(promise)
                    } else {
                        Err(Retry)
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    //  Retry harness
    // ------------------------------------------------------------------

    /// Run a read attempt until it validates. After
    /// [`READER_RETRY_LIMIT`] failures the attempt runs under the shared
    /// side of the displacement lock.
    pub(crate) fn read_op<T>(&self, op: impl Fn(ReadSnapshot) -> Result<T, Retry>) -> T {
        let mut attempts: usize = 0;
        loop {
            let snap: ReadSnapshot = self.begin_read();
            let promoted = if attempts >= READER_RETRY_LIMIT {
                self.stats.record_slow_path();
                Some(self.table.displacement_lock().read_recursive())
            } else {
                None
            };
            let outcome: Result<T, Retry> = op(snap);
            drop(promoted);
            if let Ok(value) = outcome {
                if self.read_still_valid(snap) {
                    return value;
                }
            }
            attempts += 1;
            std::hint::spin_loop();
        }
    }

    /// Sample the consistency horizon, waiting out an in-progress reset.
    pub(crate) fn begin_read(&self) -> ReadSnapshot {
        loop {
            let epoch: u32 = self.reset_epoch.load(Ordering::Acquire);
            if epoch & 1 == 0 {
                let generation: u32 = self.generation.load(Ordering::Acquire);
                return ReadSnapshot { generation, epoch };
            }
            std::hint::spin_loop();
        }
    }

    /// Whether no generation reset completed since the snapshot.
    pub(crate) fn read_still_valid(&self, snap: ReadSnapshot) -> bool {
        self.reset_epoch.load(Ordering::Acquire) == snap.epoch
    }

    // ------------------------------------------------------------------
    //  LCP probe
    // ------------------------------------------------------------------

    /// Longest-common-prefix probe: deepest stored node whose index
    /// prefix matches `key`, or `None` when no depth-3 node does.
    ///
    /// All twelve candidate lines are prefetched before the first
    /// comparison; the scan then runs from length 8 down to 3 entirely
    /// off those in-flight loads. Comparisons hold the shared
    /// displacement lock so a node move cannot make both of a key's
    /// slots look empty mid-scan.
    pub(crate) fn query_lcp(&self, key: u64, snapshot: u32) -> Result<Option<LcpHit<'_>>, Retry> {
        let cands: Candidates = hashing::compute_candidates(key, self.table.mask());
        for i in 0..hashing::CANDIDATE_LENS {
            prefetch_read(std::ptr::from_ref(self.table.slot(cands.pos1[i])));
            prefetch_read(std::ptr::from_ref(self.table.slot(cands.pos2[i])));
        }

        let _shared = self.table.displacement_lock().read_recursive();
        for i in (0..hashing::CANDIDATE_LENS).rev() {
            let index_len: usize = i + 3;
            let shift: u32 = key::shift_for(index_len);
            let shifted: u64 = key::shifted(key, index_len);
            for pos in [cands.pos1[i], cands.pos2[i]] {
                let node: &CuckooNode = self.table.slot(pos);
                if node.matches(cands.expected[i], shift, shifted) {
                    let full_key_len: usize = node.full_key_len();
                    let min_key: u64 = node.min_key();
                    node.validate(snapshot)?;
                    let matched: usize =
                        key::diverge_byte(key, min_key, index_len, full_key_len);
                    self.stats.record_lcp(index_len);
                    return Ok(Some(LcpHit {
                        node,
                        index_len,
                        full_key_len,
                        matched,
                        min_key,
                    }));
                }
            }
        }
        self.stats.record_lcp(2);
        Ok(None)
    }

    // ------------------------------------------------------------------
    //  Lower-bound walk
    // ------------------------------------------------------------------

    /// Locate the successor of `key` as a promise, or `None` when the
    /// set holds nothing `>= key`.
    pub(crate) fn lower_bound_walk(
        &self,
        key: u64,
        snap: ReadSnapshot,
    ) -> Result<Option<LookupPromise<'_>>, Retry> {
        let p24: u32 = prefix3(key);
        if !self.levels.test(Level::L2, p24) {
            // No key shares the query's 3-byte prefix: the answer is the
            // leftmost leaf under the next populated 3-byte prefix.
            return self.promise_for_next_prefix(p24);
        }

        let hit: LcpHit<'_> = match self.query_lcp(key, snap.generation)? {
            Some(hit) => hit,
            None => return Err(Retry),
        };

        let mut node: &CuckooNode = hit.node;
        let mut index_len: usize = hit.index_len;
        let mut full_key_len: usize = hit.full_key_len;
        let mut matched: usize = hit.matched;
        let mut min_key: u64 = hit.min_key;

        loop {
            if matched == key::KEY_BYTES {
                // Exact hit; the leaf's own key is the answer.
                return Ok(Some(LookupPromise::settled(
                    node,
                    self.table.displacement_lock(),
                )));
            }
            if matched < full_key_len {
                // The query leaves the node's compressed run early.
                if key::byte(key, matched) < key::byte(min_key, matched) {
                    // Everything in this subtree is above the query; its
                    // minimum is the successor.
                    return Ok(Some(LookupPromise::settled(
                        node,
                        self.table.displacement_lock(),
                    )));
                }
                // Everything in this subtree is below the query.
                return self.parent_path(key, index_len, snap);
            }

            // The query matches the whole run: branch on the child byte.
            let branch: u8 = key::byte(key, full_key_len);
            let view: ChildMapView<'_> = self.child_view(node, snap)?;
            match view.lower_bound(u16::from(branch)) {
                None => return self.parent_path(key, index_len, snap),
                Some(child) if child == branch => {
                    // Equal-branch descent only happens when a mutation
                    // raced the probe (the LCP would have found the
                    // child); following it down is still well-defined.
                    let next_len: usize = full_key_len + 1;
                    match self.probe_validated(next_len, key, snap.generation)? {
                        None => return Err(Retry),
                        Some(child_node) => {
                            node = child_node;
                            index_len = next_len;
                            full_key_len = child_node.full_key_len();
                            min_key = child_node.min_key();
                            child_node.validate(snap.generation)?;
                            matched = key::diverge_byte(key, min_key, index_len, full_key_len);
                        }
                    }
                }
                Some(child) => {
                    // First branch above the query byte: the successor is
                    // that subtree's minimum.
                    let child_key: u64 = key::with_byte(key, full_key_len, child);
                    return Ok(Some(
                        self.table.must_exist_promise(full_key_len + 1, child_key),
                    ));
                }
            }
        }
    }

    /// Climb from the node at `below` looking for the deepest ancestor
    /// with a branch above the query's byte at its branching position;
    /// fall back to the bitmap levels above depth 3.
    fn parent_path(
        &self,
        key: u64,
        below: usize,
        snap: ReadSnapshot,
    ) -> Result<Option<LookupPromise<'_>>, Retry> {
        let mut steps: usize = 0;
        let mut j: usize = below - 1;
        while j >= 3 {
            if let Some(ancestor) = self.probe_validated(j, key, snap.generation)? {
                steps += 1;
                let branch_at: usize = ancestor.full_key_len();
                ancestor.validate(snap.generation)?;
                if branch_at >= key::KEY_BYTES {
                    // A leaf shadowing the path can only be a racing
                    // mutation's intermediate state.
                    return Err(Retry);
                }
                let view: ChildMapView<'_> = self.child_view(ancestor, snap)?;
                let from: u16 = u16::from(key::byte(key, branch_at)) + 1;
                if let Some(sibling) = view.lower_bound(from) {
                    let child_key: u64 = key::with_byte(key, branch_at, sibling);
                    self.stats.record_parent_steps(steps);
                    return Ok(Some(
                        self.table.must_exist_promise(branch_at + 1, child_key),
                    ));
                }
            }
            j -= 1;
        }
        self.stats.record_parent_steps(steps);
        match prefix3(key).checked_add(1) {
            None => Ok(None),
            Some(from) if from > 0x00FF_FFFF => Ok(None),
            Some(from) => self.promise_for_next_prefix(from),
        }
    }

    /// Successor entirely determined by the bitmap levels: the leftmost
    /// leaf under the smallest populated 3-byte prefix `>= from`.
    fn promise_for_next_prefix(&self, from: u32) -> Result<Option<LookupPromise<'_>>, Retry> {
        match self.next_prefix3(from)? {
            None => Ok(None),
            Some(p24) => {
                let key3: u64 = u64::from(p24) << 40;
                Ok(Some(self.table.must_exist_promise(3, key3)))
            }
        }
    }

    /// Smallest populated 3-byte prefix `>= from`, walking up through the
    /// levels chunk by chunk and back down to the leftmost populated
    /// entries.
    fn next_prefix3(&self, from: u32) -> Result<Option<u32>, Retry> {
        debug_assert!(from <= 0x00FF_FFFF);
        if let Some(p24) = self.levels.next_set_in_chunk(Level::L2, from) {
            return Ok(Some(p24));
        }
        let from16: u32 = (from >> 8) + 1;
        if from16 <= 0xFFFF {
            if let Some(p16) = self.levels.next_set_in_chunk(Level::L1, from16) {
                return match self.levels.first_set_in_chunk(Level::L2, p16 << 8) {
                    Some(p24) => Ok(Some(p24)),
                    // A populated level-1 prefix with an empty level-2
                    // chunk is a mutation in flight.
                    None => Err(Retry),
                };
            }
        }
        let from8: u32 = (from >> 16) + 1;
        if from8 <= 0xFF {
            if let Some(b0) = self.levels.next_set_in_chunk(Level::L0, from8) {
                let p16: u32 = match self.levels.first_set_in_chunk(Level::L1, b0 << 8) {
                    Some(p16) => p16,
                    None => return Err(Retry),
                };
                return match self.levels.first_set_in_chunk(Level::L2, p16 << 8) {
                    Some(p24) => Ok(Some(p24)),
                    None => Err(Retry),
                };
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    //  Validated primitives
    // ------------------------------------------------------------------

    /// Probe under the shared displacement lock and validate the hit.
    pub(crate) fn probe_validated(
        &self,
        index_len: usize,
        key: u64,
        snapshot: u32,
    ) -> Result<Option<&CuckooNode>, Retry> {
        let _shared = self.table.displacement_lock().read_recursive();
        self.table.probe_validated(index_len, key, snapshot)
    }

    /// Child-map view with the reset-epoch re-check that makes the
    /// external-pointer dereference sound for readers.
    fn child_view<'a>(
        &self,
        node: &'a CuckooNode,
        snap: ReadSnapshot,
    ) -> Result<ChildMapView<'a>, Retry> {
        let fields: ChildMapFields = node.child_map_fields(snap.generation)?;
        if !self.read_still_valid(snap) {
            return Err(Retry);
        }
        // SAFETY: the fields validated against the snapshot and no reset
        // completed since the snapshot was taken, so an external kind
        // carries a live arena pointer.
        Ok(unsafe { CuckooNode::child_map_view_from(fields) })
    }
}

/// 3-byte prefix of a key, as a bitmap index.
#[inline]
pub(crate) fn prefix3(key: u64) -> u32 {
    (key >> 40) as u32
}

/// 2-byte prefix of a key, as a bitmap index.
#[inline]
pub(crate) fn prefix2(key: u64) -> u32 {
    (key >> 48) as u32
}

/// 1-byte prefix of a key, as a bitmap index.
#[inline]
pub(crate) fn prefix1(key: u64) -> u32 {
    (key >> 56) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_answers_nothing() {
        let set = MlpSet::new(16);
        assert!(!set.exist(0));
        assert!(!set.exist(u64::MAX));
        assert_eq!(set.lower_bound(0), None);
        assert!(!set.lower_bound_promise(0).is_valid());
    }

    #[test]
    fn single_key() {
        let set = MlpSet::new(16);
        set.writer().insert(0x0102_0304_0506_0708);
        assert!(set.exist(0x0102_0304_0506_0708));
        assert!(!set.exist(0x0102_0304_0506_0709));
        assert_eq!(set.lower_bound(0), Some(0x0102_0304_0506_0708));
        assert_eq!(set.lower_bound(0x0102_0304_0506_0708), Some(0x0102_0304_0506_0708));
        assert_eq!(set.lower_bound(0x0102_0304_0506_0709), None);
    }

    #[test]
    fn writer_permit_is_exclusive() {
        let set = MlpSet::new(16);
        let w = set.writer();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| set.writer()));
        assert!(result.is_err());
        drop(w);
        let _w2 = set.writer();
    }

    #[test]
    fn keys_sharing_long_prefixes_split_correctly() {
        let set = MlpSet::new(64);
        let mut w = set.writer();
        // Shared 5-byte prefix, divergence at byte 5.
        let a: u64 = 0x0102_0304_0510_0000;
        let b: u64 = 0x0102_0304_0520_0000;
        let c: u64 = 0x0102_0304_0530_0000;
        assert!(w.insert(a));
        assert!(w.insert(b));
        assert!(w.insert(c));
        drop(w);
        for k in [a, b, c] {
            assert!(set.exist(k));
            assert_eq!(set.lower_bound(k), Some(k));
        }
        assert_eq!(set.lower_bound(a + 1), Some(b));
        assert_eq!(set.lower_bound(b + 1), Some(c));
        assert_eq!(set.lower_bound(c + 1), None);
        assert_eq!(set.lower_bound(0), Some(a));
    }

    #[test]
    fn lower_bound_crosses_bitmap_levels() {
        let set = MlpSet::new(64);
        let mut w = set.writer();
        let keys: [u64; 3] = [
            0x0100_0000_0000_0000,
            0x0200_0000_0000_0000,
            0xFF00_0000_0000_0001,
        ];
        for k in keys {
            assert!(w.insert(k));
        }
        drop(w);
        assert_eq!(set.lower_bound(0), Some(keys[0]));
        assert_eq!(set.lower_bound(keys[0] + 1), Some(keys[1]));
        assert_eq!(set.lower_bound(keys[1] + 1), Some(keys[2]));
        assert_eq!(set.lower_bound(u64::MAX), None);
    }

    #[test]
    fn promise_resolves_like_lower_bound() {
        let set = MlpSet::new(64);
        let mut w = set.writer();
        for k in [5u64, 900, 0x10_0000, u64::MAX] {
            w.insert(k);
        }
        drop(w);
        for q in [0u64, 5, 6, 899, 901, 0x0F_FFFF, 0x10_0001, u64::MAX] {
            let promise = set.lower_bound_promise(q);
            promise.prefetch();
            assert_eq!(
                promise.is_valid().then(|| promise.resolve()),
                set.lower_bound(q),
                "query {q:#x}"
            );
        }
    }
}
