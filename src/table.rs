//! Filepath: src/table.rs
//!
//! The cuckoo hash table storing trie nodes of depth 3 and below.
//!
//! Every `(index_len, prefix)` pair owns exactly two candidate slots. An
//! insert whose candidates are both occupied displaces: it walks the
//! eviction chain read-only until an empty slot appears, then performs
//! the moves *backwards* (last hop first), so a displaced node is always
//! reachable from at least one of its candidate slots at every instant.
//! The backward pass runs under the exclusive side of the displacement
//! lock; readers hold the shared side across their dual-slot comparison
//! windows, which is what keeps "both slots empty" from ever being
//! observed for a live key.
//!
//! The table never resizes. It is sized at construction for the
//! capacity handed to the set; exhausting the displacement budget means
//! the capacity was undersized, which is fatal by contract.

use std::fmt as StdFmt;

use parking_lot::{Mutex, RwLock};

use crate::hashing;
use crate::key;
use crate::node::{CuckooNode, ExternalBitmap, Retry};
use crate::node::{
    KIND_EXTERNAL, KIND_LIST, KIND_STRIPE_BASE, list_get, list_push, list_remove, stripe_of,
};
use crate::prefetch::prefetch_read;

/// Displacement budget per insert. Unreachable in practice at the load
/// factors the sizing policy produces.
const DISPLACEMENT_ROUNDS: usize = 500;

/// Slots per expected key. Each key accounts for at most two nodes (its
/// leaf plus at most one branch it introduced), so four slots per key
/// keeps the table at or below 50% load.
const SLOTS_PER_KEY: usize = 4;

/// Smallest table we bother allocating.
const MIN_SLOTS: usize = 1024;

// ============================================================================
//  Errors
// ============================================================================

/// The displacement budget was exhausted: the table was sized for fewer
/// keys than were inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFull;

impl StdFmt::Display for TableFull {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        write!(f, "cuckoo table displacement budget exhausted (undersized capacity)")
    }
}

impl std::error::Error for TableFull {}

// ============================================================================
//  LookupPromise
// ============================================================================

/// A deferred lookup: both candidate slots plus the comparison material,
/// with the equality check postponed until [`resolve`](Self::resolve).
///
/// The split lets callers batch several lookups, prefetch every
/// candidate line at once, do unrelated work while the lines travel, and
/// only then resolve. A promise built over a single already-located node
/// resolves to that node's `min_key` without any comparison.
pub struct LookupPromise<'a> {
    n1: Option<&'a CuckooNode>,
    n2: Option<&'a CuckooNode>,
    lock: &'a RwLock<()>,
    expected: u32,
    shift: u32,
    shifted_key: u64,
}

impl<'a> LookupPromise<'a> {
    /// A promise that will never resolve (the queried key has no answer).
    #[must_use]
    pub(crate) fn invalid(lock: &'a RwLock<()>) -> Self {
        Self {
            n1: None,
            n2: None,
            lock,
            expected: 0,
            shift: 0,
            shifted_key: 0,
        }
    }

    /// A promise over a node that is already known to hold the answer.
    #[must_use]
    pub(crate) fn settled(node: &'a CuckooNode, lock: &'a RwLock<()>) -> Self {
        Self {
            n1: Some(node),
            n2: None,
            lock,
            expected: 0,
            shift: 0,
            shifted_key: 0,
        }
    }

    /// Whether the lookup has an answer at all.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.n1.is_some()
    }

    /// Hint both candidate lines into cache.
    #[inline]
    pub fn prefetch(&self) {
        if let Some(n2) = self.n2 {
            if let Some(n1) = self.n1 {
                prefetch_read(std::ptr::from_ref(n1));
            }
            prefetch_read(std::ptr::from_ref(n2));
        }
    }

    /// Whether neither captured slot has moved past `snapshot`.
    #[must_use]
    pub(crate) fn generation_valid(&self, snapshot: u32) -> bool {
        let ok = |n: Option<&CuckooNode>| n.map_or(true, |n| n.version() <= snapshot);
        ok(self.n1) && ok(self.n2)
    }

    /// Perform the comparison and return the winning node's `min_key`.
    ///
    /// # Panics
    ///
    /// Panics if the promise is not valid.
    #[must_use]
    pub fn resolve(&self) -> u64 {
        let n1: &CuckooNode = self.n1.expect("resolving an invalid promise");
        match self.n2 {
            None => n1.min_key(),
            Some(n2) => {
                // Dual-slot comparison window: shared displacement lock.
                let _shared = self.lock.read_recursive();
                if n1.matches(self.expected, self.shift, self.shifted_key) {
                    n1.min_key()
                } else {
                    n2.min_key()
                }
            }
        }
    }
}

// ============================================================================
//  CuckooTable
// ============================================================================

/// Fixed-size cuckoo table of [`CuckooNode`] slots.
pub struct CuckooTable {
    slots: Box<[CuckooNode]>,
    mask: u32,
    /// Shared: reader dual-slot comparison windows. Exclusive: the
    /// backward move pass of a displacement, and quiesce-and-reset.
    displacement: RwLock<()>,
    /// Arena of external child bitmaps; entries live until teardown.
    ext_bitmaps: Mutex<Vec<Box<ExternalBitmap>>>,
}

impl CuckooTable {
    /// Allocate a table sized for `capacity` keys.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots: usize = (capacity.max(1) * SLOTS_PER_KEY)
            .next_power_of_two()
            .max(MIN_SLOTS);
        assert!(slots <= 1 << 32, "capacity exceeds table addressing");
        Self {
            slots: (0..slots).map(|_| CuckooNode::empty()).collect(),
            mask: (slots - 1) as u32,
            displacement: RwLock::new(()),
            ext_bitmaps: Mutex::new(Vec::new()),
        }
    }

    /// Table capacity mask (slot count minus one).
    #[inline]
    #[must_use]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    #[must_use]
    pub fn slot(&self, pos: u32) -> &CuckooNode {
        &self.slots[pos as usize]
    }

    /// The displacement coordination lock.
    #[inline]
    pub(crate) fn displacement_lock(&self) -> &RwLock<()> {
        &self.displacement
    }

    /// Candidate slot positions for a `(index_len, prefix)` pair.
    #[inline]
    fn position_pair(&self, index_len: usize, prefix: u64) -> (u32, u32, u32) {
        let (h1, h2) = hashing::hash_pair(index_len, prefix);
        let expected: u32 = crate::node::expected_cmp_word(index_len, hashing::fingerprint18(h1));
        ((h1 as u32) & self.mask, (h2 as u32) & self.mask, expected)
    }

    // ------------------------------------------------------------------
    //  Probing
    // ------------------------------------------------------------------

    /// Find the node indexed by the first `index_len` bytes of `key`.
    ///
    /// Caller holds the shared displacement lock (or is the writer).
    #[must_use]
    pub(crate) fn probe(&self, index_len: usize, key: u64) -> Option<&CuckooNode> {
        let prefix: u64 = key::prefix(key, index_len);
        let (p1, p2, expected) = self.position_pair(index_len, prefix);
        let shift: u32 = key::shift_for(index_len);
        let shifted: u64 = key::shifted(key, index_len);
        let n1: &CuckooNode = self.slot(p1);
        if n1.matches(expected, shift, shifted) {
            return Some(n1);
        }
        let n2: &CuckooNode = self.slot(p2);
        if n2.matches(expected, shift, shifted) {
            return Some(n2);
        }
        None
    }

    /// Probe and validate against a reader snapshot in one step.
    pub(crate) fn probe_validated(
        &self,
        index_len: usize,
        key: u64,
        snapshot: u32,
    ) -> Result<Option<&CuckooNode>, Retry> {
        match self.probe(index_len, key) {
            None => Ok(None),
            Some(n) => {
                n.validate(snapshot)?;
                Ok(Some(n))
            }
        }
    }

    /// Build a promise for a key expected to be present at `index_len`.
    #[must_use]
    pub(crate) fn must_exist_promise(&self, index_len: usize, key: u64) -> LookupPromise<'_> {
        let prefix: u64 = key::prefix(key, index_len);
        let (p1, p2, expected) = self.position_pair(index_len, prefix);
        LookupPromise {
            n1: Some(self.slot(p1)),
            n2: Some(self.slot(p2)),
            lock: &self.displacement,
            expected,
            shift: key::shift_for(index_len),
            shifted_key: key::shifted(key, index_len),
        }
    }

    // ------------------------------------------------------------------
    //  Writer: insert / displacement / remove
    // ------------------------------------------------------------------

    /// Insert a node. The caller guarantees the `(index_len, prefix)`
    /// pair is absent. Returns the slot position and how many existing
    /// nodes were displaced to make room.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert(
        &self,
        index_len: usize,
        full_key_len: usize,
        min_key: u64,
        kind_bits: u32,
        child_count: usize,
        child_map: u64,
        version: u32,
    ) -> Result<(u32, usize), TableFull> {
        let prefix: u64 = key::prefix(min_key, index_len);
        let (p1, p2, _) = self.position_pair(index_len, prefix);
        debug_assert!(self.probe(index_len, min_key).is_none(), "duplicate index key");
        let (h1, _) = hashing::hash_pair(index_len, prefix);
        let fp: u32 = hashing::fingerprint18(h1);

        let (pos, displaced): (u32, usize) = if !self.slot(p1).is_occupied() {
            (p1, 0)
        } else if !self.slot(p2).is_occupied() {
            (p2, 0)
        } else {
            (p1, self.free_slot_by_displacement(p1, version)?)
        };
        self.slot(pos).init(
            index_len,
            full_key_len,
            min_key,
            fp,
            kind_bits,
            child_count,
            child_map,
            version,
        );
        Ok((pos, displaced))
    }

    /// Vacate `start` by walking its eviction chain to an empty slot and
    /// moving occupants backwards, last hop first. Nodes stay reachable
    /// from one of their candidate slots throughout. Returns the number
    /// of nodes moved.
    fn free_slot_by_displacement(&self, start: u32, version: u32) -> Result<usize, TableFull> {
        let mut path: Vec<u32> = Vec::with_capacity(DISPLACEMENT_ROUNDS + 1);
        path.push(start);
        let mut cur: u32 = start;
        for _ in 0..DISPLACEMENT_ROUNDS {
            let occ: &CuckooNode = self.slot(cur);
            let ilen: usize = occ.index_len();
            let prefix: u64 = key::prefix(occ.min_key(), ilen);
            let (p1, p2, _) = self.position_pair(ilen, prefix);
            let alt: u32 = if p1 == cur { p2 } else { p1 };
            if alt == cur {
                // Both hash functions collided onto one slot; this
                // occupant cannot move.
                return Err(TableFull);
            }
            path.push(alt);
            if !self.slot(alt).is_occupied() {
                // Move backwards under one exclusive section; no
                // allocation happens while it is held.
                let _excl = self.displacement.write();
                for w in path.windows(2).rev() {
                    let src: &CuckooNode = self.slot(w[0]);
                    src.stamp(version);
                    self.slot(w[1]).move_from(src, version);
                    src.clear(version);
                }
                return Ok(path.len() - 1);
            }
            cur = alt;
        }
        Err(TableFull)
    }

    /// Remove the node indexed by the first `index_len` bytes of `key`.
    pub(crate) fn remove(&self, index_len: usize, key: u64, version: u32) -> bool {
        match self.probe(index_len, key) {
            None => false,
            Some(n) => {
                n.clear(version);
                true
            }
        }
    }

    // ------------------------------------------------------------------
    //  Writer: child-map transitions
    // ------------------------------------------------------------------

    /// Add child `b` to an internal node; `b` must be absent. Handles the
    /// inline-list → stripe-bitmap → external-bitmap promotions.
    pub(crate) fn add_child(&self, n: &CuckooNode, b: u8, version: u32) {
        let count: usize = n.child_count();
        n.stamp(version);
        match n.kind_bits() {
            KIND_LIST => {
                let word: u64 = n.child_map_word();
                debug_assert!(!crate::node::list_contains(word, count, b));
                if count < 8 {
                    n.set_child_map_word(list_push(word, count, b));
                    n.set_child_count(count + 1);
                } else {
                    // Ninth child: promote.
                    let stripe: u32 = stripe_of(b);
                    if (0..8).all(|i| stripe_of(list_get(word, i)) == stripe) {
                        let mut bits: u64 = 1u64 << (b % 64);
                        for i in 0..8 {
                            bits |= 1u64 << (list_get(word, i) % 64);
                        }
                        n.set_child_map_word(bits);
                        n.set_kind_bits(KIND_STRIPE_BASE + stripe);
                    } else {
                        let bm: &ExternalBitmap = self.alloc_external();
                        for i in 0..8 {
                            bm.set(list_get(word, i));
                        }
                        bm.set(b);
                        n.set_child_map_word(std::ptr::from_ref(bm) as u64);
                        n.set_kind_bits(KIND_EXTERNAL);
                    }
                    n.set_child_count(9);
                }
            }
            KIND_EXTERNAL => {
                // SAFETY: writer-side view; the pointer was installed by
                // this writer lineage and the arena keeps it alive.
                let bm: &ExternalBitmap =
                    unsafe { &*(n.child_map_word() as usize as *const ExternalBitmap) };
                debug_assert!(!bm.test(b));
                bm.set(b);
                n.set_child_count(count + 1);
            }
            stripe_kind => {
                let stripe: u32 = stripe_kind - KIND_STRIPE_BASE;
                let bits: u64 = n.child_map_word();
                if stripe_of(b) == stripe {
                    debug_assert!(bits & (1u64 << (b % 64)) == 0);
                    n.set_child_map_word(bits | (1u64 << (b % 64)));
                } else {
                    // Child outside the stripe: go external.
                    let bm: &ExternalBitmap = self.alloc_external();
                    let base: u16 = (stripe as u16) * 64;
                    let mut rest: u64 = bits;
                    while rest != 0 {
                        let bit: u16 = rest.trailing_zeros() as u16;
                        bm.set((base + bit) as u8);
                        rest &= rest - 1;
                    }
                    bm.set(b);
                    n.set_child_map_word(std::ptr::from_ref(bm) as u64);
                    n.set_kind_bits(KIND_EXTERNAL);
                }
                n.set_child_count(count + 1);
            }
        }
    }

    /// Remove child `b` from an internal node; `b` must be present.
    /// Returns the remaining child count. A stripe bitmap that shrinks to
    /// 8 children demotes back to an inline list; external bitmaps stay
    /// external (the arena keeps them alive regardless).
    pub(crate) fn remove_child(&self, n: &CuckooNode, b: u8, version: u32) -> usize {
        let count: usize = n.child_count();
        debug_assert!(count >= 1);
        let remaining: usize = count - 1;
        n.stamp(version);
        match n.kind_bits() {
            KIND_LIST => {
                n.set_child_map_word(list_remove(n.child_map_word(), count, b));
            }
            KIND_EXTERNAL => {
                // SAFETY: as in `add_child`.
                let bm: &ExternalBitmap =
                    unsafe { &*(n.child_map_word() as usize as *const ExternalBitmap) };
                debug_assert!(bm.test(b));
                bm.clear(b);
            }
            stripe_kind => {
                let stripe: u32 = stripe_kind - KIND_STRIPE_BASE;
                debug_assert_eq!(stripe_of(b), stripe);
                let bits: u64 = n.child_map_word() & !(1u64 << (b % 64));
                if remaining <= 8 {
                    // Demote to an inline list.
                    let base: u16 = (stripe as u16) * 64;
                    let mut word: u64 = 0;
                    let mut i: usize = 0;
                    let mut rest: u64 = bits;
                    while rest != 0 {
                        let bit: u16 = rest.trailing_zeros() as u16;
                        word = list_push(word, i, (base + bit) as u8);
                        i += 1;
                        rest &= rest - 1;
                    }
                    debug_assert_eq!(i, remaining);
                    n.set_child_map_word(word);
                    n.set_kind_bits(KIND_LIST);
                } else {
                    n.set_child_map_word(bits);
                }
            }
        }
        if remaining >= 1 {
            n.set_child_count(remaining);
        }
        remaining
    }

    /// Allocate a fresh external bitmap from the arena.
    fn alloc_external(&self) -> &ExternalBitmap {
        let bm: Box<ExternalBitmap> = Box::new(ExternalBitmap::new());
        let ptr: *const ExternalBitmap = std::ptr::from_ref(bm.as_ref());
        self.ext_bitmaps.lock().push(bm);
        // SAFETY: the Box never moves its heap allocation and the arena
        // only grows until the table is dropped.
        unsafe { &*ptr }
    }

    // ------------------------------------------------------------------
    //  Quiesce support
    // ------------------------------------------------------------------

    /// Zero the version stamp of every slot. Called by the writer while
    /// it holds the displacement lock exclusively during a generation
    /// reset.
    pub(crate) fn reset_versions(&self) {
        for slot in self.slots.iter() {
            slot.reset_version();
        }
    }
}
