//! # mlptrie
//!
//! An ordered index over 64-bit keys that answers *is `k` present*,
//! *what is the smallest member `>= k`*, and, through the interval
//! overlay, *what value covers `k`*, at memory-bandwidth speeds.
//!
//! ## Design
//!
//! The trie's top three levels are flat bitmaps (256 bits, 8 KiB, 2 MiB)
//! indexed by 1-, 2- and 3-byte key prefixes; everything deeper lives in
//! a cuckoo hash table of fixed 24-byte, path-compressed nodes, two
//! candidate slots per node. Because every candidate line for a query is
//! known up front, a lookup prefetches all of them at once and resolves
//! off a single concurrent round of cache misses instead of a serial
//! pointer chase: memory-level parallelism doing the work a pointer
//! tree spends eight round trips on.
//!
//! ## Concurrency
//!
//! One writer, any number of readers, no locks or atomic RMWs on the
//! read fast path. Every node carries a 24-bit generation stamp; the
//! writer stamps before mutating and publishes a set-wide generation
//! after, so readers validate each node against the snapshot they
//! started with and restart on interference. Cuckoo node moves are
//! additionally fenced by a small reader-writer coordination lock so a
//! live key never looks absent from both of its slots.
//!
//! ## Surfaces
//!
//! - [`MlpSet`]: membership set with [`exist`](MlpSet::exist),
//!   [`lower_bound`](MlpSet::lower_bound) and deferred
//!   [`lower_bound_promise`](MlpSet::lower_bound_promise) queries;
//!   mutation through the [`SetWriter`] permit.
//! - [`RangeTree`]: disjoint interval map over the same machinery;
//!   mutation through the [`RangeWriter`] permit.
//! - [`harness`]: the vtable contract benchmark drivers use.
//!
//! ```rust
//! use mlptrie::RangeTree;
//!
//! let tree = RangeTree::new(1 << 16);
//! {
//!     let mut w = tree.writer();
//!     w.store_range(0x1000, 0x1FFF, 1);
//!     w.store(0x2000, 2);
//! }
//! assert_eq!(tree.load(0x1234), Some(1));
//! assert_eq!(tree.load(0x2000), Some(2));
//! assert_eq!(tree.find_next(0x2001), None);
//! ```

pub mod affinity;
pub mod harness;
pub mod key;
pub mod prefetch;

mod bitmap;
mod hashing;
mod node;
mod range;
mod set;
mod stats;
mod table;
mod tracing_shim;

pub use range::{RangeIter, RangeTree, RangeWriter};
pub use set::{MlpSet, SetWriter};
pub use stats::SetStats;
pub use table::LookupPromise;
