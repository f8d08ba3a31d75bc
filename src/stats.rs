//! Filepath: src/stats.rs
//!
//! Optional per-set instrumentation, compiled in with the `stats` feature.
//!
//! The counters answer the two questions that matter when tuning this
//! structure: how deep do LCP queries land (distribution over matched
//! prefix lengths), and how often does a successor walk have to climb
//! (parent-path step histogram). Displacement and slow-path counters
//! round out the picture. With the feature off every recorder is an
//! empty inline function.

#[cfg(feature = "stats")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Instrumentation counters for one set instance.
#[cfg(feature = "stats")]
#[derive(Debug, Default)]
pub struct SetStats {
    /// Matched index length per LCP query; index = length (0..=8).
    lcp_hist: [AtomicU64; 9],
    /// Parent-path steps per lower-bound; index = step count (0..=8).
    parent_steps_hist: [AtomicU64; 9],
    /// Nodes moved by cuckoo displacement.
    displaced_nodes: AtomicU64,
    /// Reader attempts that fell back to the shared coordination lock.
    slow_path: AtomicU64,
}

/// Instrumentation counters for one set instance (disabled build).
#[cfg(not(feature = "stats"))]
#[derive(Debug, Default)]
pub struct SetStats;

impl SetStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_lcp(&self, index_len: usize) {
        #[cfg(feature = "stats")]
        self.lcp_hist[index_len.min(8)].fetch_add(1, Ordering::Relaxed);
        #[cfg(not(feature = "stats"))]
        let _ = index_len;
    }

    #[inline]
    pub fn record_parent_steps(&self, steps: usize) {
        #[cfg(feature = "stats")]
        self.parent_steps_hist[steps.min(8)].fetch_add(1, Ordering::Relaxed);
        #[cfg(not(feature = "stats"))]
        let _ = steps;
    }

    #[inline]
    pub fn record_displaced(&self, moved: usize) {
        #[cfg(feature = "stats")]
        self.displaced_nodes.fetch_add(moved as u64, Ordering::Relaxed);
        #[cfg(not(feature = "stats"))]
        let _ = moved;
    }

    #[inline]
    pub fn record_slow_path(&self) {
        #[cfg(feature = "stats")]
        self.slow_path.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(feature = "stats")]
impl SetStats {
    /// Histogram of matched index lengths, by length.
    #[must_use]
    pub fn lcp_histogram(&self) -> [u64; 9] {
        std::array::from_fn(|i| self.lcp_hist[i].load(Ordering::Relaxed))
    }

    /// Histogram of parent-path steps per lower-bound.
    #[must_use]
    pub fn parent_steps_histogram(&self) -> [u64; 9] {
        std::array::from_fn(|i| self.parent_steps_hist[i].load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn displaced_nodes(&self) -> u64 {
        self.displaced_nodes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn slow_path_count(&self) -> u64 {
        self.slow_path.load(Ordering::Relaxed)
    }

    /// Zero every counter.
    pub fn clear(&self) {
        for c in &self.lcp_hist {
            c.store(0, Ordering::Relaxed);
        }
        for c in &self.parent_steps_hist {
            c.store(0, Ordering::Relaxed);
        }
        self.displaced_nodes.store(0, Ordering::Relaxed);
        self.slow_path.store(0, Ordering::Relaxed);
    }
}
