//! Filepath: src/affinity.rs
//!
//! Thread-to-core pinning.
//!
//! The single-writer/many-reader workloads this crate targets are
//! measured with each thread pinned to its own core; cross-core
//! migration mid-run wrecks both the cache residency the bitmap levels
//! rely on and the reproducibility of throughput numbers. Pinning is
//! best-effort: on platforms without affinity support this is a no-op
//! that reports `false`.

/// Pin the calling thread to logical core `core`.
///
/// Returns `true` if the pin took effect, `false` if the platform does
/// not support affinity or `core` does not exist.
pub fn pin_to_core(core: usize) -> bool {
    match core_affinity::get_core_ids() {
        Some(ids) => ids
            .into_iter()
            .find(|id| id.id == core)
            .is_some_and(core_affinity::set_for_current),
        None => false,
    }
}
