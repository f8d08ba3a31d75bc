//! Interval overlay benchmarks: point and range population, lookups
//! that hit inside ranges, misses, erases and a mixed churn loop.
//!
//! Run with: `cargo bench --bench range_ops`

use divan::{Bencher, black_box};
use mlptrie::RangeTree;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() {
    divan::main();
}

/// Deterministic disjoint ranges: `count` spans of width up to
/// `max_width`, separated so they never touch.
fn disjoint_ranges(count: usize, max_width: u64, seed: u64) -> Vec<(u64, u64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let stride: u64 = max_width * 4;
    (0..count as u64)
        .map(|i| {
            let start: u64 = i * stride + rng.gen_range(0..max_width);
            (start, start + rng.gen_range(0..max_width))
        })
        .collect()
}

#[divan::bench_group(name = "01_populate")]
mod populate {
    use super::{Bencher, RangeTree, black_box, disjoint_ranges};

    #[divan::bench]
    fn store_10k_points(bencher: Bencher) {
        bencher
            .with_inputs(|| RangeTree::new(16_384))
            .bench_local_values(|tree| {
                let mut writer = tree.writer();
                for k in 0..10_000u64 {
                    writer.store(black_box(k * 7), black_box(k + 1));
                }
                drop(writer);
                tree
            });
    }

    #[divan::bench]
    fn store_10k_ranges(bencher: Bencher) {
        let ranges = disjoint_ranges(10_000, 100, 11);
        bencher
            .with_inputs(|| RangeTree::new(32_768))
            .bench_local_values(|tree| {
                let mut writer = tree.writer();
                for (i, &(s, e)) in ranges.iter().enumerate() {
                    writer.store_range(black_box(s), black_box(e), i as u64 + 1);
                }
                drop(writer);
                tree
            });
    }
}

#[divan::bench_group(name = "02_load")]
mod load {
    use super::{Bencher, RangeTree, StdRng, black_box, disjoint_ranges};
    use rand::{Rng, SeedableRng};

    const N: usize = 50_000;

    fn populated() -> (RangeTree, Vec<(u64, u64)>) {
        let ranges = disjoint_ranges(N, 100, 11);
        let tree = RangeTree::new(N * 3);
        let mut writer = tree.writer();
        for (i, &(s, e)) in ranges.iter().enumerate() {
            writer.store_range(s, e, i as u64 + 1);
        }
        drop(writer);
        (tree, ranges)
    }

    /// Query the middle of every stored range.
    #[divan::bench]
    fn hit_mid_range(bencher: Bencher) {
        let (tree, ranges) = populated();
        let mut i = 0usize;
        bencher.bench_local(|| {
            i = (i + 1) % ranges.len();
            let (s, e) = ranges[i];
            black_box(tree.load(black_box(s + (e - s) / 2)))
        });
    }

    /// Query keys in the deliberate gaps between ranges.
    #[divan::bench]
    fn miss_between_ranges(bencher: Bencher) {
        let (tree, ranges) = populated();
        let mut rng = StdRng::seed_from_u64(5);
        let probes: Vec<u64> = (0..ranges.len())
            .map(|_| rng.gen::<u64>())
            .collect();
        let mut i = 0usize;
        bencher.bench_local(|| {
            i = (i + 1) % probes.len();
            black_box(tree.load(black_box(probes[i])))
        });
    }

    #[divan::bench]
    fn find_next_sweep(bencher: Bencher) {
        let (tree, ranges) = populated();
        let mut i = 0usize;
        bencher.bench_local(|| {
            i = (i + 1) % ranges.len();
            black_box(tree.find_next(black_box(ranges[i].0.saturating_sub(3))))
        });
    }
}

#[divan::bench_group(name = "03_churn")]
mod churn {
    use super::{Bencher, RangeTree, StdRng, black_box};
    use rand::{Rng, SeedableRng};

    /// The single-threaded shape of the mixed workload: 60% range
    /// stores, 20% erases, 20% loads over a bounded key space.
    #[divan::bench]
    fn mixed_ops(bencher: Bencher) {
        let tree = RangeTree::new(1 << 16);
        let mut rng = StdRng::seed_from_u64(99);
        {
            let mut writer = tree.writer();
            for i in 0..1_000u64 {
                writer.store_range(i * 1000, i * 1000 + 500, i + 1);
            }
        }
        bencher.bench_local(|| {
            let mut writer = tree.writer();
            let roll: u32 = rng.gen_range(0..100);
            let key: u64 = rng.gen_range(0..1_000_000u64);
            if roll < 60 {
                black_box(writer.store_range(key, key + rng.gen_range(0..500), key | 1))
            } else if roll < 80 {
                black_box(writer.erase(key))
            } else {
                drop(writer);
                return black_box(tree.load(key).is_some());
            }
        });
    }
}
