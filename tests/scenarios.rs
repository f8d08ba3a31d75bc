//! End-to-end scenario tests: fixed operation scripts with exact
//! expected outcomes, covering the set and the interval overlay.

mod common;

use mlptrie::{MlpSet, RangeTree};

#[test]
fn reverse_order_insertion_tracks_minimum() {
    common::init_tracing();
    let set = MlpSet::new(2048);
    let mut writer = set.writer();
    for k in (0..2000u64).rev() {
        assert!(writer.insert(k));
        assert_eq!(
            set.lower_bound(0),
            Some(k),
            "minimum must be the key just inserted"
        );
    }
    drop(writer);
    for k in 0..2000u64 {
        assert!(set.exist(k), "key {k}");
        assert_eq!(set.lower_bound(k), Some(k));
    }
}

#[test]
fn interleaved_inserts_and_removes_drain_to_empty() {
    common::init_tracing();
    let set = MlpSet::new(256);
    let mut writer = set.writer();
    for k in 0..200u64 {
        assert!(writer.insert(k));
    }
    // Visit every residue of a coprime stride exactly once.
    for x in 0..199u64 {
        let k: u64 = (3 * x + 1) % 199;
        assert!(writer.remove(k), "remove {k}");
        assert!(!set.exist(k), "key {k} still present after removal");
    }
    // The stride touches residues of 199 only; key 199 remains.
    assert!(writer.remove(199));
    drop(writer);
    for k in 0..200u64 {
        assert!(!set.exist(k), "key {k}");
    }
    assert_eq!(set.lower_bound(0), None);
}

#[test]
fn range_overwrite_shifts_ownership() {
    common::init_tracing();
    let tree = RangeTree::new(64);
    let mut writer = tree.writer();
    assert!(writer.store_range(100, 200, 0xA));
    assert!(writer.store_range(150, 250, 0xB));
    drop(writer);
    assert_eq!(tree.load(100), None);
    assert_eq!(tree.load(149), None);
    assert_eq!(tree.load(150), Some(0xB));
    assert_eq!(tree.load(200), Some(0xB));
    assert_eq!(tree.load(250), Some(0xB));
    assert_eq!(tree.load(251), None);
}

#[test]
fn range_erase_from_middle_removes_both_endpoints() {
    common::init_tracing();
    let tree = RangeTree::new(64);
    let mut writer = tree.writer();
    assert!(writer.store_range(500, 600, 0x11));
    assert!(writer.erase(550));
    drop(writer);
    assert_eq!(tree.load(500), None);
    assert_eq!(tree.load(600), None);
    assert!(tree.is_empty());
}

#[test]
fn find_next_across_points_and_intervals() {
    common::init_tracing();
    let tree = RangeTree::new(64);
    {
        let mut writer = tree.writer();
        assert!(writer.store(100, 0xA));
        assert!(writer.store_range(200, 300, 0xB));
    }
    assert_eq!(tree.find_next(100), Some((100, 100, 0xA)));
    assert_eq!(tree.find_next(200), Some((200, 300, 0xB)));
    assert_eq!(tree.find_next(250), Some((200, 300, 0xB)));
    assert_eq!(tree.find_next(101), Some((200, 300, 0xB)));
    assert_eq!(tree.find_next(301), None);
}

#[test]
fn sparse_extremes() {
    let set = MlpSet::new(64);
    let mut writer = set.writer();
    assert!(writer.insert(0));
    assert!(writer.insert(u64::MAX));
    drop(writer);
    assert_eq!(set.lower_bound(0), Some(0));
    assert_eq!(set.lower_bound(1), Some(u64::MAX));
    assert_eq!(set.lower_bound(u64::MAX), Some(u64::MAX));
    assert!(set.exist(0));
    assert!(set.exist(u64::MAX));

    let mut writer = set.writer();
    assert!(writer.remove(0));
    drop(writer);
    assert_eq!(set.lower_bound(0), Some(u64::MAX));
}

#[test]
fn dense_block_walks_every_successor() {
    let set = MlpSet::new(8192);
    let mut writer = set.writer();
    let base: u64 = 0xABCD_EF00_0000_0000;
    for k in 0..4096u64 {
        assert!(writer.insert(base + k));
    }
    drop(writer);
    // Walk the whole block through lower_bound successor hops.
    let mut cursor: u64 = 0;
    let mut seen: u64 = 0;
    while let Some(k) = set.lower_bound(cursor) {
        assert_eq!(k, base + seen);
        seen += 1;
        match k.checked_add(1) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    assert_eq!(seen, 4096);
}

#[test]
fn overlay_count_matches_population() {
    let tree = RangeTree::new(4096);
    {
        let mut writer = tree.writer();
        for i in 0..500u64 {
            assert!(writer.insert_range(i * 10, i * 10 + 5, i + 1));
        }
    }
    assert_eq!(tree.count(), 500);
    let mut expected: u64 = 0;
    for (s, e, v) in tree.iter() {
        assert_eq!(s, expected * 10);
        assert_eq!(e, expected * 10 + 5);
        assert_eq!(v, expected + 1);
        expected += 1;
    }
    assert_eq!(expected, 500);
}
