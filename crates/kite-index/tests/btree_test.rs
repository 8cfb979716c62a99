//! End-to-end tests for the B+ tree index.

use kite_index::{AttrType, BPlusTree, IndexOptions, RecordId};
use std::sync::Arc;
use tempfile::tempdir;

fn rid(slot: u32) -> RecordId {
    RecordId::new(1, slot)
}

fn small_options() -> IndexOptions {
    IndexOptions {
        leaf_max_size: Some(4),
        internal_max_size: Some(4),
        pool_frames: Some(64),
    }
}

fn int_tree(dir: &tempfile::TempDir, options: IndexOptions) -> BPlusTree {
    BPlusTree::create(dir.path().join("index.kite"), AttrType::Int, 4, options).unwrap()
}

fn full_scan(tree: &BPlusTree) -> Vec<i32> {
    let mut scanner = tree.scanner();
    scanner.open(None, true, None, true).unwrap();
    let mut out = Vec::new();
    while let Some(r) = scanner.next_entry().unwrap() {
        out.push(r.slot_num as i32);
    }
    out
}

#[test]
fn split_produces_two_leaves_under_new_root() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    for v in 1i32..=5 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }

    tree.validate().unwrap();
    assert_eq!(full_scan(&tree), vec![1, 2, 3, 4, 5]);

    let rendering = tree.print_tree().unwrap();
    // The metadata line also mentions "internal_max"; only node lines
    // carry the bare word.
    let internal_line = rendering
        .lines()
        .find(|l| l.contains(" internal "))
        .expect("root should be internal after the split");
    assert!(internal_line.contains("children=[") && internal_line.matches(", ").count() >= 1);
    assert_eq!(
        rendering.lines().filter(|l| l.contains(" leaf ")).count(),
        2
    );
}

#[test]
fn bulk_insert_then_delete_keeps_invariants() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    for v in 1i32..=20 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }
    tree.validate().unwrap();

    for v in 1i32..=15 {
        tree.delete_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }
    tree.validate().unwrap();

    assert_eq!(full_scan(&tree), vec![16, 17, 18, 19, 20]);
}

#[test]
fn deleting_last_entry_empties_the_tree() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    for v in 1i32..=8 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }
    for v in 1i32..=8 {
        tree.delete_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
        tree.validate().unwrap();
    }

    assert!(tree.is_empty());
    assert!(full_scan(&tree).is_empty());
    assert!(tree.print_tree().unwrap().contains("<empty>"));
}

#[test]
fn duplicate_values_survive_partial_deletion() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    let value = 42i32.to_le_bytes();
    for slot in 0..6 {
        tree.insert_entry(&value, rid(slot)).unwrap();
    }

    assert_eq!(
        tree.get_entry(&value).unwrap(),
        (0..6).map(rid).collect::<Vec<_>>()
    );

    tree.delete_entry(&value, rid(3)).unwrap();
    let remaining = tree.get_entry(&value).unwrap();
    assert_eq!(remaining, vec![rid(0), rid(1), rid(2), rid(4), rid(5)]);
    tree.validate().unwrap();
}

#[test]
fn reopened_index_serves_the_same_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("persist.kite");

    {
        let tree =
            BPlusTree::create(&path, AttrType::Int, 4, small_options()).unwrap();
        for v in (1i32..=30).rev() {
            tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = BPlusTree::open(&path).unwrap();
    tree.validate().unwrap();
    assert_eq!(full_scan(&tree), (1..=30).collect::<Vec<_>>());
    for v in 1i32..=30 {
        assert_eq!(
            tree.get_entry(&v.to_le_bytes()).unwrap(),
            vec![rid(v as u32)]
        );
    }
}

#[test]
fn scan_matches_sorted_set_for_every_bound_shape() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    let values: Vec<i32> = (0..40).map(|i| i * 3).collect();
    for &v in &values {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }

    let expect = |lo: Option<i32>, lo_inc: bool, hi: Option<i32>, hi_inc: bool| -> Vec<i32> {
        values
            .iter()
            .copied()
            .filter(|&v| match lo {
                Some(l) if lo_inc => v >= l,
                Some(l) => v > l,
                None => true,
            })
            .filter(|&v| match hi {
                Some(h) if hi_inc => v <= h,
                Some(h) => v < h,
                None => true,
            })
            .collect()
    };

    let shapes = [
        (None, true, None, true),
        (Some(10), true, None, true),
        (Some(10), false, None, true),
        (None, true, Some(60), true),
        (None, true, Some(60), false),
        (Some(9), true, Some(63), true),
        (Some(9), false, Some(63), false),
        (Some(-5), true, Some(500), true),
    ];

    for (lo, lo_inc, hi, hi_inc) in shapes {
        let lo_bytes = lo.map(i32::to_le_bytes);
        let hi_bytes = hi.map(i32::to_le_bytes);
        let mut scanner = tree.scanner();
        scanner
            .open(
                lo_bytes.as_ref().map(|b| &b[..]),
                lo_inc,
                hi_bytes.as_ref().map(|b| &b[..]),
                hi_inc,
            )
            .unwrap();
        let mut got = Vec::new();
        while let Some(r) = scanner.next_entry().unwrap() {
            got.push(r.slot_num as i32);
        }
        assert_eq!(got, expect(lo, lo_inc, hi, hi_inc), "bounds {lo:?}/{hi:?}");
    }
}

#[test]
fn delete_of_absent_pair_is_not_found() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, small_options());

    for v in 1i32..=10 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }

    assert!(tree.delete_entry(&99i32.to_le_bytes(), rid(0)).is_err());
    assert!(tree.delete_entry(&5i32.to_le_bytes(), rid(77)).is_err());

    tree.validate().unwrap();
    assert_eq!(full_scan(&tree), (1..=10).collect::<Vec<_>>());
}

#[test]
fn large_workload_with_default_capacities() {
    let dir = tempdir().unwrap();
    let tree = int_tree(&dir, IndexOptions::default());

    for v in 0i32..2000 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }
    tree.validate().unwrap();

    for v in (0i32..2000).step_by(2) {
        tree.delete_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }
    tree.validate().unwrap();

    assert_eq!(
        full_scan(&tree),
        (1..2000).step_by(2).collect::<Vec<_>>()
    );
}

#[test]
fn concurrent_inserts_build_a_valid_tree() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(int_tree(&dir, small_options()));

    let threads = 4;
    let per_thread = 200i32;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = tree.clone();
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let v = i * threads + t;
                    tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    tree.validate().unwrap();
    assert_eq!(
        full_scan(&tree),
        (0..threads * per_thread).collect::<Vec<_>>()
    );
}

#[test]
fn concurrent_readers_and_writers() {
    let dir = tempdir().unwrap();
    let tree = Arc::new(int_tree(&dir, small_options()));

    for v in 0i32..100 {
        tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
    }

    let writer = {
        let tree = tree.clone();
        std::thread::spawn(move || {
            for v in 100i32..300 {
                tree.insert_entry(&v.to_le_bytes(), rid(v as u32)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = tree.clone();
            std::thread::spawn(move || {
                for v in 0i32..100 {
                    let hits = tree.get_entry(&v.to_le_bytes()).unwrap();
                    assert_eq!(hits, vec![rid(v as u32)]);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    tree.validate().unwrap();
    assert_eq!(full_scan(&tree), (0..300).collect::<Vec<_>>());
}
