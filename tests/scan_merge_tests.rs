//! Scan state machine, k-way merge, boundary handling, and mark/restore.

use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use hrlix::{
    BitmapIndex, Datum, IndexConfig, MemTable, MemoryPageStore, Predicate, Rid, ScanDirection,
};

fn mem_index() -> BitmapIndex {
    BitmapIndex::new(Arc::new(MemoryPageStore::new()), IndexConfig::default()).unwrap()
}

fn build_two_values(a: &[Rid], b: &[Rid]) -> BitmapIndex {
    let index = mem_index();
    let mut table = MemTable::new();
    for &rid in a {
        table.insert_row(rid, vec![Datum::Int(1)]);
    }
    for &rid in b {
        table.insert_row(rid, vec![Datum::Int(2)]);
    }
    index.build(&table).unwrap();
    index
}

fn produce(index: &BitmapIndex, predicate: &Predicate) -> Vec<Rid> {
    index
        .begin_scan(predicate)
        .unwrap()
        .produce_all()
        .unwrap()
        .iter()
        .collect()
}

fn any_of(values: &[i64]) -> Predicate {
    Predicate::AnyOf(values.iter().map(|&v| vec![Datum::Int(v)]).collect())
}

#[test]
fn disjunction_is_sorted_union() {
    let a: Vec<Rid> = vec![2, 5, 64, 65, 1000, 70_000];
    let b: Vec<Rid> = vec![1, 5, 66, 1000, 12_345];
    let index = build_two_values(&a, &b);

    let mut expected: Vec<Rid> = a.iter().chain(b.iter()).copied().collect();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(produce(&index, &any_of(&[1, 2])), expected);
}

#[test]
fn disjunction_with_random_sets() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xB17_1D);
    let mut a = std::collections::BTreeSet::new();
    let mut b = std::collections::BTreeSet::new();
    for _ in 0..3_000 {
        a.insert(rng.gen_range(1u64..500_000));
        b.insert(rng.gen_range(1u64..500_000));
    }
    // A row carries one value only, so value 2 must not reuse value 1's RIDs.
    let a_set = a;
    let b: Vec<Rid> = b.difference(&a_set).copied().collect();
    let a: Vec<Rid> = a_set.into_iter().collect();
    let index = build_two_values(&a, &b);

    let mut expected: Vec<Rid> = a.iter().chain(b.iter()).copied().collect();
    expected.sort_unstable();
    expected.dedup();
    assert_eq!(produce(&index, &any_of(&[1, 2])), expected);
}

#[test]
fn abutting_runs_produce_no_duplicates_or_gaps() {
    // Value 1 owns a solid run ending exactly at a word boundary; value 2
    // starts at the very next RID. The union must be seamless.
    let a: Vec<Rid> = (1..=128u64).collect();
    let b: Vec<Rid> = (129..=256u64).collect();
    let index = build_two_values(&a, &b);
    let expected: Vec<Rid> = (1..=256u64).collect();
    assert_eq!(produce(&index, &any_of(&[1, 2])), expected);
}

#[test]
fn fill_run_ending_at_page_boundary() {
    // One page holds 1006 content words = 64_384 RIDs of literal coverage.
    // Pin bits around that edge with a huge zero fill in between.
    let edge: Rid = 1006 * 64;
    let rids: Vec<Rid> = vec![1, edge - 1, edge, edge + 1, edge * 2, 10_000_000];
    let index = build_two_values(&rids, &[]);
    assert_eq!(produce(&index, &any_of(&[1])), rids);
}

#[test]
fn mark_restore_continuation_is_identical() {
    let rids: Vec<Rid> = (1..=5_000u64).map(|i| i * 7).collect();
    let index = build_two_values(&rids, &[]);
    let mut scan = index
        .begin_scan(&Predicate::equals_one(Datum::Int(1)))
        .unwrap();

    scan.first(ScanDirection::Forward).unwrap();
    for _ in 0..100 {
        scan.next(ScanDirection::Forward).unwrap();
    }
    scan.mark().unwrap();

    // Unmarked continuation after mark(): collect the next 50.
    let mut expected = Vec::new();
    for _ in 0..50 {
        expected.push(scan.next(ScanDirection::Forward).unwrap().unwrap());
    }

    // Restore and replay: must be byte-for-byte the same.
    scan.restore().unwrap();
    let mut replay = Vec::new();
    for _ in 0..50 {
        replay.push(scan.next(ScanDirection::Forward).unwrap().unwrap());
    }
    assert_eq!(replay, expected);
}

#[test]
fn mark_restore_across_page_boundary() {
    // Dense alternating bits spill the vector across pages; mark just
    // before the boundary and restore after crossing it.
    let rids: Vec<Rid> = (1..=140_000u64).filter(|r| r % 2 == 0).collect();
    let index = build_two_values(&rids, &[]);
    let mut scan = index
        .begin_scan(&Predicate::equals_one(Datum::Int(1)))
        .unwrap();

    let mut cur = scan.first(ScanDirection::Forward).unwrap();
    while let Some(rid) = cur {
        if rid > 64_000 {
            break;
        }
        cur = scan.next(ScanDirection::Forward).unwrap();
    }
    scan.mark().unwrap();
    let after_mark = scan.next(ScanDirection::Forward).unwrap();
    for _ in 0..2_000 {
        scan.next(ScanDirection::Forward).unwrap();
    }
    scan.restore().unwrap();
    assert_eq!(scan.next(ScanDirection::Forward).unwrap(), after_mark);
}

#[test]
fn produce_all_continues_after_manual_stepping() {
    let index = build_two_values(&[10, 20, 30, 40], &[]);
    let mut scan = index
        .begin_scan(&Predicate::equals_one(Datum::Int(1)))
        .unwrap();
    assert_eq!(scan.first(ScanDirection::Forward).unwrap(), Some(10));
    assert_eq!(scan.next(ScanDirection::Forward).unwrap(), Some(20));
    let rest: Vec<Rid> = scan.produce_all().unwrap().iter().collect();
    assert_eq!(rest, vec![30, 40]);
}

#[test]
fn backward_scan_matches_reversed_forward() {
    let rids: Vec<Rid> = vec![3, 64, 65, 4_096, 100_000];
    let index = build_two_values(&rids, &[]);

    let mut scan = index
        .begin_scan(&Predicate::equals_one(Datum::Int(1)))
        .unwrap();
    let mut backward = Vec::new();
    let mut cur = scan.first(ScanDirection::Backward).unwrap();
    while let Some(rid) = cur {
        backward.push(rid);
        cur = scan.next(ScanDirection::Backward).unwrap();
    }
    let mut expected = rids.clone();
    expected.reverse();
    assert_eq!(backward, expected);
}

#[test]
fn concurrent_scans_and_inserts_do_not_interfere() {
    let store = Arc::new(MemoryPageStore::new());
    let index = Arc::new(BitmapIndex::new(store, IndexConfig::default()).unwrap());
    let mut table = MemTable::new();
    let ones: Vec<Rid> = (1..=20_000u64).filter(|r| r % 3 == 1).collect();
    for &rid in &ones {
        table.insert_row(rid, vec![Datum::Int(1)]);
    }
    index.build(&table).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let expected = ones.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let got: Vec<Rid> = index
                        .begin_scan(&Predicate::equals_one(Datum::Int(1)))
                        .unwrap()
                        .produce_all()
                        .unwrap()
                        .iter()
                        .collect();
                    assert_eq!(got, expected);
                }
            })
        })
        .collect();

    // Writer appends to a different value's vector while readers run.
    for rid in 20_001..=21_000u64 {
        index.insert(rid, &[Datum::Int(2)]).unwrap();
    }

    for handle in readers {
        handle.join().unwrap();
    }
    let twos: Vec<Rid> = produce(index.as_ref(), &Predicate::equals_one(Datum::Int(2)));
    assert_eq!(twos, (20_001..=21_000u64).collect::<Vec<_>>());
}
