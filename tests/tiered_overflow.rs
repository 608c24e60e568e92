//! Overflow behavior of the tiered topology: clustering that exhausts a
//! primary-level cache line diverts into the overflow level instead of
//! wrapping the primary region.

use kmerhash::{
    AggrKv, HashIndexer, HashTable, HasherKind, InsertFindArgument, ProbeStrategy,
    TieredHashTable,
};

const CAPACITY: u64 = 256;
const SLOTS_PER_LINE: usize = 4;

fn arg(key: u64, value: u64) -> InsertFindArgument {
    InsertFindArgument {
        key,
        value,
        id: key as u32,
        part_id: 0,
    }
}

fn table() -> TieredHashTable<AggrKv> {
    TieredHashTable::with_options(CAPACITY, HasherKind::default(), ProbeStrategy::default())
}

/// Keys whose primary-level home buckets share one cache line, enough of
/// them to overflow it. Mirrors how the table homes keys: full hash masked
/// by the primary capacity, then aligned down to the line.
fn line_colliding_keys(ht: &TieredHashTable<AggrKv>, count: usize) -> Vec<u64> {
    let lvl0_capacity = ht.shared().lvl0_capacity();
    let indexer = HashIndexer::new(HasherKind::default(), CAPACITY as usize);
    let mut lines: std::collections::HashMap<usize, Vec<u64>> = std::collections::HashMap::new();
    for key in 1..1_000_000u64 {
        let idx = (indexer.hash_key(key) as usize) & (lvl0_capacity - 1);
        let entry = lines.entry(idx / SLOTS_PER_LINE).or_default();
        entry.push(key);
        if entry.len() >= count {
            return entry.clone();
        }
    }
    panic!("no colliding key set found");
}

/// Exhausting one primary line sends the excess keys to the backup region.
#[test]
fn exhausted_primary_line_spills_into_overflow() {
    let mut ht = table();
    assert_eq!(ht.get_lvl1_fill(), 0);

    let keys = line_colliding_keys(&ht, SLOTS_PER_LINE + 2);
    let args: Vec<_> = keys.iter().map(|&k| arg(k, 1)).collect();
    ht.insert_batch(&args);
    ht.flush_insert_queue();

    assert_eq!(ht.get_lvl1_fill(), 2, "two keys did not fit the line");
    assert_eq!(ht.get_fill() + ht.get_lvl1_fill(), keys.len());
}

/// Keys that landed in the overflow level stay findable through both the
/// pipelined and the bounded path.
#[test]
fn overflow_keys_are_findable() {
    let mut ht = table();
    let keys = line_colliding_keys(&ht, SLOTS_PER_LINE + 2);
    let args: Vec<_> = keys.iter().map(|&k| arg(k, k * 3)).collect();
    ht.insert_batch(&args);
    ht.flush_insert_queue();
    assert!(ht.get_lvl1_fill() > 0);

    let mut out = Vec::new();
    ht.find_batch(&args, &mut out);
    ht.flush_find_queue(&mut out);
    assert_eq!(out.len(), keys.len());
    for result in &out {
        assert_eq!(result.value, u64::from(result.id) * 3);
    }
    for &key in &keys {
        assert_eq!(ht.find_noprefetch(key), Some(key * 3));
    }
}

/// Aggregation counts survive the divert: re-inserting the same keys
/// increments whichever level holds them, never inserting duplicates.
#[test]
fn aggregation_spans_levels() {
    let mut ht = table();
    let keys = line_colliding_keys(&ht, SLOTS_PER_LINE + 2);
    let args: Vec<_> = keys.iter().map(|&k| arg(k, 1)).collect();
    for _ in 0..3 {
        ht.insert_batch(&args);
        ht.flush_insert_queue();
    }
    for &key in &keys {
        assert_eq!(ht.find_noprefetch(key), Some(3), "key {key}");
    }
    assert_eq!(ht.get_lvl1_fill(), 2, "re-inserts never duplicate");
    assert_eq!(ht.get_max_count(), 3);
}

/// Absent keys miss cleanly even when their home line overflowed: the
/// probe walks the line, then the overflow level, and stops at a vacancy.
#[test]
fn misses_terminate_after_the_overflow_walk() {
    let mut ht = table();
    let keys = line_colliding_keys(&ht, SLOTS_PER_LINE + 2);
    let args: Vec<_> = keys.iter().map(|&k| arg(k, 1)).collect();
    ht.insert_batch(&args);
    ht.flush_insert_queue();

    let absent: Vec<_> = (1..=1000u64)
        .filter(|k| !keys.contains(k))
        .take(20)
        .map(|k| arg(k, 0))
        .collect();

    let mut out = Vec::new();
    ht.find_batch(&absent, &mut out);
    ht.flush_find_queue(&mut out);
    assert!(out.is_empty());
    assert_eq!(ht.find_noprefetch(u64::MAX), None);
}
