//! Single-threaded behavioral properties of the table topologies.

use kmerhash::{
    AggrKv, CasHashTable, HashTable, HasherKind, InsertFindArgument, Item, PartitionedHashStore,
    ProbeStrategy, TieredHashTable,
};

fn arg(key: u64, value: u64) -> InsertFindArgument {
    InsertFindArgument {
        key,
        value,
        id: key as u32,
        part_id: 0,
    }
}

/// Requesting capacity 100 yields 128; keys 1..=100 with value = 2*key are
/// all inserted and findable; absent keys report not-found.
#[test]
fn scenario_requested_100_rounds_to_128() {
    let mut ht = CasHashTable::<Item>::new(100);
    assert_eq!(ht.get_capacity(), 128);

    for key in 1..=100u64 {
        assert!(ht.insert_noprefetch(&arg(key, key * 2)));
    }
    assert_eq!(ht.get_fill(), 100);
    assert_eq!(ht.find_noprefetch(37), Some(74));
    assert_eq!(ht.find_noprefetch(101), None);
}

#[test]
fn capacity_is_always_a_power_of_two() {
    for requested in [1u64, 3, 100, 1000, 4097] {
        let shared = CasHashTable::<AggrKv>::new(requested);
        assert!(shared.get_capacity().is_power_of_two());
        assert!(shared.get_capacity() as u64 >= requested);

        let tiered = TieredHashTable::<AggrKv>::new(requested);
        assert!(tiered.get_capacity().is_power_of_two());
        assert!(tiered.get_capacity() as u64 >= requested);
    }
}

/// Inserting K with value V and never touching K again round-trips V, on
/// the pipelined and the bounded path alike.
#[test]
fn item_round_trip() {
    let mut ht = CasHashTable::<Item>::new(1 << 12);
    let args: Vec<_> = (1..=500u64).map(|k| arg(k, k + 7)).collect();
    ht.insert_batch(&args);
    ht.flush_insert_queue();

    let mut out = Vec::new();
    ht.find_batch(&args, &mut out);
    ht.flush_find_queue(&mut out);
    assert_eq!(out.len(), 500);
    for result in &out {
        assert_eq!(result.value, u64::from(result.id) + 7);
    }
    assert_eq!(ht.find_noprefetch(123), Some(130));
}

/// After a full flush the queues are observably empty and every submitted
/// request has resolved.
#[test]
fn flush_completeness() {
    let mut ht = CasHashTable::<AggrKv>::new(1 << 12);
    let args: Vec<_> = (1..=24u64).map(|k| arg(k, 1)).collect();

    ht.insert_batch(&args);
    assert!(
        ht.pending_inserts() > 0,
        "a 24-element batch stays below the flush threshold"
    );
    ht.flush_insert_queue();
    assert_eq!(ht.pending_inserts(), 0);
    assert_eq!(ht.get_fill(), 24);

    let mut out = Vec::new();
    ht.find_batch(&args, &mut out);
    ht.flush_find_queue(&mut out);
    assert_eq!(ht.pending_finds(), 0);
    assert_eq!(out.len(), 24, "every submitted find resolved");
}

#[test]
fn overwrite_semantics_for_item_slots() {
    let mut ht = CasHashTable::<Item>::new(256);
    ht.insert_batch(&[arg(9, 1)]);
    ht.flush_insert_queue();
    ht.insert_batch(&[arg(9, 2)]);
    ht.flush_insert_queue();
    assert_eq!(ht.find_noprefetch(9), Some(2));
    assert_eq!(ht.get_fill(), 1);
}

#[test]
fn increment_semantics_for_aggr_slots() {
    let mut ht = CasHashTable::<AggrKv>::new(256);
    for _ in 0..5 {
        ht.insert_batch(&[arg(9, 1)]);
    }
    ht.flush_insert_queue();
    assert_eq!(ht.find_noprefetch(9), Some(5));
    assert_eq!(ht.get_max_count(), 5);
}

#[test]
fn print_to_file_writes_key_value_lines() -> anyhow::Result<()> {
    let mut ht = CasHashTable::<AggrKv>::new(64);
    for key in [3u64, 5, 3] {
        ht.insert_noprefetch(&arg(key, 1));
    }

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dump.txt");
    ht.print_to_file(&path)?;

    let text = std::fs::read_to_string(&path)?;
    let mut lines: Vec<_> = text.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["3 : 2", "5 : 1"]);
    Ok(())
}

#[test]
fn partitioned_store_sums_partition_introspection() {
    let store = PartitionedHashStore::<AggrKv>::new(
        1 << 10,
        4,
        HasherKind::default(),
        ProbeStrategy::default(),
    );
    assert_eq!(store.get_capacity(), 1 << 10);

    let mut parts = store.into_partitions();
    for (i, part) in parts.iter_mut().enumerate() {
        let base = i as u64 * 100 + 1;
        let args: Vec<_> = (base..base + 50).map(|k| arg(k, 1)).collect();
        part.insert_batch(&args);
        part.flush_insert_queue();
    }
    let store = PartitionedHashStore::from_partitions(parts);
    assert_eq!(store.get_fill(), 200);
}

/// Every probe strategy resolves the same lookups.
#[test]
fn probe_strategies_agree() {
    for strategy in [
        ProbeStrategy::Branching,
        ProbeStrategy::BranchlessCmove,
        ProbeStrategy::SimdBatch,
    ] {
        let mut ht =
            CasHashTable::<AggrKv>::with_options(1 << 10, HasherKind::default(), strategy);
        let args: Vec<_> = (1..=300u64).map(|k| arg(k, k)).collect();
        ht.insert_batch(&args);
        ht.flush_insert_queue();

        let mut out = Vec::new();
        ht.find_batch(&args, &mut out);
        ht.flush_find_queue(&mut out);
        assert_eq!(out.len(), 300, "{strategy:?}");
        assert_eq!(ht.find_noprefetch(9999), None, "{strategy:?}");
    }
}
