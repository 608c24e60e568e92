//! Table topologies over the CAS probe engine.
//!
//! Every topology drives the same probe protocol: start at the hashed
//! bucket, claim empty slots by CAS, update on key match, and otherwise
//! advance — immediately while still inside the resident cache line (soft
//! reprobe), or by prefetching the next line and re-enqueueing the request
//! (hard reprobe). The topologies differ only in who owns the slot array
//! and where an exhausted line sends the request next.

mod cas;
mod partitioned;
mod tiered;

pub use cas::{CasHashTable, CasTableShared};
pub use partitioned::{PartitionTable, PartitionedHashStore};
pub use tiered::{TieredHashTable, TieredTableShared};

use std::io;
use std::path::Path;

use crate::probe::{scan_line, LineScan, ProbeStrategy};
use crate::slots::{keys_in_line_mask, Slot};
use crate::stats::ProbeStats;
use crate::types::{FindResult, InsertFindArgument, KeyType, ValueType};

/// Common surface of all table topologies.
///
/// The `*_batch` operations feed the prefetch pipeline; the `*_noprefetch`
/// operations are the bounded, portable baseline that touches the table
/// directly. The receiver is `&mut` because each handle owns thread-local
/// queues and diagnostics; concurrency happens by giving each thread its
/// own handle onto a shared topology.
pub trait HashTable: Send {
    /// Enqueue a batch of inserts and drain the queue down to its threshold.
    fn insert_batch(&mut self, args: &[InsertFindArgument]);

    /// Insert one key synchronously, bounded by `capacity` probes.
    /// Returns false when the table is exhausted.
    fn insert_noprefetch(&mut self, arg: &InsertFindArgument) -> bool;

    /// Drain the insert queue until every queued request has resolved.
    fn flush_insert_queue(&mut self);

    /// Enqueue a batch of finds; results that resolve during this call are
    /// appended to `out` in resolution order, not submission order.
    fn find_batch(&mut self, args: &[InsertFindArgument], out: &mut Vec<FindResult>);

    /// Look up one key synchronously, bounded by `capacity` probes.
    fn find_noprefetch(&mut self, key: KeyType) -> Option<ValueType>;

    /// Drain the find queue until every queued request has resolved.
    fn flush_find_queue(&mut self, out: &mut Vec<FindResult>);

    /// Number of occupied slots (including the out-of-band key-0 cell).
    fn get_fill(&self) -> usize;

    /// Total slot capacity. Always a power of two.
    fn get_capacity(&self) -> usize;

    /// Largest value (count) stored in the table.
    fn get_max_count(&self) -> ValueType;

    /// Print every occupied slot as `"<key> : <value>"` to stdout.
    fn display(&self);

    /// Write every occupied slot as `"<key> : <value>"` lines.
    fn print_to_file(&self, path: &Path) -> io::Result<()>;

    /// Snapshot of this handle's probe diagnostics.
    fn probe_stats(&self) -> ProbeStats;
}

/// Outcome of resolving one queued insert against a slot region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertProbe {
    Done,
    /// The current cache line is exhausted; resume at `next_idx`.
    Requeue { next_idx: usize },
}

/// Outcome of resolving one queued find against a slot region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FindProbe {
    Hit(ValueType),
    Missing,
    /// The current cache line is exhausted; resume at `next_idx`.
    Requeue { next_idx: usize },
}

/// Resolve an insert within the cache line containing `start_idx`.
///
/// `slots` is one region (whole table, partition, or tier level) and
/// `wrap_mask` is `region_len - 1`; masking with it keeps the index inside
/// the region for non-power-of-two tier levels too.
pub(crate) fn probe_insert_line<S: Slot>(
    slots: &[S],
    wrap_mask: usize,
    key: KeyType,
    value: ValueType,
    stats: &mut ProbeStats,
    start_idx: usize,
) -> InsertProbe {
    let line_mask = keys_in_line_mask::<S>();
    let mut idx = start_idx;
    loop {
        let slot = &slots[idx];
        if slot.is_empty() {
            if slot.insert_cas(key, value) {
                return InsertProbe::Done;
            }
            // Lost the claim race: the slot is now occupied, maybe by this
            // very key. Fall through to the comparison.
        }
        stats.num_memcmps += 1;
        if slot.compare_key(key) {
            slot.update_cas(value);
            return InsertProbe::Done;
        }
        idx = (idx + 1) & wrap_mask;
        if idx & line_mask != 0 {
            stats.num_soft_reprobes += 1;
            continue;
        }
        stats.num_reprobes += 1;
        return InsertProbe::Requeue { next_idx: idx };
    }
}

/// Resolve a find within the cache line containing `start_idx`.
pub(crate) fn probe_find_line<S: Slot>(
    strategy: ProbeStrategy,
    slots: &[S],
    wrap_mask: usize,
    key: KeyType,
    stats: &mut ProbeStats,
    start_idx: usize,
) -> FindProbe {
    let line_mask = keys_in_line_mask::<S>();
    let line_end = ((start_idx | line_mask) + 1).min(slots.len());
    let line = &slots[start_idx..line_end];
    match scan_line(strategy, line, key) {
        LineScan::Hit { value, off } => {
            stats.num_memcmps += off as u64 + 1;
            stats.num_soft_reprobes += off as u64;
            FindProbe::Hit(value)
        }
        LineScan::Vacant { off } => {
            stats.num_memcmps += off as u64 + 1;
            stats.num_soft_reprobes += off as u64;
            FindProbe::Missing
        }
        LineScan::Exhausted => {
            stats.num_memcmps += line.len() as u64;
            stats.num_soft_reprobes += line.len() as u64 - 1;
            stats.num_reprobes += 1;
            stats.record_find_distance(line.len() as u64);
            FindProbe::Requeue {
                next_idx: line_end & wrap_mask,
            }
        }
    }
}
