//! Partitioned topology: one independent table per owning thread.
//!
//! The key space is sharded upstream; each partition is only ever mutated
//! by the thread that owns it. The original convention — "my partition is
//! touched by no other thread" — is enforced here by move semantics:
//! [`PartitionedHashStore::into_partitions`] hands each [`PartitionTable`]
//! to its owner by value, and there is no aliasing API.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::constants::{
    BATCH_LEN, EMPTY_KEY, FIND_FLUSH_THRESHOLD, INS_FLUSH_THRESHOLD,
    PREFETCH_FIND_QUEUE_SIZE, PREFETCH_QUEUE_SIZE,
};
use crate::hashing::{HashIndexer, HasherKind};
use crate::mem::{prefetch_read, prefetch_write, RawTable, ZeroInit};
use crate::pipeline::{Request, RequestQueue};
use crate::probe::ProbeStrategy;
use crate::slots::{AggrKv, EmptyCell, Slot};
use crate::stats::ProbeStats;
use crate::table::{
    probe_find_line, probe_insert_line, FindProbe, HashTable, InsertProbe,
};
use crate::types::{FindResult, InsertFindArgument, KeyType, ValueType};

/// One single-owner partition: a private slot array plus this owner's
/// pipeline queues.
pub struct PartitionTable<S: Slot = AggrKv> {
    part_id: u32,
    table: RawTable<S>,
    capacity: usize,
    empty_cell: EmptyCell,
    indexer: HashIndexer,
    strategy: ProbeStrategy,
    insert_queue: RequestQueue,
    find_queue: RequestQueue,
    stats: ProbeStats,
}

impl<S: Slot + ZeroInit> PartitionTable<S> {
    fn new(
        part_id: u32,
        requested_capacity: u64,
        hasher: HasherKind,
        strategy: ProbeStrategy,
    ) -> Self {
        let capacity = requested_capacity.next_power_of_two() as usize;
        Self {
            part_id,
            table: RawTable::zeroed(capacity),
            capacity,
            empty_cell: EmptyCell::default(),
            indexer: HashIndexer::new(hasher, capacity),
            strategy,
            insert_queue: RequestQueue::new(PREFETCH_QUEUE_SIZE),
            find_queue: RequestQueue::new(PREFETCH_FIND_QUEUE_SIZE),
            stats: ProbeStats::default(),
        }
    }
}

impl<S: Slot> PartitionTable<S> {
    /// Id of the partition this table backs.
    pub fn part_id(&self) -> u32 {
        self.part_id
    }

    pub fn pending_inserts(&self) -> usize {
        self.insert_queue.len()
    }

    pub fn pending_finds(&self) -> usize {
        self.find_queue.len()
    }

    #[inline]
    fn cap_mask(&self) -> usize {
        self.capacity - 1
    }

    fn add_to_insert_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.indexer.index(arg.key);
        prefetch_write(&self.table.slots()[idx]);
        self.insert_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: self.part_id,
            idx: idx as u64,
            timer_id: None,
        });
    }

    fn add_to_find_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.indexer.index(arg.key);
        prefetch_read(&self.table.slots()[idx]);
        self.find_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: self.part_id,
            idx: idx as u64,
            timer_id: None,
        });
    }

    fn insert_one(&mut self, req: Request) {
        if req.key == EMPTY_KEY {
            self.empty_cell.update::<S>(req.value);
            return;
        }
        let outcome = probe_insert_line(
            self.table.slots(),
            self.cap_mask(),
            req.key,
            req.value,
            &mut self.stats,
            req.idx as usize,
        );
        if let InsertProbe::Requeue { next_idx } = outcome {
            prefetch_write(&self.table.slots()[next_idx]);
            self.insert_queue.push(Request {
                idx: next_idx as u64,
                ..req
            });
        }
    }

    fn find_one(&mut self, req: Request, out: &mut Vec<FindResult>) {
        if req.key == EMPTY_KEY {
            if let Some(value) = self.empty_cell.read() {
                out.push(FindResult::new(req.id, value));
            }
            return;
        }
        let outcome = probe_find_line(
            self.strategy,
            self.table.slots(),
            self.cap_mask(),
            req.key,
            &mut self.stats,
            req.idx as usize,
        );
        match outcome {
            FindProbe::Hit(value) => out.push(FindResult::new(req.id, value)),
            FindProbe::Missing => {}
            FindProbe::Requeue { next_idx } => {
                prefetch_read(&self.table.slots()[next_idx]);
                self.find_queue.push(Request {
                    idx: next_idx as u64,
                    ..req
                });
            }
        }
    }

    fn flush_inserts_if_needed(&mut self) {
        while self.insert_queue.len() >= INS_FLUSH_THRESHOLD {
            let Some(req) = self.insert_queue.pop() else {
                break;
            };
            self.insert_one(req);
        }
    }

    fn flush_finds_if_needed(&mut self, out: &mut Vec<FindResult>) {
        while self.find_queue.len() > FIND_FLUSH_THRESHOLD {
            let Some(req) = self.find_queue.pop() else {
                break;
            };
            self.find_one(req, out);
        }
    }

    fn write_entries(&self, out: &mut impl Write) -> io::Result<()> {
        if let Some(value) = self.empty_cell.read() {
            writeln!(out, "{} : {}", EMPTY_KEY, value)?;
        }
        for slot in self.table.slots().iter().filter(|s| !s.is_empty()) {
            writeln!(out, "{} : {}", slot.key(), slot.value())?;
        }
        Ok(())
    }
}

impl<S: Slot> HashTable for PartitionTable<S> {
    fn insert_batch(&mut self, args: &[InsertFindArgument]) {
        self.flush_inserts_if_needed();
        for chunk in args.chunks(BATCH_LEN) {
            for arg in chunk {
                self.add_to_insert_queue(arg);
            }
            self.flush_inserts_if_needed();
        }
    }

    fn insert_noprefetch(&mut self, arg: &InsertFindArgument) -> bool {
        if arg.key == EMPTY_KEY {
            self.empty_cell.update::<S>(arg.value);
            return true;
        }
        let mut idx = self.indexer.index(arg.key);
        for _ in 0..self.capacity {
            let slot = &self.table.slots()[idx];
            if slot.is_empty() && slot.insert_cas(arg.key, arg.value) {
                return true;
            }
            if slot.compare_key(arg.key) {
                slot.update_cas(arg.value);
                return true;
            }
            idx = (idx + 1) & self.cap_mask();
        }
        false
    }

    fn flush_insert_queue(&mut self) {
        self.stats.num_queue_flushes += 1;
        while let Some(req) = self.insert_queue.pop() {
            self.insert_one(req);
        }
    }

    fn find_batch(&mut self, args: &[InsertFindArgument], out: &mut Vec<FindResult>) {
        self.flush_finds_if_needed(out);
        for chunk in args.chunks(BATCH_LEN) {
            for arg in chunk {
                self.add_to_find_queue(arg);
            }
            self.flush_finds_if_needed(out);
        }
    }

    fn find_noprefetch(&mut self, key: KeyType) -> Option<ValueType> {
        if key == EMPTY_KEY {
            return self.empty_cell.read();
        }
        let mut idx = self.indexer.index(key);
        let mut distance = 0u64;
        let mut found = None;
        for _ in 0..self.capacity {
            let slot = &self.table.slots()[idx];
            let mut retry = false;
            if let Some(value) = slot.find(key, &mut retry) {
                found = Some(value);
                break;
            }
            if !retry {
                break;
            }
            distance += 1;
            idx = (idx + 1) & self.cap_mask();
        }
        self.stats.record_find_distance(distance);
        found
    }

    fn flush_find_queue(&mut self, out: &mut Vec<FindResult>) {
        self.stats.num_queue_flushes += 1;
        while let Some(req) = self.find_queue.pop() {
            self.find_one(req, out);
        }
    }

    fn get_fill(&self) -> usize {
        let slots = self.table.slots().iter().filter(|s| !s.is_empty()).count();
        slots + usize::from(self.empty_cell.is_occupied())
    }

    fn get_capacity(&self) -> usize {
        self.capacity
    }

    fn get_max_count(&self) -> ValueType {
        let slot_max = self
            .table
            .slots()
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.value())
            .max()
            .unwrap_or(0);
        slot_max.max(self.empty_cell.read().unwrap_or(0))
    }

    fn display(&self) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = self.write_entries(&mut out);
    }

    fn print_to_file(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_entries(&mut out)?;
        out.flush()
    }

    fn probe_stats(&self) -> ProbeStats {
        self.stats
    }
}

/// A set of partitions, built together and split across owning threads.
pub struct PartitionedHashStore<S: Slot = AggrKv> {
    parts: Vec<PartitionTable<S>>,
}

impl<S: Slot + ZeroInit> PartitionedHashStore<S> {
    /// Split `requested_capacity` across `num_parts` partitions, each
    /// rounded up to a power of two.
    pub fn new(
        requested_capacity: u64,
        num_parts: u32,
        hasher: HasherKind,
        strategy: ProbeStrategy,
    ) -> Self {
        assert!(num_parts > 0, "at least one partition required");
        let per_part = requested_capacity.div_ceil(u64::from(num_parts));
        info!(num_parts, per_part, "allocating partitioned store");
        let parts = (0..num_parts)
            .map(|id| PartitionTable::new(id, per_part, hasher, strategy))
            .collect();
        Self { parts }
    }
}

impl<S: Slot> PartitionedHashStore<S> {
    pub fn num_partitions(&self) -> usize {
        self.parts.len()
    }

    /// Hand each partition to its owning thread.
    pub fn into_partitions(self) -> Vec<PartitionTable<S>> {
        self.parts
    }

    /// Reassemble a store from partitions collected back from their owners
    /// (for end-of-run introspection).
    pub fn from_partitions(mut parts: Vec<PartitionTable<S>>) -> Self {
        parts.sort_by_key(|p| p.part_id);
        Self { parts }
    }

    /// Occupied slots across all partitions.
    pub fn get_fill(&self) -> usize {
        self.parts.iter().map(|p| p.get_fill()).sum()
    }

    /// Total capacity across all partitions.
    pub fn get_capacity(&self) -> usize {
        self.parts.iter().map(|p| p.get_capacity()).sum()
    }

    pub fn get_max_count(&self) -> ValueType {
        self.parts.iter().map(|p| p.get_max_count()).max().unwrap_or(0)
    }

    /// Merged probe diagnostics from every partition.
    pub fn probe_stats(&self) -> ProbeStats {
        let mut merged = ProbeStats::default();
        for part in &self.parts {
            merged.merge(&part.stats);
        }
        merged
    }

    pub fn print_to_file(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for part in &self.parts {
            part.write_entries(&mut out)?;
        }
        out.flush()
    }
}
