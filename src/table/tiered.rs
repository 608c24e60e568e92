//! Tiered topology: a primary region backed by an overflow region.
//!
//! The primary level (lvl0, three quarters of the total capacity) absorbs
//! the common case. A request that exhausts its home cache line in lvl0 is
//! not allowed to keep wrapping the primary region: it is re-tagged
//! (`part_id = 1`) and diverted into the overflow level (lvl1), which is
//! probed linearly line by line. This bounds the cost of local clustering
//! in lvl0 to a single cache line before the request moves to the much
//! smaller secondary space.
//!
//! Both levels live in one shared refcounted allocation; probing always
//! starts at a cacheline-aligned index so a pass examines whole lines.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::constants::{
    BATCH_LEN, EMPTY_KEY, FIND_FLUSH_THRESHOLD, INS_FLUSH_THRESHOLD,
    PREFETCH_FIND_QUEUE_SIZE, PREFETCH_QUEUE_SIZE,
};
use crate::hashing::{HashIndexer, HasherKind};
use crate::mem::{prefetch_read, prefetch_write, RawTable, ZeroInit};
use crate::pipeline::{Request, RequestQueue};
use crate::probe::ProbeStrategy;
use crate::slots::{keys_in_line_mask, AggrKv, EmptyCell, Slot};
use crate::stats::ProbeStats;
use crate::table::{
    probe_find_line, probe_insert_line, FindProbe, HashTable, InsertProbe,
};
use crate::types::{FindResult, InsertFindArgument, KeyType, ValueType};

/// Region tag for overflow requests.
const LVL1: u32 = 1;

/// The refcounted two-level slot array shared by [`TieredHashTable`]
/// facades.
pub struct TieredTableShared<S> {
    table: RawTable<S>,
    capacity: usize,
    lvl0_capacity: usize,
    lvl1_capacity: usize,
    empty_cell: EmptyCell,
}

impl<S: Slot + ZeroInit> TieredTableShared<S> {
    /// Allocate a zeroed two-level table of `next_pow2(requested)` slots
    /// total, split 3:1 between primary and overflow on cacheline
    /// boundaries.
    pub fn new(requested_capacity: u64) -> Arc<Self> {
        let line = keys_in_line_mask::<S>() + 1;
        let capacity = (requested_capacity.next_power_of_two() as usize).max(4 * line);
        let lvl0_capacity = ((capacity / 4) * 3).next_multiple_of(line);
        let lvl1_capacity = capacity - lvl0_capacity;
        assert!(lvl1_capacity >= line, "overflow level must hold a full line");
        info!(
            capacity,
            lvl0_capacity, lvl1_capacity, "allocating tiered table"
        );
        Arc::new(Self {
            table: RawTable::zeroed(capacity),
            capacity,
            lvl0_capacity,
            lvl1_capacity,
            empty_cell: EmptyCell::default(),
        })
    }
}

impl<S: Slot> TieredTableShared<S> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn lvl0_capacity(&self) -> usize {
        self.lvl0_capacity
    }

    #[inline]
    pub fn lvl1_capacity(&self) -> usize {
        self.lvl1_capacity
    }

    /// Slots of the primary level.
    #[inline]
    fn lvl0(&self) -> &[S] {
        &self.table.slots()[..self.lvl0_capacity]
    }

    /// Slots of the overflow level.
    #[inline]
    fn lvl1(&self) -> &[S] {
        &self.table.slots()[self.lvl0_capacity..]
    }

    /// Occupied slots in the primary level plus the out-of-band cell.
    pub fn fill(&self) -> usize {
        let slots = self.lvl0().iter().filter(|s| !s.is_empty()).count();
        slots + usize::from(self.empty_cell.is_occupied())
    }

    /// Occupied slots in the overflow level.
    pub fn lvl1_fill(&self) -> usize {
        self.lvl1().iter().filter(|s| !s.is_empty()).count()
    }

    pub fn max_count(&self) -> ValueType {
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

/// Per-thread facade over a shared tiered table.
pub struct TieredHashTable<S: Slot = AggrKv> {
    shared: Arc<TieredTableShared<S>>,
    indexer: HashIndexer,
    strategy: ProbeStrategy,
    insert_queue: RequestQueue,
    find_queue: RequestQueue,
    stats: ProbeStats,
}

impl<S: Slot + ZeroInit> TieredHashTable<S> {
    pub fn new(requested_capacity: u64) -> Self {
        Self::with_options(
            requested_capacity,
            HasherKind::default(),
            ProbeStrategy::default(),
        )
    }

    pub fn with_options(
        requested_capacity: u64,
        hasher: HasherKind,
        strategy: ProbeStrategy,
    ) -> Self {
        Self::from_shared(TieredTableShared::new(requested_capacity), hasher, strategy)
    }
}

impl<S: Slot> TieredHashTable<S> {
    /// Attach a facade (with fresh thread-local queues) to an existing
    /// shared table.
    pub fn from_shared(
        shared: Arc<TieredTableShared<S>>,
        hasher: HasherKind,
        strategy: ProbeStrategy,
    ) -> Self {
        let indexer = HashIndexer::new(hasher, shared.capacity());
        Self {
            shared,
            indexer,
            strategy,
            insert_queue: RequestQueue::new(PREFETCH_QUEUE_SIZE),
            find_queue: RequestQueue::new(PREFETCH_FIND_QUEUE_SIZE),
            stats: ProbeStats::default(),
        }
    }

    pub fn shared(&self) -> Arc<TieredTableShared<S>> {
        Arc::clone(&self.shared)
    }

    /// Occupied slots in the overflow level.
    pub fn get_lvl1_fill(&self) -> usize {
        self.shared.lvl1_fill()
    }

    pub fn pending_inserts(&self) -> usize {
        self.insert_queue.len()
    }

    pub fn pending_finds(&self) -> usize {
        self.find_queue.len()
    }

    #[inline]
    fn line_mask(&self) -> usize {
        keys_in_line_mask::<S>()
    }

    /// Home bucket in lvl0. Not a power-of-two mask, but `x & (n - 1) < n`
    /// still holds, and lvl0 is cacheline-aligned in length.
    #[inline]
    fn lvl0_index(&self, key: KeyType) -> usize {
        (self.indexer.hash_key(key) as usize) & (self.shared.lvl0_capacity() - 1)
    }

    /// Re-home an overflowing lvl0 index into lvl1.
    #[inline]
    fn lvl1_index(&self, lvl0_idx: usize) -> usize {
        lvl0_idx & (self.shared.lvl1_capacity() - 1)
    }

    fn add_to_insert_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.lvl0_index(arg.key);
        prefetch_write(&self.shared.lvl0()[idx]);
        self.insert_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: 0,
            idx: idx as u64,
            timer_id: None,
        });
    }

    fn add_to_find_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.lvl0_index(arg.key);
        prefetch_read(&self.shared.lvl0()[idx]);
        self.find_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: 0,
            idx: idx as u64,
            timer_id: None,
        });
    }

    fn insert_one(&mut self, req: Request) {
        if req.key == EMPTY_KEY {
            self.shared.empty_cell.update::<S>(req.value);
            return;
        }
        let aligned = req.idx as usize & !self.line_mask();
        if req.part_id == 0 {
            let outcome = probe_insert_line(
                self.shared.lvl0(),
                self.shared.lvl0_capacity() - 1,
                req.key,
                req.value,
                &mut self.stats,
                aligned,
            );
            if let InsertProbe::Requeue { .. } = outcome {
                // lvl0 gets exactly one line; clustering overflows to lvl1.
                let next_idx = self.lvl1_index(req.idx as usize);
                prefetch_write(&self.shared.lvl1()[next_idx]);
                self.insert_queue.push(Request {
                    part_id: LVL1,
                    idx: next_idx as u64,
                    ..req
                });
            }
        } else {
            let outcome = probe_insert_line(
                self.shared.lvl1(),
                self.shared.lvl1_capacity() - 1,
                req.key,
                req.value,
                &mut self.stats,
                aligned,
            );
            if let InsertProbe::Requeue { next_idx } = outcome {
                prefetch_write(&self.shared.lvl1()[next_idx]);
                self.insert_queue.push(Request {
                    idx: next_idx as u64,
                    ..req
                });
            }
        }
    }

    fn find_one(&mut self, req: Request, out: &mut Vec<FindResult>) {
        if req.key == EMPTY_KEY {
            if let Some(value) = self.shared.empty_cell.read() {
                out.push(FindResult::new(req.id, value));
            }
            return;
        }
        let aligned = req.idx as usize & !self.line_mask();
        if req.part_id == 0 {
            let outcome = probe_find_line(
                self.strategy,
                self.shared.lvl0(),
                self.shared.lvl0_capacity() - 1,
                req.key,
                &mut self.stats,
                aligned,
            );
            match outcome {
                FindProbe::Hit(value) => out.push(FindResult::new(req.id, value)),
                FindProbe::Missing => {}
                FindProbe::Requeue { .. } => {
                    let next_idx = self.lvl1_index(req.idx as usize);
                    prefetch_read(&self.shared.lvl1()[next_idx]);
                    self.find_queue.push(Request {
                        part_id: LVL1,
                        idx: next_idx as u64,
                        ..req
                    });
                }
            }
        } else {
            let outcome = probe_find_line(
                self.strategy,
                self.shared.lvl1(),
                self.shared.lvl1_capacity() - 1,
                req.key,
                &mut self.stats,
                aligned,
            );
            match outcome {
                FindProbe::Hit(value) => out.push(FindResult::new(req.id, value)),
                FindProbe::Missing => {}
                FindProbe::Requeue { next_idx } => {
                    prefetch_read(&self.shared.lvl1()[next_idx]);
                    self.find_queue.push(Request {
                        idx: next_idx as u64,
                        ..req
                    });
                }
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

    /// Probe the home line in lvl0, then walk lvl1, mirroring where the
    /// pipelined path places keys. Bounded by the lvl1 length.
    fn probe_levels_noprefetch(&mut self, key: KeyType) -> Option<ValueType> {
        let line_mask = self.line_mask();
        let home = self.lvl0_index(key);
        let aligned = home & !line_mask;
        let lvl0 = self.shared.lvl0();
        for slot in &lvl0[aligned..aligned + line_mask + 1] {
            let mut retry = false;
            if let Some(value) = slot.find(key, &mut retry) {
                return Some(value);
            }
            if !retry {
                return None;
            }
        }
        let lvl1 = self.shared.lvl1();
        let mut idx = self.lvl1_index(home);
        for _ in 0..self.shared.lvl1_capacity() {
            let slot = &lvl1[idx];
            let mut retry = false;
            if let Some(value) = slot.find(key, &mut retry) {
                return Some(value);
            }
            if !retry {
                return None;
            }
            idx = (idx + 1) & (self.shared.lvl1_capacity() - 1);
        }
        None
    }
}

impl<S: Slot> HashTable for TieredHashTable<S> {
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
            self.shared.empty_cell.update::<S>(arg.value);
            return true;
        }
        let line_mask = self.line_mask();
        let home = self.lvl0_index(arg.key);
        let aligned = home & !line_mask;
        let lvl0 = self.shared.lvl0();
        for slot in &lvl0[aligned..aligned + line_mask + 1] {
            if slot.is_empty() && slot.insert_cas(arg.key, arg.value) {
                return true;
            }
            if slot.compare_key(arg.key) {
                slot.update_cas(arg.value);
                return true;
            }
        }
        let lvl1 = self.shared.lvl1();
        let mut idx = self.lvl1_index(home);
        for _ in 0..self.shared.lvl1_capacity() {
            let slot = &lvl1[idx];
            if slot.is_empty() && slot.insert_cas(arg.key, arg.value) {
                return true;
            }
            if slot.compare_key(arg.key) {
                slot.update_cas(arg.value);
                return true;
            }
            idx = (idx + 1) & (self.shared.lvl1_capacity() - 1);
        }
        false
    }

    /// The pipelined path carries no iteration cap: a request that keeps
    /// finding full lines keeps re-enqueueing. Only the overflow level is
    /// wrapped, so progress depends on lvl1 not being saturated.
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
            return self.shared.empty_cell.read();
        }
        self.probe_levels_noprefetch(key)
    }

    fn flush_find_queue(&mut self, out: &mut Vec<FindResult>) {
        self.stats.num_queue_flushes += 1;
        while let Some(req) = self.find_queue.pop() {
            self.find_one(req, out);
        }
    }

    fn get_fill(&self) -> usize {
        self.shared.fill()
    }

    fn get_capacity(&self) -> usize {
        self.shared.capacity()
    }

    fn get_max_count(&self) -> ValueType {
        self.shared.max_count()
    }

    fn display(&self) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = self.shared.write_entries(&mut out);
    }

    fn print_to_file(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.shared.write_entries(&mut out)?;
        out.flush()
    }

    fn probe_stats(&self) -> ProbeStats {
        self.stats
    }
}
