//! Shared topology: one slot array, CAS-claimed by any number of threads.
//!
//! The array lives behind a reference-counted handle created once and
//! cloned into every participating thread; it is freed when the last holder
//! drops. Each thread wraps the handle in its own [`CasHashTable`] facade,
//! which owns that thread's pipeline queues and diagnostics. Cross-thread
//! synchronization is exclusively the CAS on slot fields — there are no
//! locks on any operation path.

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
use crate::slots::{AggrKv, EmptyCell, Slot};
use crate::stats::{LatencyCollector, ProbeStats};
use crate::table::{
    probe_find_line, probe_insert_line, FindProbe, HashTable, InsertProbe,
};
use crate::types::{FindResult, InsertFindArgument, KeyType, ValueType};

/// The refcounted slot array shared by every [`CasHashTable`] facade.
pub struct CasTableShared<S> {
    table: RawTable<S>,
    capacity: usize,
    empty_cell: EmptyCell,
}

impl<S: Slot + ZeroInit> CasTableShared<S> {
    /// Allocate a zeroed table of `next_pow2(requested)` slots.
    pub fn new(requested_capacity: u64) -> Arc<Self> {
        let capacity = requested_capacity.next_power_of_two() as usize;
        info!(
            capacity,
            slot_bytes = std::mem::size_of::<S>(),
            "allocating shared cas table"
        );
        Arc::new(Self {
            table: RawTable::zeroed(capacity),
            capacity,
            empty_cell: EmptyCell::default(),
        })
    }
}

impl<S: Slot> CasTableShared<S> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[S] {
        self.table.slots()
    }

    #[inline]
    pub(crate) fn empty_cell(&self) -> &EmptyCell {
        &self.empty_cell
    }

    /// Occupied slots plus the out-of-band cell.
    pub fn fill(&self) -> usize {
        let slots = self.slots().iter().filter(|s| !s.is_empty()).count();
        slots + usize::from(self.empty_cell.is_occupied())
    }

    /// Largest stored value, the out-of-band cell included.
    pub fn max_count(&self) -> ValueType {
        let slot_max = self
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
        for slot in self.slots().iter().filter(|s| !s.is_empty()) {
            writeln!(out, "{} : {}", slot.key(), slot.value())?;
        }
        Ok(())
    }
}

/// Per-thread facade over a shared CAS table.
pub struct CasHashTable<S: Slot = AggrKv> {
    shared: Arc<CasTableShared<S>>,
    indexer: HashIndexer,
    strategy: ProbeStrategy,
    insert_queue: RequestQueue,
    find_queue: RequestQueue,
    stats: ProbeStats,
    latency: Option<LatencyCollector>,
}

impl<S: Slot + ZeroInit> CasHashTable<S> {
    /// Allocate a fresh table and return its first facade.
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
        Self::from_shared(CasTableShared::new(requested_capacity), hasher, strategy)
    }
}

impl<S: Slot> CasHashTable<S> {
    /// Attach a facade (with fresh thread-local queues) to an existing
    /// shared table. Every facade must use the same hasher.
    pub fn from_shared(
        shared: Arc<CasTableShared<S>>,
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
            latency: None,
        }
    }

    /// Handle for constructing sibling facades on other threads.
    pub fn shared(&self) -> Arc<CasTableShared<S>> {
        Arc::clone(&self.shared)
    }

    /// Turn per-request latency sampling on or off.
    pub fn set_latency_sampling(&mut self, enabled: bool) {
        self.latency = enabled.then(LatencyCollector::new);
    }

    /// Drain collected latency samples, if sampling is enabled.
    pub fn take_latency_samples(&mut self) -> Vec<std::time::Duration> {
        self.latency
            .as_mut()
            .map(LatencyCollector::take_samples)
            .unwrap_or_default()
    }

    /// Requests still parked in the insert queue.
    pub fn pending_inserts(&self) -> usize {
        self.insert_queue.len()
    }

    /// Requests still parked in the find queue.
    pub fn pending_finds(&self) -> usize {
        self.find_queue.len()
    }

    #[inline]
    fn cap_mask(&self) -> usize {
        self.shared.capacity() - 1
    }

    fn add_to_insert_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.indexer.index(arg.key);
        prefetch_write(&self.shared.slots()[idx]);
        let timer_id = self.latency.as_mut().map(LatencyCollector::start);
        self.insert_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: 0,
            idx: idx as u64,
            timer_id,
        });
    }

    fn add_to_find_queue(&mut self, arg: &InsertFindArgument) {
        let idx = self.indexer.index(arg.key);
        prefetch_read(&self.shared.slots()[idx]);
        let timer_id = self.latency.as_mut().map(LatencyCollector::start);
        self.find_queue.push(Request {
            key: arg.key,
            value: arg.value,
            id: arg.id,
            part_id: 0,
            idx: idx as u64,
            timer_id,
        });
    }

    #[inline]
    fn close_timer(&mut self, timer_id: Option<u32>) {
        if let (Some(collector), Some(id)) = (self.latency.as_mut(), timer_id) {
            collector.end(id);
        }
    }

    /// Resolve one queued insert: claim, update, or re-enqueue behind a
    /// prefetch of the next cache line.
    fn insert_one(&mut self, req: Request) {
        if req.key == EMPTY_KEY {
            self.shared.empty_cell().update::<S>(req.value);
            self.close_timer(req.timer_id);
            return;
        }
        let outcome = probe_insert_line(
            self.shared.slots(),
            self.cap_mask(),
            req.key,
            req.value,
            &mut self.stats,
            req.idx as usize,
        );
        match outcome {
            InsertProbe::Done => self.close_timer(req.timer_id),
            InsertProbe::Requeue { next_idx } => {
                prefetch_write(&self.shared.slots()[next_idx]);
                self.insert_queue.push(Request {
                    idx: next_idx as u64,
                    ..req
                });
            }
        }
    }

    /// Resolve one queued find. Misses produce no result; the caller
    /// detects them by the absence of the request id in `out`.
    fn find_one(&mut self, req: Request, out: &mut Vec<FindResult>) {
        if req.key == EMPTY_KEY {
            if let Some(value) = self.shared.empty_cell().read() {
                out.push(FindResult::new(req.id, value));
            }
            self.close_timer(req.timer_id);
            return;
        }
        let outcome = probe_find_line(
            self.strategy,
            self.shared.slots(),
            self.cap_mask(),
            req.key,
            &mut self.stats,
            req.idx as usize,
        );
        match outcome {
            FindProbe::Hit(value) => {
                out.push(FindResult::new(req.id, value));
                self.close_timer(req.timer_id);
            }
            FindProbe::Missing => self.close_timer(req.timer_id),
            FindProbe::Requeue { next_idx } => {
                prefetch_read(&self.shared.slots()[next_idx]);
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
}

impl<S: Slot> HashTable for CasHashTable<S> {
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
            self.shared.empty_cell().update::<S>(arg.value);
            return true;
        }
        let mut idx = self.indexer.index(arg.key);
        for _ in 0..self.shared.capacity() {
            let slot = &self.shared.slots()[idx];
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

    /// Note: a request that keeps losing its cacheline re-enqueues without
    /// an iteration cap. The bounded fallback is `insert_noprefetch`.
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
            return self.shared.empty_cell().read();
        }
        let mut idx = self.indexer.index(key);
        let mut distance = 0u64;
        let mut found = None;
        for _ in 0..self.shared.capacity() {
            let slot = &self.shared.slots()[idx];
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
