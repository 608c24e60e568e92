//! Batch layer: small caller-side buffers feeding the pipeline.
//!
//! Callers hand over one key/value pair at a time; the batchers accumulate
//! `N` of them (16 by default) and funnel each full buffer into a single
//! `insert_batch`/`find_batch` call. Dropping a batcher flushes its partial
//! buffer and fully drains the table's queue, so nothing is silently lost
//! at shutdown. The `*_noprefetch` passthroughs bypass batching and
//! queueing entirely — the portable baseline for comparison.

use crate::constants::BATCH_LEN;
use crate::table::HashTable;
use crate::types::{FindResult, InsertFindArgument, KeyType, ValueType};

/// Callback invoked for every find result as it resolves.
pub type FindCallback<'a> = Box<dyn FnMut(&FindResult) + 'a>;

/// Buffers inserts and flushes them into the pipeline `N` at a time.
pub struct HTBatchInserter<'a, H: HashTable + ?Sized, const N: usize = BATCH_LEN> {
    ht: &'a mut H,
    buffer: [InsertFindArgument; N],
    len: usize,
    num_flushed: usize,
}

impl<'a, H: HashTable + ?Sized, const N: usize> HTBatchInserter<'a, H, N> {
    pub fn new(ht: &'a mut H) -> Self {
        const { assert!(N > 0) };
        Self {
            ht,
            buffer: [InsertFindArgument::default(); N],
            len: 0,
            num_flushed: 0,
        }
    }

    /// Buffer one kv pair; a full buffer triggers a pipeline batch.
    #[inline]
    pub fn insert(&mut self, key: KeyType, value: ValueType) {
        self.buffer[self.len] = InsertFindArgument {
            key,
            value,
            id: 0,
            part_id: 0,
        };
        self.len += 1;
        if self.len >= N {
            self.flush_buffer();
        }
    }

    /// Bypass batching and queueing for one insert.
    #[inline]
    pub fn insert_noprefetch(&mut self, key: KeyType, value: ValueType) -> bool {
        self.ht.insert_noprefetch(&InsertFindArgument {
            key,
            value,
            id: 0,
            part_id: 0,
        })
    }

    /// Flush the partial buffer, then drain the table's insert queue.
    pub fn flush(&mut self) {
        if self.len > 0 {
            self.flush_buffer();
        }
        self.ht.flush_insert_queue();
    }

    /// Number of pairs handed to the pipeline so far.
    pub fn num_flushed(&self) -> usize {
        self.num_flushed
    }

    fn flush_buffer(&mut self) {
        self.ht.insert_batch(&self.buffer[..self.len]);
        self.num_flushed += self.len;
        self.len = 0;
    }
}

impl<H: HashTable + ?Sized, const N: usize> Drop for HTBatchInserter<'_, H, N> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Buffers finds and flushes them into the pipeline `N` at a time.
///
/// Results surface through the callback if one is set, otherwise they
/// accumulate for [`HTBatchFinder::take_results`]. Misses surface as
/// absent ids.
pub struct HTBatchFinder<'a, H: HashTable + ?Sized, const N: usize = BATCH_LEN> {
    ht: &'a mut H,
    buffer: [InsertFindArgument; N],
    len: usize,
    num_flushed: usize,
    results: Vec<FindResult>,
    unclaimed: Vec<FindResult>,
    callback: Option<FindCallback<'a>>,
}

impl<'a, H: HashTable + ?Sized, const N: usize> HTBatchFinder<'a, H, N> {
    pub fn new(ht: &'a mut H) -> Self {
        Self::with_callback(ht, None)
    }

    pub fn with_callback(ht: &'a mut H, callback: Option<FindCallback<'a>>) -> Self {
        const { assert!(N > 0) };
        Self {
            ht,
            buffer: [InsertFindArgument::default(); N],
            len: 0,
            num_flushed: 0,
            results: Vec::with_capacity(N),
            unclaimed: Vec::new(),
            callback,
        }
    }

    /// Buffer one lookup; `id` re-associates its eventual result.
    #[inline]
    pub fn find(&mut self, key: KeyType, id: u32) {
        self.find_partitioned(key, id, 0);
    }

    /// Buffer one lookup routed to `part_id` (partitioned topology).
    #[inline]
    pub fn find_partitioned(&mut self, key: KeyType, id: u32, part_id: u32) {
        self.buffer[self.len] = InsertFindArgument {
            key,
            value: 0,
            id,
            part_id,
        };
        self.len += 1;
        if self.len >= N {
            self.flush_buffer();
        }
    }

    /// Bypass batching and queueing for one lookup.
    #[inline]
    pub fn find_noprefetch(&mut self, key: KeyType) -> Option<ValueType> {
        self.ht.find_noprefetch(key)
    }

    /// Flush the partial buffer, then drain the table's find queue.
    pub fn flush(&mut self) {
        if self.len > 0 {
            self.flush_buffer();
        }
        self.ht.flush_find_queue(&mut self.results);
        self.process_results();
    }

    /// Number of lookups handed to the pipeline so far.
    pub fn num_flushed(&self) -> usize {
        self.num_flushed
    }

    /// Results that resolved without a callback, in resolution order.
    pub fn take_results(&mut self) -> Vec<FindResult> {
        std::mem::take(&mut self.unclaimed)
    }

    pub fn set_callback(&mut self, callback: FindCallback<'a>) {
        self.callback = Some(callback);
    }

    fn flush_buffer(&mut self) {
        self.ht.find_batch(&self.buffer[..self.len], &mut self.results);
        self.num_flushed += self.len;
        self.len = 0;
        self.process_results();
    }

    fn process_results(&mut self) {
        if let Some(callback) = self.callback.as_mut() {
            for result in self.results.drain(..) {
                callback(&result);
            }
        } else {
            self.unclaimed.append(&mut self.results);
        }
    }
}

impl<H: HashTable + ?Sized, const N: usize> Drop for HTBatchFinder<'_, H, N> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Combined inserter/finder over one table, mirroring the common
/// insert-then-verify driver loop.
pub struct HTBatchRunner<'a, H: HashTable + ?Sized, const N: usize = BATCH_LEN> {
    ht: &'a mut H,
    ins_buffer: [InsertFindArgument; N],
    ins_len: usize,
    ins_flushed: usize,
    find_buffer: [InsertFindArgument; N],
    find_len: usize,
    find_flushed: usize,
    results: Vec<FindResult>,
    unclaimed: Vec<FindResult>,
    callback: Option<FindCallback<'a>>,
}

impl<'a, H: HashTable + ?Sized, const N: usize> HTBatchRunner<'a, H, N> {
    pub fn new(ht: &'a mut H) -> Self {
        Self::with_callback(ht, None)
    }

    pub fn with_callback(ht: &'a mut H, callback: Option<FindCallback<'a>>) -> Self {
        const { assert!(N > 0) };
        Self {
            ht,
            ins_buffer: [InsertFindArgument::default(); N],
            ins_len: 0,
            ins_flushed: 0,
            find_buffer: [InsertFindArgument::default(); N],
            find_len: 0,
            find_flushed: 0,
            results: Vec::with_capacity(N),
            unclaimed: Vec::new(),
            callback,
        }
    }

    /// Buffer one kv pair for insertion.
    #[inline]
    pub fn insert(&mut self, key: KeyType, value: ValueType) {
        self.ins_buffer[self.ins_len] = InsertFindArgument {
            key,
            value,
            id: 0,
            part_id: 0,
        };
        self.ins_len += 1;
        if self.ins_len >= N {
            self.flush_insert_buffer();
        }
    }

    /// Buffer one lookup.
    #[inline]
    pub fn find(&mut self, key: KeyType, id: u32) {
        self.find_buffer[self.find_len] = InsertFindArgument {
            key,
            value: 0,
            id,
            part_id: 0,
        };
        self.find_len += 1;
        if self.find_len >= N {
            self.flush_find_buffer();
        }
    }

    /// Flush both directions.
    pub fn flush(&mut self) {
        self.flush_insert();
        self.flush_find();
    }

    /// Flush buffered inserts and drain the insert queue.
    pub fn flush_insert(&mut self) {
        if self.ins_len > 0 {
            self.flush_insert_buffer();
        }
        self.ht.flush_insert_queue();
    }

    /// Flush buffered finds and drain the find queue.
    pub fn flush_find(&mut self) {
        if self.find_len > 0 {
            self.flush_find_buffer();
        }
        self.ht.flush_find_queue(&mut self.results);
        self.process_results();
    }

    pub fn num_insert_flushed(&self) -> usize {
        self.ins_flushed
    }

    pub fn num_find_flushed(&self) -> usize {
        self.find_flushed
    }

    /// Results that resolved without a callback, in resolution order.
    pub fn take_results(&mut self) -> Vec<FindResult> {
        std::mem::take(&mut self.unclaimed)
    }

    fn flush_insert_buffer(&mut self) {
        self.ht.insert_batch(&self.ins_buffer[..self.ins_len]);
        self.ins_flushed += self.ins_len;
        self.ins_len = 0;
    }

    fn flush_find_buffer(&mut self) {
        self.ht
            .find_batch(&self.find_buffer[..self.find_len], &mut self.results);
        self.find_flushed += self.find_len;
        self.find_len = 0;
        self.process_results();
    }

    fn process_results(&mut self) {
        if let Some(callback) = self.callback.as_mut() {
            for result in self.results.drain(..) {
                callback(&result);
            }
        } else {
            self.unclaimed.append(&mut self.results);
        }
    }
}

impl<H: HashTable + ?Sized, const N: usize> Drop for HTBatchRunner<'_, H, N> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::AggrKv;
    use crate::table::CasHashTable;

    #[test]
    fn inserter_flushes_on_drop() {
        let mut ht = CasHashTable::<AggrKv>::new(256);
        {
            let mut inserter = HTBatchInserter::<_, BATCH_LEN>::new(&mut ht);
            for key in 1..=21u64 {
                inserter.insert(key, 1);
            }
            // 21 pairs: one full buffer flushed, 5 still buffered.
            assert_eq!(inserter.num_flushed(), 16);
        }
        assert_eq!(ht.pending_inserts(), 0);
        assert_eq!(ht.get_fill(), 21);
    }

    #[test]
    fn finder_reports_hits_through_callback() {
        let mut ht = CasHashTable::<AggrKv>::new(256);
        {
            let mut inserter = HTBatchInserter::<_, BATCH_LEN>::new(&mut ht);
            for key in 1..=50u64 {
                inserter.insert(key, key);
            }
        }

        let mut hits = Vec::new();
        {
            let mut finder = HTBatchFinder::<_, BATCH_LEN>::with_callback(
                &mut ht,
                Some(Box::new(|r: &FindResult| hits.push(*r))),
            );
            for key in 1..=60u64 {
                finder.find(key, key as u32);
            }
        }
        assert_eq!(hits.len(), 50, "keys 51..=60 were never inserted");
        for hit in hits {
            assert_eq!(hit.value, u64::from(hit.id));
        }
    }

    #[test]
    fn runner_interleaves_inserts_and_finds() {
        let mut ht = CasHashTable::<AggrKv>::new(1 << 10);
        let mut runner = HTBatchRunner::<_, BATCH_LEN>::new(&mut ht);
        for key in 1..=100u64 {
            runner.insert(key, 1);
        }
        runner.flush_insert();
        for key in 1..=100u64 {
            runner.find(key, key as u32);
        }
        runner.flush_find();
        assert_eq!(runner.num_insert_flushed(), 100);
        assert_eq!(runner.num_find_flushed(), 100);
        assert_eq!(runner.take_results().len(), 100);
    }

    #[test]
    fn noprefetch_bypass_skips_the_queues() {
        let mut ht = CasHashTable::<AggrKv>::new(128);
        let mut inserter = HTBatchInserter::<_, BATCH_LEN>::new(&mut ht);
        assert!(inserter.insert_noprefetch(9, 81));
        drop(inserter);
        let mut finder = HTBatchFinder::<_, BATCH_LEN>::new(&mut ht);
        assert_eq!(finder.find_noprefetch(9), Some(81));
    }
}
