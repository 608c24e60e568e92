//! Probe diagnostics, per-thread timings, and the cold aggregation sink.
//!
//! Counters are plain `u64`s owned by the (thread-local) table facade; they
//! are observational only and never feed back into probing decisions.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Diagnostic counters for the probe engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    /// Hard reprobes: the probe crossed a cacheline boundary and the request
    /// was re-enqueued behind a prefetch.
    pub num_reprobes: u64,
    /// Soft reprobes: the probe advanced within the current cacheline.
    pub num_soft_reprobes: u64,
    /// Key comparisons against occupied slots.
    pub num_memcmps: u64,
    /// Queue drains triggered by `flush_*` calls.
    pub num_queue_flushes: u64,
    /// Total probe distance accumulated by finds.
    pub sum_distance_from_bucket: u64,
    /// Longest probe distance observed by a single find.
    pub max_distance_from_bucket: u64,
}

impl ProbeStats {
    /// Fold another thread's counters into this one.
    pub fn merge(&mut self, other: &ProbeStats) {
        self.num_reprobes += other.num_reprobes;
        self.num_soft_reprobes += other.num_soft_reprobes;
        self.num_memcmps += other.num_memcmps;
        self.num_queue_flushes += other.num_queue_flushes;
        self.sum_distance_from_bucket += other.sum_distance_from_bucket;
        self.max_distance_from_bucket = self
            .max_distance_from_bucket
            .max(other.max_distance_from_bucket);
    }

    pub(crate) fn record_find_distance(&mut self, distance: u64) {
        self.sum_distance_from_bucket += distance;
        self.max_distance_from_bucket = self.max_distance_from_bucket.max(distance);
    }
}

/// Wall-clock duration and operation count for one phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpTimings {
    pub duration: Duration,
    pub op_count: u64,
}

impl OpTimings {
    pub fn new(duration: Duration, op_count: u64) -> Self {
        Self { duration, op_count }
    }

    /// Operations per second, zero when nothing ran.
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.op_count as f64 / secs
        }
    }

    pub fn merge(&mut self, other: &OpTimings) {
        self.duration += other.duration;
        self.op_count += other.op_count;
    }
}

/// Everything one worker thread reports when its run finishes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStats {
    pub thread_id: u32,
    pub insertions: OpTimings,
    pub finds: OpTimings,
    pub ht_fill: usize,
    pub ht_capacity: usize,
    pub max_count: u64,
    pub probe: ProbeStats,
}

/// Cold, mutex-guarded collection point for [`ThreadStats`]. Never touched
/// on the probe path.
#[derive(Debug, Default)]
pub struct StatsSink {
    inner: Mutex<Vec<ThreadStats>>,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stats: ThreadStats) {
        self.inner.lock().push(stats);
    }

    /// All reports, sorted by thread id.
    pub fn drain(&self) -> Vec<ThreadStats> {
        let mut all = std::mem::take(&mut *self.inner.lock());
        all.sort_by_key(|s| s.thread_id);
        all
    }
}

/// Per-request latency sampling for the pipelined path.
///
/// `start` hands out a timer id carried by the request through any number of
/// re-enqueues; `end` closes it when the request resolves. Strictly
/// thread-local, like the queues the requests live in.
#[derive(Debug, Default)]
pub struct LatencyCollector {
    pending: Vec<Option<Instant>>,
    samples: Vec<Duration>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a timer and return its id.
    pub fn start(&mut self) -> u32 {
        let id = self.pending.len() as u32;
        self.pending.push(Some(Instant::now()));
        id
    }

    /// Close the timer `id`. Closing an already-closed id is a no-op.
    pub fn end(&mut self, id: u32) {
        if let Some(slot) = self.pending.get_mut(id as usize) {
            if let Some(started) = slot.take() {
                self.samples.push(started.elapsed());
            }
        }
    }

    /// Time one synchronous (no-prefetch) operation.
    pub fn sync_measure<T>(&mut self, op: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = op();
        self.samples.push(started.elapsed());
        out
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn take_samples(&mut self) -> Vec<Duration> {
        self.pending.clear();
        std::mem::take(&mut self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_stats_merge_takes_max_distance() {
        let mut a = ProbeStats {
            num_reprobes: 1,
            max_distance_from_bucket: 4,
            ..Default::default()
        };
        let b = ProbeStats {
            num_reprobes: 2,
            max_distance_from_bucket: 3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.num_reprobes, 3);
        assert_eq!(a.max_distance_from_bucket, 4);
    }

    #[test]
    fn latency_collector_closes_each_timer_once() {
        let mut collector = LatencyCollector::new();
        let a = collector.start();
        let b = collector.start();
        collector.end(a);
        collector.end(a);
        collector.end(b);
        assert_eq!(collector.samples().len(), 2);
    }

    #[test]
    fn sink_sorts_by_thread() {
        let sink = StatsSink::new();
        sink.push(ThreadStats {
            thread_id: 1,
            ..Default::default()
        });
        sink.push(ThreadStats {
            thread_id: 0,
            ..Default::default()
        });
        let all = sink.drain();
        assert_eq!(all[0].thread_id, 0);
        assert_eq!(all[1].thread_id, 1);
    }
}
