//! Tuning constants for the prefetch pipeline and batch layer.
//!
//! Queue sizes must stay powers of two: occupancy is computed with a
//! `(head - tail) & (len - 1)` mask.

/// L1 data cache line size assumed by the slot layout and prefetcher.
pub const CACHE_LINE_SIZE: usize = 64;

/// Capacity of the per-thread insert pipeline queue.
pub const PREFETCH_QUEUE_SIZE: usize = 64;

/// Capacity of the per-thread find pipeline queue.
pub const PREFETCH_FIND_QUEUE_SIZE: usize = 64;

/// Insert queue occupancy at which `flush_if_needed` starts draining.
pub const INS_FLUSH_THRESHOLD: usize = 32;

/// Find queue occupancy at which `flush_if_needed` starts draining.
pub const FIND_FLUSH_THRESHOLD: usize = 32;

/// Number of key/value pairs buffered by the batch layer before it calls
/// into the pipeline.
pub const BATCH_LEN: usize = 16;

/// Reserved key marking an unoccupied slot. Real inserts of this key are
/// routed to a dedicated out-of-band cell instead of the CAS path.
pub const EMPTY_KEY: u64 = 0;
