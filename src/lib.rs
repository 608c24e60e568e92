//! # kmerhash
//!
//! Cache-conscious concurrent hash tables for k-mer counting workloads.
//!
//! The core is a lock-free, CAS-claimed open-addressing table driven by a
//! per-thread software pipeline: enqueueing an operation prefetches its
//! target cache line, and the operation is resolved on a later pass once
//! the line has arrived. Probing that stays inside the resident line
//! resolves immediately; probing that would cross a line boundary defers
//! behind the next prefetch instead of stalling.
//!
//! Three topologies share the probe engine:
//! - [`CasHashTable`] — one table shared by all threads (CAS-only
//!   synchronization, refcounted allocation).
//! - [`PartitionedHashStore`] — one private table per owning thread.
//! - [`TieredHashTable`] — a primary region that diverts local clustering
//!   into an overflow region.
//!
//! The [`batch`] layer buffers caller key/value pairs and feeds the
//! pipeline in fixed-size batches; its `*_noprefetch` passthroughs are the
//! portable single-key baseline used for comparison runs.

pub mod batch;
pub mod config;
pub mod constants;
pub mod hashing;
pub mod input;
pub mod mem;
pub mod pipeline;
pub mod probe;
pub mod slots;
pub mod stats;
pub mod table;
pub mod types;

pub use batch::{HTBatchFinder, HTBatchInserter, HTBatchRunner};
pub use config::{BenchConfig, ConfigError, ConfigOverrides, TableKind};
pub use hashing::{HashIndexer, HasherKind};
pub use input::{CounterReader, InputReader, ZipfianReader};
pub use probe::ProbeStrategy;
pub use slots::{AggrKv, Item, Slot, ValueOnly};
pub use stats::{LatencyCollector, OpTimings, ProbeStats, StatsSink, ThreadStats};
pub use table::{
    CasHashTable, CasTableShared, HashTable, PartitionTable, PartitionedHashStore,
    TieredHashTable, TieredTableShared,
};
pub use types::{FindResult, InsertFindArgument, KeyType, ValueType};
