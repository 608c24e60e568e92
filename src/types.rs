//! Common argument and result types shared by every table topology.

/// Key type stored in the tables. Keys are small fixed-width blobs; the
/// canonical workload packs a k-mer into one machine word.
pub type KeyType = u64;

/// Value type stored next to a key: a payload for [`crate::slots::Item`]
/// slots, an occurrence count for [`crate::slots::AggrKv`] slots.
pub type ValueType = u64;

/// Argument for one hashtable operation (insert or find).
///
/// Key 0 is the empty-slot sentinel; inserts and finds of key 0 are served
/// from the out-of-band cell, never from the slot array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFindArgument {
    /// The key to insert or look up.
    pub key: KeyType,
    /// The value to insert. Ignored by finds.
    pub value: ValueType,
    /// Caller-assigned id, echoed back in [`FindResult::id`]. Results may
    /// resolve out of submission order; this is the only way to re-associate
    /// them.
    pub id: u32,
    /// Partition the operation is routed to. Only meaningful for the
    /// partitioned topology; the tiered table reuses it internally to tag
    /// overflow requests.
    pub part_id: u32,
}

/// The result of one find operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindResult {
    /// Matches the [`InsertFindArgument::id`] of the originating request.
    pub id: u32,
    /// The value found for the key.
    pub value: ValueType,
}

impl FindResult {
    pub const fn new(id: u32, value: ValueType) -> Self {
        Self { id, value }
    }
}
