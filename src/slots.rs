//! Slot model: the fixed-layout records stored in every table.
//!
//! A slot is claimed by CAS-ing its key field from the empty sentinel to the
//! candidate key. Exactly one racing thread wins the claim; losers observe
//! the published key and fall back to the update path. The value field is
//! written after the claim, so a concurrent find may see a claimed key
//! before its value — an accepted race under the counting workload.
//!
//! Three variants:
//! - [`Item`] — key + value, updates overwrite.
//! - [`AggrKv`] — key + count, updates increment.
//! - [`ValueOnly`] — value only; key-less, so probing it by key is a
//!   programming error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::constants::{CACHE_LINE_SIZE, EMPTY_KEY};
use crate::mem::ZeroInit;
use crate::types::{KeyType, ValueType};

/// Number of slots of type `S` that share one cache line, minus one, usable
/// as a mask on the bucket index.
#[inline]
pub(crate) const fn keys_in_line_mask<S>() -> usize {
    let per_line = CACHE_LINE_SIZE / std::mem::size_of::<S>();
    if per_line == 0 {
        0
    } else {
        per_line - 1
    }
}

/// A fixed-layout KV record with CAS-capable key claim.
pub trait Slot: Send + Sync + Sized + 'static {
    /// True when the slot is laid out as `[key, value]` machine words, which
    /// permits whole-line vectorized key scans.
    const PAIR_LAYOUT: bool;

    /// True when the key field still holds the empty sentinel.
    fn is_empty(&self) -> bool;

    /// Current key, `EMPTY_KEY` if unoccupied.
    fn key(&self) -> KeyType;

    /// Current value (count for aggregating slots).
    fn value(&self) -> ValueType;

    /// True when the slot holds exactly `key`.
    fn compare_key(&self, key: KeyType) -> bool;

    /// Atomically claim an empty slot for `key` and publish `value`.
    ///
    /// Returns false when another thread won the race; the slot is then
    /// occupied (possibly by the same key) and the caller re-examines it.
    fn insert_cas(&self, key: KeyType, value: ValueType) -> bool;

    /// Post-claim value update for a slot already holding the matching key.
    fn update_cas(&self, value: ValueType);

    /// Probe the slot for `key`.
    ///
    /// `Some(value)` on a key match. `None` with `retry = false` when the
    /// slot is vacant (the key cannot be further down the probe sequence).
    /// `None` with `retry = true` when the slot holds a different key.
    fn find(&self, key: KeyType, retry: &mut bool) -> Option<ValueType>;

    /// Merge `value` into the out-of-band cell for the reserved key 0
    /// according to this slot's update semantics.
    fn oob_update(cell: &AtomicU64, value: ValueType);
}

/// Key + value record with overwrite semantics.
#[derive(Debug, Default)]
#[repr(C, align(16))]
pub struct Item {
    key: AtomicU64,
    value: AtomicU64,
}

// SAFETY: zeroed atomics are valid and represent an empty slot.
unsafe impl ZeroInit for Item {}

impl Slot for Item {
    const PAIR_LAYOUT: bool = true;

    #[inline]
    fn is_empty(&self) -> bool {
        self.key.load(Ordering::Acquire) == EMPTY_KEY
    }

    #[inline]
    fn key(&self) -> KeyType {
        self.key.load(Ordering::Acquire)
    }

    #[inline]
    fn value(&self) -> ValueType {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    fn compare_key(&self, key: KeyType) -> bool {
        self.key.load(Ordering::Acquire) == key
    }

    #[inline]
    fn insert_cas(&self, key: KeyType, value: ValueType) -> bool {
        match self
            .key
            .compare_exchange(EMPTY_KEY, key, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // Aligned 8-byte store; a concurrent find of this key may
                // still observe the pre-store value.
                self.value.store(value, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    #[inline]
    fn update_cas(&self, value: ValueType) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    fn find(&self, key: KeyType, retry: &mut bool) -> Option<ValueType> {
        let current = self.key.load(Ordering::Acquire);
        if current == key {
            *retry = false;
            Some(self.value.load(Ordering::Acquire))
        } else {
            *retry = current != EMPTY_KEY;
            None
        }
    }

    #[inline]
    fn oob_update(cell: &AtomicU64, value: ValueType) {
        cell.store(value, Ordering::Release);
    }
}

/// Key + count record with increment semantics, the k-mer counting slot.
#[derive(Debug, Default)]
#[repr(C, align(16))]
pub struct AggrKv {
    key: AtomicU64,
    count: AtomicU64,
}

// SAFETY: zeroed atomics are valid and represent an empty slot.
unsafe impl ZeroInit for AggrKv {}

impl Slot for AggrKv {
    const PAIR_LAYOUT: bool = true;

    #[inline]
    fn is_empty(&self) -> bool {
        self.key.load(Ordering::Acquire) == EMPTY_KEY
    }

    #[inline]
    fn key(&self) -> KeyType {
        self.key.load(Ordering::Acquire)
    }

    #[inline]
    fn value(&self) -> ValueType {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    fn compare_key(&self, key: KeyType) -> bool {
        self.key.load(Ordering::Acquire) == key
    }

    #[inline]
    fn insert_cas(&self, key: KeyType, value: ValueType) -> bool {
        match self
            .key
            .compare_exchange(EMPTY_KEY, key, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.count.fetch_add(value, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Increment the counter. `fetch_add` is the CAS retry loop the
    /// aggregation protocol asks for: it cannot lose updates.
    #[inline]
    fn update_cas(&self, value: ValueType) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    fn find(&self, key: KeyType, retry: &mut bool) -> Option<ValueType> {
        let current = self.key.load(Ordering::Acquire);
        if current == key {
            *retry = false;
            Some(self.count.load(Ordering::Acquire))
        } else {
            *retry = current != EMPTY_KEY;
            None
        }
    }

    #[inline]
    fn oob_update(cell: &AtomicU64, value: ValueType) {
        cell.fetch_add(value, Ordering::Relaxed);
    }
}

/// Value-only record for direct-indexed layouts. It has no key, so any
/// key-directed probe against it is a programming error and panics.
#[derive(Debug, Default)]
#[repr(C, align(8))]
pub struct ValueOnly {
    value: AtomicU64,
}

// SAFETY: a zeroed atomic is valid and represents an empty slot.
unsafe impl ZeroInit for ValueOnly {}

impl Slot for ValueOnly {
    const PAIR_LAYOUT: bool = false;

    #[inline]
    fn is_empty(&self) -> bool {
        self.value.load(Ordering::Acquire) == 0
    }

    #[inline]
    fn key(&self) -> KeyType {
        EMPTY_KEY
    }

    #[inline]
    fn value(&self) -> ValueType {
        self.value.load(Ordering::Acquire)
    }

    fn compare_key(&self, _key: KeyType) -> bool {
        unimplemented!("value-only slots cannot be probed by key")
    }

    #[inline]
    fn insert_cas(&self, _key: KeyType, value: ValueType) -> bool {
        self.value
            .compare_exchange(0, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn update_cas(&self, value: ValueType) {
        self.value.store(value, Ordering::Release);
    }

    fn find(&self, _key: KeyType, _retry: &mut bool) -> Option<ValueType> {
        unimplemented!("value-only slots cannot be probed by key")
    }

    #[inline]
    fn oob_update(cell: &AtomicU64, value: ValueType) {
        cell.store(value, Ordering::Release);
    }
}

/// Dedicated cell serving inserts and finds of the reserved key 0.
#[derive(Debug, Default)]
pub struct EmptyCell {
    value: AtomicU64,
    occupied: AtomicBool,
}

impl EmptyCell {
    /// Merge `value` with the semantics of slot type `S` and mark the cell
    /// occupied.
    #[inline]
    pub fn update<S: Slot>(&self, value: ValueType) {
        S::oob_update(&self.value, value);
        self.occupied.store(true, Ordering::Release);
    }

    /// Value for key 0, if it was ever inserted.
    #[inline]
    pub fn read(&self) -> Option<ValueType> {
        if self.occupied.load(Ordering::Acquire) {
            Some(self.value.load(Ordering::Acquire))
        } else {
            None
        }
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}
