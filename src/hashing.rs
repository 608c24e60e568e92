//! Injected hash strategies and power-of-two index masking.
//!
//! Every strategy satisfies the same contract — `bytes -> u64` — and they are
//! interchangeable: the tables only require that the same strategy is used
//! for every operation against a given table instance.

use std::hash::Hasher as _;

use serde::{Deserialize, Serialize};

use crate::types::KeyType;

/// Selectable hash function. All variants hash the little-endian bytes of
/// the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HasherKind {
    /// xxHash3, 64-bit. The default: fastest on short fixed-width keys.
    #[default]
    Xxh3,
    /// Classic xxHash64.
    Xxh64,
    /// wyhash.
    Wyhash,
    /// FNV-1a.
    Fnv,
    /// FxHash (the rustc hash).
    Fx,
}

impl HasherKind {
    /// Hash an arbitrary byte buffer.
    #[inline]
    pub fn hash_bytes(self, bytes: &[u8]) -> u64 {
        match self {
            HasherKind::Xxh3 => xxhash_rust::xxh3::xxh3_64(bytes),
            HasherKind::Xxh64 => xxhash_rust::xxh64::xxh64(bytes, 0),
            HasherKind::Wyhash => wyhash::wyhash(bytes, 0),
            HasherKind::Fnv => {
                let mut hasher = fnv::FnvHasher::default();
                hasher.write(bytes);
                hasher.finish()
            }
            HasherKind::Fx => {
                let mut hasher = rustc_hash::FxHasher::default();
                hasher.write(bytes);
                hasher.finish()
            }
        }
    }
}

/// Hash strategy plus capacity mask, producing bucket indexes.
///
/// Capacity must already be a power of two; the modulo is a single `&`.
#[derive(Debug, Clone, Copy)]
pub struct HashIndexer {
    kind: HasherKind,
    mask: u64,
}

impl HashIndexer {
    pub fn new(kind: HasherKind, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            kind,
            mask: capacity as u64 - 1,
        }
    }

    /// Full 64-bit hash of a key.
    #[inline]
    pub fn hash_key(&self, key: KeyType) -> u64 {
        self.kind.hash_bytes(&key.to_le_bytes())
    }

    /// Bucket index for a key: `hash(key) & (capacity - 1)`.
    #[inline]
    pub fn index(&self, key: KeyType) -> usize {
        (self.hash_key(key) & self.mask) as usize
    }

    pub fn kind(&self) -> HasherKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_stays_in_bounds() {
        for kind in [
            HasherKind::Xxh3,
            HasherKind::Xxh64,
            HasherKind::Wyhash,
            HasherKind::Fnv,
            HasherKind::Fx,
        ] {
            let indexer = HashIndexer::new(kind, 128);
            for key in 1..10_000u64 {
                assert!(indexer.index(key) < 128);
            }
        }
    }

    #[test]
    fn hashing_is_deterministic() {
        let indexer = HashIndexer::new(HasherKind::Xxh3, 64);
        assert_eq!(indexer.index(42), indexer.index(42));
        assert_eq!(
            HasherKind::Wyhash.hash_bytes(b"acgt"),
            HasherKind::Wyhash.hash_bytes(b"acgt")
        );
    }
}
