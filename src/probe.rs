//! Probe strategies for the in-cacheline key scan.
//!
//! The branching scan is the portable baseline and is always correct on its
//! own. The cmove and SIMD variants are find-path optimizations layered on
//! top: they examine the whole resident line at once instead of stopping at
//! the first decisive slot. Inserts always use the branching scan — a CAS
//! has to target exactly one slot.

use serde::{Deserialize, Serialize};

use crate::constants::EMPTY_KEY;
use crate::slots::Slot;
use crate::types::{KeyType, ValueType};

/// How the find path scans the slots of one cache line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStrategy {
    /// Examine slots one at a time, stopping at the first decisive one.
    #[default]
    Branching,
    /// Scan the whole line without data-dependent branches in the loop body.
    BranchlessCmove,
    /// Vectorized whole-line key compare. Requires AVX2 and a `[key, value]`
    /// slot layout; silently falls back to branching otherwise.
    SimdBatch,
}

/// Outcome of scanning the remainder of one cache line for a key.
///
/// `off` is the slot offset within the scanned range at which the scan
/// became decisive; it feeds the soft-reprobe and probe-distance counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineScan {
    /// The key lives here.
    Hit { value: ValueType, off: usize },
    /// A vacant slot ends the probe sequence: the key is absent.
    Vacant { off: usize },
    /// Every slot holds some other key; continue on the next line.
    Exhausted,
}

/// Scan `line` (the remaining slots of the current cache line) for `key`
/// using the selected strategy.
#[inline]
pub(crate) fn scan_line<S: Slot>(strategy: ProbeStrategy, line: &[S], key: KeyType) -> LineScan {
    match strategy {
        ProbeStrategy::Branching => scan_branching(line, key),
        ProbeStrategy::BranchlessCmove => scan_cmove(line, key),
        ProbeStrategy::SimdBatch => {
            #[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
            if S::PAIR_LAYOUT {
                // SAFETY: PAIR_LAYOUT guarantees `[key, value]` u64 words.
                return unsafe { scan_simd(line, key) };
            }
            scan_branching(line, key)
        }
    }
}

fn scan_branching<S: Slot>(line: &[S], key: KeyType) -> LineScan {
    for (off, slot) in line.iter().enumerate() {
        let mut retry = false;
        if let Some(value) = slot.find(key, &mut retry) {
            return LineScan::Hit { value, off };
        }
        if !retry {
            return LineScan::Vacant { off };
        }
    }
    LineScan::Exhausted
}

/// Whole-line scan with no early exit; the selects compile to conditional
/// moves. Sound because linear probing without deletions never leaves a
/// vacant slot between a key's home bucket and the key itself, so a hit
/// anywhere in the line is authoritative.
fn scan_cmove<S: Slot>(line: &[S], key: KeyType) -> LineScan {
    let mut hit_off = usize::MAX;
    let mut hit_value = 0;
    let mut vacant_off = usize::MAX;
    for (off, slot) in line.iter().enumerate() {
        let k = slot.key();
        let v = slot.value();
        let is_hit = k == key && hit_off == usize::MAX;
        hit_off = if is_hit { off } else { hit_off };
        hit_value = if is_hit { v } else { hit_value };
        let is_vacant = k == EMPTY_KEY && vacant_off == usize::MAX;
        vacant_off = if is_vacant { off } else { vacant_off };
    }
    if hit_off != usize::MAX {
        LineScan::Hit {
            value: hit_value,
            off: hit_off,
        }
    } else if vacant_off != usize::MAX {
        LineScan::Vacant { off: vacant_off }
    } else {
        LineScan::Exhausted
    }
}

/// AVX2 whole-line key compare over four `[key, value]` slots.
///
/// # Safety
///
/// `line` must consist of slots laid out as two u64 words with the key
/// first (`S::PAIR_LAYOUT`). The 32-byte loads race with concurrent CAS
/// writes; each 8-byte lane is still read atomically on x86-64, and every
/// decisive lane is re-read through the slot's atomics before use, so a
/// torn view across lanes can only delay a probe, not corrupt it.
#[cfg(all(target_arch = "x86_64", target_feature = "avx2"))]
unsafe fn scan_simd<S: Slot>(line: &[S], key: KeyType) -> LineScan {
    use core::arch::x86_64::{
        _mm256_castsi256_pd, _mm256_cmpeq_epi64, _mm256_loadu_si256, _mm256_movemask_pd,
        _mm256_set1_epi64x, _mm256_setzero_si256,
    };

    // Partial lines (probe entering mid-line) take the scalar path.
    if line.len() != 4 {
        return scan_branching(line, key);
    }

    let words = line.as_ptr().cast::<i64>();
    let lo = _mm256_loadu_si256(words.cast());
    let hi = _mm256_loadu_si256(words.add(4).cast());
    let needle = _mm256_set1_epi64x(key as i64);
    let zero = _mm256_setzero_si256();

    // Word lanes alternate key/value; keep only the key lanes (bits 0, 2).
    let hit_lo = _mm256_movemask_pd(_mm256_castsi256_pd(_mm256_cmpeq_epi64(lo, needle))) as u32;
    let hit_hi = _mm256_movemask_pd(_mm256_castsi256_pd(_mm256_cmpeq_epi64(hi, needle))) as u32;
    let hits = (hit_lo & 0b0101) | ((hit_hi & 0b0101) << 4);

    let empty_lo = _mm256_movemask_pd(_mm256_castsi256_pd(_mm256_cmpeq_epi64(lo, zero))) as u32;
    let empty_hi = _mm256_movemask_pd(_mm256_castsi256_pd(_mm256_cmpeq_epi64(hi, zero))) as u32;
    let empties = (empty_lo & 0b0101) | ((empty_hi & 0b0101) << 4);

    if hits != 0 {
        let off = (hits.trailing_zeros() / 2) as usize;
        return LineScan::Hit {
            value: line[off].value(),
            off,
        };
    }
    if empties != 0 {
        let off = (empties.trailing_zeros() / 2) as usize;
        return LineScan::Vacant { off };
    }
    LineScan::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::AggrKv;

    const STRATEGIES: [ProbeStrategy; 3] = [
        ProbeStrategy::Branching,
        ProbeStrategy::BranchlessCmove,
        ProbeStrategy::SimdBatch,
    ];

    fn line_with(keys: &[u64]) -> Vec<AggrKv> {
        let line: Vec<AggrKv> = (0..4).map(|_| AggrKv::default()).collect();
        for (slot, &key) in line.iter().zip(keys) {
            if key != 0 {
                assert!(slot.insert_cas(key, key * 10));
            }
        }
        line
    }

    #[test]
    fn strategies_agree_on_hit() {
        let line = line_with(&[3, 9, 12, 4]);
        for strategy in STRATEGIES {
            assert_eq!(
                scan_line(strategy, &line, 12),
                LineScan::Hit {
                    value: 120,
                    off: 2
                },
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn strategies_agree_on_vacancy() {
        let line = line_with(&[3, 9]);
        for strategy in STRATEGIES {
            assert_eq!(
                scan_line(strategy, &line, 12),
                LineScan::Vacant { off: 2 },
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn strategies_agree_on_exhaustion() {
        let line = line_with(&[3, 9, 5, 6]);
        for strategy in STRATEGIES {
            assert_eq!(
                scan_line(strategy, &line, 12),
                LineScan::Exhausted,
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn partial_line_scans_work() {
        let line = line_with(&[3, 9, 5, 6]);
        for strategy in STRATEGIES {
            assert_eq!(
                scan_line(strategy, &line[2..], 6),
                LineScan::Hit { value: 60, off: 1 },
                "{strategy:?}"
            );
        }
    }
}
