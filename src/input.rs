//! Input reader boundary and the synthetic key generators behind it.
//!
//! Anything that can produce a stream of fixed-width keys via
//! `next(&mut key) -> bool` can feed the pipeline; sequence-file parsers
//! live upstream and are not part of this crate. The two readers here
//! drive benchmarks and tests: a sequential counter and a zipfian sampler.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Upstream collaborator contract: fill `out` with the next key, returning
/// false when the stream is exhausted.
pub trait InputReader<T> {
    fn next(&mut self, out: &mut T) -> bool;
}

/// Yields `start..end` in order. Zero-collision uniform workload.
#[derive(Debug, Clone)]
pub struct CounterReader {
    next: u64,
    end: u64,
}

impl CounterReader {
    pub fn new(start: u64, end: u64) -> Self {
        Self { next: start, end }
    }

    /// The `count` keys starting at `start`.
    pub fn with_count(start: u64, count: u64) -> Self {
        Self::new(start, start.saturating_add(count))
    }
}

impl InputReader<u64> for CounterReader {
    #[inline]
    fn next(&mut self, out: &mut u64) -> bool {
        if self.next >= self.end {
            return false;
        }
        *out = self.next;
        self.next += 1;
        true
    }
}

/// Power-law distributed keys in `1..=keyspace` (key 0 is reserved).
///
/// Standard zipfian inversion sampling: precompute the harmonic terms once,
/// then each sample is one uniform draw and one `powf`.
#[derive(Debug, Clone)]
pub struct ZipfianReader {
    rng: StdRng,
    keyspace: u64,
    theta: f64,
    alpha: f64,
    zetan: f64,
    eta: f64,
    remaining: u64,
}

impl ZipfianReader {
    /// `theta` is the skew in `(0, 1)`; around 0.99 reproduces heavily
    /// skewed counting workloads. Yields `count` keys.
    pub fn new(keyspace: u64, theta: f64, seed: u64, count: u64) -> Self {
        assert!(keyspace > 0, "keyspace must be nonzero");
        assert!((0.0..1.0).contains(&theta), "theta must be in [0, 1)");
        let zetan = zeta(keyspace, theta);
        let zeta2 = zeta(2, theta);
        let n = keyspace as f64;
        Self {
            rng: StdRng::seed_from_u64(seed),
            keyspace,
            theta,
            alpha: 1.0 / (1.0 - theta),
            zetan,
            eta: (1.0 - (2.0 / n).powf(1.0 - theta)) / (1.0 - zeta2 / zetan),
            remaining: count,
        }
    }

    fn sample(&mut self) -> u64 {
        let u: f64 = self.rng.gen();
        let uz = u * self.zetan;
        if uz < 1.0 {
            return 1;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return 2;
        }
        let n = self.keyspace as f64;
        let rank = 1.0 + n * (self.eta * u - self.eta + 1.0).powf(self.alpha);
        (rank as u64).clamp(1, self.keyspace)
    }
}

impl InputReader<u64> for ZipfianReader {
    #[inline]
    fn next(&mut self, out: &mut u64) -> bool {
        if self.remaining == 0 {
            return false;
        }
        *out = self.sample();
        self.remaining -= 1;
        true
    }
}

fn zeta(n: u64, theta: f64) -> f64 {
    (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
}
