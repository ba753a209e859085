//! Per-thread random number generation.
//!
//! Randomness is deliberately out of scope as a *service* (see the spec's
//! non-goals): the core never constructs a shared or global generator.
//! [`RngFactory`] is the one place that turns a run seed into independent,
//! reproducible per-stream generators, mirroring the way the original
//! upstream's `SeedingConfig`/`get_rng` pair kept RNG state out of the
//! solver's own fields.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Derives independent, deterministic `ChaCha8Rng` streams from one root seed.
///
/// Each executor worker and each algorithm component that needs randomness
/// (grid jitter, random-scan sampling, adaptor noise) asks for its own
/// stream by a stable `stream_id`; the same `(root_seed, stream_id)` pair
/// always yields the same generator state, which is what makes
/// `resetToOptimizationStart` reproducible (§8 invariant 8).
#[derive(Debug, Clone, Copy)]
pub struct RngFactory {
    root_seed: u64,
}

impl RngFactory {
    pub fn new(root_seed: u64) -> Self {
        Self { root_seed }
    }

    /// Golden-ratio multiplicative mix; avoids adjacent stream ids producing
    /// correlated ChaCha8 seeds.
    pub fn for_stream(&self, stream_id: u64) -> ChaCha8Rng {
        const MIX: u64 = 0x9E37_79B9_7F4A_7C15;
        let seed = self
            .root_seed
            .wrapping_add(stream_id.wrapping_mul(MIX))
            .rotate_left(17);
        ChaCha8Rng::seed_from_u64(seed)
    }

    pub fn root_seed(&self) -> u64 {
        self.root_seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn same_seed_same_stream_is_reproducible() {
        let a = RngFactory::new(42);
        let b = RngFactory::new(42);
        let mut ra = a.for_stream(3);
        let mut rb = b.for_stream(3);
        let draws_a: Vec<f64> = (0..8).map(|_| ra.random::<f64>()).collect();
        let draws_b: Vec<f64> = (0..8).map(|_| rb.random::<f64>()).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn distinct_streams_diverge() {
        let f = RngFactory::new(7);
        let mut r0 = f.for_stream(0);
        let mut r1 = f.for_stream(1);
        let v0: f64 = r0.random();
        let v1: f64 = r1.random();
        assert_ne!(v0, v1);
    }
}
