//! Adaptor hierarchy (spec §4.1).
//!
//! Adaptors are mutation operators bound to a leaf's value kind. Source-side
//! this was a deep class hierarchy (`GAdaptorT` → `GNumGaussAdaptorT` → ...);
//! here it is a small trait plus one struct per concrete behavior, matching
//! the workspace's existing preference for composition over inheritance
//! (`Solver` holding `Box<dyn Probe>`/`Box<dyn Classify>` fields rather than
//! subclassing).

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// Tri-state adaption gate, replacing the source's `boost::tribool`.
///
/// `Probabilistic` is the common case: each call draws a uniform value and
/// adapts only if it falls at or below `adaption_probability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptionMode {
    Always,
    Never,
    Probabilistic,
}

fn gate(mode: AdaptionMode, probability: f64, rng: &mut ChaCha8Rng) -> bool {
    match mode {
        AdaptionMode::Always => true,
        AdaptionMode::Never => false,
        AdaptionMode::Probabilistic => rng.random::<f64>() <= probability,
    }
}

/// Behavior shared by every concrete adaptor, parameterized over the value
/// it mutates.
pub trait Adaptor<T> {
    /// Mutate `value` in place under the adaptor's current gate and
    /// self-adaption schedule. Returns the (possibly unchanged) new value.
    fn adapt(&mut self, value: T, rng: &mut ChaCha8Rng) -> T;

    /// Number of times `adapt` has actually perturbed a value (gate passed).
    fn n_adaptions(&self) -> u64;

    fn adaption_mode(&self) -> AdaptionMode;

    /// Most adaptors accept any mode. An adaptor that pins its mode (e.g.
    /// [`SwarmAdaptor`], always `Always`) rejects any other value with
    /// `StateViolation` (spec §4.1, §7).
    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()>;
}

/// Gaussian adaptor for `Double`/`Float` leaves.
///
/// Default constants mirror the upstream `GOptimizationEnums` defaults:
/// `sigma = 1.0`, `sigma_sigma = 0.001`, `min_sigma = 1e-7`, `max_sigma =
/// 5.0`, `adaption_probability = 1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussAdaptor {
    pub sigma: f64,
    pub sigma_sigma: f64,
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub adaption_probability: f64,
    pub adaption_mode: AdaptionMode,
    /// Self-adapt `sigma` every `adaption_threshold` successful gate passes;
    /// `0` disables self-adaption of sigma entirely.
    pub adaption_threshold: u64,
    #[serde(skip)]
    adaption_counter: u64,
    #[serde(skip)]
    n_adaptions: u64,
}

impl Default for GaussAdaptor {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            sigma_sigma: 0.001,
            min_sigma: 1.0e-7,
            max_sigma: 5.0,
            adaption_probability: 1.0,
            adaption_mode: AdaptionMode::Probabilistic,
            adaption_threshold: 1,
            adaption_counter: 0,
            n_adaptions: 0,
        }
    }
}

impl GaussAdaptor {
    /// Fail-fast check for the invariants spec §3/§4.1 place on a Gaussian
    /// adaptor's configuration: `min_sigma > 0`, `sigma` inside
    /// `[min_sigma, max_sigma]`, and `adaption_probability` a real
    /// probability.
    pub fn validate(&self) -> Result<(), MetaError> {
        if self.min_sigma <= 0.0 {
            return Err(MetaError::InvalidConfiguration(format!(
                "min_sigma must be > 0, got {}",
                self.min_sigma
            )));
        }
        if self.max_sigma < self.min_sigma {
            return Err(MetaError::InvalidConfiguration(format!(
                "max_sigma ({}) must be >= min_sigma ({})",
                self.max_sigma, self.min_sigma
            )));
        }
        if self.sigma < self.min_sigma || self.sigma > self.max_sigma {
            return Err(MetaError::InvalidConfiguration(format!(
                "sigma ({}) must lie in [{}, {}]",
                self.sigma, self.min_sigma, self.max_sigma
            )));
        }
        if !(0.0..=1.0).contains(&self.adaption_probability) {
            return Err(MetaError::InvalidConfiguration(format!(
                "adaption_probability must be in [0,1], got {}",
                self.adaption_probability
            )));
        }
        Ok(())
    }

    /// Self-adapt `sigma` via a log-normal step, then clamp it back into
    /// `[min_sigma, max_sigma]` (§3 invariant: sigma always stays positive
    /// and bounded).
    fn adapt_adaption(&mut self, rng: &mut ChaCha8Rng) {
        let step: f64 = rng.sample(StandardNormal);
        self.sigma *= (self.sigma_sigma * step).exp();
        self.sigma = self.sigma.clamp(self.min_sigma, self.max_sigma);
    }
}

impl Adaptor<f64> for GaussAdaptor {
    fn adapt(&mut self, value: f64, rng: &mut ChaCha8Rng) -> f64 {
        if !gate(self.adaption_mode, self.adaption_probability, rng) {
            return value;
        }
        if self.adaption_threshold > 0 {
            self.adaption_counter += 1;
            if self.adaption_counter >= self.adaption_threshold {
                self.adaption_counter = 0;
                self.adapt_adaption(rng);
            }
        }
        self.n_adaptions += 1;
        let step: f64 = rng.sample(StandardNormal);
        value + self.sigma * step
    }

    fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    fn adaption_mode(&self) -> AdaptionMode {
        self.adaption_mode
    }

    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()> {
        self.adaption_mode = mode;
        Ok(())
    }
}

/// `Float` leaves share the same self-adapting sigma machinery as `Double`
/// leaves; this impl just moves the noise draw into `f32` precision while
/// `sigma` itself is still tracked as `f64` (spec §3: "sigma always lies in
/// [min_sigma, max_sigma]").
impl Adaptor<f32> for GaussAdaptor {
    fn adapt(&mut self, value: f32, rng: &mut ChaCha8Rng) -> f32 {
        if !gate(self.adaption_mode, self.adaption_probability, rng) {
            return value;
        }
        if self.adaption_threshold > 0 {
            self.adaption_counter += 1;
            if self.adaption_counter >= self.adaption_threshold {
                self.adaption_counter = 0;
                self.adapt_adaption(rng);
            }
        }
        self.n_adaptions += 1;
        let step: f64 = rng.sample(StandardNormal);
        value + (self.sigma * step) as f32
    }

    fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    fn adaption_mode(&self) -> AdaptionMode {
        self.adaption_mode
    }

    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()> {
        self.adaption_mode = mode;
        Ok(())
    }
}

/// Flip adaptor for `Bool`/`Int32` leaves: bools invert, ints take a random
/// unit step, both gated the same way as [`GaussAdaptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipAdaptor {
    pub adaption_probability: f64,
    pub adaption_mode: AdaptionMode,
    #[serde(skip)]
    n_adaptions: u64,
}

impl Default for FlipAdaptor {
    fn default() -> Self {
        Self {
            adaption_probability: 1.0,
            adaption_mode: AdaptionMode::Probabilistic,
            n_adaptions: 0,
        }
    }
}

impl Adaptor<bool> for FlipAdaptor {
    fn adapt(&mut self, value: bool, rng: &mut ChaCha8Rng) -> bool {
        if !gate(self.adaption_mode, self.adaption_probability, rng) {
            return value;
        }
        self.n_adaptions += 1;
        !value
    }

    fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    fn adaption_mode(&self) -> AdaptionMode {
        self.adaption_mode
    }

    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()> {
        self.adaption_mode = mode;
        Ok(())
    }
}

impl Adaptor<i32> for FlipAdaptor {
    fn adapt(&mut self, value: i32, rng: &mut ChaCha8Rng) -> i32 {
        if !gate(self.adaption_mode, self.adaption_probability, rng) {
            return value;
        }
        self.n_adaptions += 1;
        if rng.random_bool(0.5) {
            value.wrapping_add(1)
        } else {
            value.wrapping_sub(1)
        }
    }

    fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    fn adaption_mode(&self) -> AdaptionMode {
        self.adaption_mode
    }

    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()> {
        self.adaption_mode = mode;
        Ok(())
    }
}

/// Swarm-style velocity update for `double` leaves (spec §3, §4.1).
/// `adaption_mode` is pinned to `Always` — `set_adaption_mode` rejects any
/// other value with `StateViolation` rather than silently ignoring it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmAdaptor {
    pub inertia: f64,
    pub cognitive: f64,
    pub social: f64,
    pub velocity: f64,
    pub local_best: f64,
    pub global_best: f64,
    #[serde(skip)]
    n_adaptions: u64,
}

impl Default for SwarmAdaptor {
    fn default() -> Self {
        Self {
            inertia: 0.7,
            cognitive: 1.5,
            social: 1.5,
            velocity: 0.0,
            local_best: 0.0,
            global_best: 0.0,
            n_adaptions: 0,
        }
    }
}

impl SwarmAdaptor {
    /// `velocity <- inertia*velocity + cognitive*U(0,1)*(local_best - v) +
    /// social*U(0,1)*(global_best - v)`, then `v <- v + velocity`.
    fn custom_adapt(&mut self, value: f64, rng: &mut ChaCha8Rng) -> f64 {
        let r1: f64 = rng.random();
        let r2: f64 = rng.random();
        self.velocity = self.inertia * self.velocity
            + self.cognitive * r1 * (self.local_best - value)
            + self.social * r2 * (self.global_best - value);
        value + self.velocity
    }
}

impl Adaptor<f64> for SwarmAdaptor {
    fn adapt(&mut self, value: f64, rng: &mut ChaCha8Rng) -> f64 {
        self.n_adaptions += 1;
        self.custom_adapt(value, rng)
    }

    fn n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    fn adaption_mode(&self) -> AdaptionMode {
        AdaptionMode::Always
    }

    fn set_adaption_mode(&mut self, mode: AdaptionMode) -> MetaResult<()> {
        if mode != AdaptionMode::Always {
            return Err(MetaError::StateViolation(
                "SwarmAdaptor pins adaption_mode to Always".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn never_mode_leaves_value_unchanged() {
        let mut a = GaussAdaptor {
            adaption_mode: AdaptionMode::Never,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(a.adapt(3.0, &mut rng), 3.0);
        }
        assert_eq!(a.n_adaptions(), 0);
    }

    #[test]
    fn always_mode_counts_every_call() {
        let mut a = GaussAdaptor {
            adaption_mode: AdaptionMode::Always,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..10 {
            a.adapt(0.0, &mut rng);
        }
        assert_eq!(a.n_adaptions(), 10);
    }

    #[test]
    fn sigma_stays_within_bounds() {
        let mut a = GaussAdaptor {
            adaption_mode: AdaptionMode::Always,
            adaption_threshold: 1,
            sigma_sigma: 5.0,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            a.adapt(0.0, &mut rng);
            assert!(a.sigma >= a.min_sigma && a.sigma <= a.max_sigma);
        }
    }

    #[test]
    fn bool_flip_inverts_under_always() {
        let mut a = FlipAdaptor {
            adaption_mode: AdaptionMode::Always,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(!Adaptor::<bool>::adapt(&mut a, true, &mut rng));
        assert!(Adaptor::<bool>::adapt(&mut a, false, &mut rng));
    }

    #[test]
    fn swarm_adaptor_rejects_non_always_mode() {
        let mut a = SwarmAdaptor::default();
        assert_eq!(a.adaption_mode(), AdaptionMode::Always);
        assert!(matches!(
            Adaptor::<f64>::set_adaption_mode(&mut a, AdaptionMode::Never),
            Err(MetaError::StateViolation(_))
        ));
        assert!(Adaptor::<f64>::set_adaption_mode(&mut a, AdaptionMode::Always).is_ok());
    }

    #[test]
    fn swarm_adaptor_moves_value_toward_bests_over_time() {
        let mut a = SwarmAdaptor {
            local_best: 10.0,
            global_best: 10.0,
            ..Default::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut value = 0.0;
        for _ in 0..200 {
            value = a.adapt(value, &mut rng);
        }
        assert!(value > 5.0, "value should drift toward the bests, got {value}");
        assert_eq!(a.n_adaptions(), 200);
    }
}
