//! Parameter-scan algorithm (spec §4.5): the one fully specified concrete
//! [`Algorithm`], covering grid enumeration, independent random sampling,
//! and simple-scan mode over the typed scan parameters a
//! [`ScanSpec`](crate::grammar::ScanSpec) list describes.

use std::cmp::Ordering;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::activity::ActivityMode;
use crate::algorithm::{Algorithm, AlgorithmBase};
use crate::error::{MetaError, MetaResult};
use crate::executor::Executor;
use crate::grammar::{ScanSpec, ScanValue};
use crate::individual::{Direction, Individual};
use crate::personality::{PersonalityTraits, ScanPersonality};

/// `n_steps` linearly spaced values in `[lo, hi]`, `lo` and `hi` both
/// inclusive (spec §4.5 grid mode, floats/doubles).
fn linspace(lo: f64, hi: f64, n_steps: usize) -> Vec<f64> {
    if n_steps <= 1 || hi <= lo {
        return vec![lo];
    }
    (0..n_steps).map(|i| lo + (hi - lo) * (i as f64 / (n_steps - 1) as f64)).collect()
}

/// Integer grid sequence: every integer in `[lo,hi]` when that range fits
/// within `n_steps`, otherwise `n_steps` linearly spaced values rounded to
/// the nearest integer (spec §4.5).
fn materialize_int32(lo: i32, hi: i32, n_steps: usize) -> Vec<i32> {
    if hi <= lo {
        return vec![lo];
    }
    let span = (hi - lo + 1) as usize;
    if span <= n_steps.max(1) {
        (lo..=hi).collect()
    } else {
        linspace(lo as f64, hi as f64, n_steps).into_iter().map(|v| v.round() as i32).collect()
    }
}

fn materialize(spec: &ScanSpec) -> Vec<ScanValue> {
    match (spec.lo, spec.hi) {
        (ScanValue::Double(lo), ScanValue::Double(hi)) => {
            linspace(lo, hi, spec.n_steps).into_iter().map(ScanValue::Double).collect()
        }
        (ScanValue::Float(lo), ScanValue::Float(hi)) => linspace(lo as f64, hi as f64, spec.n_steps)
            .into_iter()
            .map(|v| ScanValue::Float(v as f32))
            .collect(),
        (ScanValue::Int32(lo), ScanValue::Int32(hi)) => {
            materialize_int32(lo, hi, spec.n_steps).into_iter().map(ScanValue::Int32).collect()
        }
        (ScanValue::Bool(_), ScanValue::Bool(_)) => vec![ScanValue::Bool(false), ScanValue::Bool(true)],
        _ => unreachable!("a scan spec's lo and hi always share one ScanValue variant"),
    }
}

fn sample_random(spec: &ScanSpec, rng: &mut ChaCha8Rng) -> ScanValue {
    match (spec.lo, spec.hi) {
        (ScanValue::Double(lo), ScanValue::Double(hi)) => ScanValue::Double(if hi > lo { rng.random_range(lo..hi) } else { lo }),
        (ScanValue::Float(lo), ScanValue::Float(hi)) => ScanValue::Float(if hi > lo { rng.random_range(lo..hi) } else { lo }),
        (ScanValue::Int32(lo), ScanValue::Int32(hi)) => ScanValue::Int32(if hi >= lo { rng.random_range(lo..=hi) } else { lo }),
        (ScanValue::Bool(_), ScanValue::Bool(_)) => ScanValue::Bool(rng.random_bool(0.5)),
        _ => unreachable!("a scan spec's lo and hi always share one ScanValue variant"),
    }
}

/// Cartesian-product walker over the per-parameter grid sequences, first
/// spec fastest-varying (spec §4.5 "Enumeration is a cartesian product with
/// the first listed parameter as fastest-varying").
struct GridEnumerator {
    sequences: Vec<Vec<ScanValue>>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl GridEnumerator {
    fn new(sequences: Vec<Vec<ScanValue>>) -> Self {
        let indices = vec![0; sequences.len()];
        Self { sequences, indices, exhausted: false }
    }

    fn current(&self) -> Vec<ScanValue> {
        self.sequences.iter().zip(&self.indices).map(|(seq, &i)| seq[i]).collect()
    }

    /// Advance to the next tuple. Returns `EndOfEnumeration` exactly on the
    /// step where every parameter wraps (spec §4.5 `all_exhausted`, §7);
    /// the algorithm catches this internally and never surfaces it.
    /// Calling this again without [`Self::reset`] is a `StateViolation`
    /// (spec §7).
    fn advance(&mut self) -> MetaResult<()> {
        if self.exhausted {
            return Err(MetaError::StateViolation(
                "advanced scan enumeration past exhaustion without reset".to_string(),
            ));
        }
        for (index, seq) in self.indices.iter_mut().zip(&self.sequences) {
            *index += 1;
            if *index < seq.len() {
                return Ok(());
            }
            *index = 0;
        }
        self.exhausted = true;
        Err(MetaError::EndOfEnumeration)
    }
}

/// Enumeration strategy the scan drives (spec §4.5).
pub enum ScanMode {
    Grid,
    Random,
    /// Fresh random values for every parameter of every kind, within each
    /// leaf's init range, for exactly `n_items` evaluations total.
    SimpleScan { n_items: usize },
}

/// Concrete [`Algorithm`] implementation for grid/random/simple-scan runs.
pub struct ParameterScan {
    base: AlgorithmBase,
    seed: Individual,
    specs: Vec<ScanSpec>,
    mode: ScanMode,
    enumerator: Option<GridEnumerator>,
    n_monitor_inds: usize,
    monitored_best: Vec<Individual>,
    evaluations_done: usize,
    exhausted_this_run: bool,
}

impl ParameterScan {
    pub fn new(base: AlgorithmBase, seed: Individual, specs: Vec<ScanSpec>, mode: ScanMode) -> MetaResult<Self> {
        if !matches!(mode, ScanMode::SimpleScan { .. }) && specs.is_empty() {
            return Err(MetaError::InvalidConfiguration(
                "parameter scan needs at least one scan spec unless running in simple-scan mode".to_string(),
            ));
        }
        Ok(Self {
            base,
            seed,
            specs,
            mode,
            enumerator: None,
            n_monitor_inds: 10,
            monitored_best: Vec::new(),
            evaluations_done: 0,
            exhausted_this_run: false,
        })
    }

    pub fn with_n_monitor_inds(mut self, n: usize) -> Self {
        self.n_monitor_inds = n;
        self
    }

    /// The `n_monitor_inds` best individuals seen across the whole run,
    /// ranked by transformed criterion-0 fitness under the configured
    /// direction, ties broken by raw fitness (spec §4.5 "Population
    /// bookkeeping").
    pub fn monitored_best(&self) -> &[Individual] {
        &self.monitored_best
    }

    fn update_monitored_best(&mut self) {
        if self.n_monitor_inds == 0 {
            return;
        }
        let direction = self.base.direction;
        self.monitored_best.extend(self.base.population.iter().filter(|ind| ind.is_valid()).cloned());
        self.monitored_best.sort_by(|a, b| Self::rank(a, b, direction));
        self.monitored_best.truncate(self.n_monitor_inds);
    }

    fn rank(a: &Individual, b: &Individual, direction: Direction) -> Ordering {
        let (at, bt) = (
            a.transformed_fitness(0, false).unwrap_or(f64::NAN),
            b.transformed_fitness(0, false).unwrap_or(f64::NAN),
        );
        let primary = match direction {
            Direction::Minimize => at.partial_cmp(&bt),
            Direction::Maximize => bt.partial_cmp(&at),
        }
        .unwrap_or(Ordering::Equal);
        if primary != Ordering::Equal {
            return primary;
        }
        let (ar, br) = (a.raw_fitness(0).unwrap_or(f64::NAN), b.raw_fitness(0).unwrap_or(f64::NAN));
        match direction {
            Direction::Minimize => ar.partial_cmp(&br),
            Direction::Maximize => br.partial_cmp(&ar),
        }
        .unwrap_or(Ordering::Equal)
    }

    fn next_id_and_clone(&mut self) -> Individual {
        let id = self.base.id_factory.next();
        let ind = self.seed.clone_with_id(id);
        self.base
            .personality
            .set(id, PersonalityTraits::ParameterScan(ScanPersonality { scan_index: self.evaluations_done as u64 }));
        ind
    }
}

impl Algorithm for ParameterScan {
    fn base(&self) -> &AlgorithmBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AlgorithmBase {
        &mut self.base
    }

    fn adjust_population(&mut self) {
        if matches!(self.mode, ScanMode::Grid) && self.enumerator.is_none() {
            let sequences = self.specs.iter().map(materialize).collect();
            self.enumerator = Some(GridEnumerator::new(sequences));
        }
        self.base.population.clear();
    }

    fn cycle_logic(&mut self, executor: &dyn Executor) -> MetaResult<Option<(f64, f64)>> {
        self.base.population.clear();
        let batch_size = self.base.population_size.max(1);

        match self.mode {
            ScanMode::SimpleScan { n_items } => {
                let remaining = n_items.saturating_sub(self.evaluations_done).min(batch_size);
                for _ in 0..remaining {
                    let mut ind = self.next_id_and_clone();
                    let stream = ind.id.0;
                    ind.randomize(&self.base.rng_factory, stream);
                    self.base.population.push(ind);
                    self.evaluations_done += 1;
                }
            }
            ScanMode::Random => {
                for _ in 0..batch_size {
                    let mut ind = self.next_id_and_clone();
                    let mut rng = self.base.rng_factory.for_stream(ind.id.0);
                    for spec in &self.specs {
                        let value = sample_random(spec, &mut rng);
                        ind.apply_scan_value(spec, value)?;
                    }
                    self.base.population.push(ind);
                    self.evaluations_done += 1;
                }
            }
            ScanMode::Grid => {
                for _ in 0..batch_size {
                    let exhausted = self.enumerator.as_ref().expect("grid enumerator initialized by adjust_population").exhausted;
                    if exhausted {
                        break;
                    }
                    let tuple = self.enumerator.as_ref().unwrap().current();
                    let mut ind = self.next_id_and_clone();
                    for (spec, value) in self.specs.iter().zip(&tuple) {
                        ind.apply_scan_value(spec, *value)?;
                    }
                    self.base.population.push(ind);
                    self.evaluations_done += 1;
                    match self.enumerator.as_mut().unwrap().advance() {
                        Ok(()) => {}
                        Err(MetaError::EndOfEnumeration) => {
                            self.exhausted_this_run = true;
                            break;
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        if self.base.population.is_empty() {
            return Ok(None);
        }

        self.base.evaluate_population(executor);
        self.update_monitored_best();
        Ok(self.base.best_in_population())
    }

    fn custom_halt(&self) -> bool {
        match self.mode {
            ScanMode::Grid => self.exhausted_this_run,
            ScanMode::SimpleScan { n_items } => self.evaluations_done >= n_items,
            ScanMode::Random => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::HaltConfig;
    use crate::executor::SequentialExecutor;
    use crate::grammar::RefMode;
    use crate::individual::IndividualId;
    use crate::rng::RngFactory;
    use crate::tree::{Int32Leaf, ParameterLeaf, ParameterSet};
    use smallvec::SmallVec;

    fn int32_spec(pos: usize, lo: i32, hi: i32, n_steps: usize) -> ScanSpec {
        ScanSpec {
            kind: crate::activity::ValueKind::Int32,
            mode: RefMode::Position,
            name: None,
            pos,
            lo: ScanValue::Int32(lo),
            hi: ScanValue::Int32(hi),
            n_steps,
        }
    }

    fn sum_int32(ind: &Individual) -> SmallVec<[(f64, f64); 1]> {
        let xs = ind.streamline_numeric(crate::activity::ValueKind::Int32, ActivityMode::All).unwrap();
        let f = xs.iter().sum::<f64>();
        SmallVec::from_buf([(f, f)])
    }

    fn two_int32_seed() -> Individual {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Int32(Int32Leaf::new(0, 0)));
        set.push(ParameterLeaf::Int32(Int32Leaf::new(0, 0)));
        Individual::new(IndividualId(0), set)
    }

    #[test]
    fn grid_mode_visits_every_tuple_exactly_once() {
        let seed = two_int32_seed();
        let specs = vec![
            ScanSpec {
                kind: crate::activity::ValueKind::Int32,
                mode: RefMode::Position,
                name: None,
                pos: 0,
                lo: ScanValue::Int32(0),
                hi: ScanValue::Int32(1),
                n_steps: 2,
            },
            ScanSpec {
                kind: crate::activity::ValueKind::Int32,
                mode: RefMode::Position,
                name: None,
                pos: 1,
                lo: ScanValue::Int32(0),
                hi: ScanValue::Int32(2),
                n_steps: 3,
            },
        ];
        let base = AlgorithmBase::new(Direction::Minimize, 1, RngFactory::new(11))
            .with_halt(HaltConfig { max_iterations: Some(100), ..HaltConfig::default() });
        let mut scan = ParameterScan::new(base, seed, specs, ScanMode::Grid).unwrap();
        let executor = SequentialExecutor::new(sum_int32);

        scan.optimize(&executor).unwrap();

        assert_eq!(scan.evaluations_done, 6);
        assert!(scan.custom_halt());
    }

    #[test]
    fn simple_scan_mode_halts_after_exactly_n_items() {
        let seed = two_int32_seed();
        let base = AlgorithmBase::new(Direction::Minimize, 4, RngFactory::new(5))
            .with_halt(HaltConfig { max_iterations: Some(1000), ..HaltConfig::default() });
        let mut scan = ParameterScan::new(base, seed, Vec::new(), ScanMode::SimpleScan { n_items: 10 }).unwrap();
        let executor = SequentialExecutor::new(sum_int32);

        scan.optimize(&executor).unwrap();

        assert_eq!(scan.evaluations_done, 10);
    }

    #[test]
    fn random_mode_never_self_halts() {
        let seed = two_int32_seed();
        let specs = vec![int32_spec(0, 0, 5, 3)];
        let base = AlgorithmBase::new(Direction::Minimize, 2, RngFactory::new(6));
        let scan = ParameterScan::new(base, seed, specs, ScanMode::Random).unwrap();
        assert!(!scan.custom_halt());
    }

    #[test]
    fn grid_enumerator_advance_past_exhaustion_is_a_state_violation() {
        let mut enumerator = GridEnumerator::new(vec![vec![ScanValue::Bool(false), ScanValue::Bool(true)]]);
        assert!(matches!(enumerator.advance(), Err(MetaError::EndOfEnumeration)));
        assert!(matches!(enumerator.advance(), Err(MetaError::StateViolation(_))));
    }
}
