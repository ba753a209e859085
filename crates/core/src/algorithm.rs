//! Algorithm base loop (spec §4.6).
//!
//! `IDLE -> INIT -> CYCLE -> FINALIZE -> IDLE`, implemented once as default
//! methods on the [`Algorithm`] trait rather than through a base-class
//! hierarchy — matching the workspace's existing preference for
//! composition (`Solver` holding `Box<dyn Probe>`/`Box<dyn Classify>`
//! fields) over virtual inheritance chains. Concrete algorithms own an
//! [`AlgorithmBase`] field and implement three hooks: `adjust_population`,
//! `cycle_logic`, `custom_halt`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::MetaResult;
use crate::executor::{Batch, Executor};
use crate::individual::{Direction, Individual, IndividualIdFactory};
use crate::observer::{AlgorithmSnapshot, InfoMode, Observer};
use crate::personality::PersonalityTable;
use crate::rng::RngFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Init,
    Cycle,
    Finalize,
}

/// Halt conditions, OR-combined (spec §4.6). `0`/`None` disables a
/// condition, matching the spec's "ignored if 0"/"ignored if zero-valued"
/// wording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltConfig {
    pub max_iterations: Option<u64>,
    pub max_stall_count: u64,
    pub max_duration: Option<Duration>,
    pub quality_threshold: Option<f64>,
    /// `0` disables checkpointing.
    pub checkpoint_interval: u64,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            max_iterations: Some(1000),
            max_stall_count: 0,
            max_duration: None,
            quality_threshold: None,
            checkpoint_interval: 0,
        }
    }
}

/// Checkpoint state the core round-trips through a sink/source pair (spec
/// §6, §8 invariant 8 — resuming reaches the same best-known fitness). The
/// core does not prescribe a byte layout beyond this struct's `serde_json`
/// encoding (DESIGN.md Open Question resolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub iteration: u64,
    pub stall_count: u64,
    pub best_known: Option<(f64, f64)>,
    pub population: Vec<Individual>,
}

pub trait CheckpointSink {
    fn write(&mut self, state: &[u8]) -> MetaResult<()>;
}

pub trait CheckpointSource {
    fn read(&mut self) -> MetaResult<Vec<u8>>;
}

/// Shared state every concrete algorithm carries: population, halt/stall
/// bookkeeping, observer chain, personality side table, and the RNG/id
/// factories individuals are minted from.
pub struct AlgorithmBase {
    pub direction: Direction,
    pub population: Vec<Individual>,
    pub population_size: usize,
    pub phase: Phase,
    pub iteration: u64,
    pub stall_count: u64,
    pub best_known: Option<(f64, f64)>,
    pub halt: HaltConfig,
    pub cancel: Arc<AtomicBool>,
    pub observers: Vec<Box<dyn Observer>>,
    pub personality: PersonalityTable,
    pub id_factory: IndividualIdFactory,
    pub rng_factory: RngFactory,
    pub start_time: Option<Instant>,
    pub checkpoint_sink: Option<Box<dyn CheckpointSink>>,
}

impl AlgorithmBase {
    pub fn new(direction: Direction, population_size: usize, rng_factory: RngFactory) -> Self {
        Self {
            direction,
            population: Vec::new(),
            population_size,
            phase: Phase::Idle,
            iteration: 0,
            stall_count: 0,
            best_known: None,
            halt: HaltConfig::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            observers: Vec::new(),
            personality: PersonalityTable::new(),
            id_factory: IndividualIdFactory::new(),
            rng_factory,
            start_time: None,
            checkpoint_sink: None,
        }
    }

    pub fn with_halt(mut self, halt: HaltConfig) -> Self {
        self.halt = halt;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// A cooperative cancel handle callers can flip from another thread
    /// between iterations (spec §4.6 "Cancellation", §5).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Best `(raw, transformed)` of criterion 0 across currently valid
    /// (not dirty, not errored) individuals in the population, direction
    /// aware. Concrete algorithms typically call this at the end of their
    /// `cycle_logic` to build the return value spec §4.6 step 2 expects.
    pub fn best_in_population(&self) -> Option<(f64, f64)> {
        self.population
            .iter()
            .filter(|ind| ind.is_valid())
            .filter_map(|ind| {
                let raw = ind.raw_fitness(0).ok()?;
                let transformed = ind.transformed_fitness(0, false).ok()?;
                Some((raw, transformed))
            })
            .fold(None, |acc, (raw, transformed)| match acc {
                None => Some((raw, transformed)),
                Some((best_raw, best_transformed)) => {
                    if self.direction.improves(transformed, best_transformed) {
                        Some((raw, transformed))
                    } else {
                        Some((best_raw, best_transformed))
                    }
                }
            })
    }

    /// Dispatch the dirty subset of the population to `executor` and block
    /// until it returns (spec §5: "adapt -> executor.process -> select -> observers").
    pub fn evaluate_population(&mut self, executor: &dyn Executor) {
        executor.process(&mut self.population);
    }

    fn checkpoint(&mut self) -> MetaResult<()> {
        if let Some(sink) = self.checkpoint_sink.as_mut() {
            let state = CheckpointState {
                iteration: self.iteration,
                stall_count: self.stall_count,
                best_known: self.best_known,
                population: self.population.clone(),
            };
            let bytes = serde_json::to_vec(&state)
                .map_err(|e| crate::error::MetaError::ResourceError(e.to_string()))?;
            sink.write(&bytes)?;
        }
        Ok(())
    }
}

/// Hooks and loop shared by every concrete algorithm. Default methods here
/// implement the state machine; `adjust_population`/`cycle_logic` are the
/// algorithm-specific seams.
pub trait Algorithm {
    fn base(&self) -> &AlgorithmBase;
    fn base_mut(&mut self) -> &mut AlgorithmBase;

    /// Allocate/seed the initial population (spec §4.6 step 1).
    fn adjust_population(&mut self);

    /// One iteration's algorithm-specific work, including dispatching to
    /// the executor. Returns the cycle's `(best_raw, best_transformed)` for
    /// criterion 0, or `None` if nothing was evaluated this cycle.
    fn cycle_logic(&mut self, executor: &dyn Executor) -> MetaResult<Option<(f64, f64)>>;

    /// Algorithm-specific halt condition, OR-combined with the base set
    /// (spec §4.6). Most algorithms never halt on their own.
    fn custom_halt(&self) -> bool {
        false
    }

    fn notify(&mut self, mode: InfoMode) {
        let mut observers = std::mem::take(&mut self.base_mut().observers);
        {
            let base = self.base();
            let snapshot = AlgorithmSnapshot {
                iteration: base.iteration,
                population: &base.population,
                best_known_raw: base.best_known.map(|(r, _)| r).unwrap_or_else(|| base.direction.worst()),
                best_known_transformed: base
                    .best_known
                    .map(|(_, t)| t)
                    .unwrap_or_else(|| base.direction.worst()),
                direction: base.direction,
                stall_count: base.stall_count,
                elapsed: base.start_time.map(|t| t.elapsed()).unwrap_or_default(),
            };
            for observer in observers.iter_mut() {
                observer.information(mode, &snapshot);
            }
        }
        self.base_mut().observers = observers;
    }

    fn should_halt(&self) -> bool {
        let base = self.base();
        if let Some(max_iter) = base.halt.max_iterations {
            if base.iteration >= max_iter {
                return true;
            }
        }
        if base.halt.max_stall_count > 0 && base.stall_count >= base.halt.max_stall_count {
            return true;
        }
        if let Some(max_dur) = base.halt.max_duration {
            if !max_dur.is_zero() {
                if let Some(start) = base.start_time {
                    if start.elapsed() >= max_dur {
                        return true;
                    }
                }
            }
        }
        if let Some(threshold) = base.halt.quality_threshold {
            if let Some((_, best_transformed)) = base.best_known {
                if base.direction.at_least_as_good(best_transformed, threshold) {
                    return true;
                }
            }
        }
        self.custom_halt()
    }

    /// Run a full `optimize()` call through the state machine (spec §4.6).
    fn optimize(&mut self, executor: &dyn Executor) -> MetaResult<()> {
        self.base_mut().phase = Phase::Init;
        self.base_mut().start_time = Some(Instant::now());
        self.adjust_population();
        self.notify(InfoMode::Init);

        self.base_mut().phase = Phase::Cycle;
        loop {
            if self.base().cancel.load(Ordering::Relaxed) {
                break;
            }

            let outcome = self.cycle_logic(executor)?;
            {
                let base = self.base_mut();
                base.iteration += 1;
                if let Some((raw, transformed)) = outcome {
                    let improved = match base.best_known {
                        None => true,
                        Some((_, best_transformed)) => base.direction.improves(transformed, best_transformed),
                    };
                    if improved {
                        base.best_known = Some((raw, transformed));
                        base.stall_count = 0;
                    } else {
                        base.stall_count += 1;
                    }
                }
                if base.halt.checkpoint_interval > 0 && base.iteration % base.halt.checkpoint_interval == 0 {
                    base.checkpoint()?;
                }
            }

            self.notify(InfoMode::Processing);

            if self.should_halt() {
                break;
            }
        }

        self.base_mut().phase = Phase::Finalize;
        self.notify(InfoMode::End);
        self.base_mut().phase = Phase::Idle;
        Ok(())
    }

    /// Return the algorithm to its pre-`optimize()` configuration: zeroes
    /// iteration/stall/best-known, clears the personality table, and
    /// re-seeds the population — configuration options (halt, observers,
    /// population size) are left untouched (spec §4.6).
    fn reset_to_optimization_start(&mut self) {
        {
            let base = self.base_mut();
            base.iteration = 0;
            base.stall_count = 0;
            base.best_known = None;
            base.population.clear();
            base.personality.clear();
            base.phase = Phase::Idle;
        }
        self.adjust_population();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityMode, ValueKind};
    use crate::executor::SequentialExecutor;
    use crate::individual::{Individual, IndividualId};
    use crate::tree::{DoubleLeaf, ParameterLeaf, ParameterSet};
    use smallvec::SmallVec;

    /// Minimal concrete algorithm used only to exercise the base loop: each
    /// cycle evaluates a single fixed individual against the sphere
    /// function and never improves, so stall-based halting is testable.
    struct FixedPointAlgorithm {
        base: AlgorithmBase,
        value: f64,
    }

    impl Algorithm for FixedPointAlgorithm {
        fn base(&self) -> &AlgorithmBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut AlgorithmBase {
            &mut self.base
        }
        fn adjust_population(&mut self) {
            let mut set = ParameterSet::new();
            set.push(ParameterLeaf::Double(DoubleLeaf::new(-5.0, 5.0)));
            let id = self.base.id_factory.next();
            let mut ind = Individual::new(id, set);
            ind.assign_numeric(ValueKind::Double, ActivityMode::All, &[self.value]).unwrap();
            self.base.population = vec![ind];
        }
        fn cycle_logic(&mut self, executor: &dyn Executor) -> MetaResult<Option<(f64, f64)>> {
            for ind in &mut self.base.population {
                ind.dirty = true;
            }
            self.base.evaluate_population(executor);
            Ok(self.base.best_in_population())
        }
    }

    fn sphere(ind: &Individual) -> SmallVec<[(f64, f64); 1]> {
        let xs = ind.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        let f = xs.iter().map(|x| x * x).sum::<f64>();
        SmallVec::from_buf([(f, f)])
    }

    #[test]
    fn optimize_halts_on_max_iterations() {
        let rng_factory = RngFactory::new(1);
        let mut algo = FixedPointAlgorithm {
            base: AlgorithmBase::new(Direction::Minimize, 1, rng_factory)
                .with_halt(HaltConfig { max_iterations: Some(5), ..HaltConfig::default() }),
            value: 3.0,
        };
        let executor = SequentialExecutor::new(sphere);
        algo.optimize(&executor).unwrap();
        assert_eq!(algo.base.iteration, 5);
        assert_eq!(algo.base.best_known.unwrap().1, 9.0);
    }

    #[test]
    fn optimize_halts_on_stall_count() {
        let rng_factory = RngFactory::new(2);
        let mut algo = FixedPointAlgorithm {
            base: AlgorithmBase::new(Direction::Minimize, 1, rng_factory).with_halt(HaltConfig {
                max_iterations: Some(1000),
                max_stall_count: 3,
                ..HaltConfig::default()
            }),
            value: 1.0,
        };
        let executor = SequentialExecutor::new(sphere);
        algo.optimize(&executor).unwrap();
        // first iteration sets best_known (improvement from None); next 3 stall.
        assert_eq!(algo.base.stall_count, 3);
    }

    #[test]
    fn reset_to_optimization_start_zeroes_counters() {
        let rng_factory = RngFactory::new(3);
        let mut algo = FixedPointAlgorithm {
            base: AlgorithmBase::new(Direction::Minimize, 1, rng_factory)
                .with_halt(HaltConfig { max_iterations: Some(4), ..HaltConfig::default() }),
            value: 2.0,
        };
        let executor = SequentialExecutor::new(sphere);
        algo.optimize(&executor).unwrap();
        assert_eq!(algo.base.iteration, 4);
        algo.reset_to_optimization_start();
        assert_eq!(algo.base.iteration, 0);
        assert_eq!(algo.base.stall_count, 0);
        assert!(algo.base.best_known.is_none());
    }

    #[test]
    fn cancel_handle_stops_the_loop_early() {
        let rng_factory = RngFactory::new(4);
        let mut algo = FixedPointAlgorithm {
            base: AlgorithmBase::new(Direction::Minimize, 1, rng_factory)
                .with_halt(HaltConfig { max_iterations: Some(1000), ..HaltConfig::default() }),
            value: 0.5,
        };
        let cancel = algo.base.cancel_handle();
        cancel.store(true, Ordering::Relaxed);
        let executor = SequentialExecutor::new(sphere);
        algo.optimize(&executor).unwrap();
        assert_eq!(algo.base.iteration, 0);
    }
}
