//! Executor interface (spec §4.7) and the two concrete implementations the
//! core ships for completeness, the way the teacher always pairs a trait
//! with at least one concrete driver (`Probe` alongside `UniformProbe`).
//!
//! The network/broker "courtier" executor spec §1 calls out is external;
//! these two are for tests, benches, and small single-machine runs.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use smallvec::SmallVec;

use crate::individual::{Individual, ProcessingTimes};
use crate::rng::RngFactory;

/// Batch of individuals dispatched together. The core never peeks inside a
/// batch between `process` calls; only the executor mutates its members.
pub type Batch = Vec<Individual>;

/// A user-supplied objective: takes the visible parameter vector by way of
/// the individual itself (so closures can use whichever streamline view
/// they need) and returns one `(raw, transformed)` pair per criterion.
pub trait FitnessFn: Send + Sync {
    fn evaluate(&self, individual: &Individual) -> SmallVec<[(f64, f64); 1]>;
}

impl<F> FitnessFn for F
where
    F: Fn(&Individual) -> SmallVec<[(f64, f64); 1]> + Send + Sync,
{
    fn evaluate(&self, individual: &Individual) -> SmallVec<[(f64, f64); 1]> {
        self(individual)
    }
}

/// Dispatches a batch of individuals for (possibly remote) evaluation (spec
/// §4.7). `process` blocks until every dirty item has been evaluated or
/// marked as errored; ordering of completion is unspecified.
pub trait Executor {
    fn process(&self, batch: &mut Batch);

    /// Count of items this executor considers processable right now
    /// (typically the dirty subset).
    fn get_n_processable(&self, batch: &Batch) -> usize {
        batch.iter().filter(|ind| ind.dirty).count()
    }
}

/// In-process, single-threaded executor: calls the fitness closure directly
/// on the calling thread. Used by tests and the parameter-scan examples
/// where spinning up a pool would just add noise.
pub struct SequentialExecutor<F: FitnessFn> {
    fitness: F,
}

impl<F: FitnessFn> SequentialExecutor<F> {
    pub fn new(fitness: F) -> Self {
        Self { fitness }
    }
}

impl<F: FitnessFn> Executor for SequentialExecutor<F> {
    fn process(&self, batch: &mut Batch) {
        for individual in batch.iter_mut() {
            if !individual.dirty {
                continue;
            }
            let start = Instant::now();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.fitness.evaluate(individual)));
            let elapsed = ProcessingTimes::from_durations(
                std::time::Duration::ZERO,
                start.elapsed(),
                std::time::Duration::ZERO,
            );
            match result {
                Ok(fitness_results) => individual.record_evaluation(fitness_results, elapsed),
                Err(_) => individual.record_error(elapsed),
            }
        }
    }
}

/// Fixed-size worker pool backed by a `crossbeam-queue` work queue, each
/// worker owning its own `ChaCha8Rng` stream (spec §5: "each thread that
/// evaluates or adapts owns a per-thread generator seeded independently").
/// Grounded on the teacher's `thread::spawn` worker pattern in its metrics
/// server bootstrap.
pub struct ThreadPoolExecutor<F: FitnessFn + 'static> {
    n_workers: usize,
    fitness: Arc<F>,
    rng_factory: RngFactory,
}

impl<F: FitnessFn + 'static> ThreadPoolExecutor<F> {
    pub fn new(n_workers: usize, fitness: F, rng_factory: RngFactory) -> Self {
        Self {
            n_workers: n_workers.max(1),
            fitness: Arc::new(fitness),
            rng_factory,
        }
    }
}

impl<F: FitnessFn + 'static> Executor for ThreadPoolExecutor<F> {
    fn process(&self, batch: &mut Batch) {
        let queue = Arc::new(SegQueue::new());
        let mut slots: Vec<Arc<Mutex<Option<Individual>>>> = Vec::with_capacity(batch.len());
        for individual in batch.drain(..) {
            let slot = Arc::new(Mutex::new(Some(individual)));
            slots.push(slot.clone());
            queue.push(slot);
        }

        std::thread::scope(|scope| {
            for worker_id in 0..self.n_workers {
                let queue = Arc::clone(&queue);
                let fitness = Arc::clone(&self.fitness);
                let mut rng = self.rng_factory.for_stream(worker_id as u64);
                scope.spawn(move || {
                    // rng is reserved for fitness closures that want jitter; keep the
                    // stream alive for the worker's lifetime even if unused today.
                    let _ = &mut rng;
                    while let Some(slot) = queue.pop() {
                        let mut guard = slot.lock().unwrap();
                        let mut individual = guard.take().expect("slot populated exactly once");
                        drop(guard);

                        if individual.dirty {
                            let start = Instant::now();
                            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                fitness.evaluate(&individual)
                            }));
                            let elapsed = ProcessingTimes::from_durations(
                                std::time::Duration::ZERO,
                                start.elapsed(),
                                std::time::Duration::ZERO,
                            );
                            match result {
                                Ok(fitness_results) => individual.record_evaluation(fitness_results, elapsed),
                                Err(_) => individual.record_error(elapsed),
                            }
                        }

                        *slot.lock().unwrap() = Some(individual);
                    }
                });
            }
        });

        for slot in slots {
            let individual = Arc::try_unwrap(slot)
                .expect("workers release their queue reference before the scope returns")
                .into_inner()
                .unwrap()
                .expect("worker always restores the individual before returning");
            batch.push(individual);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::IndividualId;
    use crate::tree::{DoubleLeaf, ParameterLeaf};
    use crate::tree::ParameterSet;
    use crate::activity::{ActivityMode, ValueKind};

    fn one_double_individual(id: u64, value: f64) -> Individual {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(-5.0, 5.0)));
        let mut ind = Individual::new(IndividualId(id), set);
        ind.assign_numeric(ValueKind::Double, ActivityMode::All, &[value]).unwrap();
        ind
    }

    fn sphere(ind: &Individual) -> SmallVec<[(f64, f64); 1]> {
        let xs = ind.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        let f = xs.iter().map(|x| x * x).sum::<f64>();
        SmallVec::from_buf([(f, f)])
    }

    #[test]
    fn sequential_executor_evaluates_all_dirty_individuals() {
        let executor = SequentialExecutor::new(sphere);
        let mut batch = vec![one_double_individual(0, 3.0), one_double_individual(1, -2.0)];
        executor.process(&mut batch);
        assert!(batch.iter().all(|i| !i.dirty && i.is_processed));
        assert_eq!(batch[0].raw_fitness(0).unwrap(), 9.0);
        assert_eq!(batch[1].raw_fitness(0).unwrap(), 4.0);
    }

    #[test]
    fn get_n_processable_counts_only_dirty_entries() {
        let executor = SequentialExecutor::new(sphere);
        let mut batch = vec![one_double_individual(0, 1.0)];
        assert_eq!(executor.get_n_processable(&batch), 1);
        executor.process(&mut batch);
        assert_eq!(executor.get_n_processable(&batch), 0);
    }

    #[test]
    fn thread_pool_executor_matches_sequential_result() {
        let rng_factory = RngFactory::new(7);
        let executor = ThreadPoolExecutor::new(4, sphere, rng_factory);
        let mut batch: Vec<Individual> = (0..16).map(|i| one_double_individual(i, i as f64 - 8.0)).collect();
        executor.process(&mut batch);
        assert_eq!(batch.len(), 16);
        for ind in &batch {
            assert!(!ind.dirty && ind.is_processed && !ind.has_errors);
        }
    }
}
