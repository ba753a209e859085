//! The individual: owns a parameter tree, its fitness vector, and the
//! dirty/processed/error flags an executor and an algorithm coordinate
//! through (spec §3, §4.4).
//!
//! Source-side this was `GParameterSet`; the redesign keeps its fields but
//! drops the personality-trait fields onto a side table (see
//! [`crate::personality`]) rather than storing algorithm-specific data on
//! the individual itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::activity::{ActivityMode, ValueKind};
use crate::error::{MetaError, MetaResult};
use crate::grammar::{RefMode, ScanSpec, ScanValue};
use crate::rng::RngFactory;
use crate::tree::ParameterSet;

/// Opaque identity used to key an algorithm's personality-trait side table.
/// Stable across clones that originate from the same ancestor but distinct
/// per individual: `clone_individual` always mints a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndividualId(pub u64);

/// Monotonic counter backing [`IndividualId`] allocation, one per run.
#[derive(Debug, Default)]
pub struct IndividualIdFactory {
    next: u64,
}

impl IndividualIdFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> IndividualId {
        let id = IndividualId(self.next);
        self.next += 1;
        id
    }
}

/// Optimization direction. Fitness comparisons and `is_good_enough` are
/// direction-aware throughout (spec §4.4, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// True if `candidate` is a strict improvement over `incumbent` under
    /// this direction.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Minimize => candidate < incumbent,
            Direction::Maximize => candidate > incumbent,
        }
    }

    /// True if `candidate` is at least as good as `incumbent`.
    pub fn at_least_as_good(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Minimize => candidate <= incumbent,
            Direction::Maximize => candidate >= incumbent,
        }
    }

    /// Worst possible fitness value under this direction, used to seed
    /// best-known trackers before any individual has been evaluated.
    pub fn worst(self) -> f64 {
        match self {
            Direction::Minimize => f64::INFINITY,
            Direction::Maximize => f64::NEG_INFINITY,
        }
    }
}

/// `(pre, main, post)` processing-time triple in seconds (spec §3, §4.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessingTimes {
    pub pre: f64,
    pub main: f64,
    pub post: f64,
}

impl ProcessingTimes {
    pub fn from_durations(pre: Duration, main: Duration, post: Duration) -> Self {
        Self {
            pre: pre.as_secs_f64(),
            main: main.as_secs_f64(),
            post: post.as_secs_f64(),
        }
    }
}

/// One candidate solution: a named parameter tree plus the bookkeeping
/// fields the algorithm base and the executor coordinate through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: IndividualId,
    pub name: Option<String>,
    pub parameters: ParameterSet,
    /// `(raw, transformed)` per criterion; index 0 is primary (spec §3).
    pub fitness_results: SmallVec<[(f64, f64); 1]>,
    pub dirty: bool,
    pub has_errors: bool,
    pub is_processed: bool,
    pub n_adaptions: u64,
    pub processing_times: ProcessingTimes,
    pub assigned_iteration: u64,
    /// Running total of adaptor calls, used to diff against after `adapt()`
    /// to populate `n_adaptions` (spec §4.4 `get_n_adaptions`).
    #[serde(skip)]
    adaption_baseline: u64,
}

impl Individual {
    pub fn new(id: IndividualId, parameters: ParameterSet) -> Self {
        Self {
            id,
            name: None,
            parameters,
            fitness_results: SmallVec::new(),
            dirty: true,
            has_errors: false,
            is_processed: false,
            n_adaptions: 0,
            processing_times: ProcessingTimes::default(),
            assigned_iteration: 0,
            adaption_baseline: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Deep clone under a fresh identity — the algorithm base's per-cycle
    /// population copy (spec §3 lifecycle: "individuals are cloned by the
    /// algorithm each generation").
    pub fn clone_with_id(&self, new_id: IndividualId) -> Self {
        let mut clone = self.clone();
        clone.id = new_id;
        clone
    }

    /// Run every adaptor in the tree, mark the individual dirty, and return
    /// the number of scalar adaptations actually applied this call (spec
    /// §4.4 `adapt()`).
    pub fn adapt(&mut self, rng_factory: &RngFactory, stream_id: u64) -> u64 {
        let mut rng = rng_factory.for_stream(stream_id);
        let before = self.parameters.total_adaptions();
        self.parameters.adapt_all(&mut rng);
        let after = self.parameters.total_adaptions();
        self.n_adaptions = after - before;
        self.dirty = true;
        self.is_processed = false;
        self.n_adaptions
    }

    pub fn randomize(&mut self, rng_factory: &RngFactory, stream_id: u64) {
        let mut rng = rng_factory.for_stream(stream_id);
        self.parameters.randomize_all(&mut rng);
        self.dirty = true;
        self.is_processed = false;
    }

    /// Bulk export of matching numeric leaves (spec §4.4 `streamline<T>`).
    pub fn streamline_numeric(&self, kind: ValueKind, mode: ActivityMode) -> MetaResult<Vec<f64>> {
        self.parameters.streamline_numeric(kind, mode)
    }

    pub fn streamline_bool(&self, mode: ActivityMode) -> Vec<bool> {
        self.parameters.streamline_bool(mode)
    }

    /// Bulk import of matching numeric leaves. Marks the individual dirty —
    /// any external write to the tree invalidates the current fitness (spec
    /// §4.4 `assign_values<T>`).
    pub fn assign_numeric(&mut self, kind: ValueKind, mode: ActivityMode, values: &[f64]) -> MetaResult<()> {
        self.parameters.assign_numeric(kind, mode, values)?;
        self.dirty = true;
        self.is_processed = false;
        Ok(())
    }

    pub fn assign_bool(&mut self, mode: ActivityMode, values: &[bool]) -> MetaResult<()> {
        self.parameters.assign_bool(mode, values)?;
        self.dirty = true;
        self.is_processed = false;
        Ok(())
    }

    /// Record an evaluation outcome. Called by an `Executor` implementation
    /// once it has run the user fitness function; never called directly by
    /// algorithm logic (spec §4.7).
    pub fn record_evaluation(&mut self, fitness_results: SmallVec<[(f64, f64); 1]>, times: ProcessingTimes) {
        self.fitness_results = fitness_results;
        self.processing_times = times;
        self.dirty = false;
        self.is_processed = true;
        self.has_errors = false;
    }

    pub fn record_error(&mut self, times: ProcessingTimes) {
        self.processing_times = times;
        self.is_processed = true;
        self.has_errors = true;
    }

    /// Raw fitness of criterion `i`. Unlike `transformed_fitness`, raw
    /// values are defined even while dirty — only the transformed view
    /// requires a fresh evaluation (spec §7 `StateViolation`).
    pub fn raw_fitness(&self, i: usize) -> MetaResult<f64> {
        self.fitness_results
            .get(i)
            .map(|(raw, _)| *raw)
            .ok_or_else(|| MetaError::StateViolation(format!("no fitness result at index {i}")))
    }

    /// Transformed fitness of criterion `i`. Reading this on a dirty
    /// individual is a `StateViolation` (spec §3, §7, §8 invariant 7) unless
    /// `allow_dirty` is set, which models the "prevent-reevaluation
    /// directive" spec §4.4 mentions.
    pub fn transformed_fitness(&self, i: usize, allow_dirty: bool) -> MetaResult<f64> {
        if self.dirty && !allow_dirty {
            return Err(MetaError::StateViolation(
                "cannot read transformed fitness of a dirty individual".to_string(),
            ));
        }
        self.fitness_results
            .get(i)
            .map(|(_, transformed)| *transformed)
            .ok_or_else(|| MetaError::StateViolation(format!("no fitness result at index {i}")))
    }

    pub fn is_valid(&self) -> bool {
        !self.dirty && self.is_processed && !self.has_errors
    }

    /// True iff every provided bound is met by the matching criterion,
    /// direction-aware (spec §4.4).
    pub fn is_good_enough(&self, bounds: &[f64], direction: Direction) -> bool {
        if self.dirty || self.has_errors {
            return false;
        }
        bounds.iter().enumerate().all(|(i, bound)| {
            self.fitness_results
                .get(i)
                .is_some_and(|(_, transformed)| direction.at_least_as_good(*transformed, *bound))
        })
    }

    pub fn get_processing_times(&self) -> ProcessingTimes {
        self.processing_times
    }

    pub fn get_n_adaptions(&self) -> u64 {
        self.n_adaptions
    }

    /// Named adaptor property lookup (spec §4.8 adaptor-property logger).
    pub fn adaptor_property(&self, leaf_name: &str, property: &str) -> Option<f64> {
        self.parameters.adaptor_property(leaf_name, property)
    }

    /// First visible scalar value of a named leaf (spec §4.8 progress
    /// plotter).
    pub fn parameter_value(&self, leaf_name: &str) -> Option<f64> {
        self.parameters.visible_value(leaf_name)
    }

    /// Assign one coordinate of a scan tuple, resolving `spec`'s reference
    /// mode (position/indexed/name) and marking the individual dirty (spec
    /// §4.3, §4.5).
    pub fn apply_scan_value(&mut self, spec: &ScanSpec, value: ScanValue) -> MetaResult<()> {
        let name = || spec.name.as_deref().unwrap_or_default();
        match (&spec.mode, value) {
            (RefMode::Position, ScanValue::Double(v)) => {
                self.parameters.set_numeric_at_position(ValueKind::Double, spec.pos, v)?
            }
            (RefMode::Position, ScanValue::Float(v)) => {
                self.parameters.set_numeric_at_position(ValueKind::Float, spec.pos, v as f64)?
            }
            (RefMode::Position, ScanValue::Int32(v)) => {
                self.parameters.set_numeric_at_position(ValueKind::Int32, spec.pos, v as f64)?
            }
            (RefMode::Position, ScanValue::Bool(v)) => self.parameters.set_bool_at_position(spec.pos, v)?,
            (RefMode::Name, ScanValue::Double(v)) => self.parameters.set_numeric_by_name(name(), None, v)?,
            (RefMode::Name, ScanValue::Float(v)) => self.parameters.set_numeric_by_name(name(), None, v as f64)?,
            (RefMode::Name, ScanValue::Int32(v)) => self.parameters.set_numeric_by_name(name(), None, v as f64)?,
            (RefMode::Name, ScanValue::Bool(v)) => self.parameters.set_bool_by_name(name(), None, v)?,
            (RefMode::Indexed, ScanValue::Double(v)) => {
                self.parameters.set_numeric_by_name(name(), Some(spec.pos), v)?
            }
            (RefMode::Indexed, ScanValue::Float(v)) => {
                self.parameters.set_numeric_by_name(name(), Some(spec.pos), v as f64)?
            }
            (RefMode::Indexed, ScanValue::Int32(v)) => {
                self.parameters.set_numeric_by_name(name(), Some(spec.pos), v as f64)?
            }
            (RefMode::Indexed, ScanValue::Bool(v)) => self.parameters.set_bool_by_name(name(), Some(spec.pos), v)?,
        }
        self.dirty = true;
        self.is_processed = false;
        Ok(())
    }

    /// Produce one CSV text line for this individual (spec §4.4 `to_csv`,
    /// §6 field ordering: all doubles, all floats, all int32s, all bools,
    /// then each fitness criterion, then an optional validity flag).
    pub fn to_csv(&self, with_names: bool, with_commas: bool, use_raw: bool, with_validity: bool) -> String {
        let sep = if with_commas { "," } else { " " };
        let line = self.csv_fields(use_raw, with_validity).join(sep);
        if with_names {
            format!("{}\n{line}", self.csv_header_fields(with_validity).join(sep))
        } else {
            line
        }
    }

    /// Raw, unjoined field values in `to_csv`'s field order — used by
    /// loggers that write through a real CSV writer instead of building a
    /// delimited string by hand.
    pub(crate) fn csv_fields(&self, use_raw: bool, with_validity: bool) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();

        for kind in [ValueKind::Double, ValueKind::Float, ValueKind::Int32] {
            if let Ok(values) = self.parameters.streamline_numeric(kind, ActivityMode::All) {
                fields.extend(values.iter().map(|v| format!("{v}")));
            }
        }
        for b in self.parameters.streamline_bool(ActivityMode::All) {
            fields.push(if b { "1".to_string() } else { "0".to_string() });
        }
        for (raw, transformed) in &self.fitness_results {
            fields.push(format!("{}", if use_raw { *raw } else { *transformed }));
        }
        if with_validity {
            fields.push(if self.is_valid() { "1".to_string() } else { "0".to_string() });
        }
        fields
    }

    pub(crate) fn csv_header_fields(&self, with_validity: bool) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for kind in [ValueKind::Double, ValueKind::Float, ValueKind::Int32, ValueKind::Bool] {
            let count = self.parameters.count(kind, ActivityMode::All);
            for i in 0..count {
                names.push(format!("{kind}:{i}"));
            }
        }
        for i in 0..self.fitness_results.len() {
            names.push(format!("fitness:{i}"));
        }
        if with_validity {
            names.push("valid".to_string());
        }
        names
    }
}
