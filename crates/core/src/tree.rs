//! The parameter tree (spec §3, §4.2).
//!
//! Source-side this was a deep polymorphic hierarchy of parameter objects.
//! Per the redesign notes we replace it with tagged variants: one struct per
//! (shape, kind) pair, collected behind the [`ParameterLeaf`] enum. Bulk
//! operations on [`ParameterSet`] dispatch with a `match` instead of virtual
//! calls, which is also where the kind-specific `UnsupportedKind` trap
//! methods live (bool has no arithmetic bulk ops).

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityMode, ValueKind};
use crate::adaptor::{Adaptor, FlipAdaptor, GaussAdaptor};
use crate::error::{MetaError, MetaResult};

/// Reflective fold of a real value into `[lo, hi]` (spec §4.2).
///
/// Idempotent by construction: a value already inside the interval is
/// returned unchanged, so `transfer(transfer(v)) == transfer(v)` always
/// holds (§8 invariant 3).
pub fn transfer_double(v: f64, lo: f64, hi: f64) -> f64 {
    if lo >= hi {
        return lo;
    }
    if v >= lo && v <= hi {
        return v;
    }
    let range = hi - lo;
    let period = 2.0 * range;
    let mut m = (v - lo) % period;
    if m < 0.0 {
        m += period;
    }
    if m > range {
        m = period - m;
    }
    lo + m
}

/// Integer counterpart of [`transfer_double`]. Same reflective-fold shape,
/// same idempotence guarantee, but the interval is inclusive on both ends
/// (`hi` is itself a valid cell, not a continuous mirror point), so the
/// fold period is `2*(hi-lo)+1` rather than `2*(hi-lo)` (§4.2, §8).
pub fn transfer_int32(v: i32, lo: i32, hi: i32) -> i32 {
    if lo >= hi {
        return lo;
    }
    if v >= lo && v <= hi {
        return v;
    }
    let range = hi - lo;
    let period = 2 * range + 1;
    let mut m = (v - lo) % period;
    if m < 0 {
        m += period;
    }
    if m > range {
        m = period - m;
    }
    lo + m
}

macro_rules! scalar_leaf {
    ($name:ident, $ty:ty, $adaptor:ty, $transfer:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub label: Option<String>,
            pub value: $ty,
            pub lower_init: $ty,
            pub upper_init: $ty,
            pub bounds: Option<($ty, $ty)>,
            pub adaptions_active: bool,
            pub random_init_blocked: bool,
            /// Clear to pin this leaf against `ActiveIfModifiable` bulk ops
            /// even while `adaptions_active` is set (spec §4.1 activity mode).
            pub modifiable: bool,
            pub adaptor: $adaptor,
        }

        impl $name {
            pub fn new(lower_init: $ty, upper_init: $ty) -> Self {
                Self {
                    label: None,
                    value: lower_init,
                    lower_init,
                    upper_init,
                    bounds: None,
                    adaptions_active: true,
                    random_init_blocked: false,
                    modifiable: true,
                    adaptor: Default::default(),
                }
            }

            pub fn with_bounds(mut self, lower: $ty, upper: $ty) -> Self {
                self.bounds = Some((lower, upper));
                self
            }

            pub fn named(mut self, label: impl Into<String>) -> Self {
                self.label = Some(label.into());
                self
            }

            /// Visible (constrained) value, folded through the transfer
            /// function when bounds are set.
            pub fn visible(&self) -> $ty {
                match self.bounds {
                    Some((lo, hi)) => $transfer(self.value, lo, hi),
                    None => self.value,
                }
            }

            pub fn randomize(&mut self, rng: &mut ChaCha8Rng) {
                if self.random_init_blocked {
                    return;
                }
                self.value = rng.random_range(self.lower_init..=self.upper_init);
            }

            pub fn adapt(&mut self, rng: &mut ChaCha8Rng) {
                if !self.adaptions_active {
                    return;
                }
                self.value = self.adaptor.adapt(self.value, rng);
            }

            /// Cumulative scalar adaptations performed by this leaf's
            /// adaptor since construction; individuals diff two readings of
            /// this to get the `n_adaptions` of a single `adapt()` call
            /// (spec §3, §4.4).
            pub fn n_adaptions(&self) -> u64 {
                Adaptor::<$ty>::n_adaptions(&self.adaptor)
            }
        }
    };
}

scalar_leaf!(DoubleLeaf, f64, GaussAdaptor, transfer_double);
scalar_leaf!(FloatLeaf, f32, GaussAdaptor, transfer_float);
scalar_leaf!(Int32Leaf, i32, FlipAdaptor, transfer_int32);

fn transfer_float(v: f32, lo: f32, hi: f32) -> f32 {
    transfer_double(v as f64, lo as f64, hi as f64) as f32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoolLeaf {
    pub label: Option<String>,
    pub value: bool,
    pub random_init_blocked: bool,
    pub adaptions_active: bool,
    pub modifiable: bool,
    pub adaptor: FlipAdaptor,
}

impl BoolLeaf {
    pub fn new(initial: bool) -> Self {
        Self {
            label: None,
            value: initial,
            random_init_blocked: false,
            adaptions_active: true,
            modifiable: true,
            adaptor: FlipAdaptor::default(),
        }
    }

    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn visible(&self) -> bool {
        self.value
    }

    pub fn randomize(&mut self, rng: &mut ChaCha8Rng) {
        if self.random_init_blocked {
            return;
        }
        self.value = rng.random_bool(0.5);
    }

    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) {
        if !self.adaptions_active {
            return;
        }
        self.value = Adaptor::<bool>::adapt(&mut self.adaptor, self.value, rng);
    }

    pub fn n_adaptions(&self) -> u64 {
        Adaptor::<bool>::n_adaptions(&self.adaptor)
    }
}

macro_rules! collection_leaf {
    ($name:ident, $ty:ty, $adaptor:ty, $transfer:expr) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub label: Option<String>,
            pub values: Vec<$ty>,
            pub lower_init: $ty,
            pub upper_init: $ty,
            pub bounds: Option<($ty, $ty)>,
            pub adaptions_active: bool,
            pub random_init_blocked: bool,
            pub modifiable: bool,
            pub adaptor: $adaptor,
        }

        impl $name {
            pub fn new(size: usize, lower_init: $ty, upper_init: $ty) -> Self {
                Self {
                    label: None,
                    values: vec![lower_init; size],
                    lower_init,
                    upper_init,
                    bounds: None,
                    adaptions_active: true,
                    random_init_blocked: false,
                    modifiable: true,
                    adaptor: Default::default(),
                }
            }

            pub fn with_bounds(mut self, lower: $ty, upper: $ty) -> Self {
                self.bounds = Some((lower, upper));
                self
            }

            pub fn visible(&self) -> Vec<$ty> {
                match self.bounds {
                    Some((lo, hi)) => self.values.iter().map(|v| $transfer(*v, lo, hi)).collect(),
                    None => self.values.clone(),
                }
            }

            pub fn randomize(&mut self, rng: &mut ChaCha8Rng) {
                if self.random_init_blocked {
                    return;
                }
                for v in &mut self.values {
                    *v = rng.random_range(self.lower_init..=self.upper_init);
                }
            }

            pub fn adapt(&mut self, rng: &mut ChaCha8Rng) {
                if !self.adaptions_active {
                    return;
                }
                for v in &mut self.values {
                    *v = self.adaptor.adapt(*v, rng);
                }
            }

            pub fn n_adaptions(&self) -> u64 {
                Adaptor::<$ty>::n_adaptions(&self.adaptor)
            }
        }
    };
}

collection_leaf!(DoubleCollectionLeaf, f64, GaussAdaptor, transfer_double);
collection_leaf!(FloatCollectionLeaf, f32, GaussAdaptor, transfer_float);
collection_leaf!(Int32CollectionLeaf, i32, FlipAdaptor, transfer_int32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoolCollectionLeaf {
    pub label: Option<String>,
    pub values: Vec<bool>,
    pub random_init_blocked: bool,
    pub adaptions_active: bool,
    pub modifiable: bool,
    pub adaptor: FlipAdaptor,
}

impl BoolCollectionLeaf {
    pub fn new(size: usize) -> Self {
        Self {
            label: None,
            values: vec![false; size],
            random_init_blocked: false,
            adaptions_active: true,
            modifiable: true,
            adaptor: FlipAdaptor::default(),
        }
    }

    pub fn randomize(&mut self, rng: &mut ChaCha8Rng) {
        if self.random_init_blocked {
            return;
        }
        for v in &mut self.values {
            *v = rng.random_bool(0.5);
        }
    }

    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) {
        if !self.adaptions_active {
            return;
        }
        for v in &mut self.values {
            *v = Adaptor::<bool>::adapt(&mut self.adaptor, *v, rng);
        }
    }

    pub fn n_adaptions(&self) -> u64 {
        Adaptor::<bool>::n_adaptions(&self.adaptor)
    }
}

/// One entry of the heterogeneous tree: scalar or collection, tagged by
/// value kind. This is the "tagged variants at each level" replacement for
/// the source's virtual hierarchy (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParameterLeaf {
    Double(DoubleLeaf),
    Float(FloatLeaf),
    Int32(Int32Leaf),
    Bool(BoolLeaf),
    DoubleCollection(DoubleCollectionLeaf),
    FloatCollection(FloatCollectionLeaf),
    Int32Collection(Int32CollectionLeaf),
    BoolCollection(BoolCollectionLeaf),
}

impl ParameterLeaf {
    pub fn kind(&self) -> ValueKind {
        match self {
            ParameterLeaf::Double(_) | ParameterLeaf::DoubleCollection(_) => ValueKind::Double,
            ParameterLeaf::Float(_) | ParameterLeaf::FloatCollection(_) => ValueKind::Float,
            ParameterLeaf::Int32(_) | ParameterLeaf::Int32Collection(_) => ValueKind::Int32,
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => ValueKind::Bool,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            ParameterLeaf::Double(l) => l.label.as_deref(),
            ParameterLeaf::Float(l) => l.label.as_deref(),
            ParameterLeaf::Int32(l) => l.label.as_deref(),
            ParameterLeaf::Bool(l) => l.label.as_deref(),
            ParameterLeaf::DoubleCollection(l) => l.label.as_deref(),
            ParameterLeaf::FloatCollection(l) => l.label.as_deref(),
            ParameterLeaf::Int32Collection(l) => l.label.as_deref(),
            ParameterLeaf::BoolCollection(l) => l.label.as_deref(),
        }
    }

    pub fn adaptions_active(&self) -> bool {
        match self {
            ParameterLeaf::Double(l) => l.adaptions_active,
            ParameterLeaf::Float(l) => l.adaptions_active,
            ParameterLeaf::Int32(l) => l.adaptions_active,
            ParameterLeaf::Bool(l) => l.adaptions_active,
            ParameterLeaf::DoubleCollection(l) => l.adaptions_active,
            ParameterLeaf::FloatCollection(l) => l.adaptions_active,
            ParameterLeaf::Int32Collection(l) => l.adaptions_active,
            ParameterLeaf::BoolCollection(l) => l.adaptions_active,
        }
    }

    /// Whether `ActiveIfModifiable` should consider this leaf (spec §4.1).
    pub fn modifiable(&self) -> bool {
        match self {
            ParameterLeaf::Double(l) => l.modifiable,
            ParameterLeaf::Float(l) => l.modifiable,
            ParameterLeaf::Int32(l) => l.modifiable,
            ParameterLeaf::Bool(l) => l.modifiable,
            ParameterLeaf::DoubleCollection(l) => l.modifiable,
            ParameterLeaf::FloatCollection(l) => l.modifiable,
            ParameterLeaf::Int32Collection(l) => l.modifiable,
            ParameterLeaf::BoolCollection(l) => l.modifiable,
        }
    }

    pub fn adapt(&mut self, rng: &mut ChaCha8Rng) {
        match self {
            ParameterLeaf::Double(l) => l.adapt(rng),
            ParameterLeaf::Float(l) => l.adapt(rng),
            ParameterLeaf::Int32(l) => l.adapt(rng),
            ParameterLeaf::Bool(l) => l.adapt(rng),
            ParameterLeaf::DoubleCollection(l) => l.adapt(rng),
            ParameterLeaf::FloatCollection(l) => l.adapt(rng),
            ParameterLeaf::Int32Collection(l) => l.adapt(rng),
            ParameterLeaf::BoolCollection(l) => l.adapt(rng),
        }
    }

    pub fn randomize(&mut self, rng: &mut ChaCha8Rng) {
        match self {
            ParameterLeaf::Double(l) => l.randomize(rng),
            ParameterLeaf::Float(l) => l.randomize(rng),
            ParameterLeaf::Int32(l) => l.randomize(rng),
            ParameterLeaf::Bool(l) => l.randomize(rng),
            ParameterLeaf::DoubleCollection(l) => l.randomize(rng),
            ParameterLeaf::FloatCollection(l) => l.randomize(rng),
            ParameterLeaf::Int32Collection(l) => l.randomize(rng),
            ParameterLeaf::BoolCollection(l) => l.randomize(rng),
        }
    }

    /// Cumulative scalar-adaptation count of this leaf's adaptor.
    pub fn n_adaptions(&self) -> u64 {
        match self {
            ParameterLeaf::Double(l) => l.n_adaptions(),
            ParameterLeaf::Float(l) => l.n_adaptions(),
            ParameterLeaf::Int32(l) => l.n_adaptions(),
            ParameterLeaf::Bool(l) => l.n_adaptions(),
            ParameterLeaf::DoubleCollection(l) => l.n_adaptions(),
            ParameterLeaf::FloatCollection(l) => l.n_adaptions(),
            ParameterLeaf::Int32Collection(l) => l.n_adaptions(),
            ParameterLeaf::BoolCollection(l) => l.n_adaptions(),
        }
    }

    /// Boundaries of a numeric leaf's visible range, or `None` for `bool`
    /// (spec §4.2 `boundaries`). Collections report the same pair once;
    /// callers that need one pair per slot replicate it by `len()`.
    pub fn boundaries(&self) -> Option<(f64, f64)> {
        fn of<T: Copy + Into<f64>>(bounds: Option<(T, T)>, lower_init: T, upper_init: T) -> (f64, f64) {
            let (lo, hi) = bounds.unwrap_or((lower_init, upper_init));
            (lo.into(), hi.into())
        }
        match self {
            ParameterLeaf::Double(l) => Some(of(l.bounds, l.lower_init, l.upper_init)),
            ParameterLeaf::Float(l) => Some((
                l.bounds.map(|(lo, _)| lo).unwrap_or(l.lower_init) as f64,
                l.bounds.map(|(_, hi)| hi).unwrap_or(l.upper_init) as f64,
            )),
            ParameterLeaf::Int32(l) => Some((
                l.bounds.map(|(lo, _)| lo).unwrap_or(l.lower_init) as f64,
                l.bounds.map(|(_, hi)| hi).unwrap_or(l.upper_init) as f64,
            )),
            ParameterLeaf::DoubleCollection(l) => Some(of(l.bounds, l.lower_init, l.upper_init)),
            ParameterLeaf::FloatCollection(l) => Some((
                l.bounds.map(|(lo, _)| lo).unwrap_or(l.lower_init) as f64,
                l.bounds.map(|(_, hi)| hi).unwrap_or(l.upper_init) as f64,
            )),
            ParameterLeaf::Int32Collection(l) => Some((
                l.bounds.map(|(lo, _)| lo).unwrap_or(l.lower_init) as f64,
                l.bounds.map(|(_, hi)| hi).unwrap_or(l.upper_init) as f64,
            )),
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => None,
        }
    }

    /// Flat `f64` view of a numeric leaf's visible values, for streamlining
    /// kinds that aren't `Bool`. Collections contribute one entry per item.
    fn streamline_numeric(&self) -> Option<Vec<f64>> {
        match self {
            ParameterLeaf::Double(l) => Some(vec![l.visible()]),
            ParameterLeaf::Float(l) => Some(vec![l.visible() as f64]),
            ParameterLeaf::Int32(l) => Some(vec![l.visible() as f64]),
            ParameterLeaf::DoubleCollection(l) => Some(l.visible()),
            ParameterLeaf::FloatCollection(l) => Some(l.visible().into_iter().map(|v| v as f64).collect()),
            ParameterLeaf::Int32Collection(l) => Some(l.visible().into_iter().map(|v| v as f64).collect()),
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => None,
        }
    }

    /// Number of scalar slots this leaf occupies (1 for scalars, `len()`
    /// for collections).
    pub fn len(&self) -> usize {
        match self {
            ParameterLeaf::Double(_)
            | ParameterLeaf::Float(_)
            | ParameterLeaf::Int32(_)
            | ParameterLeaf::Bool(_) => 1,
            ParameterLeaf::DoubleCollection(l) => l.values.len(),
            ParameterLeaf::FloatCollection(l) => l.values.len(),
            ParameterLeaf::Int32Collection(l) => l.values.len(),
            ParameterLeaf::BoolCollection(l) => l.values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn assign_numeric(&mut self, values: &[f64]) -> MetaResult<()> {
        match self {
            ParameterLeaf::Double(l) => {
                l.value = values[0];
                Ok(())
            }
            ParameterLeaf::Float(l) => {
                l.value = values[0] as f32;
                Ok(())
            }
            ParameterLeaf::Int32(l) => {
                l.value = values[0].round() as i32;
                Ok(())
            }
            ParameterLeaf::DoubleCollection(l) => {
                l.values.copy_from_slice(values);
                Ok(())
            }
            ParameterLeaf::FloatCollection(l) => {
                for (dst, src) in l.values.iter_mut().zip(values) {
                    *dst = *src as f32;
                }
                Ok(())
            }
            ParameterLeaf::Int32Collection(l) => {
                for (dst, src) in l.values.iter_mut().zip(values) {
                    *dst = src.round() as i32;
                }
                Ok(())
            }
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => {
                Err(MetaError::UnsupportedKind {
                    operation: "assign_values<numeric>",
                    kind: ValueKind::Bool,
                })
            }
        }
    }

    fn streamline_bool(&self) -> Option<Vec<bool>> {
        match self {
            ParameterLeaf::Bool(l) => Some(vec![l.visible()]),
            ParameterLeaf::BoolCollection(l) => Some(l.values.clone()),
            _ => None,
        }
    }

    fn assign_bool(&mut self, values: &[bool]) -> MetaResult<()> {
        match self {
            ParameterLeaf::Bool(l) => {
                l.value = values[0];
                Ok(())
            }
            ParameterLeaf::BoolCollection(l) => {
                l.values.copy_from_slice(values);
                Ok(())
            }
            other => Err(MetaError::UnsupportedKind {
                operation: "assign_values<bool>",
                kind: other.kind(),
            }),
        }
    }

    /// `sigma` of a Gaussian-adapted leaf, by property name. Flip-adapted
    /// leaves (`Int32`, `Bool`) have no such numeric knob.
    fn adaptor_property(&self, property: &str) -> Option<f64> {
        if property != "sigma" {
            return None;
        }
        match self {
            ParameterLeaf::Double(l) => Some(l.adaptor.sigma),
            ParameterLeaf::Float(l) => Some(l.adaptor.sigma),
            ParameterLeaf::DoubleCollection(l) => Some(l.adaptor.sigma),
            ParameterLeaf::FloatCollection(l) => Some(l.adaptor.sigma),
            ParameterLeaf::Int32(_)
            | ParameterLeaf::Bool(_)
            | ParameterLeaf::Int32Collection(_)
            | ParameterLeaf::BoolCollection(_) => None,
        }
    }

    /// Write a single numeric slot (0 for a scalar leaf, an element offset
    /// for a collection leaf), leaving every other slot untouched. Used by
    /// the parameter-scan algorithm to assign one grid coordinate at a time
    /// (spec §4.5) without disturbing the rest of the tree.
    fn set_numeric_slot(&mut self, offset: usize, value: f64) -> MetaResult<()> {
        match self {
            ParameterLeaf::Double(l) => {
                l.value = value;
                Ok(())
            }
            ParameterLeaf::Float(l) => {
                l.value = value as f32;
                Ok(())
            }
            ParameterLeaf::Int32(l) => {
                l.value = value.round() as i32;
                Ok(())
            }
            ParameterLeaf::DoubleCollection(l) => {
                l.values[offset] = value;
                Ok(())
            }
            ParameterLeaf::FloatCollection(l) => {
                l.values[offset] = value as f32;
                Ok(())
            }
            ParameterLeaf::Int32Collection(l) => {
                l.values[offset] = value.round() as i32;
                Ok(())
            }
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => Err(MetaError::UnsupportedKind {
                operation: "set_numeric_slot",
                kind: ValueKind::Bool,
            }),
        }
    }

    fn set_bool_slot(&mut self, offset: usize, value: bool) -> MetaResult<()> {
        match self {
            ParameterLeaf::Bool(l) => {
                l.value = value;
                Ok(())
            }
            ParameterLeaf::BoolCollection(l) => {
                l.values[offset] = value;
                Ok(())
            }
            other => Err(MetaError::UnsupportedKind {
                operation: "set_bool_slot",
                kind: other.kind(),
            }),
        }
    }

    /// Arithmetic bulk ops are undefined for `bool` (spec §4.2).
    fn multiply_by(&mut self, factor: f64) -> MetaResult<()> {
        match self {
            ParameterLeaf::Double(l) => {
                l.value *= factor;
                Ok(())
            }
            ParameterLeaf::Float(l) => {
                l.value *= factor as f32;
                Ok(())
            }
            ParameterLeaf::Int32(l) => {
                l.value = (l.value as f64 * factor).round() as i32;
                Ok(())
            }
            ParameterLeaf::DoubleCollection(l) => {
                l.values.iter_mut().for_each(|v| *v *= factor);
                Ok(())
            }
            ParameterLeaf::FloatCollection(l) => {
                l.values.iter_mut().for_each(|v| *v *= factor as f32);
                Ok(())
            }
            ParameterLeaf::Int32Collection(l) => {
                l.values
                    .iter_mut()
                    .for_each(|v| *v = (*v as f64 * factor).round() as i32);
                Ok(())
            }
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => {
                Err(MetaError::UnsupportedKind {
                    operation: "multiply_by",
                    kind: ValueKind::Bool,
                })
            }
        }
    }

    /// Overwrite every scalar slot with a fixed constant (spec §4.2
    /// `fixed_value_init`). Undefined for `bool`, same as the other
    /// arithmetic bulk ops.
    fn fixed_value_init(&mut self, value: f64) -> MetaResult<()> {
        match self {
            ParameterLeaf::Double(l) => {
                l.value = value;
                Ok(())
            }
            ParameterLeaf::Float(l) => {
                l.value = value as f32;
                Ok(())
            }
            ParameterLeaf::Int32(l) => {
                l.value = value.round() as i32;
                Ok(())
            }
            ParameterLeaf::DoubleCollection(l) => {
                l.values.iter_mut().for_each(|v| *v = value);
                Ok(())
            }
            ParameterLeaf::FloatCollection(l) => {
                l.values.iter_mut().for_each(|v| *v = value as f32);
                Ok(())
            }
            ParameterLeaf::Int32Collection(l) => {
                l.values.iter_mut().for_each(|v| *v = value.round() as i32);
                Ok(())
            }
            ParameterLeaf::Bool(_) | ParameterLeaf::BoolCollection(_) => {
                Err(MetaError::UnsupportedKind {
                    operation: "fixed_value_init",
                    kind: ValueKind::Bool,
                })
            }
        }
    }
}

/// Bulk-operation view over a whole individual's tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    pub leaves: Vec<ParameterLeaf>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    pub fn push(&mut self, leaf: ParameterLeaf) {
        self.leaves.push(leaf);
    }

    /// Number of scalar slots of `kind` matching `mode` (spec §4.2 `count`).
    pub fn count(&self, kind: ValueKind, mode: ActivityMode) -> usize {
        self.leaves
            .iter()
            .filter(|l| l.kind() == kind && mode.matches(l.adaptions_active(), l.modifiable()))
            .map(|l| l.len())
            .sum()
    }

    pub fn adapt_all(&mut self, rng: &mut ChaCha8Rng) {
        for leaf in &mut self.leaves {
            leaf.adapt(rng);
        }
    }

    /// Sum of every leaf's cumulative adaptor call count. Individuals take
    /// the delta of two readings across a single `adapt()` to get the
    /// per-call `n_adaptions` spec §4.4 promises.
    pub fn total_adaptions(&self) -> u64 {
        self.leaves.iter().map(|l| l.n_adaptions()).sum()
    }

    /// Append lower/upper bounds of every matching leaf, in tree order
    /// (spec §4.2 `boundaries`). Collections contribute one pair per slot.
    pub fn boundaries(&self, kind: ValueKind, mode: ActivityMode, lower: &mut Vec<f64>, upper: &mut Vec<f64>) {
        for leaf in &self.leaves {
            if leaf.kind() != kind || !mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                continue;
            }
            if let Some((lo, hi)) = leaf.boundaries() {
                for _ in 0..leaf.len() {
                    lower.push(lo);
                    upper.push(hi);
                }
            }
        }
    }

    pub fn randomize_all(&mut self, rng: &mut ChaCha8Rng) {
        for leaf in &mut self.leaves {
            leaf.randomize(rng);
        }
    }

    /// Flat read of every matching numeric leaf's visible values, in tree
    /// order (spec §4.2 `streamline`).
    pub fn streamline_numeric(&self, kind: ValueKind, mode: ActivityMode) -> MetaResult<Vec<f64>> {
        if kind == ValueKind::Bool {
            return Err(MetaError::UnsupportedKind {
                operation: "streamline<numeric>",
                kind,
            });
        }
        let mut out = Vec::new();
        for leaf in &self.leaves {
            if leaf.kind() != kind || !mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                continue;
            }
            if let Some(values) = leaf.streamline_numeric() {
                out.extend(values);
            }
        }
        Ok(out)
    }

    pub fn streamline_bool(&self, mode: ActivityMode) -> Vec<bool> {
        let mut out = Vec::new();
        for leaf in &self.leaves {
            if leaf.kind() != ValueKind::Bool || !mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                continue;
            }
            if let Some(values) = leaf.streamline_bool() {
                out.extend(values);
            }
        }
        out
    }

    /// Inverse of [`Self::streamline_numeric`]: writes `values` back into
    /// matching leaves in the same order they were read.
    pub fn assign_numeric(
        &mut self,
        kind: ValueKind,
        mode: ActivityMode,
        values: &[f64],
    ) -> MetaResult<()> {
        if kind == ValueKind::Bool {
            return Err(MetaError::UnsupportedKind {
                operation: "assign_values<numeric>",
                kind,
            });
        }
        let mut cursor = 0usize;
        for leaf in &mut self.leaves {
            if leaf.kind() != kind || !mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                continue;
            }
            let n = leaf.len();
            if cursor + n > values.len() {
                return Err(MetaError::InvalidConfiguration(format!(
                    "assign_values: expected at least {} values, got {}",
                    cursor + n,
                    values.len()
                )));
            }
            leaf.assign_numeric(&values[cursor..cursor + n])?;
            cursor += n;
        }
        Ok(())
    }

    pub fn assign_bool(&mut self, mode: ActivityMode, values: &[bool]) -> MetaResult<()> {
        let mut cursor = 0usize;
        for leaf in &mut self.leaves {
            if leaf.kind() != ValueKind::Bool || !mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                continue;
            }
            let n = leaf.len();
            if cursor + n > values.len() {
                return Err(MetaError::InvalidConfiguration(format!(
                    "assign_values: expected at least {} values, got {}",
                    cursor + n,
                    values.len()
                )));
            }
            leaf.assign_bool(&values[cursor..cursor + n])?;
            cursor += n;
        }
        Ok(())
    }

    /// Named adaptor property lookup used by the adaptor-property observer
    /// (spec §4.8 "Adaptor-property logger"). Only `sigma` (Gaussian
    /// adaptors) is exposed today; unknown properties or kinds return
    /// `None` rather than erroring, since this is diagnostic/plotting data,
    /// not a core bulk operation.
    pub fn adaptor_property(&self, leaf_name: &str, property: &str) -> Option<f64> {
        self.leaves
            .iter()
            .find(|l| l.label() == Some(leaf_name))
            .and_then(|l| l.adaptor_property(property))
    }

    /// First visible scalar value of the named leaf, as `f64` (spec §4.8
    /// progress plotter: "K real parameters chosen by property string").
    /// `bool` leaves have no numeric reading and return `None`.
    pub fn visible_value(&self, leaf_name: &str) -> Option<f64> {
        let leaf = self.leaves.iter().find(|l| l.label() == Some(leaf_name))?;
        leaf.streamline_numeric()?.into_iter().next()
    }

    /// Set the `position`-th scalar slot of `kind`, in tree order, to
    /// `value` (spec §4.3 grammar mode 0 — positional reference).
    pub fn set_numeric_at_position(&mut self, kind: ValueKind, position: usize, value: f64) -> MetaResult<()> {
        let mut remaining = position;
        for leaf in &mut self.leaves {
            if leaf.kind() != kind {
                continue;
            }
            let n = leaf.len();
            if remaining < n {
                return leaf.set_numeric_slot(remaining, value);
            }
            remaining -= n;
        }
        Err(MetaError::InvalidConfiguration(format!(
            "position {position} out of range for kind {kind}"
        )))
    }

    /// Set a named leaf's scalar value, or one element of a named
    /// collection leaf when `index` is given (spec §4.3 grammar modes 1
    /// and 2).
    pub fn set_numeric_by_name(&mut self, name: &str, index: Option<usize>, value: f64) -> MetaResult<()> {
        let leaf = self
            .leaves
            .iter_mut()
            .find(|l| l.label() == Some(name))
            .ok_or_else(|| MetaError::InvalidConfiguration(format!("no parameter named {name:?}")))?;
        leaf.set_numeric_slot(index.unwrap_or(0), value)
    }

    pub fn set_bool_at_position(&mut self, position: usize, value: bool) -> MetaResult<()> {
        let mut remaining = position;
        for leaf in &mut self.leaves {
            if leaf.kind() != ValueKind::Bool {
                continue;
            }
            let n = leaf.len();
            if remaining < n {
                return leaf.set_bool_slot(remaining, value);
            }
            remaining -= n;
        }
        Err(MetaError::InvalidConfiguration(format!(
            "position {position} out of range for kind {}",
            ValueKind::Bool
        )))
    }

    pub fn set_bool_by_name(&mut self, name: &str, index: Option<usize>, value: bool) -> MetaResult<()> {
        let leaf = self
            .leaves
            .iter_mut()
            .find(|l| l.label() == Some(name))
            .ok_or_else(|| MetaError::InvalidConfiguration(format!("no parameter named {name:?}")))?;
        leaf.set_bool_slot(index.unwrap_or(0), value)
    }

    pub fn multiply_by(&mut self, kind: ValueKind, mode: ActivityMode, factor: f64) -> MetaResult<()> {
        if !kind.supports_arithmetic() {
            return Err(MetaError::UnsupportedKind {
                operation: "multiply_by",
                kind,
            });
        }
        for leaf in &mut self.leaves {
            if leaf.kind() == kind && mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                leaf.multiply_by(factor)?;
            }
        }
        Ok(())
    }

    /// Scale every matching leaf by an independent `Uniform(min, max)` draw
    /// (spec §4.2 `multiply_by_random(min, max)`).
    pub fn multiply_by_random(
        &mut self,
        kind: ValueKind,
        mode: ActivityMode,
        min: f64,
        max: f64,
        rng: &mut ChaCha8Rng,
    ) -> MetaResult<()> {
        if !kind.supports_arithmetic() {
            return Err(MetaError::UnsupportedKind {
                operation: "multiply_by_random",
                kind,
            });
        }
        for leaf in &mut self.leaves {
            if leaf.kind() == kind && mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                let factor = rng.random_range(min..max);
                leaf.multiply_by(factor)?;
            }
        }
        Ok(())
    }

    /// `multiply_by_random()` with the default `[0, 1)` range (spec §4.2).
    pub fn multiply_by_random_unit(
        &mut self,
        kind: ValueKind,
        mode: ActivityMode,
        rng: &mut ChaCha8Rng,
    ) -> MetaResult<()> {
        self.multiply_by_random(kind, mode, 0.0, 1.0, rng)
    }

    /// Overwrite every matching leaf's value with a fixed constant (spec
    /// §4.2 `fixed_value_init(c)`).
    pub fn fixed_value_init(&mut self, kind: ValueKind, mode: ActivityMode, value: f64) -> MetaResult<()> {
        if !kind.supports_arithmetic() {
            return Err(MetaError::UnsupportedKind {
                operation: "fixed_value_init",
                kind,
            });
        }
        for leaf in &mut self.leaves {
            if leaf.kind() == kind && mode.matches(leaf.adaptions_active(), leaf.modifiable()) {
                leaf.fixed_value_init(value)?;
            }
        }
        Ok(())
    }

    /// Elementwise `self += other` over matching leaves, in tree order
    /// (spec §4.2 `add(other)`). Both sets must expose the same number of
    /// matching scalar slots.
    pub fn add(&mut self, kind: ValueKind, mode: ActivityMode, other: &ParameterSet) -> MetaResult<()> {
        if !kind.supports_arithmetic() {
            return Err(MetaError::UnsupportedKind { operation: "add", kind });
        }
        let mine = self.streamline_numeric(kind, mode)?;
        let theirs = other.streamline_numeric(kind, mode)?;
        if mine.len() != theirs.len() {
            return Err(MetaError::InvalidConfiguration(format!(
                "add: mismatched slot counts ({} vs {})",
                mine.len(),
                theirs.len()
            )));
        }
        let summed: Vec<f64> = mine.iter().zip(&theirs).map(|(a, b)| a + b).collect();
        self.assign_numeric(kind, mode, &summed)
    }

    /// Elementwise `self -= other` over matching leaves, in tree order
    /// (spec §4.2 `subtract(other)`).
    pub fn subtract(&mut self, kind: ValueKind, mode: ActivityMode, other: &ParameterSet) -> MetaResult<()> {
        if !kind.supports_arithmetic() {
            return Err(MetaError::UnsupportedKind {
                operation: "subtract",
                kind,
            });
        }
        let mine = self.streamline_numeric(kind, mode)?;
        let theirs = other.streamline_numeric(kind, mode)?;
        if mine.len() != theirs.len() {
            return Err(MetaError::InvalidConfiguration(format!(
                "subtract: mismatched slot counts ({} vs {})",
                mine.len(),
                theirs.len()
            )));
        }
        let diffed: Vec<f64> = mine.iter().zip(&theirs).map(|(a, b)| a - b).collect();
        self.assign_numeric(kind, mode, &diffed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn transfer_is_idempotent_and_bounded() {
        for v in -20..=20 {
            let once = transfer_int32(v, 0, 10);
            let twice = transfer_int32(once, 0, 10);
            assert!((0..=10).contains(&once));
            assert_eq!(once, twice);
        }
        let mut v = -7.3;
        while v <= 7.3 {
            let once = transfer_double(v, -2.0, 3.0);
            let twice = transfer_double(once, -2.0, 3.0);
            assert!((-2.0..=3.0).contains(&once));
            assert!((once - twice).abs() < 1e-9);
            v += 0.37;
        }
    }

    #[test]
    fn in_range_value_is_unchanged() {
        assert_eq!(transfer_double(1.5, -2.0, 3.0), 1.5);
        assert_eq!(transfer_int32(4, 0, 10), 4);
    }

    #[test]
    fn transfer_int32_matches_worked_example() {
        assert_eq!(transfer_int32(7, 0, 4), 2);
        assert_eq!(transfer_int32(-3, 0, 4), 3);
        for v in -20..=20 {
            let once = transfer_int32(v, 0, 4);
            let twice = transfer_int32(once, 0, 4);
            assert!((0..=4).contains(&once));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn streamline_then_assign_round_trips() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(-5.0, 5.0)));
        set.push(ParameterLeaf::Double(DoubleLeaf::new(-5.0, 5.0)));
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        set.randomize_all(&mut rng);

        let flat = set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        assert_eq!(flat.len(), 2);
        set.assign_numeric(ValueKind::Double, ActivityMode::All, &flat).unwrap();
        let flat2 = set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        assert_eq!(flat, flat2);
    }

    #[test]
    fn bool_arithmetic_is_unsupported() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Bool(BoolLeaf::new(true)));
        let err = set.multiply_by(ValueKind::Bool, ActivityMode::All, 2.0).unwrap_err();
        assert!(matches!(err, MetaError::UnsupportedKind { .. }));
    }

    #[test]
    fn bulk_arithmetic_ops_trap_on_bool() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Bool(BoolLeaf::new(true)));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let other = set.clone();

        assert!(matches!(
            set.multiply_by_random(ValueKind::Bool, ActivityMode::All, 0.0, 1.0, &mut rng),
            Err(MetaError::UnsupportedKind { .. })
        ));
        assert!(matches!(
            set.multiply_by_random_unit(ValueKind::Bool, ActivityMode::All, &mut rng),
            Err(MetaError::UnsupportedKind { .. })
        ));
        assert!(matches!(
            set.fixed_value_init(ValueKind::Bool, ActivityMode::All, 1.0),
            Err(MetaError::UnsupportedKind { .. })
        ));
        assert!(matches!(
            set.add(ValueKind::Bool, ActivityMode::All, &other),
            Err(MetaError::UnsupportedKind { .. })
        ));
        assert!(matches!(
            set.subtract(ValueKind::Bool, ActivityMode::All, &other),
            Err(MetaError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn fixed_value_init_overwrites_matching_leaves() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        set.push(ParameterLeaf::DoubleCollection(DoubleCollectionLeaf::new(2, 0.0, 1.0)));
        set.fixed_value_init(ValueKind::Double, ActivityMode::All, 3.5).unwrap();
        let flat = set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        assert_eq!(flat, vec![3.5, 3.5, 3.5]);
    }

    #[test]
    fn multiply_by_random_unit_scales_within_unit_interval() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        set.fixed_value_init(ValueKind::Double, ActivityMode::All, 10.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        set.multiply_by_random_unit(ValueKind::Double, ActivityMode::All, &mut rng).unwrap();
        let flat = set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        assert!(flat[0] >= 0.0 && flat[0] <= 10.0);
    }

    #[test]
    fn add_and_subtract_are_elementwise_inverses() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        set.fixed_value_init(ValueKind::Double, ActivityMode::All, 2.0).unwrap();

        let mut delta = set.clone();
        delta.fixed_value_init(ValueKind::Double, ActivityMode::All, 0.5).unwrap();

        let mut sum = set.clone();
        sum.add(ValueKind::Double, ActivityMode::All, &delta).unwrap();
        assert_eq!(
            sum.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap(),
            vec![2.5, 2.5]
        );

        sum.subtract(ValueKind::Double, ActivityMode::All, &delta).unwrap();
        assert_eq!(
            sum.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap(),
            vec![2.0, 2.0]
        );
    }

    #[test]
    fn add_rejects_mismatched_slot_counts() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        let mut other = ParameterSet::new();
        other.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        other.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));

        let err = set.add(ValueKind::Double, ActivityMode::All, &other).unwrap_err();
        assert!(matches!(err, MetaError::InvalidConfiguration(_)));
    }

    #[test]
    fn set_numeric_at_position_touches_only_the_target_slot() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        set.push(ParameterLeaf::DoubleCollection(DoubleCollectionLeaf::new(3, 0.0, 1.0)));
        set.set_numeric_at_position(ValueKind::Double, 2, 9.5).unwrap();
        let flat = set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap();
        assert_eq!(flat, vec![0.0, 0.0, 9.5, 0.0]);
    }

    #[test]
    fn set_numeric_by_name_finds_the_labelled_leaf() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0).named("x")));
        set.set_numeric_by_name("x", None, 3.5).unwrap();
        assert_eq!(set.streamline_numeric(ValueKind::Double, ActivityMode::All).unwrap(), vec![3.5]);
        assert!(set.set_numeric_by_name("missing", None, 1.0).is_err());
    }

    #[test]
    fn never_mode_adaptor_leaves_individual_unchanged() {
        let mut leaf = DoubleLeaf::new(-1.0, 1.0);
        leaf.value = 0.25;
        leaf.adaptor.adaption_mode = crate::adaptor::AdaptionMode::Never;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..20 {
            leaf.adapt(&mut rng);
        }
        assert_eq!(leaf.value, 0.25);
    }
}
