//! Personality traits: per-algorithm scratch data carried alongside an
//! individual (spec §3, §4.6, §9).
//!
//! Rather than fields bolted onto the individual itself, each algorithm
//! keeps a side table keyed by [`IndividualId`] — the redesign the spec
//! calls for in place of the source's per-individual personality subclass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::individual::IndividualId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanPersonality {
    pub scan_index: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionaryPersonality {
    pub parent_ids: Vec<IndividualId>,
    pub is_parent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmPersonality {
    pub velocity: Vec<f64>,
    pub personal_best: Option<f64>,
    pub neighborhood: Vec<IndividualId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersonalityTraits {
    ParameterScan(ScanPersonality),
    EvolutionaryAlgorithm(EvolutionaryPersonality),
    Swarm(SwarmPersonality),
}

/// Per-algorithm side table. Attached on an individual's first entry into an
/// algorithm and replaced wholesale when the individual moves to a different
/// algorithm (spec §3 lifecycle note).
#[derive(Debug, Clone, Default)]
pub struct PersonalityTable {
    by_individual: HashMap<IndividualId, PersonalityTraits>,
}

impl PersonalityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: IndividualId) -> Option<&PersonalityTraits> {
        self.by_individual.get(&id)
    }

    pub fn get_mut(&mut self, id: IndividualId) -> Option<&mut PersonalityTraits> {
        self.by_individual.get_mut(&id)
    }

    pub fn set(&mut self, id: IndividualId, traits: PersonalityTraits) {
        self.by_individual.insert(id, traits);
    }

    pub fn remove(&mut self, id: IndividualId) -> Option<PersonalityTraits> {
        self.by_individual.remove(&id)
    }

    pub fn clear(&mut self) {
        self.by_individual.clear();
    }
}
