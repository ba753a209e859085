//! JSON run-configuration schema for the `metasolve` binary (spec §12).
//!
//! A `RunConfig` names the parameters to optimize, the scan grammar string
//! that drives them, and the halt/execution knobs. It is the CLI's own
//! surface — the core crate has no opinion on configuration file shape.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use strataopt_core::individual::Direction;
use strataopt_core::scan::ScanMode;
use strataopt_core::tree::{
    BoolLeaf, DoubleLeaf, FloatLeaf, Int32Leaf, ParameterLeaf, ParameterSet,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamSpec {
    Double {
        label: String,
        lower_init: f64,
        upper_init: f64,
        #[serde(default)]
        bounds: Option<(f64, f64)>,
    },
    Float {
        label: String,
        lower_init: f32,
        upper_init: f32,
        #[serde(default)]
        bounds: Option<(f32, f32)>,
    },
    Int32 {
        label: String,
        lower_init: i32,
        upper_init: i32,
        #[serde(default)]
        bounds: Option<(i32, i32)>,
    },
    Bool { label: String },
}

/// Builds the seed individual's parameter tree in declaration order, which
/// is also the order `ScanSpec::Position` references index into.
pub fn build_parameter_set(specs: &[ParamSpec]) -> ParameterSet {
    let mut set = ParameterSet::new();
    for spec in specs {
        let leaf = match spec {
            ParamSpec::Double { label, lower_init, upper_init, bounds } => {
                let mut leaf = DoubleLeaf::new(*lower_init, *upper_init).named(label.clone());
                if let Some((lo, hi)) = bounds {
                    leaf = leaf.with_bounds(*lo, *hi);
                }
                ParameterLeaf::Double(leaf)
            }
            ParamSpec::Float { label, lower_init, upper_init, bounds } => {
                let mut leaf = FloatLeaf::new(*lower_init, *upper_init).named(label.clone());
                if let Some((lo, hi)) = bounds {
                    leaf = leaf.with_bounds(*lo, *hi);
                }
                ParameterLeaf::Float(leaf)
            }
            ParamSpec::Int32 { label, lower_init, upper_init, bounds } => {
                let mut leaf = Int32Leaf::new(*lower_init, *upper_init).named(label.clone());
                if let Some((lo, hi)) = bounds {
                    leaf = leaf.with_bounds(*lo, *hi);
                }
                ParameterLeaf::Int32(leaf)
            }
            ParamSpec::Bool { label } => {
                ParameterLeaf::Bool(BoolLeaf::new(false).named(label.clone()))
            }
        };
        set.push(leaf);
    }
    set
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScanModeConfig {
    #[default]
    Grid,
    Random,
    SimpleScan {
        n_items: usize,
    },
}

impl From<ScanModeConfig> for ScanMode {
    fn from(value: ScanModeConfig) -> Self {
        match value {
            ScanModeConfig::Grid => ScanMode::Grid,
            ScanModeConfig::Random => ScanMode::Random,
            ScanModeConfig::SimpleScan { n_items } => ScanMode::SimpleScan { n_items },
        }
    }
}

/// Mirrors [`strataopt_core::algorithm::HaltConfig`] with a plain-seconds
/// duration field, since `Duration`'s default JSON shape is a struct most
/// hand-written config files would rather not produce.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HaltConfigJson {
    #[serde(default)]
    pub max_iterations: Option<u64>,
    #[serde(default)]
    pub max_stall_count: u64,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
    #[serde(default)]
    pub checkpoint_interval: u64,
}

impl Default for HaltConfigJson {
    fn default() -> Self {
        Self {
            max_iterations: Some(1000),
            max_stall_count: 0,
            max_duration_secs: None,
            quality_threshold: None,
            checkpoint_interval: 0,
        }
    }
}

impl From<HaltConfigJson> for strataopt_core::algorithm::HaltConfig {
    fn from(value: HaltConfigJson) -> Self {
        Self {
            max_iterations: value.max_iterations,
            max_stall_count: value.max_stall_count,
            max_duration: value.max_duration_secs.map(Duration::from_secs),
            quality_threshold: value.quality_threshold,
            checkpoint_interval: value.checkpoint_interval,
        }
    }
}

fn default_n_monitor_inds() -> usize {
    1
}

fn default_n_workers() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    pub direction: Direction,
    pub population_size: usize,
    pub seed: u64,
    pub parameters: Vec<ParamSpec>,
    /// Parameter-property grammar string, e.g. `"d(0,-5,5,20)"`.
    pub scan: String,
    #[serde(default)]
    pub mode: ScanModeConfig,
    #[serde(default = "default_n_monitor_inds")]
    pub n_monitor_inds: usize,
    #[serde(default)]
    pub halt: HaltConfigJson,
    /// `0` runs the `SequentialExecutor`; any other value spins up a
    /// `ThreadPoolExecutor` with that many workers.
    #[serde(default = "default_n_workers")]
    pub n_workers: usize,
    /// Directory the observer chain writes its per-run artifacts under.
    /// Created if missing.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_parameter_set_preserves_declaration_order() {
        let specs = vec![
            ParamSpec::Double { label: "x".into(), lower_init: -1.0, upper_init: 1.0, bounds: None },
            ParamSpec::Bool { label: "flag".into() },
        ];
        let set = build_parameter_set(&specs);
        assert_eq!(set.leaves.len(), 2);
        assert_eq!(set.leaves[0].label(), Some("x"));
        assert_eq!(set.leaves[1].label(), Some("flag"));
    }

    #[test]
    fn double_bounds_are_applied_when_present() {
        let specs = vec![ParamSpec::Double {
            label: "x".into(),
            lower_init: 0.0,
            upper_init: 0.0,
            bounds: Some((-2.0, 2.0)),
        }];
        let set = build_parameter_set(&specs);
        assert_eq!(set.leaves[0].boundaries(), Some((-2.0, 2.0)));
    }

    #[test]
    fn scan_mode_config_defaults_to_grid() {
        let config: ScanModeConfig = serde_json::from_str("null").unwrap_or_default();
        assert!(matches!(config, ScanModeConfig::Grid));
    }

    #[test]
    fn halt_config_json_converts_seconds_to_duration() {
        let json = HaltConfigJson { max_duration_secs: Some(30), ..HaltConfigJson::default() };
        let halt: strataopt_core::algorithm::HaltConfig = json.into();
        assert_eq!(halt.max_duration, Some(Duration::from_secs(30)));
    }

    #[test]
    fn run_config_round_trips_through_json() {
        let raw = serde_json::json!({
            "direction": "minimize",
            "population_size": 16,
            "seed": 7,
            "parameters": [
                {"kind": "double", "label": "x", "lower_init": -5.0, "upper_init": 5.0}
            ],
            "scan": "d(0,-5,5,10)"
        });
        let config: RunConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.population_size, 16);
        assert_eq!(config.n_workers, 1);
        assert_eq!(config.n_monitor_inds, 1);
    }
}
