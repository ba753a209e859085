#![allow(clippy::disallowed_types)]

mod config;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use smallvec::SmallVec;
use tiny_http::{Response, Server};

use strataopt_core::algorithm::{Algorithm, AlgorithmBase};
use strataopt_core::executor::{Executor, SequentialExecutor, ThreadPoolExecutor};
use strataopt_core::grammar::parse_property_string;
use strataopt_core::individual::Individual;
use strataopt_core::observer::{AllSolutionsLogger, CollectiveMonitor, ProcessingTimesLogger, StandardMonitor};
use strataopt_core::rng::RngFactory;
use strataopt_core::scan::ParameterScan;

use config::{build_parameter_set, RunConfig};

#[derive(Parser)]
#[command(name = "metasolve", version, about = "Parallel metaheuristic optimization engine")]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    metrics_addr: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a parameter scan to completion and print the best individual found.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        script: PathBuf,
    },
    /// Load and sanity-check a run configuration without executing it.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Alias for `run` kept distinct so a config can be scanned without a
    /// fitness script, reporting the scan's shape (enumerated point count)
    /// instead of evaluating it.
    Scan {
        #[arg(long)]
        config: PathBuf,
    },
}

struct Metrics {
    registry: Registry,
    iterations_total: IntCounter,
    evaluations_total: IntCounter,
    best_known_transformed: IntGauge,
    eval_seconds: Histogram,
}

impl Metrics {
    fn init(addr: Option<&str>) -> Result<Arc<Self>> {
        let registry = Registry::new();
        let iterations_total = IntCounter::new("metasolve_iterations_total", "Completed algorithm iterations")
            .into_diagnostic()?;
        let evaluations_total = IntCounter::new("metasolve_evaluations_total", "Fitness evaluations performed")
            .into_diagnostic()?;
        // Scaled by 1000 and stored as an integer gauge since `prometheus`'s
        // `IntGauge` has no floating-point counterpart in this crate's stack.
        let best_known_transformed = IntGauge::new(
            "metasolve_best_known_transformed_milli",
            "Best known transformed fitness, criterion 0, times 1000",
        )
        .into_diagnostic()?;
        let eval_seconds = Histogram::with_opts(HistogramOpts::new(
            "metasolve_eval_seconds",
            "Fitness-script evaluation latency in seconds",
        ))
        .into_diagnostic()?;

        registry.register(Box::new(iterations_total.clone())).into_diagnostic()?;
        registry.register(Box::new(evaluations_total.clone())).into_diagnostic()?;
        registry.register(Box::new(best_known_transformed.clone())).into_diagnostic()?;
        registry.register(Box::new(eval_seconds.clone())).into_diagnostic()?;

        let metrics = Arc::new(Self {
            registry,
            iterations_total,
            evaluations_total,
            best_known_transformed,
            eval_seconds,
        });

        if let Some(addr) = addr {
            let registry = metrics.registry.clone();
            let addr = addr.to_string();
            thread::spawn(move || start_metrics_server(&addr, &registry));
        }

        Ok(metrics)
    }

    fn record_iteration(&self) {
        self.iterations_total.inc();
    }

    fn record_evaluation(&self, seconds: f64) {
        self.evaluations_total.inc();
        self.eval_seconds.observe(seconds);
    }

    fn set_best_known_transformed(&self, value: f64) {
        self.best_known_transformed.set((value * 1000.0) as i64);
    }
}

fn start_metrics_server(addr: &str, registry: &Registry) {
    let server = match Server::http(addr) {
        Ok(server) => server,
        Err(_) => return,
    };
    for request in server.incoming_requests() {
        let encoder = TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_ok() {
            let response = Response::from_data(buffer);
            let _ = request.respond(response);
        }
    }
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level)?;
    let metrics = Metrics::init(cli.metrics_addr.as_deref())?;

    match cli.command {
        Commands::Run { config, script } => run_command(&config, &script, &metrics),
        Commands::Validate { config } => validate_command(&config),
        Commands::Scan { config } => scan_command(&config),
    }
}

fn run_command(config_path: &Path, script: &Path, metrics: &Arc<Metrics>) -> Result<()> {
    tracing::info!(command = "run", config = %config_path.display());
    let config = load_config(config_path)?;

    let specs = parse_property_string(&config.scan)
        .map_err(|e| miette::miette!("{e}"))
        .with_context(|| format!("Failed to parse scan grammar '{}'", config.scan))?;

    let parameter_set = build_parameter_set(&config.parameters);
    let seed = Individual::new(strataopt_core::individual::IndividualId(0), parameter_set);

    let output_dir = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("metasolve-out"));
    fs::create_dir_all(&output_dir)
        .into_diagnostic()
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let mut monitor = CollectiveMonitor::new();
    monitor.push(Box::new(StandardMonitor));
    monitor.push(Box::new(AllSolutionsLogger::new(output_dir.join("all_solutions.csv"))));
    let histogram_dir = output_dir.join("histograms");
    fs::create_dir_all(&histogram_dir).into_diagnostic()?;
    monitor.push(Box::new(ProcessingTimesLogger::new(
        output_dir.join("processing_times.csv"),
        histogram_dir,
    )));

    let mut base = AlgorithmBase::new(config.direction, config.population_size, RngFactory::new(config.seed))
        .with_halt(config.halt.clone().into());
    base.add_observer(Box::new(monitor));

    let mut scan = ParameterScan::new(base, seed, specs, config.mode.clone().into())
        .into_diagnostic()
        .with_context(|| "Failed to build parameter scan")?
        .with_n_monitor_inds(config.n_monitor_inds);

    let script = script.to_path_buf();
    let metrics_for_fitness = Arc::clone(metrics);
    let fitness = move |ind: &Individual| -> SmallVec<[(f64, f64); 1]> {
        let params = individual_env_values(ind);
        let start = SystemTime::now();
        let result = evaluate_script(&script, &params);
        let elapsed = start.elapsed().unwrap_or_default();
        metrics_for_fitness.record_evaluation(elapsed.as_secs_f64());
        match result {
            Ok(value) => SmallVec::from_buf([(value, value)]),
            Err(err) => {
                // The executor wraps every fitness call in `catch_unwind` and
                // marks the individual as errored (`record_error`) rather than
                // aborting the batch, so a failed script becomes one invalid
                // individual instead of a crashed run.
                panic!("fitness script failed: {err}");
            }
        }
    };

    if config.n_workers == 0 {
        let executor = SequentialExecutor::new(fitness);
        scan.optimize(&executor).into_diagnostic()?;
    } else {
        let executor = ThreadPoolExecutor::new(config.n_workers, fitness, RngFactory::new(config.seed.wrapping_add(1)));
        scan.optimize(&executor).into_diagnostic()?;
    }

    metrics.record_iteration();
    if let Some((_, best_transformed)) = scan.base().best_known {
        metrics.set_best_known_transformed(best_transformed);
    }

    print_best_individual(&scan);
    Ok(())
}

fn scan_command(config_path: &Path) -> Result<()> {
    tracing::info!(command = "scan", config = %config_path.display());
    let config = load_config(config_path)?;
    let specs = parse_property_string(&config.scan)
        .map_err(|e| miette::miette!("{e}"))
        .with_context(|| format!("Failed to parse scan grammar '{}'", config.scan))?;
    println!("Parsed {} scan entries:", specs.len());
    for spec in &specs {
        println!(
            "  kind={:?} mode={:?} pos={} n_steps={}",
            spec.kind, spec.mode, spec.pos, spec.n_steps
        );
    }
    Ok(())
}

fn print_best_individual(scan: &ParameterScan) {
    let base = scan.base();
    match base.best_known {
        Some((raw, transformed)) => {
            println!("best_known_raw={raw} best_known_transformed={transformed}");
        }
        None => println!("no valid individual was evaluated"),
    }
    if let Some(best) = base
        .population
        .iter()
        .filter(|ind| ind.is_valid())
        .min_by(|a, b| {
            let fa = a.transformed_fitness(0, true).unwrap_or(f64::INFINITY);
            let fb = b.transformed_fitness(0, true).unwrap_or(f64::INFINITY);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        })
    {
        println!("{}", best.to_csv(true, true, false, true));
    }
}

/// Flattens a seed individual's scalar leaves into a name-value map the
/// fitness subprocess reads as environment variables. Collection leaves
/// are skipped: the scan grammar addresses individual scalar slots by
/// position, and a collection has no single scalar value to export under
/// its own label.
fn individual_env_values(ind: &Individual) -> HashMap<String, f64> {
    let mut params = HashMap::new();
    for leaf in &ind.parameters.leaves {
        let Some(label) = leaf.label() else { continue };
        if let Some(value) = ind.parameter_value(label) {
            params.insert(label.to_string(), value);
        } else if let strataopt_core::tree::ParameterLeaf::Bool(b) = leaf {
            params.insert(label.to_string(), if b.value { 1.0 } else { 0.0 });
        }
    }
    params
}

fn validate_command(config_path: &Path) -> Result<()> {
    tracing::info!(command = "validate", config = %config_path.display());
    let config = load_config(config_path)?;
    validate_config(&config)?;
    println!("Config OK");
    Ok(())
}

fn load_config(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: RunConfig = serde_json::from_str(&contents)
        .into_diagnostic()
        .with_context(|| format!("Invalid config JSON in {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &RunConfig) -> Result<()> {
    if config.population_size == 0 {
        return Err(miette::miette!("population_size must be > 0"));
    }
    if config.parameters.is_empty() {
        return Err(miette::miette!("parameters must not be empty"));
    }
    parse_property_string(&config.scan)
        .map_err(|e| miette::miette!("invalid scan grammar '{}': {e}", config.scan))?;
    Ok(())
}

fn evaluate_script(script: &Path, params: &HashMap<String, f64>) -> Result<f64> {
    let mut command = Command::new(script);
    let mut keys: Vec<_> = params.keys().collect();
    keys.sort();
    for key in keys {
        let env_key = format!("STRATAOPT_{}", key.to_uppercase());
        command.env(env_key, params[key].to_string());
    }

    let output = command.output().into_diagnostic()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(miette::miette!(
            "Script failed with status {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_result(&stdout)
}

fn parse_result(stdout: &str) -> Result<f64> {
    let mut last_value: Option<&str> = None;
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("RESULT=") {
            last_value = Some(rest.trim());
        } else {
            last_value = Some(trimmed);
        }
    }

    let value = last_value.ok_or_else(|| miette::miette!("No RESULT found in script output"))?;
    value
        .parse::<f64>()
        .into_diagnostic()
        .with_context(|| format!("Failed to parse result '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ParamSpec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_result_simple() {
        assert_eq!(parse_result("42.0").unwrap(), 42.0);
    }

    #[test]
    fn test_parse_result_with_prefix() {
        assert_eq!(parse_result("noise\nRESULT=3.5\n").unwrap(), 3.5);
    }

    #[test]
    fn test_parse_result_last_value_wins() {
        assert_eq!(parse_result("1.0\n2.0\n3.0\n").unwrap(), 3.0);
    }

    #[test]
    fn test_parse_result_empty() {
        assert!(parse_result("").is_err());
    }

    #[test]
    fn test_parse_result_invalid_number() {
        assert!(parse_result("not-a-number").is_err());
    }

    #[test]
    fn test_validate_config_zero_population() {
        let config = RunConfig {
            direction: strataopt_core::individual::Direction::Minimize,
            population_size: 0,
            seed: 1,
            parameters: vec![ParamSpec::Double {
                label: "x".into(),
                lower_init: -1.0,
                upper_init: 1.0,
                bounds: None,
            }],
            scan: "d(0,-1,1,4)".into(),
            mode: config::ScanModeConfig::Grid,
            n_monitor_inds: 1,
            halt: config::HaltConfigJson::default(),
            n_workers: 0,
            output_dir: None,
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_invalid_grammar() {
        let config = RunConfig {
            direction: strataopt_core::individual::Direction::Minimize,
            population_size: 4,
            seed: 1,
            parameters: vec![ParamSpec::Double {
                label: "x".into(),
                lower_init: -1.0,
                upper_init: 1.0,
                bounds: None,
            }],
            scan: "nonsense(".into(),
            mode: config::ScanModeConfig::Grid,
            n_monitor_inds: 1,
            halt: config::HaltConfigJson::default(),
            n_workers: 0,
            output_dir: None,
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_not_found() {
        let result = load_config(Path::new("/nonexistent/config.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_individual_env_values_skips_unlabeled_leaves() {
        let mut set = strataopt_core::tree::ParameterSet::new();
        set.push(strataopt_core::tree::ParameterLeaf::Double(
            strataopt_core::tree::DoubleLeaf::new(-1.0, 1.0).named("x"),
        ));
        set.push(strataopt_core::tree::ParameterLeaf::Double(
            strataopt_core::tree::DoubleLeaf::new(-1.0, 1.0),
        ));
        let ind = Individual::new(strataopt_core::individual::IndividualId(0), set);
        let params = individual_env_values(&ind);
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("x"));
    }

    #[test]
    fn test_individual_env_values_reads_bool_leaf() {
        let mut set = strataopt_core::tree::ParameterSet::new();
        set.push(strataopt_core::tree::ParameterLeaf::Bool(
            strataopt_core::tree::BoolLeaf::new(true).named("flag"),
        ));
        let ind = Individual::new(strataopt_core::individual::IndividualId(0), set);
        let params = individual_env_values(&ind);
        assert_eq!(params.get("flag"), Some(&1.0));
    }

    #[test]
    fn test_evaluate_script_with_result_prefix() {
        let mut script = NamedTempFile::new().unwrap();
        writeln!(script, "#!/bin/sh\necho RESULT=7.5").unwrap();
        let path = script.into_temp_path();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o755);
        }
        fs::set_permissions(&path, perms).unwrap();

        let params = HashMap::new();
        let value = evaluate_script(&path, &params).unwrap();
        assert_eq!(value, 7.5);
    }

    #[test]
    fn test_evaluate_script_env_vars_set() {
        let mut script = NamedTempFile::new().unwrap();
        writeln!(script, "#!/bin/sh\necho \"RESULT=$STRATAOPT_X\"").unwrap();
        let path = script.into_temp_path();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o755);
        }
        fs::set_permissions(&path, perms).unwrap();

        let mut params = HashMap::new();
        params.insert("x".to_string(), 2.5);
        let value = evaluate_script(&path, &params).unwrap();
        assert_eq!(value, 2.5);
    }
}
