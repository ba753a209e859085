//! Observer chain (spec §4.8): composable lifecycle listeners fed
//! population snapshots at `INFO_INIT`/`INFO_PROCESSING`/`INFO_END`.
//!
//! Source-side this was an inheritance tree (`GBaseObject` ->
//! `GObserver`-likes). Per DESIGN NOTES §9 ("Observer composition") it is
//! replaced with a single capability trait plus a collective monitor that
//! is itself just a `Vec<Box<dyn Observer>>` wrapper — no inheritance, a
//! sequence container that happens to implement the same trait it holds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use csv::WriterBuilder;

use crate::error::{MetaError, MetaResult};
use crate::individual::{Direction, Individual};

/// The three lifecycle events an algorithm fans out to its observers (spec
/// §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoMode {
    Init,
    Processing,
    End,
}

/// Read-only view of algorithm state handed to observers on each
/// notification. Observers never mutate the population; the algorithm does
/// not mutate it while fanning this out (spec §5).
pub struct AlgorithmSnapshot<'a> {
    pub iteration: u64,
    pub population: &'a [Individual],
    pub best_known_raw: f64,
    pub best_known_transformed: f64,
    pub direction: Direction,
    pub stall_count: u64,
    pub elapsed: Duration,
}

impl<'a> AlgorithmSnapshot<'a> {
    /// Best `(raw, transformed)` criterion-0 fitness among this cycle's
    /// valid individuals, direction-aware.
    pub fn iteration_best(&self) -> Option<(f64, f64)> {
        self.population
            .iter()
            .filter(|ind| ind.is_valid())
            .filter_map(|ind| Some((ind.raw_fitness(0).ok()?, ind.transformed_fitness(0, false).ok()?)))
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

    /// The `n` best individuals this cycle by transformed criterion-0
    /// fitness, direction-aware, ties broken by raw fitness then by
    /// population order (spec §4.5 "Population bookkeeping", §4.8 fitness
    /// monitor).
    pub fn best_n(&self, n: usize) -> Vec<&Individual> {
        let mut valid: Vec<&Individual> = self.population.iter().filter(|ind| ind.is_valid()).collect();
        valid.sort_by(|a, b| {
            let (ar, at) = (a.raw_fitness(0).unwrap_or(f64::NAN), a.transformed_fitness(0, false).unwrap_or(f64::NAN));
            let (br, bt) = (b.raw_fitness(0).unwrap_or(f64::NAN), b.transformed_fitness(0, false).unwrap_or(f64::NAN));
            let primary = match self.direction {
                Direction::Minimize => at.partial_cmp(&bt),
                Direction::Maximize => bt.partial_cmp(&at),
            }
            .unwrap_or(std::cmp::Ordering::Equal);
            if primary != std::cmp::Ordering::Equal {
                return primary;
            }
            match self.direction {
                Direction::Minimize => ar.partial_cmp(&br),
                Direction::Maximize => br.partial_cmp(&ar),
            }
            .unwrap_or(std::cmp::Ordering::Equal)
        });
        valid.truncate(n);
        valid
    }
}

/// The one capability every observer implements (spec §4.8).
pub trait Observer: Send {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot);
}

/// Renames an existing file to `<path>.bak_<ms-since-epoch>` before a
/// fresh run overwrites it (spec §6 "Backup filenames", §4.8 "share the
/// back-up-on-init discipline"). A missing file is not an error.
pub fn backup_if_exists(path: &Path) -> MetaResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| MetaError::ResourceError(e.to_string()))?
        .as_millis();
    let backup = PathBuf::from(format!("{}.bak_{ms}", path.display()));
    fs::rename(path, &backup).map_err(|e| MetaError::ResourceError(format!("renaming {path:?} to {backup:?}: {e}")))
}

/// Data sink for histogram/graph back-ends (plotting itself is out of
/// scope per spec §1: "treated as a graph/histogram data sink with a
/// `writeToFile` operation"). Concrete sinks in this crate serialize their
/// points as plain text; a real plotting library would implement this
/// trait against its own format.
pub trait GraphSink {
    fn write_to_file(&self, path: &Path) -> MetaResult<()>;
}

/// A flat `(x[, y[, z]], fitness)` point series, the shape the progress
/// plotter and the n-adaptions/adaptor-property "curve" outputs share.
#[derive(Debug, Clone, Default)]
pub struct PointSeries {
    pub points: Vec<Vec<f64>>,
}

impl GraphSink for PointSeries {
    fn write_to_file(&self, path: &Path) -> MetaResult<()> {
        let mut out = String::new();
        for row in &self.points {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }
        fs::write(path, out).map_err(|e| MetaError::ResourceError(format!("writing {path:?}: {e}")))
    }
}

/// A 2D histogram over `(x, y)` with fixed bin counts, used by the
/// n-adaptions and processing-times loggers (spec §4.8).
#[derive(Debug, Clone)]
pub struct Histogram2D {
    pub x_bins: usize,
    pub y_bins: usize,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    counts: Vec<u64>,
}

impl Histogram2D {
    pub fn new(x_bins: usize, y_bins: usize, x_range: (f64, f64), y_range: (f64, f64)) -> MetaResult<Self> {
        if x_bins == 0 || y_bins == 0 {
            return Err(MetaError::InvalidConfiguration("histogram bin count must be > 0".to_string()));
        }
        Ok(Self {
            x_bins,
            y_bins,
            x_range,
            y_range,
            counts: vec![0; x_bins * y_bins],
        })
    }

    pub fn add(&mut self, x: f64, y: f64) {
        let bx = Self::bin_of(x, self.x_range, self.x_bins);
        let by = Self::bin_of(y, self.y_range, self.y_bins);
        self.counts[by * self.x_bins + bx] += 1;
    }

    fn bin_of(v: f64, range: (f64, f64), bins: usize) -> usize {
        let (lo, hi) = range;
        if hi <= lo {
            return 0;
        }
        let frac = ((v - lo) / (hi - lo)).clamp(0.0, 0.999_999_9);
        (frac * bins as f64) as usize
    }
}

impl GraphSink for Histogram2D {
    fn write_to_file(&self, path: &Path) -> MetaResult<()> {
        let mut out = String::new();
        for by in 0..self.y_bins {
            let row: Vec<String> = (0..self.x_bins).map(|bx| self.counts[by * self.x_bins + bx].to_string()).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        fs::write(path, out).map_err(|e| MetaError::ResourceError(format!("writing {path:?}: {e}")))
    }
}

/// Logs iteration/current-best/best-known on every processing step (spec
/// §4.8 "Standard monitor"). Uses `tracing` the way the teacher instruments
/// its solver loop (`#[tracing::instrument]` on `ask`/`tell`).
#[derive(Debug, Default)]
pub struct StandardMonitor;

impl Observer for StandardMonitor {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        match mode {
            InfoMode::Init => {
                tracing::info!(population = snapshot.population.len(), "optimization starting");
            }
            InfoMode::Processing => {
                let current = snapshot.iteration_best();
                tracing::info!(
                    iteration = snapshot.iteration,
                    current_best = ?current.map(|(_, t)| t),
                    best_known = snapshot.best_known_transformed,
                    stall_count = snapshot.stall_count,
                    "iteration complete"
                );
            }
            InfoMode::End => {
                tracing::info!(
                    iterations = snapshot.iteration,
                    best_known = snapshot.best_known_transformed,
                    elapsed_secs = snapshot.elapsed.as_secs_f64(),
                    "optimization finished"
                );
            }
        }
    }
}

/// Tracks the top-`k` individuals per iteration as `(global_best,
/// iter_best)` pairs (spec §4.8 "Fitness monitor"). On the first
/// `INFO_PROCESSING` call it sizes itself down to however many best
/// individuals actually exist, capping at the configured `k`; if a later
/// iteration has fewer candidates than the current cap it warns and
/// shrinks — to `1` after the first shrink has already happened once,
/// matching the "reduces K to 1 for the remainder" rule.
pub struct FitnessMonitor {
    pub k: usize,
    pub canvas: (u32, u32),
    sized: bool,
    shrunk_once: bool,
    history: Vec<(u64, Vec<(f64, f64)>)>,
}

impl FitnessMonitor {
    pub fn new(k: usize, canvas: (u32, u32)) -> Self {
        Self { k, canvas, sized: false, shrunk_once: false, history: Vec::new() }
    }
}

impl Observer for FitnessMonitor {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        if mode != InfoMode::Processing {
            return;
        }
        let available = snapshot.best_n(self.k.max(1)).len();
        if !self.sized {
            self.k = available.min(self.k).max(1);
            self.sized = true;
        } else if available < self.k {
            let new_k = if self.shrunk_once { 1 } else { available.max(1) };
            tracing::warn!(
                requested = self.k,
                available,
                resized_to = new_k,
                "fitness monitor: fewer best individuals than monitored slots, shrinking"
            );
            self.k = new_k;
            self.shrunk_once = true;
        }
        let best = snapshot
            .best_n(self.k)
            .iter()
            .map(|ind| (ind.raw_fitness(0).unwrap_or(f64::NAN), ind.transformed_fitness(0, false).unwrap_or(f64::NAN)))
            .collect();
        self.history.push((snapshot.iteration, best));
    }
}

/// Forwards every notification to a registered sequence of monitors in
/// insertion order (spec §4.8 "Collective monitor"). Nothing more than a
/// `Vec` behind the same trait it contains.
#[derive(Default)]
pub struct CollectiveMonitor {
    pub monitors: Vec<Box<dyn Observer>>,
}

impl CollectiveMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, monitor: Box<dyn Observer>) {
        self.monitors.push(monitor);
    }
}

impl Observer for CollectiveMonitor {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        for monitor in &mut self.monitors {
            monitor.information(mode, snapshot);
        }
    }
}

/// Accumulates `(x[, y[, z]], fitness)` tuples from the best individual (or
/// all individuals) over `1..=3` real parameters named by a property
/// string, then emits a [`GraphSink`] at `INFO_END` (spec §4.8 "Progress
/// plotter").
pub struct ProgressPlotter {
    pub param_names: Vec<String>,
    pub all_individuals: bool,
    pub valid_only: bool,
    pub bounds: Option<Vec<(f64, f64)>>,
    pub output_path: PathBuf,
    series: PointSeries,
}

impl ProgressPlotter {
    /// `param_names` selects 1-3 real-valued parameter leaves by name (spec
    /// §4.8 "K in {1,2,3} real parameters chosen by property string").
    pub fn new(param_names: Vec<String>, output_path: PathBuf) -> MetaResult<Self> {
        if param_names.is_empty() || param_names.len() > 3 {
            return Err(MetaError::InvalidConfiguration(
                "progress plotter needs between 1 and 3 parameter names".to_string(),
            ));
        }
        Ok(Self {
            param_names,
            all_individuals: false,
            valid_only: true,
            bounds: None,
            output_path,
            series: PointSeries::default(),
        })
    }

    fn in_bounds(&self, point: &[f64]) -> bool {
        match &self.bounds {
            None => true,
            Some(bounds) => point.iter().zip(bounds).all(|(v, (lo, hi))| *v >= *lo && *v <= *hi),
        }
    }

    fn collect_row(&self, ind: &Individual) -> Option<Vec<f64>> {
        let mut row = Vec::with_capacity(self.param_names.len() + 1);
        for name in &self.param_names {
            row.push(ind.parameter_value(name)?);
        }
        row.push(ind.transformed_fitness(0, false).ok()?);
        Some(row)
    }
}

impl Observer for ProgressPlotter {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        match mode {
            InfoMode::Processing => {
                let candidates: Vec<&Individual> = if self.all_individuals {
                    snapshot.population.iter().collect()
                } else {
                    snapshot.best_n(1)
                };
                for ind in candidates {
                    if self.valid_only && !ind.is_valid() {
                        continue;
                    }
                    if let Some(row) = self.collect_row(ind) {
                        if self.in_bounds(&row[..row.len() - 1]) {
                            self.series.points.push(row);
                        }
                    }
                }
            }
            InfoMode::End => {
                if let Err(err) = self.series.write_to_file(&self.output_path) {
                    tracing::warn!(?err, path = ?self.output_path, "progress plotter failed to write output, disabling");
                }
            }
            InfoMode::Init => {}
        }
    }
}

/// Per-iteration CSV of every individual (spec §4.8 "All-solution file
/// logger"). Backs up any pre-existing target on `INFO_INIT`; writes a
/// names-and-types header on the first data line if requested; inserts
/// `# iteration N` comment rows between iterations if requested.
pub struct AllSolutionsLogger {
    pub path: PathBuf,
    pub with_names: bool,
    pub with_commas: bool,
    pub use_raw: bool,
    pub with_validity: bool,
    pub iteration_boundaries: bool,
    header_written: bool,
    disabled: bool,
}

impl AllSolutionsLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            with_names: true,
            with_commas: true,
            use_raw: false,
            with_validity: true,
            iteration_boundaries: true,
            header_written: false,
            disabled: false,
        }
    }
}

impl Observer for AllSolutionsLogger {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        if self.disabled {
            return;
        }
        match mode {
            InfoMode::Init => {
                if let Err(err) = backup_if_exists(&self.path) {
                    tracing::warn!(?err, path = ?self.path, "all-solutions logger could not back up existing file, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::Processing => {
                let mut rows: Vec<Vec<String>> = Vec::new();
                if self.iteration_boundaries {
                    rows.push(vec![format!("# iteration {}", snapshot.iteration)]);
                }
                for ind in snapshot.population.iter() {
                    if self.with_names && !self.header_written {
                        rows.push(ind.csv_header_fields(self.with_validity));
                        self.header_written = true;
                    }
                    rows.push(ind.csv_fields(self.use_raw, self.with_validity));
                }
                let delimiter = if self.with_commas { b',' } else { b' ' };
                if let Err(err) = append_csv_rows(&self.path, delimiter, &rows) {
                    tracing::warn!(?err, path = ?self.path, "all-solutions logger write failed, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::End => {}
        }
    }
}

fn append_file(path: &Path, content: &str) -> MetaResult<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MetaError::ResourceError(format!("opening {path:?}: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| MetaError::ResourceError(format!("writing {path:?}: {e}")))
}

/// Appends `rows` to `path` through a real CSV writer (spec §4.8's
/// per-row numeric export), opening in append mode so repeated
/// `INFO_PROCESSING` calls accumulate into one file.
fn append_csv_rows(path: &Path, delimiter: u8, rows: &[Vec<String>]) -> MetaResult<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MetaError::ResourceError(format!("opening {path:?}: {e}")))?;
    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(file);
    for row in rows {
        wtr.write_record(row)
            .map_err(|e| MetaError::ResourceError(format!("writing {path:?}: {e}")))?;
    }
    wtr.flush()
        .map_err(|e| MetaError::ResourceError(format!("flushing {path:?}: {e}")))
}

/// One CSV row per iteration containing every individual's fitness vector
/// concatenated (spec §4.8 "Iteration-results logger").
pub struct IterationResultsLogger {
    pub path: PathBuf,
    disabled: bool,
}

impl IterationResultsLogger {
    pub fn new(path: PathBuf) -> Self {
        Self { path, disabled: false }
    }
}

impl Observer for IterationResultsLogger {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        if self.disabled {
            return;
        }
        match mode {
            InfoMode::Init => {
                if let Err(err) = backup_if_exists(&self.path) {
                    tracing::warn!(?err, path = ?self.path, "iteration-results logger could not back up existing file, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::Processing => {
                let mut fields = vec![snapshot.iteration.to_string()];
                for ind in snapshot.population.iter() {
                    for (raw, transformed) in &ind.fitness_results {
                        fields.push(raw.to_string());
                        fields.push(transformed.to_string());
                    }
                }
                let mut line = fields.join(",");
                line.push('\n');
                if let Err(err) = append_file(&self.path, &line) {
                    tracing::warn!(?err, path = ?self.path, "iteration-results logger write failed, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::End => {}
        }
    }
}

/// Collects `(iteration, n_adaptions)` tuples, optionally for the best
/// individual only, and emits either a curve (best-only) or a 2D histogram
/// at `INFO_END` (spec §4.8 "N-adaptions logger").
pub struct NAdaptionsLogger {
    pub best_only: bool,
    pub output_path: PathBuf,
    pub histogram_bins: (usize, usize),
    points: Vec<(f64, f64)>,
}

impl NAdaptionsLogger {
    pub fn new(output_path: PathBuf, best_only: bool) -> Self {
        Self { best_only, output_path, histogram_bins: (50, 50), points: Vec::new() }
    }
}

impl Observer for NAdaptionsLogger {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        match mode {
            InfoMode::Processing => {
                if self.best_only {
                    if let Some(ind) = snapshot.best_n(1).into_iter().next() {
                        self.points.push((snapshot.iteration as f64, ind.get_n_adaptions() as f64));
                    }
                } else {
                    for ind in snapshot.population.iter() {
                        self.points.push((snapshot.iteration as f64, ind.get_n_adaptions() as f64));
                    }
                }
            }
            InfoMode::End => {
                let result = if self.best_only {
                    PointSeries { points: self.points.iter().map(|(i, n)| vec![*i, *n]).collect() }
                        .write_to_file(&self.output_path)
                } else {
                    self.write_histogram()
                };
                if let Err(err) = result {
                    tracing::warn!(?err, path = ?self.output_path, "n-adaptions logger failed to write output, disabling");
                }
            }
            InfoMode::Init => {}
        }
    }
}

impl NAdaptionsLogger {
    fn write_histogram(&self) -> MetaResult<()> {
        let max_iter = self.points.iter().map(|(i, _)| *i).fold(0.0, f64::max);
        let max_n = self.points.iter().map(|(_, n)| *n).fold(0.0, f64::max);
        let mut hist = Histogram2D::new(self.histogram_bins.0, self.histogram_bins.1, (0.0, max_iter.max(1.0)), (0.0, max_n.max(1.0)))?;
        for (i, n) in &self.points {
            hist.add(*i, *n);
        }
        hist.write_to_file(&self.output_path)
    }
}

/// Queries each individual's named adaptor for a named property (e.g.
/// `sigma`), accumulates, and plots analogously to [`NAdaptionsLogger`]
/// (spec §4.8 "Adaptor-property logger").
pub struct AdaptorPropertyLogger {
    pub leaf_name: String,
    pub property: String,
    pub output_path: PathBuf,
    points: Vec<(f64, f64)>,
}

impl AdaptorPropertyLogger {
    pub fn new(leaf_name: impl Into<String>, property: impl Into<String>, output_path: PathBuf) -> Self {
        Self { leaf_name: leaf_name.into(), property: property.into(), output_path, points: Vec::new() }
    }
}

impl Observer for AdaptorPropertyLogger {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        match mode {
            InfoMode::Processing => {
                for ind in snapshot.population.iter() {
                    if let Some(value) = ind.adaptor_property(&self.leaf_name, &self.property) {
                        self.points.push((snapshot.iteration as f64, value));
                    }
                }
            }
            InfoMode::End => {
                let series = PointSeries { points: self.points.iter().map(|(i, v)| vec![*i, *v]).collect() };
                if let Err(err) = series.write_to_file(&self.output_path) {
                    tracing::warn!(?err, path = ?self.output_path, "adaptor-property logger failed to write output, disabling");
                }
            }
            InfoMode::Init => {}
        }
    }
}

/// Fills four 1D histograms (pre/main/post/all) and four 2D histograms
/// versus iteration, and writes a plain-text CSV of `(iteration, pre, main,
/// post)` per individual (spec §4.8 "Processing-times logger", §6 text
/// format).
pub struct ProcessingTimesLogger {
    pub csv_path: PathBuf,
    pub histogram_dir: PathBuf,
    samples: Vec<(u64, f64, f64, f64)>,
    disabled: bool,
}

impl ProcessingTimesLogger {
    pub fn new(csv_path: PathBuf, histogram_dir: PathBuf) -> Self {
        Self { csv_path, histogram_dir, samples: Vec::new(), disabled: false }
    }

    fn write_histograms(&self) -> MetaResult<()> {
        let maxes = self.samples.iter().fold((0.0f64, 0.0f64, 0.0f64), |acc, (_, pre, main, post)| {
            (acc.0.max(*pre), acc.1.max(*main), acc.2.max(*post))
        });
        let max_iter = self.samples.iter().map(|(i, ..)| *i as f64).fold(0.0, f64::max);

        for (label, extractor, max_v) in [
            ("pre", (|s: &(u64, f64, f64, f64)| s.1) as fn(&(u64, f64, f64, f64)) -> f64, maxes.0),
            ("main", (|s: &(u64, f64, f64, f64)| s.2) as fn(&(u64, f64, f64, f64)) -> f64, maxes.1),
            ("post", (|s: &(u64, f64, f64, f64)| s.3) as fn(&(u64, f64, f64, f64)) -> f64, maxes.2),
        ] {
            let mut hist_1d = Histogram2D::new(50, 1, (0.0, max_v.max(1e-9)), (0.0, 1.0))?;
            let mut hist_2d = Histogram2D::new(50, 50, (0.0, max_iter.max(1.0)), (0.0, max_v.max(1e-9)))?;
            for sample in &self.samples {
                hist_1d.add(extractor(sample), 0.0);
                hist_2d.add(sample.0 as f64, extractor(sample));
            }
            hist_1d.write_to_file(&self.histogram_dir.join(format!("{label}_1d.csv")))?;
            hist_2d.write_to_file(&self.histogram_dir.join(format!("{label}_vs_iteration.csv")))?;
        }

        let mut hist_all = Histogram2D::new(50, 1, (0.0, maxes.0.max(maxes.1).max(maxes.2).max(1e-9)), (0.0, 1.0))?;
        for (_, pre, main, post) in &self.samples {
            hist_all.add(*pre, 0.0);
            hist_all.add(*main, 0.0);
            hist_all.add(*post, 0.0);
        }
        hist_all.write_to_file(&self.histogram_dir.join("all_1d.csv"))?;
        Ok(())
    }
}

impl Observer for ProcessingTimesLogger {
    fn information(&mut self, mode: InfoMode, snapshot: &AlgorithmSnapshot) {
        if self.disabled {
            return;
        }
        match mode {
            InfoMode::Init => {
                if let Err(err) = backup_if_exists(&self.csv_path) {
                    tracing::warn!(?err, path = ?self.csv_path, "processing-times logger could not back up existing file, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::Processing => {
                let mut rows: Vec<Vec<String>> = Vec::new();
                for ind in snapshot.population.iter() {
                    let t = ind.get_processing_times();
                    self.samples.push((snapshot.iteration, t.pre, t.main, t.post));
                    rows.push(vec![
                        snapshot.iteration.to_string(),
                        t.pre.to_string(),
                        t.main.to_string(),
                        t.post.to_string(),
                    ]);
                }
                if let Err(err) = append_csv_rows(&self.csv_path, b',', &rows) {
                    tracing::warn!(?err, path = ?self.csv_path, "processing-times logger write failed, disabling");
                    self.disabled = true;
                }
            }
            InfoMode::End => {
                if let Err(err) = self.write_histograms() {
                    tracing::warn!(?err, dir = ?self.histogram_dir, "processing-times logger failed to write histograms");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityMode, ValueKind};
    use crate::individual::IndividualId;
    use crate::tree::{DoubleLeaf, ParameterLeaf, ParameterSet};
    use csv::ReaderBuilder;
    use smallvec::SmallVec;
    use tempfile::tempdir;

    fn scored(id: u64, raw: f64) -> Individual {
        let set = ParameterSet::new();
        let mut ind = Individual::new(IndividualId(id), set);
        ind.record_evaluation(SmallVec::from_buf([(raw, raw)]), Default::default());
        ind
    }

    #[test]
    fn snapshot_best_n_orders_by_transformed_then_raw_minimize() {
        let population = vec![scored(0, 5.0), scored(1, 1.0), scored(2, 3.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 1,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        let best = snapshot.best_n(2);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].raw_fitness(0).unwrap(), 1.0);
        assert_eq!(best[1].raw_fitness(0).unwrap(), 3.0);
    }

    #[test]
    fn fitness_monitor_shrinks_when_fewer_bests_are_available() {
        let mut monitor = FitnessMonitor::new(5, (400, 300));
        let population = vec![scored(0, 1.0), scored(1, 2.0), scored(2, 3.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 1,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        monitor.information(InfoMode::Processing, &snapshot);
        assert_eq!(monitor.k, 3);
    }

    #[test]
    fn collective_monitor_forwards_to_every_child_in_order() {
        struct Counter(u32);
        impl Observer for Counter {
            fn information(&mut self, _mode: InfoMode, _snapshot: &AlgorithmSnapshot) {
                self.0 += 1;
            }
        }
        let mut collective = CollectiveMonitor::new();
        collective.push(Box::new(Counter(0)));
        collective.push(Box::new(Counter(0)));
        let population = vec![scored(0, 1.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 0,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        collective.information(InfoMode::Processing, &snapshot);
        assert_eq!(collective.monitors.len(), 2);
    }

    #[test]
    fn all_solutions_logger_backs_up_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "old run\n").unwrap();

        let mut logger = AllSolutionsLogger::new(path.clone());
        let population = vec![scored(0, 1.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 0,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        logger.information(InfoMode::Init, &snapshot);
        logger.information(InfoMode::Processing, &snapshot);

        let mut entries: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.file_name().to_string_lossy().starts_with("out.csv.bak_")));
    }

    #[test]
    fn all_solutions_logger_writes_csv_rows_via_csv_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("solutions.csv");
        let mut logger = AllSolutionsLogger::new(path.clone());
        logger.iteration_boundaries = false;
        let population = vec![scored(0, 1.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 0,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        logger.information(InfoMode::Init, &snapshot);
        logger.information(InfoMode::Processing, &snapshot);

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .unwrap();
        let records: Vec<_> = rdr.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2); // header row + one individual row
        assert_eq!(&records[0][0], "fitness:0");
    }

    #[test]
    fn processing_times_logger_writes_csv_rows_via_csv_writer() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("times.csv");
        let histogram_dir = dir.path().to_path_buf();
        let mut logger = ProcessingTimesLogger::new(csv_path.clone(), histogram_dir);
        let population = vec![scored(0, 1.0)];
        let snapshot = AlgorithmSnapshot {
            iteration: 3,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        logger.information(InfoMode::Init, &snapshot);
        logger.information(InfoMode::Processing, &snapshot);

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .from_path(&csv_path)
            .unwrap();
        let records: Vec<_> = rdr.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][0], "3");
    }

    #[test]
    fn histogram_rejects_zero_bins() {
        let err = Histogram2D::new(0, 1, (0.0, 1.0), (0.0, 1.0)).unwrap_err();
        assert!(matches!(err, MetaError::InvalidConfiguration(_)));
    }

    #[test]
    fn n_adaptions_logger_best_only_records_one_point_per_iteration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nadapt.csv");
        let mut logger = NAdaptionsLogger::new(path.clone(), true);
        let mut ind = scored(0, 1.0);
        ind.n_adaptions = 4;
        let population = vec![ind];
        let snapshot = AlgorithmSnapshot {
            iteration: 2,
            population: &population,
            best_known_raw: 1.0,
            best_known_transformed: 1.0,
            direction: Direction::Minimize,
            stall_count: 0,
            elapsed: Duration::ZERO,
        };
        logger.information(InfoMode::Processing, &snapshot);
        logger.information(InfoMode::End, &snapshot);
        assert!(path.exists());
    }

    #[test]
    fn unused_leaf_fixture_compiles() {
        let mut set = ParameterSet::new();
        set.push(ParameterLeaf::Double(DoubleLeaf::new(0.0, 1.0)));
        assert_eq!(set.count(ValueKind::Double, ActivityMode::All), 1);
    }
}
