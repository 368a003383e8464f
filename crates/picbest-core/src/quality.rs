use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use log::warn;

use crate::Error;

/// Quality metrics. Values are compared as f64 where larger is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Minimum of width and height
    Dimensions,
    /// Total pixel count (width x height)
    Resolution,
    /// File size in bytes
    Filesize,
    /// Static ranking of the file extension
    FormatQuality,
    ModifiedDate,
    CreatedDate,
}

impl Metric {
    pub fn is_date(self) -> bool {
        matches!(self, Metric::ModifiedDate | Metric::CreatedDate)
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "dimensions" => Ok(Metric::Dimensions),
            "resolution" => Ok(Metric::Resolution),
            "filesize" => Ok(Metric::Filesize),
            "format_quality" => Ok(Metric::FormatQuality),
            "modified_date" => Ok(Metric::ModifiedDate),
            "created_date" => Ok(Metric::CreatedDate),
            _ => Err(Error::Configuration(format!("unknown metric name: {s}"))),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Dimensions => "dimensions",
            Metric::Resolution => "resolution",
            Metric::Filesize => "filesize",
            Metric::FormatQuality => "format_quality",
            Metric::ModifiedDate => "modified_date",
            Metric::CreatedDate => "created_date",
        };
        f.write_str(name)
    }
}

/// Preference for date-based metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatePreference {
    #[default]
    Newest,
    Oldest,
}

impl FromStr for DatePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "newest" => Ok(DatePreference::Newest),
            "oldest" => Ok(DatePreference::Oldest),
            _ => Err(Error::Configuration(format!(
                "date preference must be 'newest' or 'oldest', got: {s}"
            ))),
        }
    }
}

/// File format quality ranking (higher is better).
pub fn format_quality(extension: &str) -> f64 {
    match extension.to_ascii_lowercase().as_str() {
        "png" => 100.0,
        "tiff" | "tif" => 95.0,
        "bmp" => 90.0,
        "webp" => 85.0,
        "jp2" => 80.0,
        "heif" | "heic" => 77.0,
        "jpeg" | "jpg" => 75.0,
        "gif" => 60.0,
        _ => 0.0,
    }
}

/// Primary metric order used when none is configured.
pub const DEFAULT_PRIMARY_METRICS: &[Metric] = &[
    Metric::Dimensions,
    Metric::FormatQuality,
    Metric::Filesize,
    Metric::ModifiedDate,
];

/// Default weights for secondary metrics.
pub fn default_metric_weights() -> HashMap<Metric, f64> {
    HashMap::from([
        (Metric::Dimensions, 1.0),
        (Metric::Resolution, 0.9),
        (Metric::FormatQuality, 0.8),
        (Metric::Filesize, 0.7),
        (Metric::ModifiedDate, 0.6),
        (Metric::CreatedDate, 0.5),
    ])
}

/// Immutable per-run selection policy: ordered primary metrics, weighted
/// secondary metrics, and date preferences.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub primary: Vec<Metric>,
    pub secondary: Vec<Metric>,
    pub weights: HashMap<Metric, f64>,
    pub date_preference: DatePreference,
    pub overrides: HashMap<Metric, DatePreference>,
}

impl Default for MetricSpec {
    fn default() -> Self {
        Self {
            primary: DEFAULT_PRIMARY_METRICS.to_vec(),
            secondary: Vec::new(),
            weights: default_metric_weights(),
            date_preference: DatePreference::Newest,
            overrides: HashMap::new(),
        }
    }
}

impl MetricSpec {
    /// Build a spec from string-form configuration, failing fast on
    /// unknown metric names or malformed weight/override pairs.
    pub fn from_strings(
        primary: &[String],
        secondary: &[String],
        weights: Option<&str>,
        date_preference: &str,
        overrides: Option<&str>,
    ) -> Result<Self, Error> {
        let primary = if primary.is_empty() {
            DEFAULT_PRIMARY_METRICS.to_vec()
        } else {
            primary
                .iter()
                .map(|s| s.parse())
                .collect::<Result<Vec<Metric>, Error>>()?
        };
        let secondary = secondary
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Metric>, Error>>()?;
        let weights = match weights {
            Some(s) => parse_metric_weights(s)?,
            None => default_metric_weights(),
        };
        let overrides = match overrides {
            Some(s) => parse_metric_overrides(s)?,
            None => HashMap::new(),
        };
        Ok(Self {
            primary,
            secondary,
            weights,
            date_preference: date_preference.parse()?,
            overrides,
        })
    }

    fn date_pref(&self, metric: Metric) -> DatePreference {
        self.overrides
            .get(&metric)
            .copied()
            .unwrap_or(self.date_preference)
    }
}

/// Parse "metric:weight,metric:weight" pairs.
pub fn parse_metric_weights(s: &str) -> Result<HashMap<Metric, f64>, Error> {
    let mut weights = HashMap::new();
    for pair in s.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, weight) = pair.trim().split_once(':').ok_or_else(|| {
            Error::Configuration(format!("malformed weight pair (expected name:weight): {pair}"))
        })?;
        let value: f64 = weight.trim().parse().map_err(|_| {
            Error::Configuration(format!("invalid weight for metric {name}: {weight}"))
        })?;
        weights.insert(name.trim().parse()?, value);
    }
    Ok(weights)
}

/// Parse "metric:preference,metric:preference" override pairs.
pub fn parse_metric_overrides(s: &str) -> Result<HashMap<Metric, DatePreference>, Error> {
    let mut overrides = HashMap::new();
    for pair in s.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, pref) = pair.trim().split_once(':').ok_or_else(|| {
            Error::Configuration(format!(
                "malformed override pair (expected metric:preference): {pair}"
            ))
        })?;
        overrides.insert(name.trim().parse()?, pref.trim().parse()?);
    }
    Ok(overrides)
}

/// Metric value source. Larger is always better; date metrics are
/// sign-flipped for the "oldest" preference so the contract holds
/// uniformly. Retrieval failures resolve to 0.0 and are logged.
pub trait MetricProvider {
    fn value(&self, id: &Path, metric: Metric, preference: DatePreference) -> f64;

    /// Pixel dimensions, (0, 0) when unreadable.
    fn dimensions(&self, id: &Path) -> (u32, u32);
}

/// Filesystem-backed provider: sizes and timestamps from metadata,
/// dimensions from a header-only probe. Values are memoized per run.
#[derive(Default)]
pub struct FsMetricProvider {
    values: RefCell<HashMap<(PathBuf, Metric), f64>>,
    dims: RefCell<HashMap<PathBuf, (u32, u32)>>,
}

impl FsMetricProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw_value(&self, id: &Path, metric: Metric) -> f64 {
        if let Some(&v) = self.values.borrow().get(&(id.to_path_buf(), metric)) {
            return v;
        }
        let v = match self.compute(id, metric) {
            Ok(v) => v,
            Err(err) => {
                warn!("defaulting {metric} to 0 for {}: {err}", id.display());
                0.0
            }
        };
        self.values.borrow_mut().insert((id.to_path_buf(), metric), v);
        v
    }

    fn compute(&self, id: &Path, metric: Metric) -> anyhow::Result<f64> {
        match metric {
            Metric::Filesize => Ok(fs::metadata(id)?.len() as f64),
            Metric::ModifiedDate => {
                let mtime = fs::metadata(id)?.modified()?;
                Ok(mtime.duration_since(UNIX_EPOCH)?.as_secs_f64())
            }
            Metric::CreatedDate => created_time(id),
            Metric::FormatQuality => {
                let ext = id.extension().and_then(|e| e.to_str()).unwrap_or("");
                Ok(format_quality(ext))
            }
            Metric::Dimensions => {
                let (w, h) = self.dimensions(id);
                Ok(w.min(h) as f64)
            }
            Metric::Resolution => {
                let (w, h) = self.dimensions(id);
                Ok(w as f64 * h as f64)
            }
        }
    }
}

#[cfg(unix)]
fn created_time(id: &Path) -> anyhow::Result<f64> {
    use std::os::unix::fs::MetadataExt;
    // Creation time is not reliably available on Unix; use the earlier
    // of mtime and ctime.
    let meta = fs::metadata(id)?;
    Ok((meta.mtime().min(meta.ctime())) as f64)
}

#[cfg(windows)]
fn created_time(id: &Path) -> anyhow::Result<f64> {
    let created = fs::metadata(id)?.created()?;
    Ok(created.duration_since(UNIX_EPOCH)?.as_secs_f64())
}

impl MetricProvider for FsMetricProvider {
    fn value(&self, id: &Path, metric: Metric, preference: DatePreference) -> f64 {
        let raw = self.raw_value(id, metric);
        if metric.is_date() && preference == DatePreference::Oldest {
            -raw
        } else {
            raw
        }
    }

    fn dimensions(&self, id: &Path) -> (u32, u32) {
        if let Some(&dims) = self.dims.borrow().get(id) {
            return dims;
        }
        let dims = match image::image_dimensions(id) {
            Ok(dims) => dims,
            Err(err) => {
                warn!("could not read dimensions of {}: {err}", id.display());
                (0, 0)
            }
        };
        self.dims.borrow_mut().insert(id.to_path_buf(), dims);
        dims
    }
}

/// Pick the best image of a group.
///
/// Stage 1 eliminates candidates metric-by-metric over the ordered
/// primary list, keeping only those tied at the maximum. Stage 2 breaks
/// remaining ties with min-max-normalized, weighted secondary metrics;
/// when all survivors share a value the normalized score is 1.0 for
/// everyone. Residual ties resolve to the first survivor in input order.
pub fn find_best<'a>(
    group: &'a [PathBuf],
    spec: &MetricSpec,
    provider: &dyn MetricProvider,
) -> Option<&'a PathBuf> {
    if group.len() <= 1 {
        return group.first();
    }

    let mut candidates: Vec<&'a PathBuf> = group.iter().collect();
    for &metric in &spec.primary {
        if candidates.len() <= 1 {
            break;
        }
        let pref = spec.date_pref(metric);
        let values: Vec<f64> = candidates
            .iter()
            .map(|id| provider.value(id, metric, pref))
            .collect();
        let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        candidates = candidates
            .iter()
            .zip(values.iter())
            .filter(|(_, &v)| v == best)
            .map(|(&id, _)| id)
            .collect();
    }

    if candidates.len() == 1 {
        return candidates.first().copied();
    }

    let weighted: Vec<Metric> = spec
        .secondary
        .iter()
        .copied()
        .filter(|m| spec.weights.contains_key(m))
        .collect();
    if weighted.is_empty() {
        return candidates.first().copied();
    }

    let mut totals = vec![0.0f64; candidates.len()];
    for &metric in &weighted {
        let pref = spec.date_pref(metric);
        let values: Vec<f64> = candidates
            .iter()
            .map(|id| provider.value(id, metric, pref))
            .collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        let weight = spec.weights[&metric];
        for (total, &value) in totals.iter_mut().zip(values.iter()) {
            let normalized = if range > 0.0 { (value - min) / range } else { 1.0 };
            *total += normalized * weight;
        }
    }

    let mut best_idx = 0;
    for (i, &total) in totals.iter().enumerate() {
        if total > totals[best_idx] {
            best_idx = i;
        }
    }
    Some(candidates[best_idx])
}
