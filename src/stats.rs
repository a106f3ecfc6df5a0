//! Population statistics shared by the scoring and clustering components

use ndarray::{Array1, Array2, Axis};

/// Quantile of `values` at `q` using linear interpolation between order statistics.
///
/// Returns `None` for an empty slice. NaN values are ignored.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

/// Quantile of an already-sorted, NaN-free, non-empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Arithmetic mean, skipping NaN values.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Result of a tolerant quantile binning.
#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    /// Zero-based bin index per input value
    pub bins: Vec<usize>,
    /// Distinct bin edges after collapsing duplicates
    pub edges: Vec<f64>,
    /// Number of bins actually produced (at most the requested count)
    pub achieved: usize,
}

/// Split `values` into `n_bins` population-proportional groups.
///
/// Edges are the `i / n_bins` quantiles. Bins are right-closed with the lowest edge included.
/// Duplicate edges caused by heavy ties are merged, so fewer than `n_bins` groups may be produced.
pub fn quantile_bins(values: &[f64], n_bins: usize) -> Binning {
    if values.is_empty() || n_bins == 0 {
        return Binning {
            bins: Vec::new(),
            edges: Vec::new(),
            achieved: 0,
        };
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=n_bins)
        .map(|i| quantile_sorted(&sorted, i as f64 / n_bins as f64))
        .collect();
    edges.dedup();

    let achieved = edges.len().saturating_sub(1).max(1);
    let bins = values
        .iter()
        .map(|&value| {
            // first interior edge that is >= value; the lowest bin also takes the minimum
            edges[1..]
                .iter()
                .position(|&edge| value <= edge)
                .unwrap_or(achieved - 1)
                .min(achieved - 1)
        })
        .collect();

    Binning {
        bins,
        edges,
        achieved,
    }
}

/// 1-based first-occurrence ranks: ties are ordered by their position in `values`.
pub fn first_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, &idx) in order.iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Z-score standardization fitted on a feature matrix
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    /// Per-column mean
    pub mean: Array1<f64>,
    /// Per-column population standard deviation (1.0 for constant columns)
    pub scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on the columns of `features` (rows are observations)
    pub fn fit(features: &Array2<f64>) -> Self {
        let n_cols = features.ncols();
        let mean = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_cols));
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > 0.0 && std.is_finite() { std } else { 1.0 });
        Self { mean, scale }
    }

    pub fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, row: &Array1<f64>) -> Array1<f64> {
        (row - &self.mean) / &self.scale
    }
}
