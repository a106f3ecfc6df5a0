//! Isolation Forest outlier scoring for transactions
//!
//! Each tree recursively splits a random subsample on a random feature and threshold.
//! Points that isolate after few splits get scores close to 1.

use ndarray::{Array2, ArrayView1};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::preprocess::EnrichedTransaction;

/// Numeric columns scored by the detector, in matrix column order
pub const ANOMALY_FEATURES: [&str; 6] = [
    "TotalAmount",
    "Quantity",
    "UnitPrice",
    "Discount",
    "ShippingCost",
    "Tax",
];

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build<R: Rng>(data: &Array2<f64>, sample: Vec<usize>, max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::grow(data, sample, 0, max_depth, rng),
        }
    }

    fn grow<R: Rng>(
        data: &Array2<f64>,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Node {
        if rows.len() <= 1 || depth >= max_depth {
            return Node::Leaf { size: rows.len() };
        }

        // only features that still vary inside this node can split it
        let splittable: Vec<(usize, f64, f64)> = (0..data.ncols())
            .filter_map(|feature| {
                let (lo, hi) = rows.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &row| {
                        let value = data[[row, feature]];
                        (lo.min(value), hi.max(value))
                    },
                );
                // a non-finite width cannot be sampled uniformly
                ((hi - lo).is_finite() && hi > lo).then_some((feature, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return Node::Leaf { size: rows.len() };
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&row| data[[row, feature]] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::grow(data, left, depth + 1, max_depth, rng)),
            right: Box::new(Self::grow(data, right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, point: &ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { &**left } else { &**right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Isolation Forest outlier detector
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use salesforge::IsolationForest;
///
/// let data = array![[1.0, 1.0], [1.1, 0.9], [0.9, 1.1], [1.0, 1.05], [9.0, 9.0]];
/// let mut forest = IsolationForest::new()
///     .with_n_estimators(50)
///     .with_contamination(0.2)
///     .with_random_state(7);
/// forest.fit(&data).unwrap();
///
/// let flags = forest.predict(&data);
/// assert!(flags[4]);
/// ```
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    random_state: u64,
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationForest {
    pub fn new() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            random_state: 42,
            trees: Vec::new(),
            sample_size: 0,
        }
    }

    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    /// Subsample size per tree (capped at the number of rows)
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn validate(&self) -> crate::Result<()> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(AnalyticsError::parameter(format!(
                "contamination must lie in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(AnalyticsError::parameter(
                "n_estimators and max_samples must be positive",
            ));
        }
        Ok(())
    }

    /// Build the tree ensemble over the rows of `data`
    pub fn fit(&mut self, data: &Array2<f64>) -> crate::Result<()> {
        self.validate()?;
        let n_rows = data.nrows();
        if n_rows == 0 {
            return Err(AnalyticsError::empty("anomaly detection needs at least one row"));
        }

        let sample_size = self.max_samples.min(n_rows);
        let max_depth = (sample_size as f64).log2().ceil().max(0.0) as usize;
        let mut rng = Xoshiro256Plus::seed_from_u64(self.random_state);

        self.sample_size = sample_size;
        self.trees = (0..self.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsolationTree::build(data, sample, max_depth, &mut rng)
            })
            .collect();

        log::debug!(
            "Isolation forest fitted: {} trees, subsample {}, depth cap {}",
            self.trees.len(),
            self.sample_size,
            max_depth
        );
        Ok(())
    }

    /// Anomaly score per row in `(0, 1]`; higher is more anomalous
    pub fn score_samples(&self, data: &Array2<f64>) -> Vec<f64> {
        if self.trees.is_empty() {
            return vec![0.0; data.nrows()];
        }
        let normalizer = average_path_length(self.sample_size).max(1.0);

        data.outer_iter()
            .map(|point| {
                let mean_path = self
                    .trees
                    .iter()
                    .map(|tree| tree.path_length(&point))
                    .sum::<f64>()
                    / self.trees.len() as f64;
                2f64.powf(-mean_path / normalizer)
            })
            .collect()
    }

    /// Flag the `ceil(contamination * n)` highest-scoring rows
    pub fn predict(&self, data: &Array2<f64>) -> Vec<bool> {
        flag_top(&self.score_samples(data), self.contamination)
    }
}

/// Number of rows flagged for a contamination rate; at least one for non-empty input.
pub fn flag_count(n_rows: usize, contamination: f64) -> usize {
    if n_rows == 0 {
        return 0;
    }
    // absorb float noise such as 0.07 * 100 = 7.000000000000001
    let expected = (contamination * n_rows as f64 - 1e-9).ceil();
    (expected.max(1.0) as usize).min(n_rows)
}

/// Flag the highest scores; ties at the boundary go to the earlier row.
fn flag_top(scores: &[f64], contamination: f64) -> Vec<bool> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut flags = vec![false; scores.len()];
    for &row in order.iter().take(flag_count(scores.len(), contamination)) {
        flags[row] = true;
    }
    flags
}

/// Detector settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyParams {
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

/// A transaction with its outlier score and flag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTransaction {
    #[serde(flatten)]
    pub transaction: EnrichedTransaction,
    #[serde(rename = "Anomaly_Score")]
    pub score: f64,
    #[serde(rename = "Anomaly")]
    pub anomaly: bool,
}

/// Scores for every transaction, in input order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub scored: Vec<ScoredTransaction>,
    pub flagged: usize,
    pub contamination: f64,
}

impl AnomalyReport {
    /// The flagged subset, in input order
    pub fn anomalies(&self) -> Vec<&ScoredTransaction> {
        self.scored.iter().filter(|s| s.anomaly).collect()
    }
}

/// Feature matrix in [`ANOMALY_FEATURES`] order
pub fn anomaly_matrix(transactions: &[EnrichedTransaction]) -> Array2<f64> {
    let mut matrix = Array2::zeros((transactions.len(), ANOMALY_FEATURES.len()));
    for (mut row, tx) in matrix.outer_iter_mut().zip(transactions) {
        let source = &tx.source;
        row[0] = source.total_amount;
        row[1] = f64::from(source.quantity);
        row[2] = source.unit_price;
        row[3] = source.discount;
        row[4] = source.shipping_cost;
        row[5] = source.tax;
    }
    matrix
}

/// Score every transaction and flag the most anomalous fraction
pub fn detect_anomalies(
    transactions: &[EnrichedTransaction],
    params: &AnomalyParams,
) -> crate::Result<AnomalyReport> {
    let data = anomaly_matrix(transactions);
    let mut forest = IsolationForest::new()
        .with_n_estimators(params.n_estimators)
        .with_max_samples(params.max_samples)
        .with_contamination(params.contamination)
        .with_random_state(params.seed);
    forest.fit(&data)?;

    let contamination = forest.contamination();
    let scores = forest.score_samples(&data);
    let flags = flag_top(&scores, contamination);
    let flagged = flags.iter().filter(|&&f| f).count();

    log::info!(
        "Flagged {} of {} transactions as anomalous (contamination {})",
        flagged,
        transactions.len(),
        contamination
    );

    let scored = transactions
        .iter()
        .zip(scores.into_iter().zip(flags))
        .map(|(tx, (score, anomaly))| ScoredTransaction {
            transaction: tx.clone(),
            score,
            anomaly,
        })
        .collect();

    Ok(AnomalyReport {
        scored,
        flagged,
        contamination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enriched, population, transaction};
    use ndarray::array;

    fn clustered_with_outlier() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..49 {
            let jitter = (i % 7) as f64 * 0.1;
            rows.extend_from_slice(&[10.0 + jitter, 1.0 + jitter]);
        }
        rows.extend_from_slice(&[250.0, 40.0]);
        Array2::from_shape_vec((50, 2), rows).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244).abs() < 1e-2);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = clustered_with_outlier();
        let mut forest = IsolationForest::new()
            .with_contamination(0.02)
            .with_random_state(3);
        forest.fit(&data).unwrap();

        let scores = forest.score_samples(&data);
        assert_eq!(scores.len(), 50);
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));

        let flags = forest.predict(&data);
        assert_eq!(flags.iter().filter(|&&f| f).count(), 1);
        assert!(flags[49]);
    }

    #[test]
    fn test_flag_count() {
        assert_eq!(flag_count(100, 0.05), 5);
        assert_eq!(flag_count(100, 0.07), 7);
        assert_eq!(flag_count(101, 0.05), 6);
        assert_eq!(flag_count(3, 0.01), 1);
        assert_eq!(flag_count(0, 0.5), 0);
    }

    #[test]
    fn test_constant_data_breaks_ties_by_row() {
        let data = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        let mut forest = IsolationForest::new().with_contamination(0.5);
        forest.fit(&data).unwrap();

        let scores = forest.score_samples(&data);
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(forest.predict(&data), vec![true, true, false, false]);
    }

    #[test]
    fn test_invalid_parameters() {
        let data = clustered_with_outlier();
        for contamination in [0.0, 1.0, 1.5] {
            let mut forest = IsolationForest::new().with_contamination(contamination);
            assert!(matches!(forest.fit(&data), Err(AnalyticsError::Parameter(_))));
            assert!(!forest.is_fitted());
        }
        let mut forest = IsolationForest::new().with_n_estimators(0);
        assert!(forest.fit(&data).is_err());
    }

    #[test]
    fn test_detect_anomalies_counts_and_ordering() {
        let rows = population(80);
        let n = rows.len();
        let report = detect_anomalies(&rows, &AnomalyParams::default()).unwrap();

        assert_eq!(report.scored.len(), n);
        assert_eq!(report.flagged, flag_count(n, 0.05));
        assert_eq!(report.anomalies().len(), report.flagged);

        let min_flagged = report
            .anomalies()
            .iter()
            .map(|s| s.score)
            .fold(f64::INFINITY, f64::min);
        let max_unflagged = report
            .scored
            .iter()
            .filter(|s| !s.anomaly)
            .map(|s| s.score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(min_flagged >= max_unflagged);
    }

    #[test]
    fn test_extreme_values_do_not_break_splits() {
        // the width of this column overflows f64
        let mut rows = Vec::new();
        for i in 0..20 {
            let total = if i % 2 == 0 { 1e308 } else { -1e308 };
            rows.extend_from_slice(&[total, i as f64]);
        }
        let data = Array2::from_shape_vec((20, 2), rows).unwrap();
        let mut forest = IsolationForest::new().with_random_state(5);
        forest.fit(&data).unwrap();
        let scores = forest.score_samples(&data);
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));

        let with_infinity = array![[1.0, f64::INFINITY], [2.0, 1.0], [3.0, 1.0], [40.0, 1.0]];
        let mut forest = IsolationForest::new().with_contamination(0.25);
        forest.fit(&with_infinity).unwrap();
        assert_eq!(forest.predict(&with_infinity).len(), 4);
    }

    #[test]
    fn test_detect_anomalies_on_extreme_totals() {
        let mut rows: Vec<_> = (0..12)
            .map(|c| transaction(&format!("C{c}"), 50.0 + c as f64, "2024-02-01"))
            .collect();
        rows[3].total_amount = 1e308;
        rows[7].total_amount = -1e308;

        let report = detect_anomalies(&enriched(rows), &AnomalyParams::default()).unwrap();
        assert_eq!(report.scored.len(), 12);
        assert!(report.scored.iter().all(|s| s.score > 0.0 && s.score <= 1.0));
    }

    #[test]
    fn test_report_uses_forest_contamination() {
        let params = AnomalyParams {
            contamination: 0.1,
            ..AnomalyParams::default()
        };
        let forest = IsolationForest::new().with_contamination(params.contamination);
        assert_eq!(forest.contamination(), 0.1);

        let rows = population(20);
        let report = detect_anomalies(&rows, &params).unwrap();
        assert_eq!(report.contamination, forest.contamination());
        assert_eq!(report.flagged, flag_count(rows.len(), forest.contamination()));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let rows = population(30);
        let params = AnomalyParams {
            seed: 11,
            ..AnomalyParams::default()
        };
        let first = detect_anomalies(&rows, &params).unwrap();
        let second = detect_anomalies(&rows, &params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(
            detect_anomalies(&[], &AnomalyParams::default()),
            Err(AnalyticsError::EmptyDataset(_))
        ));
        let single = enriched(vec![transaction("C1", 10.0, "2024-01-01")]);
        let report = detect_anomalies(&single, &AnomalyParams::default()).unwrap();
        assert_eq!(report.flagged, 1);
    }
}
