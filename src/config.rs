//! Pipeline configuration with serde-backed file loading

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;
use crate::metrics::TimeBucket;

/// Tunables for a full analysis run.
///
/// Missing keys in a JSON config file fall back to [`PipelineConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of behavioral clusters (K)
    pub n_clusters: usize,
    /// Independent K-Means initializations; the lowest-inertia run wins
    pub kmeans_runs: usize,
    pub kmeans_max_iters: u64,
    pub kmeans_tolerance: f64,
    /// Fraction of transactions expected to be anomalous
    pub contamination: f64,
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Subsample size per isolation tree
    pub max_samples: usize,
    /// Seed shared by every randomized component
    pub seed: u64,
    /// Row limit for grouped summaries
    pub top_n: usize,
    pub time_bucket: TimeBucket,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            kmeans_runs: 10,
            kmeans_max_iters: 300,
            kmeans_tolerance: 1e-4,
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
            top_n: 10,
            time_bucket: TimeBucket::Month,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter against its valid range.
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_clusters <= 1 {
            return Err(AnalyticsError::parameter(format!(
                "n_clusters must be at least 2, got {}",
                self.n_clusters
            )));
        }
        if self.kmeans_runs == 0 || self.kmeans_max_iters == 0 {
            return Err(AnalyticsError::parameter(
                "kmeans_runs and kmeans_max_iters must be positive",
            ));
        }
        if !(self.kmeans_tolerance > 0.0) {
            return Err(AnalyticsError::parameter("kmeans_tolerance must be positive"));
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(AnalyticsError::parameter(format!(
                "contamination must lie in (0, 1), got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 || self.max_samples < 2 {
            return Err(AnalyticsError::parameter(
                "n_estimators must be positive and max_samples at least 2",
            ));
        }
        if self.top_n == 0 {
            return Err(AnalyticsError::parameter("top_n must be positive"));
        }
        Ok(())
    }
}
