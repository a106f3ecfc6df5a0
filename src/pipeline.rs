//! Full analysis run over one dataset snapshot
//!
//! Stages read the same enriched transactions, and the grouped stages share one
//! immutable polars frame built up front. No stage mutates shared state, so a
//! failure in one stage is recorded in the report without touching the others.

use std::path::Path;
use std::time::Instant;

use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::{json, Value};

use crate::anomaly::{detect_anomalies, AnomalyParams, AnomalyReport};
use crate::churn::assign_churn_risk;
use crate::config::PipelineConfig;
use crate::data::{load_transactions, Transaction};
use crate::error::AnalyticsError;
use crate::frame::enriched_frame;
use crate::metrics::{
    category_performance_frame, geographic_summary_frame, group_summary_frame, summary_metrics,
    time_series_frame, CategoryPerformance, Dimension, GeographicSummary, GroupRow, Measure,
    Metric, SummaryMetrics, TimeBucketRow,
};
use crate::model::{
    cluster_customer_features, customer_features_frame, ClusteringParams, ClusteringResult,
    MedianLabeler,
};
use crate::preprocess::{preprocess, EnrichedTransaction};
use crate::rfm::{score_rfm_frame, RfmTable};

impl From<&PipelineConfig> for ClusteringParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            n_clusters: config.n_clusters,
            n_runs: config.kmeans_runs,
            max_iters: config.kmeans_max_iters,
            tolerance: config.kmeans_tolerance,
            seed: config.seed,
        }
    }
}

impl From<&PipelineConfig> for AnomalyParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            contamination: config.contamination,
            n_estimators: config.n_estimators,
            max_samples: config.max_samples,
            seed: config.seed,
        }
    }
}

/// Every derived table of one run; each stage carries its own outcome.
#[derive(Debug)]
pub struct AnalysisReport {
    pub transactions: usize,
    pub metrics: crate::Result<SummaryMetrics>,
    pub top_categories: crate::Result<Vec<GroupRow>>,
    pub top_countries: crate::Result<Vec<GroupRow>>,
    pub category_performance: crate::Result<Vec<CategoryPerformance>>,
    pub geography: crate::Result<Vec<GeographicSummary>>,
    pub time_series: crate::Result<Vec<TimeBucketRow>>,
    /// RFM scores with churn risk attached
    pub rfm: crate::Result<RfmTable>,
    pub clusters: crate::Result<ClusteringResult>,
    pub anomalies: crate::Result<AnomalyReport>,
}

impl AnalysisReport {
    /// Names of the stages that failed
    pub fn failed_stages(&self) -> Vec<&'static str> {
        [
            ("metrics", self.metrics.is_err()),
            ("top_categories", self.top_categories.is_err()),
            ("top_countries", self.top_countries.is_err()),
            ("category_performance", self.category_performance.is_err()),
            ("geography", self.geography.is_err()),
            ("time_series", self.time_series.is_err()),
            ("rfm", self.rfm.is_err()),
            ("clusters", self.clusters.is_err()),
            ("anomalies", self.anomalies.is_err()),
        ]
        .into_iter()
        .filter_map(|(name, failed)| failed.then_some(name))
        .collect()
    }

    /// Render the report as JSON; failed stages become `{"error": ...}` objects.
    pub fn to_json(&self) -> crate::Result<Value> {
        let clusters = match &self.clusters {
            Ok(result) => json!({
                "inertia": result.model.inertia,
                "sizes": result.model.cluster_sizes(),
                "summaries": serde_json::to_value(&result.summaries)?,
                "assignments": serde_json::to_value(&result.assignments)?,
            }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        let anomalies = match &self.anomalies {
            Ok(report) => json!({
                "flagged": report.flagged,
                "contamination": report.contamination,
                "transactions": serde_json::to_value(report.anomalies())?,
            }),
            Err(e) => json!({ "error": e.to_string() }),
        };

        Ok(json!({
            "transactions": self.transactions,
            "metrics": stage(&self.metrics)?,
            "top_categories": stage(&self.top_categories)?,
            "top_countries": stage(&self.top_countries)?,
            "category_performance": stage(&self.category_performance)?,
            "geography": stage(&self.geography)?,
            "time_series": stage(&self.time_series)?,
            "rfm": stage(&self.rfm)?,
            "clusters": clusters,
            "anomalies": anomalies,
        }))
    }
}

fn stage<T: Serialize>(outcome: &crate::Result<T>) -> crate::Result<Value> {
    Ok(match outcome {
        Ok(value) => serde_json::to_value(value)?,
        Err(e) => json!({ "error": e.to_string() }),
    })
}

/// Runs every analytics component from a validated configuration
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a CSV file and analyse it; schema errors abort the run.
    pub fn run_file(&self, path: impl AsRef<Path>) -> crate::Result<AnalysisReport> {
        let transactions = load_transactions(path)?;
        Ok(self.run(&transactions))
    }

    pub fn run(&self, transactions: &[Transaction]) -> AnalysisReport {
        let start = Instant::now();
        let enriched = preprocess(transactions);
        log::info!(
            "Preprocessed {} transactions in {:.2}s",
            enriched.len(),
            start.elapsed().as_secs_f64()
        );
        self.run_enriched(&enriched)
    }

    pub fn run_enriched(&self, transactions: &[EnrichedTransaction]) -> AnalysisReport {
        let config = &self.config;
        let revenue = Metric::Sum(Measure::TotalAmount);

        let frame = enriched_frame(transactions);
        if let Err(e) = &frame {
            log::warn!("Could not build the analysis frame: {e}");
        }

        let metrics = timed("metrics", || summary_metrics(transactions));
        let top_categories = on_frame(&frame, |df| {
            group_summary_frame(df, Dimension::Category, revenue, config.top_n)
        });
        let top_countries = on_frame(&frame, |df| {
            group_summary_frame(df, Dimension::Country, revenue, config.top_n)
        });
        let category_performance = on_frame(&frame, category_performance_frame);
        let geography = on_frame(&frame, geographic_summary_frame);
        let time_series = timed("time_series", || {
            on_frame(&frame, |df| time_series_frame(df, config.time_bucket))
        });
        let rfm = timed("rfm", || {
            on_frame(&frame, score_rfm_frame).and_then(|t| assign_churn_risk(&t))
        });
        let clusters = timed("clustering", || {
            let customers = on_frame(&frame, customer_features_frame)?;
            cluster_customer_features(customers, &ClusteringParams::from(config), &MedianLabeler)
        });
        let anomalies = timed("anomalies", || {
            detect_anomalies(transactions, &AnomalyParams::from(config))
        });

        let report = AnalysisReport {
            transactions: transactions.len(),
            metrics,
            top_categories,
            top_countries,
            category_performance,
            geography,
            time_series,
            rfm,
            clusters,
            anomalies,
        };

        let failed = report.failed_stages();
        if !failed.is_empty() {
            log::warn!("Stages failed: {}", failed.join(", "));
        }
        report
    }
}

/// Run a grouped stage on the shared frame, or fail it when the frame could not be built.
fn on_frame<T>(
    frame: &crate::Result<DataFrame>,
    stage: impl FnOnce(&DataFrame) -> crate::Result<T>,
) -> crate::Result<T> {
    match frame {
        Ok(df) => stage(df),
        Err(e) => Err(AnalyticsError::Schema(format!("analysis frame unavailable: {e}"))),
    }
}

fn timed<T>(name: &str, stage: impl FnOnce() -> crate::Result<T>) -> crate::Result<T> {
    let start = Instant::now();
    let outcome = stage();
    match &outcome {
        Ok(_) => log::info!("Stage {name} finished in {:.2}s", start.elapsed().as_secs_f64()),
        Err(e) => log::warn!("Stage {name} failed: {e}"),
    }
    outcome
}
