//! SalesForge: sales analytics over e-commerce transaction snapshots
//!
//! This library loads a transaction CSV, enriches every row with calendar and
//! revenue attributes, and derives business metrics, grouped summaries, RFM
//! segments with churn risk, K-Means behavioral clusters, and isolation-forest
//! anomaly flags.

pub mod anomaly;
pub mod churn;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod rfm;
pub mod stats;

#[cfg(test)]
mod fixtures;

// Re-export public items for easier access
pub use anomaly::{detect_anomalies, AnomalyParams, AnomalyReport, IsolationForest};
pub use churn::{assign_churn_risk, ChurnRisk};
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_transactions, transactions_from_frame, OrderStatus, Transaction};
pub use error::AnalyticsError;
pub use frame::enriched_frame;
pub use metrics::{
    category_performance, category_performance_frame, filter_transactions, geographic_summary,
    geographic_summary_frame, group_summary, group_summary_frame, recommend_products,
    summary_metrics, time_series, time_series_frame, top_products, Dimension, Measure, Metric,
    TimeBucket, TransactionFilter,
};
pub use model::{
    cluster_customer_features, cluster_customers, cluster_customers_with, customer_features,
    customer_features_frame, fit_kmeans, ClusterLabel, ClusterLabeler, ClusteringParams,
    ClusteringResult, KMeansModel,
};
pub use pipeline::{AnalysisReport, Pipeline};
pub use preprocess::{preprocess, preprocess_frame, EnrichedTransaction, OrderSize};
pub use rfm::{score_rfm, score_rfm_frame, RfmRecord, RfmTable, Segment};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalyticsError>;
