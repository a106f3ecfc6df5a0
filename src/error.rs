//! Error taxonomy for the analytics engine

use thiserror::Error;

/// Errors raised by the analytics pipeline.
///
/// Every public operation fails independently; none of these variants leaves a partial result.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// A required column is missing, mistyped, or holds unparseable values.
    #[error("Schema error: {0}")]
    Schema(String),

    /// An operation that needs at least one row received none.
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// A caller-supplied parameter is outside its valid range.
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// The K-Means backend rejected the fit.
    #[error("Clustering failed: {0}")]
    Clustering(String),

    /// CSV ingestion or a dataframe aggregation failed inside polars.
    #[error("Dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl AnalyticsError {
    pub(crate) fn empty(what: impl Into<String>) -> Self {
        AnalyticsError::EmptyDataset(what.into())
    }

    pub(crate) fn parameter(what: impl Into<String>) -> Self {
        AnalyticsError::Parameter(what.into())
    }
}
