//! Command-line interface definitions and argument parsing

use clap::Parser;

use crate::config::PipelineConfig;
use crate::error::AnalyticsError;
use crate::metrics::TimeBucket;
use crate::model::FEATURE_NAMES;

/// Sales analytics over an e-commerce transaction CSV
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "sales.csv")]
    pub input: String,

    /// JSON file with pipeline settings; flags below override it
    #[arg(short, long)]
    pub config: Option<String>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Expected fraction of anomalous transactions
    #[arg(long)]
    pub contamination: Option<f64>,

    /// Seed for clustering and anomaly detection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Time-series granularity
    #[arg(long, value_enum)]
    pub bucket: Option<TimeBucket>,

    /// Rows kept in grouped summaries
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Write the full JSON report to this path
    #[arg(short, long)]
    pub output: Option<String>,

    /// Prediction mode: provide a customer profile as comma-separated values
    /// Total_Spent,Avg_Order_Value,Order_Count,Total_Items,Avg_Discount,Avg_Shipping
    /// Example: --predict "1200,300,4,9,0.1,12.5"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Print product recommendations for this customer ID
    #[arg(short, long)]
    pub recommend: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the customer profile from the predict string
    pub fn parse_profile(&self) -> crate::Result<Option<[f64; 6]>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != FEATURE_NAMES.len() {
            return Err(AnalyticsError::parameter(format!(
                "Predict values must be in format '{}'",
                FEATURE_NAMES.join(",")
            )));
        }

        let mut profile = [0.0; 6];
        for ((slot, raw), name) in profile.iter_mut().zip(&parts).zip(FEATURE_NAMES) {
            *slot = raw
                .parse()
                .map_err(|_| AnalyticsError::parameter(format!("Invalid {name} value: {raw}")))?;
        }
        Ok(Some(profile))
    }

    /// Build the run configuration: defaults, then the config file, then flags.
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(k) = self.clusters {
            config.n_clusters = k;
        }
        if let Some(contamination) = self.contamination {
            config.contamination = contamination;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(bucket) = self.bucket {
            config.time_bucket = bucket;
        }
        if let Some(top_n) = self.top_n {
            config.top_n = top_n;
        }

        config.validate()?;
        Ok(config)
    }
}
