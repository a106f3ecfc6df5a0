//! SalesForge: sales analytics CLI
//!
//! This is the main entrypoint that orchestrates data loading, the analysis
//! pipeline, report output, and cluster prediction.

use anyhow::{Context, Result};
use clap::Parser;
use salesforge::model::ClusteringParams;
use salesforge::{
    cluster_customers, load_transactions, preprocess, recommend_products, AnalysisReport, Args,
    Pipeline, PipelineConfig,
};
use std::fs;
use std::time::Instant;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.pipeline_config()?;

    // Check if in prediction mode
    if let Some(profile) = args.parse_profile()? {
        run_prediction_mode(&args, &config, profile)?;
    } else {
        run_full_pipeline(&args, config)?;
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` raises the default level to debug.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

/// Run prediction mode for a single customer profile
fn run_prediction_mode(args: &Args, config: &PipelineConfig, profile: [f64; 6]) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input profile: spent={}, aov={}, orders={}, items={}, discount={}, shipping={}",
        profile[0], profile[1], profile[2], profile[3], profile[4], profile[5]
    );

    let start_time = Instant::now();

    log::info!("Loading training data from: {}", args.input);
    let transactions = preprocess(
        &load_transactions(&args.input).with_context(|| format!("failed to load {}", args.input))?,
    );

    let result = cluster_customers(&transactions, &ClusteringParams::from(config))?;
    let cluster = result.model.predict(&profile)?;
    let elapsed = start_time.elapsed();

    let label = result
        .label_of(cluster)
        .map_or_else(|| "Unlabelled".to_string(), |l| l.to_string());
    println!("\n✓ Predicted Cluster: {} ({})", cluster, label);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());

    let cluster_sizes = result.model.cluster_sizes();
    let total_customers = result.assignments.len();
    let cluster_percentage = (cluster_sizes[cluster] as f64 / total_customers as f64) * 100.0;
    println!(
        "  Size: {} customers ({:.1}% of total)",
        cluster_sizes[cluster], cluster_percentage
    );

    Ok(())
}

/// Run the full analysis pipeline
fn run_full_pipeline(args: &Args, config: PipelineConfig) -> Result<()> {
    println!("=== Sales Analytics Pipeline ===\n");

    let start_time = Instant::now();
    let top_n = config.top_n;
    let pipeline = Pipeline::new(config)?;

    let raw = load_transactions(&args.input)
        .with_context(|| format!("failed to load {}", args.input))?;
    println!("✓ Data loaded: {} transactions", raw.len());

    let transactions = preprocess(&raw);
    let report = pipeline.run_enriched(&transactions);
    print_summary(&report);

    if let Some(customer) = &args.recommend {
        println!("\n=== Recommendations for {} ===", customer);
        for row in recommend_products(&transactions, Some(customer.as_str()), top_n)? {
            println!("  {:<30} {:>12.2}", row.key, row.value);
        }
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report.to_json()?)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path))?;
        println!("\nReport saved to: {}", path);
    }

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());

    let failed = report.failed_stages();
    if !failed.is_empty() {
        println!("Failed stages: {}", failed.join(", "));
    }

    Ok(())
}

fn print_summary(report: &AnalysisReport) {
    match &report.metrics {
        Ok(metrics) => {
            println!("\n=== Summary Metrics ===");
            for (name, value) in metrics.to_map() {
                println!("  {:<22} {:>14.2}", name, value);
            }
        }
        Err(e) => println!("\n✗ Metrics unavailable: {}", e),
    }

    if let Ok(rows) = &report.top_categories {
        println!("\n=== Top Categories by Revenue ===");
        for row in rows {
            println!("  {:<30} {:>12.2}", row.key, row.value);
        }
    }

    match &report.rfm {
        Ok(table) => {
            println!("\n=== Customer Segments ===");
            for (segment, count) in table.segment_counts() {
                println!("  {:<22} {:>6}", segment, count);
            }
            if table.binning.is_degenerate() {
                println!("  (score bins collapsed: {:?})", table.binning);
            }
        }
        Err(e) => println!("\n✗ RFM unavailable: {}", e),
    }

    match &report.clusters {
        Ok(result) => {
            println!("\n=== Cluster Statistics ===");
            let total = result.assignments.len() as f64;
            for summary in &result.summaries {
                let size = summary.profile.size;
                println!(
                    "Cluster {}: {} customers ({:.1}%) - {}",
                    summary.profile.cluster,
                    size,
                    size as f64 / total * 100.0,
                    summary.label
                );
            }
            let silhouette = result.model.silhouette_sample(100);
            println!("\nSilhouette score (sample): {:.3}", silhouette);
            println!("Within-cluster sum of squares: {:.2}", result.model.inertia);
        }
        Err(e) => println!("\n✗ Clustering unavailable: {}", e),
    }

    match &report.anomalies {
        Ok(anomalies) => println!(
            "\n✓ Anomalies flagged: {} of {} transactions",
            anomalies.flagged, report.transactions
        ),
        Err(e) => println!("\n✗ Anomaly detection unavailable: {}", e),
    }
}
