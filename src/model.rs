//! Behavioral K-Means clustering of customers

use std::fmt;

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{s, Array1, Array2, ArrayView1};
use polars::prelude::{col, DataFrame, IntoLazy};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::frame::{enriched_frame, f64_values, str_values, u64_values};
use crate::preprocess::EnrichedTransaction;
use crate::stats::{mean, median, StandardScaler};

/// Order of the columns in every customer feature vector
pub const FEATURE_NAMES: [&str; 6] = [
    "Total_Spent",
    "Avg_Order_Value",
    "Order_Count",
    "Total_Items",
    "Avg_Discount",
    "Avg_Shipping",
];

/// Per-customer purchase behaviour
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerFeatures {
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    #[serde(rename = "Total_Spent")]
    pub total_spent: f64,
    #[serde(rename = "Avg_Order_Value")]
    pub avg_order_value: f64,
    #[serde(rename = "Order_Count")]
    pub order_count: usize,
    #[serde(rename = "Total_Items")]
    pub total_items: u64,
    #[serde(rename = "Avg_Discount")]
    pub avg_discount: f64,
    #[serde(rename = "Avg_Shipping")]
    pub avg_shipping: f64,
}

impl CustomerFeatures {
    pub fn to_vector(&self) -> [f64; 6] {
        [
            self.total_spent,
            self.avg_order_value,
            self.order_count as f64,
            self.total_items as f64,
            self.avg_discount,
            self.avg_shipping,
        ]
    }
}

/// Aggregate transactions into one feature vector per customer, ordered by customer id.
pub fn customer_features(transactions: &[EnrichedTransaction]) -> crate::Result<Vec<CustomerFeatures>> {
    customer_features_frame(&enriched_frame(transactions)?)
}

/// [`customer_features`] over a frame built by [`enriched_frame`]
pub fn customer_features_frame(frame: &DataFrame) -> crate::Result<Vec<CustomerFeatures>> {
    let table = frame
        .clone()
        .lazy()
        .group_by([col("CustomerID")])
        .agg([
            col("TotalAmount").sum().alias("Total_Spent"),
            col("TotalAmount").mean().alias("Avg_Order_Value"),
            col("OrderID").count().alias("Order_Count"),
            col("Quantity").sum().alias("Total_Items"),
            col("Discount").mean().alias("Avg_Discount"),
            col("ShippingCost").mean().alias("Avg_Shipping"),
        ])
        .sort(["CustomerID"], Default::default())
        .collect()?;

    let customer_ids = str_values(&table, "CustomerID")?;
    let total_spent = f64_values(&table, "Total_Spent")?;
    let avg_order_value = f64_values(&table, "Avg_Order_Value")?;
    let order_count = u64_values(&table, "Order_Count")?;
    let total_items = u64_values(&table, "Total_Items")?;
    let avg_discount = f64_values(&table, "Avg_Discount")?;
    let avg_shipping = f64_values(&table, "Avg_Shipping")?;

    Ok(customer_ids
        .into_iter()
        .enumerate()
        .map(|(i, customer_id)| CustomerFeatures {
            customer_id,
            total_spent: total_spent[i],
            avg_order_value: avg_order_value[i],
            order_count: order_count[i] as usize,
            total_items: total_items[i],
            avg_discount: avg_discount[i],
            avg_shipping: avg_shipping[i],
        })
        .collect())
}

/// K-Means settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringParams {
    pub n_clusters: usize,
    /// Independent initializations; the lowest-inertia run is kept
    pub n_runs: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
    /// Scaler fitted on the raw customer features
    pub scaler: StandardScaler,
    /// Standardized training features
    pub features: Array2<f64>,
}

impl KMeansModel {
    /// Assign a raw customer profile (in [`FEATURE_NAMES`] order) to its nearest centroid
    pub fn predict(&self, profile: &[f64; 6]) -> crate::Result<usize> {
        if profile.iter().any(|v| !v.is_finite()) {
            return Err(AnalyticsError::parameter(
                "customer profile values must be finite",
            ));
        }

        let scaled = self.scaler.transform_row(&Array1::from(profile.to_vec()));
        let mut min_distance = f64::INFINITY;
        let mut closest_cluster = 0;

        for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
            let distance = squared_distance(&scaled.view(), &centroid);
            if distance < min_distance {
                min_distance = distance;
                closest_cluster = cluster_idx;
            }
        }

        Ok(closest_cluster)
    }

    /// Customers per cluster, indexed by cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.labels
            .iter()
            .fold(vec![0; self.n_clusters], |mut sizes, &cluster| {
                if let Some(size) = sizes.get_mut(cluster) {
                    *size += 1;
                }
                sizes
            })
    }

    /// Mean silhouette coefficient over the first `sample_size` customers
    ///
    /// Each point compares its mean distance to its own cluster (cohesion) with
    /// the mean distance to the nearest other cluster (separation).
    pub fn silhouette_sample(&self, sample_size: usize) -> f64 {
        let n = self.features.nrows().min(sample_size);
        if n < 2 {
            return 0.0;
        }
        let sample = self.features.slice(s![..n, ..]);

        let total: f64 = sample
            .outer_iter()
            .enumerate()
            .map(|(i, point)| {
                // (distance sum, member count) per cluster, the point itself excluded
                let mut per_cluster = vec![(0.0_f64, 0_usize); self.n_clusters];
                for (j, other) in sample.outer_iter().enumerate() {
                    if let Some(slot) = per_cluster.get_mut(self.labels[j]).filter(|_| i != j) {
                        slot.0 += squared_distance(&point, &other).sqrt();
                        slot.1 += 1;
                    }
                }

                let own = self.labels[i];
                let mean_to = |(sum, count): (f64, usize)| (count > 0).then(|| sum / count as f64);
                let cohesion = per_cluster.get(own).copied().and_then(mean_to).unwrap_or(0.0);
                let separation = per_cluster
                    .iter()
                    .enumerate()
                    .filter(|&(cluster, _)| cluster != own)
                    .filter_map(|(_, &acc)| mean_to(acc))
                    .fold(f64::INFINITY, f64::min);

                let spread = cohesion.max(separation);
                if separation.is_infinite() || spread == 0.0 {
                    0.0
                } else {
                    (separation - cohesion) / spread
                }
            })
            .sum();

        total / n as f64
    }
}

/// Fit K-Means on standardized customer features
///
/// # Arguments
/// * `customers` - One feature vector per customer
/// * `params` - Cluster count, run count, iteration cap, tolerance and seed
///
/// # Returns
/// * Fitted `KMeansModel`; identical inputs and seed give identical assignments
pub fn fit_kmeans(
    customers: &[CustomerFeatures],
    params: &ClusteringParams,
) -> crate::Result<KMeansModel> {
    if params.n_clusters <= 1 {
        return Err(AnalyticsError::parameter(format!(
            "number of clusters must be at least 2, got {}",
            params.n_clusters
        )));
    }
    if params.n_runs == 0 || params.max_iters == 0 {
        return Err(AnalyticsError::parameter(
            "K-Means needs at least one run and one iteration",
        ));
    }
    if customers.is_empty() {
        return Err(AnalyticsError::empty("clustering needs at least one customer"));
    }
    if customers.len() < params.n_clusters {
        return Err(AnalyticsError::parameter(format!(
            "Number of customers ({}) must be at least equal to number of clusters ({})",
            customers.len(),
            params.n_clusters
        )));
    }

    let n_samples = customers.len();
    let raw: Vec<f64> = customers.iter().flat_map(|c| c.to_vector()).collect();
    let raw_features = Array2::from_shape_vec((n_samples, FEATURE_NAMES.len()), raw)
        .map_err(|e| AnalyticsError::Clustering(e.to_string()))?;

    // Standardize so Total_Spent does not dominate the distances
    let scaler = StandardScaler::fit(&raw_features);
    let features = scaler.transform(&raw_features);

    let targets: Array1<usize> = Array1::zeros(n_samples); // Dummy targets for unsupervised learning
    let dataset = DatasetBase::new(features.clone(), targets);

    let rng = Xoshiro256Plus::seed_from_u64(params.seed);
    let model = KMeans::params_with(params.n_clusters, rng, L2Dist)
        .n_runs(params.n_runs)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| AnalyticsError::Clustering(e.to_string()))?;

    let labels: Array1<usize> = model.predict(&features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&features, &labels, &centroids);
    log::debug!(
        "K-Means fitted: k={} runs={} inertia={:.4}",
        params.n_clusters,
        params.n_runs,
        inertia
    );

    Ok(KMeansModel {
        model,
        n_clusters: params.n_clusters,
        labels,
        centroids,
        inertia,
        scaler,
        features,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClusterLabel {
    #[serde(rename = "VIP Customers")]
    VipCustomers,
    #[serde(rename = "Frequent Buyers")]
    FrequentBuyers,
    #[serde(rename = "High-Value Buyers")]
    HighValueBuyers,
    #[serde(rename = "Occasional Buyers")]
    OccasionalBuyers,
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterLabel::VipCustomers => "VIP Customers",
            ClusterLabel::FrequentBuyers => "Frequent Buyers",
            ClusterLabel::HighValueBuyers => "High-Value Buyers",
            ClusterLabel::OccasionalBuyers => "Occasional Buyers",
        })
    }
}

/// Per-cluster feature means in raw (unscaled) units
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub mean_total_spent: f64,
    pub mean_avg_order_value: f64,
    pub mean_order_count: f64,
    pub mean_total_items: f64,
    pub mean_avg_discount: f64,
    pub mean_avg_shipping: f64,
}

/// Maps cluster profiles to semantic labels, one label per profile.
pub trait ClusterLabeler {
    fn label(&self, profiles: &[ClusterProfile]) -> Vec<ClusterLabel>;
}

/// Labels clusters against the median of the cluster means.
///
/// Labels may repeat across clusters when K > 4.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianLabeler;

impl ClusterLabeler for MedianLabeler {
    fn label(&self, profiles: &[ClusterProfile]) -> Vec<ClusterLabel> {
        let median_of = |field: fn(&ClusterProfile) -> f64| {
            let values: Vec<f64> = profiles.iter().map(field).collect();
            median(&values).unwrap_or(f64::NAN)
        };
        let spent = median_of(|p| p.mean_total_spent);
        let orders = median_of(|p| p.mean_order_count);
        let order_value = median_of(|p| p.mean_avg_order_value);

        profiles
            .iter()
            .map(|p| {
                if p.mean_total_spent > spent && p.mean_order_count > orders {
                    ClusterLabel::VipCustomers
                } else if p.mean_order_count > orders {
                    ClusterLabel::FrequentBuyers
                } else if p.mean_avg_order_value > order_value {
                    ClusterLabel::HighValueBuyers
                } else {
                    ClusterLabel::OccasionalBuyers
                }
            })
            .collect()
    }
}

/// A customer's features with its cluster id and label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerCluster {
    #[serde(flatten)]
    pub features: CustomerFeatures,
    #[serde(rename = "Cluster")]
    pub cluster: usize,
    #[serde(rename = "Cluster_Name")]
    pub label: ClusterLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    #[serde(flatten)]
    pub profile: ClusterProfile,
    pub label: ClusterLabel,
}

/// Output of the clustering engine
#[derive(Debug)]
pub struct ClusteringResult {
    pub assignments: Vec<CustomerCluster>,
    /// One row per non-empty cluster, ordered by cluster id
    pub summaries: Vec<ClusterSummary>,
    pub model: KMeansModel,
}

impl ClusteringResult {
    pub fn label_of(&self, cluster: usize) -> Option<ClusterLabel> {
        self.summaries
            .iter()
            .find(|s| s.profile.cluster == cluster)
            .map(|s| s.label)
    }
}

/// Cluster customers and label each cluster with [`MedianLabeler`].
pub fn cluster_customers(
    transactions: &[EnrichedTransaction],
    params: &ClusteringParams,
) -> crate::Result<ClusteringResult> {
    cluster_customers_with(transactions, params, &MedianLabeler)
}

/// Cluster customers, then label clusters with a caller-supplied policy.
pub fn cluster_customers_with(
    transactions: &[EnrichedTransaction],
    params: &ClusteringParams,
    labeler: &dyn ClusterLabeler,
) -> crate::Result<ClusteringResult> {
    cluster_customer_features(customer_features(transactions)?, params, labeler)
}

/// Cluster an already aggregated feature table, then label the clusters.
pub fn cluster_customer_features(
    customers: Vec<CustomerFeatures>,
    params: &ClusteringParams,
    labeler: &dyn ClusterLabeler,
) -> crate::Result<ClusteringResult> {
    let model = fit_kmeans(&customers, params)?;

    let profiles = cluster_profiles(&customers, &model.labels, model.n_clusters);
    if profiles.len() < model.n_clusters {
        log::warn!(
            "{} of {} clusters ended up empty",
            model.n_clusters - profiles.len(),
            model.n_clusters
        );
    }
    let labels = labeler.label(&profiles);

    let mut label_by_cluster = vec![ClusterLabel::OccasionalBuyers; model.n_clusters];
    for (profile, label) in profiles.iter().zip(&labels) {
        label_by_cluster[profile.cluster] = *label;
    }

    let assignments = customers
        .into_iter()
        .zip(model.labels.iter())
        .map(|(features, &cluster)| CustomerCluster {
            features,
            cluster,
            label: label_by_cluster[cluster],
        })
        .collect();
    let summaries = profiles
        .into_iter()
        .zip(labels)
        .map(|(profile, label)| ClusterSummary { profile, label })
        .collect();

    log::info!(
        "Clustered customers into {} groups (inertia {:.2})",
        model.n_clusters,
        model.inertia
    );

    Ok(ClusteringResult {
        assignments,
        summaries,
        model,
    })
}

/// Mean raw features per non-empty cluster
fn cluster_profiles(
    customers: &[CustomerFeatures],
    labels: &Array1<usize>,
    n_clusters: usize,
) -> Vec<ClusterProfile> {
    let mut members: Vec<Vec<&CustomerFeatures>> = vec![Vec::new(); n_clusters];
    for (customer, &cluster) in customers.iter().zip(labels.iter()) {
        if cluster < n_clusters {
            members[cluster].push(customer);
        }
    }

    members
        .into_iter()
        .enumerate()
        .filter(|(_, group)| !group.is_empty())
        .map(|(cluster, group)| {
            let mean_of = |field: fn(&CustomerFeatures) -> f64| {
                mean(group.iter().map(|c| field(c))).unwrap_or(f64::NAN)
            };
            ClusterProfile {
                cluster,
                size: group.len(),
                mean_total_spent: mean_of(|c| c.total_spent),
                mean_avg_order_value: mean_of(|c| c.avg_order_value),
                mean_order_count: mean_of(|c| c.order_count as f64),
                mean_total_items: mean_of(|c| c.total_items as f64),
                mean_avg_discount: mean_of(|c| c.avg_discount),
                mean_avg_shipping: mean_of(|c| c.avg_shipping),
            }
        })
        .collect()
}

/// Within-cluster sum of squared distances to the assigned centroid
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter_map(|(point, &cluster)| {
            (cluster < centroids.nrows()).then(|| squared_distance(&point, &centroids.row(cluster)))
        })
        .sum()
}

fn squared_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enriched, population, transaction};
    use std::collections::HashMap;

    fn features(id: &str, spent: f64, orders: usize) -> CustomerFeatures {
        CustomerFeatures {
            customer_id: id.to_string(),
            total_spent: spent,
            avg_order_value: spent / orders as f64,
            order_count: orders,
            total_items: orders as u64,
            avg_discount: 0.1,
            avg_shipping: 5.0,
        }
    }

    /// Three well separated groups of four customers each
    fn blobs() -> Vec<CustomerFeatures> {
        let mut customers = Vec::new();
        for i in 0..4 {
            customers.push(features(&format!("A{i}"), 100.0 + i as f64, 1));
            customers.push(features(&format!("B{i}"), 5_000.0 + i as f64 * 3.0, 20));
            customers.push(features(&format!("C{i}"), 900.0 + i as f64 * 2.0, 3));
        }
        customers
    }

    fn params(n_clusters: usize) -> ClusteringParams {
        ClusteringParams {
            n_clusters,
            ..ClusteringParams::default()
        }
    }

    #[test]
    fn test_customer_features_aggregate() {
        let mut rows = vec![
            transaction("C1", 100.0, "2024-01-01"),
            transaction("C1", 300.0, "2024-01-05"),
            transaction("C2", 50.0, "2024-01-02"),
        ];
        rows[0].quantity = 2;
        rows[1].quantity = 3;
        rows[1].discount = 0.2;
        rows[1].shipping_cost = 10.0;

        let table = customer_features(&enriched(rows)).unwrap();
        assert_eq!(table.len(), 2);
        let c1 = &table[0];
        assert_eq!(c1.customer_id, "C1");
        assert_eq!(c1.total_spent, 400.0);
        assert_eq!(c1.avg_order_value, 200.0);
        assert_eq!(c1.order_count, 2);
        assert_eq!(c1.total_items, 5);
        assert_eq!(c1.avg_discount, 0.1);
        assert_eq!(c1.avg_shipping, 5.0);
    }

    #[test]
    fn test_fit_kmeans_separates_blobs() {
        let customers = blobs();
        let model = fit_kmeans(&customers, &params(3)).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 12);
        assert_eq!(model.centroids.shape(), &[3, 6]);
        assert_eq!(model.cluster_sizes().iter().sum::<usize>(), 12);

        let mut by_group: HashMap<char, usize> = HashMap::new();
        for (customer, &label) in customers.iter().zip(model.labels.iter()) {
            let group = customer.customer_id.chars().next().unwrap();
            let expected = *by_group.entry(group).or_insert(label);
            assert_eq!(expected, label, "group {group} split across clusters");
        }
        assert!(model.inertia >= 0.0 && model.inertia.is_finite());
        assert!(model.silhouette_sample(100) > 0.5);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let customers = customer_features(&population(40)).unwrap();
        let first = fit_kmeans(&customers, &params(4)).unwrap();
        let second = fit_kmeans(&customers, &params(4)).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.centroids, second.centroids);
        assert_eq!(first.inertia, second.inertia);
    }

    #[test]
    fn test_predict_profile() {
        let model = fit_kmeans(&blobs(), &params(3)).unwrap();

        let big_spender = features("X", 5_001.0, 20).to_vector();
        let cluster = model.predict(&big_spender).unwrap();
        assert_eq!(cluster, model.labels[1]);

        let mut broken = big_spender;
        broken[0] = f64::NAN;
        assert!(model.predict(&broken).is_err());
    }

    #[test]
    fn test_invalid_cluster_count() {
        let customers = blobs();
        assert!(matches!(
            fit_kmeans(&customers, &params(1)),
            Err(AnalyticsError::Parameter(_))
        ));
        assert!(matches!(
            fit_kmeans(&customers, &params(13)),
            Err(AnalyticsError::Parameter(_))
        ));
        assert!(matches!(
            fit_kmeans(&[], &params(2)),
            Err(AnalyticsError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_median_labeler_rules() {
        let profile = |cluster, spent, orders, order_value| ClusterProfile {
            cluster,
            size: 1,
            mean_total_spent: spent,
            mean_avg_order_value: order_value,
            mean_order_count: orders,
            mean_total_items: 1.0,
            mean_avg_discount: 0.0,
            mean_avg_shipping: 0.0,
        };
        let profiles = vec![
            profile(0, 5000.0, 20.0, 250.0),
            profile(1, 400.0, 8.0, 50.0),
            profile(2, 900.0, 1.0, 900.0),
            profile(3, 100.0, 1.0, 100.0),
        ];

        assert_eq!(
            MedianLabeler.label(&profiles),
            vec![
                ClusterLabel::VipCustomers,
                ClusterLabel::FrequentBuyers,
                ClusterLabel::HighValueBuyers,
                ClusterLabel::OccasionalBuyers,
            ]
        );
    }

    #[test]
    fn test_members_share_cluster_label() {
        let result = cluster_customers(&population(50), &params(4)).unwrap();
        assert_eq!(result.assignments.len(), 50);

        for assignment in &result.assignments {
            assert_eq!(result.label_of(assignment.cluster), Some(assignment.label));
        }
        let summarized: usize = result.summaries.iter().map(|s| s.profile.size).sum();
        assert_eq!(summarized, 50);
    }

    #[test]
    fn test_custom_labeler_is_used() {
        struct AllVip;
        impl ClusterLabeler for AllVip {
            fn label(&self, profiles: &[ClusterProfile]) -> Vec<ClusterLabel> {
                vec![ClusterLabel::VipCustomers; profiles.len()]
            }
        }

        let result = cluster_customers_with(&population(20), &params(2), &AllVip).unwrap();
        assert!(result
            .assignments
            .iter()
            .all(|a| a.label == ClusterLabel::VipCustomers));
    }
}
