//! RFM (Recency, Frequency, Monetary) scoring and segmentation

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use polars::prelude::{col, lit, ChunkAgg, DataFrame, DataType, IntoLazy};
use serde::Serialize;

use crate::churn::ChurnRisk;
use crate::error::AnalyticsError;
use crate::frame::{
    datetime_from_millis, enriched_frame, f64_values, i64_values, str_values, u64_values,
    MS_PER_DAY, ORDER_TIMESTAMP,
};
use crate::preprocess::EnrichedTransaction;
use crate::stats::{first_ranks, quantile_bins};

/// Number of ordinal groups each RFM dimension is split into
pub const SCORE_BINS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Segment {
    Champions,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[serde(rename = "At Risk")]
    AtRisk,
    #[serde(rename = "Needs Attention")]
    NeedsAttention,
    Lost,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::AtRisk => "At Risk",
            Segment::NeedsAttention => "Needs Attention",
            Segment::Lost => "Lost",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of the segmentation cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRule {
    pub min_rfm_score: u8,
    pub min_r_score: u8,
    pub segment: Segment,
}

impl SegmentRule {
    pub fn matches(&self, rfm_score: u8, r_score: u8) -> bool {
        rfm_score >= self.min_rfm_score && r_score >= self.min_r_score
    }
}

/// Evaluated in order; the first matching rule wins.
pub const SEGMENT_RULES: [SegmentRule; 6] = [
    SegmentRule { min_rfm_score: 13, min_r_score: 0, segment: Segment::Champions },
    SegmentRule { min_rfm_score: 10, min_r_score: 0, segment: Segment::LoyalCustomers },
    SegmentRule { min_rfm_score: 7, min_r_score: 0, segment: Segment::PotentialLoyalists },
    SegmentRule { min_rfm_score: 5, min_r_score: 3, segment: Segment::AtRisk },
    SegmentRule { min_rfm_score: 5, min_r_score: 0, segment: Segment::NeedsAttention },
    SegmentRule { min_rfm_score: 0, min_r_score: 0, segment: Segment::Lost },
];

/// Segment for a combined score; a pure function of `(rfm_score, r_score)`.
pub fn segment_for(rfm_score: u8, r_score: u8) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|rule| rule.matches(rfm_score, r_score))
        .map_or(Segment::Lost, |rule| rule.segment)
}

/// Per-customer RFM values, scores and labels
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RfmRecord {
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    /// Whole days between the last order and the reference date
    pub recency: i64,
    pub frequency: usize,
    pub monetary: f64,
    #[serde(rename = "R_Score")]
    pub r_score: u8,
    #[serde(rename = "F_Score")]
    pub f_score: u8,
    #[serde(rename = "M_Score")]
    pub m_score: u8,
    #[serde(rename = "RFM_Score")]
    pub rfm_score: u8,
    pub segment: Segment,
    /// Filled in by the churn classifier
    #[serde(rename = "Churn_Risk")]
    pub churn_risk: Option<ChurnRisk>,
}

/// Bin counts each dimension actually achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinningSummary {
    pub recency: usize,
    pub frequency: usize,
    pub monetary: usize,
}

impl BinningSummary {
    pub fn is_degenerate(&self) -> bool {
        self.recency < SCORE_BINS || self.frequency < SCORE_BINS || self.monetary < SCORE_BINS
    }
}

/// RFM table, one record per customer ordered by customer id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmTable {
    pub reference_date: NaiveDateTime,
    pub records: Vec<RfmRecord>,
    pub binning: BinningSummary,
}

impl RfmTable {
    pub fn get(&self, customer_id: &str) -> Option<&RfmRecord> {
        self.records
            .binary_search_by(|record| record.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.records[idx])
    }

    /// Customer count per segment
    pub fn segment_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.segment.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Score every customer on Recency, Frequency and Monetary value
///
/// # Arguments
/// * `transactions` - Enriched transactions; each row counts as one order
///
/// # Returns
/// * `RfmTable` with quintile scores relative to the whole customer population.
///   Heavy ties may collapse quintiles; the achieved bin counts are reported in
///   [`RfmTable::binning`] rather than failing.
pub fn score_rfm(transactions: &[EnrichedTransaction]) -> crate::Result<RfmTable> {
    score_rfm_frame(&enriched_frame(transactions)?)
}

/// [`score_rfm`] over a frame built by [`enriched_frame`]
pub fn score_rfm_frame(frame: &DataFrame) -> crate::Result<RfmTable> {
    let max_timestamp = frame
        .column(ORDER_TIMESTAMP)?
        .i64()?
        .max()
        .ok_or_else(|| AnalyticsError::empty("RFM scoring needs at least one transaction"))?;
    let reference_date = datetime_from_millis(max_timestamp)? + Duration::days(1);
    let reference_ms = reference_date.and_utc().timestamp_millis();

    let customers = frame
        .clone()
        .lazy()
        .group_by([col("CustomerID")])
        .agg([
            col(ORDER_TIMESTAMP).max().alias("LastOrder"),
            col("OrderID").count().alias("Frequency"),
            col("TotalAmount").sum().alias("Monetary"),
        ])
        .with_columns([
            // whole days, truncated
            ((lit(reference_ms) - col("LastOrder")).cast(DataType::Float64)
                / lit(MS_PER_DAY as f64))
            .cast(DataType::Int64)
            .alias("Recency"),
        ])
        .sort(["CustomerID"], Default::default())
        .collect()?;

    let customer_ids = str_values(&customers, "CustomerID")?;
    let recency_days = i64_values(&customers, "Recency")?;
    let orders = u64_values(&customers, "Frequency")?;
    let monetary = f64_values(&customers, "Monetary")?;

    let recency: Vec<f64> = recency_days.iter().map(|&days| days as f64).collect();
    let frequency: Vec<f64> = orders.iter().map(|&count| count as f64).collect();

    let r_bins = quantile_bins(&recency, SCORE_BINS);
    // ranking first keeps tied order counts from collapsing the quintiles
    let f_bins = quantile_bins(&first_ranks(&frequency), SCORE_BINS);
    let m_bins = quantile_bins(&monetary, SCORE_BINS);

    let binning = BinningSummary {
        recency: r_bins.achieved,
        frequency: f_bins.achieved,
        monetary: m_bins.achieved,
    };
    if binning.is_degenerate() {
        log::warn!(
            "RFM quantiles collapsed under ties: R={} F={} M={} bins",
            binning.recency,
            binning.frequency,
            binning.monetary
        );
    }
    log::debug!(
        "RFM edges R={:?} M={:?}",
        r_bins.edges,
        m_bins.edges
    );

    let records = customer_ids
        .into_iter()
        .enumerate()
        .map(|(i, customer_id)| {
            // lowest recency lands in bin 0 and gets the top score
            let r_score = (SCORE_BINS - r_bins.bins[i]) as u8;
            let f_score = (f_bins.bins[i] + 1) as u8;
            let m_score = (m_bins.bins[i] + 1) as u8;
            let rfm_score = r_score + f_score + m_score;

            RfmRecord {
                customer_id,
                recency: recency_days[i],
                frequency: orders[i] as usize,
                monetary: monetary[i],
                r_score,
                f_score,
                m_score,
                rfm_score,
                segment: segment_for(rfm_score, r_score),
                churn_risk: None,
            }
        })
        .collect::<Vec<_>>();

    log::info!(
        "Scored {} customers (reference date {})",
        records.len(),
        reference_date
    );

    Ok(RfmTable {
        reference_date,
        records,
        binning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enriched, population, transaction};
    use std::collections::HashMap;

    #[test]
    fn test_segment_thresholds() {
        assert_eq!(segment_for(15, 5), Segment::Champions);
        assert_eq!(segment_for(13, 1), Segment::Champions);
        assert_eq!(segment_for(12, 5), Segment::LoyalCustomers);
        assert_eq!(segment_for(10, 2), Segment::LoyalCustomers);
        assert_eq!(segment_for(7, 1), Segment::PotentialLoyalists);
        assert_eq!(segment_for(6, 3), Segment::AtRisk);
        assert_eq!(segment_for(5, 2), Segment::NeedsAttention);
        assert_eq!(segment_for(4, 2), Segment::Lost);
        assert_eq!(segment_for(3, 1), Segment::Lost);
    }

    #[test]
    fn test_recency_frequency_monetary_values() {
        let rows = enriched(vec![
            transaction("C1", 100.0, "2024-01-01"),
            transaction("C1", 200.0, "2024-01-11"),
            transaction("C1", 50.0, "2024-01-21"),
            transaction("C1", 650.0, "2024-01-31"),
            transaction("C2", 30.0, "2024-01-21"),
        ]);

        let table = score_rfm(&rows).unwrap();
        assert_eq!(
            table.reference_date,
            transaction("C1", 0.0, "2024-02-01").order_date
        );

        let c1 = table.get("C1").unwrap();
        assert_eq!(c1.recency, 1);
        assert_eq!(c1.frequency, 4);
        assert_eq!(c1.monetary, 1000.0);

        let c2 = table.get("C2").unwrap();
        assert_eq!(c2.recency, 11);
        assert_eq!(c2.frequency, 1);
        assert!(table.get("C9").is_none());
    }

    #[test]
    fn test_recency_score_quintiles_are_uniform() {
        // 20 customers, each with a distinct last-order day
        let rows: Vec<_> = (0..20)
            .map(|c| transaction(&format!("C{c:02}"), 10.0 + c as f64, &format!("2024-04-{:02}", c + 1)))
            .collect();
        let table = score_rfm(&enriched(rows)).unwrap();

        assert!(!table.binning.is_degenerate());
        let mut counts: HashMap<u8, usize> = HashMap::new();
        for record in &table.records {
            *counts.entry(record.r_score).or_insert(0) += 1;
        }
        for score in 1..=5u8 {
            let count = counts.get(&score).copied().unwrap_or(0);
            assert!((count as i64 - 4).abs() <= 1, "R={score} has {count}");
        }
        // most recent customer scores 5, oldest scores 1
        assert_eq!(table.get("C19").unwrap().r_score, 5);
        assert_eq!(table.get("C00").unwrap().r_score, 1);
        assert_eq!(table.get("C19").unwrap().m_score, 5);
    }

    #[test]
    fn test_rfm_score_range_and_segment_purity() {
        let table = score_rfm(&population(60)).unwrap();
        let mut seen: HashMap<(u8, u8), Segment> = HashMap::new();

        for record in &table.records {
            assert!((3..=15).contains(&record.rfm_score));
            assert_eq!(
                record.rfm_score,
                record.r_score + record.f_score + record.m_score
            );
            let previous = seen
                .entry((record.rfm_score, record.r_score))
                .or_insert(record.segment);
            assert_eq!(*previous, record.segment);
        }
        assert_eq!(table.segment_counts().values().sum::<usize>(), 60);
    }

    #[test]
    fn test_ties_degrade_instead_of_failing() {
        let rows: Vec<_> = (0..10)
            .map(|c| transaction(&format!("C{c}"), 100.0, "2024-06-01"))
            .collect();
        let table = score_rfm(&enriched(rows)).unwrap();

        assert!(table.binning.is_degenerate());
        assert_eq!(table.binning.recency, 1);
        assert_eq!(table.binning.monetary, 1);
        // frequency is ranked first, so it still spreads over five bins
        assert_eq!(table.binning.frequency, 5);
        assert!(table.records.iter().all(|r| r.r_score == 5 && r.m_score == 1));
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(score_rfm(&[]), Err(AnalyticsError::EmptyDataset(_))));
    }
}
