//! Rule-based churn risk on top of the RFM table

use std::fmt;

use serde::Serialize;

use crate::error::AnalyticsError;
use crate::rfm::{RfmRecord, RfmTable};
use crate::stats::quantile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChurnRisk {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "Low Risk")]
    Low,
}

impl fmt::Display for ChurnRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChurnRisk::High => "High Risk",
            ChurnRisk::Medium => "Medium Risk",
            ChurnRisk::Low => "Low Risk",
        })
    }
}

/// Population cut-offs recomputed from the current customer base on every run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChurnThresholds {
    pub recency_p75: f64,
    pub recency_median: f64,
    pub frequency_p25: f64,
}

impl ChurnThresholds {
    pub fn from_records(records: &[RfmRecord]) -> crate::Result<Self> {
        let recency: Vec<f64> = records.iter().map(|r| r.recency as f64).collect();
        let frequency: Vec<f64> = records.iter().map(|r| r.frequency as f64).collect();

        let missing = || AnalyticsError::empty("churn classification needs at least one customer");
        Ok(Self {
            recency_p75: quantile(&recency, 0.75).ok_or_else(missing)?,
            recency_median: quantile(&recency, 0.5).ok_or_else(missing)?,
            frequency_p25: quantile(&frequency, 0.25).ok_or_else(missing)?,
        })
    }
}

type ChurnPredicate = fn(&RfmRecord, &ChurnThresholds) -> bool;

fn stale_and_infrequent(record: &RfmRecord, t: &ChurnThresholds) -> bool {
    record.recency as f64 > t.recency_p75 && (record.frequency as f64) < t.frequency_p25
}

fn stale(record: &RfmRecord, t: &ChurnThresholds) -> bool {
    record.recency as f64 > t.recency_p75
}

fn older_than_median(record: &RfmRecord, t: &ChurnThresholds) -> bool {
    record.recency as f64 > t.recency_median
}

fn always(_: &RfmRecord, _: &ChurnThresholds) -> bool {
    true
}

/// Evaluated in order; the first matching rule wins.
///
/// The median rule subsumes the second (75th-percentile) rule; both stay in the cascade.
pub const CHURN_RULES: [(ChurnPredicate, ChurnRisk); 4] = [
    (stale_and_infrequent, ChurnRisk::High),
    (stale, ChurnRisk::Medium),
    (older_than_median, ChurnRisk::Medium),
    (always, ChurnRisk::Low),
];

pub fn classify(record: &RfmRecord, thresholds: &ChurnThresholds) -> ChurnRisk {
    CHURN_RULES
        .iter()
        .find(|(predicate, _)| predicate(record, thresholds))
        .map_or(ChurnRisk::Low, |(_, risk)| *risk)
}

/// Return a copy of `table` with every record's churn risk filled in.
pub fn assign_churn_risk(table: &RfmTable) -> crate::Result<RfmTable> {
    let thresholds = ChurnThresholds::from_records(&table.records)?;
    log::debug!("Churn thresholds: {thresholds:?}");

    let records = table
        .records
        .iter()
        .map(|record| RfmRecord {
            churn_risk: Some(classify(record, &thresholds)),
            ..record.clone()
        })
        .collect();

    Ok(RfmTable {
        records,
        ..table.clone()
    })
}
