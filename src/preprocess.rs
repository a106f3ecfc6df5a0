//! Feature derivation: calendar parts, revenue and margin fields, order-size buckets

use chrono::{Datelike, NaiveDateTime};
use polars::prelude::DataFrame;
use serde::Serialize;

use crate::data::{transactions_from_frame, Transaction};

/// Upper edges of the order-size buckets; the lowest edge (0) is exclusive.
const ORDER_SIZE_EDGES: [(f64, OrderSize); 4] = [
    (100.0, OrderSize::Small),
    (500.0, OrderSize::Medium),
    (1000.0, OrderSize::Large),
    (5000.0, OrderSize::VeryLarge),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderSize {
    Small,
    Medium,
    Large,
    #[serde(rename = "Very Large")]
    VeryLarge,
}

impl OrderSize {
    /// Bucket a total amount into `(0, 100]`, `(100, 500]`, `(500, 1000]` or `(1000, 5000]`.
    ///
    /// Amounts outside `(0, 5000]` (and NaN) stay unbucketed.
    pub fn from_amount(total_amount: f64) -> Option<Self> {
        if !(total_amount > 0.0) {
            return None;
        }
        ORDER_SIZE_EDGES
            .iter()
            .find(|(upper, _)| total_amount <= *upper)
            .map(|(_, size)| *size)
    }
}

/// A transaction with its derived analytical fields attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnrichedTransaction {
    #[serde(flatten)]
    pub source: Transaction,
    pub year: i32,
    pub month: u32,
    pub month_name: String,
    pub quarter: u32,
    pub week_of_year: u32,
    pub day_of_week: String,
    #[serde(rename = "Revenue_Before_Discount")]
    pub revenue_before_discount: f64,
    #[serde(rename = "Discount_Amount")]
    pub discount_amount: f64,
    #[serde(rename = "Net_Revenue")]
    pub net_revenue: f64,
    /// Percentage of the total kept after tax and shipping; NaN when the total is zero
    #[serde(rename = "Profit_Margin")]
    pub profit_margin: f64,
    #[serde(rename = "Order_Size")]
    pub order_size: Option<OrderSize>,
}

impl EnrichedTransaction {
    pub fn derive(source: &Transaction) -> Self {
        let date: NaiveDateTime = source.order_date;
        let revenue_before_discount = source.unit_price * f64::from(source.quantity);
        let net_revenue = source.total_amount - source.tax - source.shipping_cost;
        let profit_margin = if source.total_amount == 0.0 {
            f64::NAN
        } else {
            net_revenue / source.total_amount * 100.0
        };

        Self {
            year: date.year(),
            month: date.month(),
            month_name: date.format("%B").to_string(),
            quarter: (date.month() - 1) / 3 + 1,
            week_of_year: date.iso_week().week(),
            day_of_week: date.format("%A").to_string(),
            revenue_before_discount,
            discount_amount: revenue_before_discount * source.discount,
            net_revenue,
            profit_margin,
            order_size: OrderSize::from_amount(source.total_amount),
            source: source.clone(),
        }
    }
}

/// Enrich every transaction; a pure mapping with no hidden state.
pub fn preprocess(transactions: &[Transaction]) -> Vec<EnrichedTransaction> {
    transactions.iter().map(EnrichedTransaction::derive).collect()
}

/// Validate a raw frame against the input schema and enrich it.
pub fn preprocess_frame(df: &DataFrame) -> crate::Result<Vec<EnrichedTransaction>> {
    let transactions = transactions_from_frame(df)?;
    Ok(preprocess(&transactions))
}
