//! Columnar view of enriched transactions for polars aggregations

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::AnalyticsError;
use crate::preprocess::EnrichedTransaction;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Milliseconds since the Unix epoch, order dates read as UTC
pub const ORDER_TIMESTAMP: &str = "OrderTimestamp";
/// Calendar day of the order as a polars `Date`
pub const ORDER_DAY: &str = "OrderDay";
pub const NET_REVENUE: &str = "NetRevenue";
/// Null where the margin is undefined (zero total), so means skip it
pub const PROFIT_MARGIN: &str = "ProfitMargin";

fn text_series<F>(name: &str, transactions: &[EnrichedTransaction], field: F) -> Series
where
    F: Fn(&EnrichedTransaction) -> &str,
{
    let values: Vec<&str> = transactions.iter().map(field).collect();
    Series::new(name, values)
}

fn number_series<F>(name: &str, transactions: &[EnrichedTransaction], field: F) -> Series
where
    F: Fn(&EnrichedTransaction) -> f64,
{
    let values: Vec<f64> = transactions.iter().map(field).collect();
    Series::new(name, values)
}

/// Build the analysis frame: one row per transaction, source columns under their
/// input names plus the derived revenue and calendar columns.
pub fn enriched_frame(transactions: &[EnrichedTransaction]) -> crate::Result<DataFrame> {
    let quantity: Vec<i64> = transactions
        .iter()
        .map(|t| i64::from(t.source.quantity))
        .collect();
    let margin: Vec<Option<f64>> = transactions
        .iter()
        .map(|t| Some(t.profit_margin).filter(|m| !m.is_nan()))
        .collect();
    let timestamps: Vec<i64> = transactions
        .iter()
        .map(|t| t.source.order_date.and_utc().timestamp_millis())
        .collect();
    let days: Vec<i32> = timestamps
        .iter()
        .map(|ms| ms.div_euclid(MS_PER_DAY) as i32)
        .collect();

    let frame = DataFrame::new(vec![
        text_series("OrderID", transactions, |t| &t.source.order_id),
        text_series("CustomerID", transactions, |t| &t.source.customer_id),
        text_series("ProductID", transactions, |t| &t.source.product_id),
        text_series("ProductName", transactions, |t| &t.source.product_name),
        text_series("Category", transactions, |t| &t.source.category),
        text_series("Brand", transactions, |t| &t.source.brand),
        text_series("OrderStatus", transactions, |t| t.source.order_status.as_str()),
        text_series("PaymentMethod", transactions, |t| &t.source.payment_method),
        text_series("Country", transactions, |t| &t.source.country),
        text_series("State", transactions, |t| &t.source.state),
        text_series("City", transactions, |t| &t.source.city),
        text_series("SellerID", transactions, |t| &t.source.seller_id),
        number_series("UnitPrice", transactions, |t| t.source.unit_price),
        Series::new("Quantity", quantity),
        number_series("Discount", transactions, |t| t.source.discount),
        number_series("ShippingCost", transactions, |t| t.source.shipping_cost),
        number_series("Tax", transactions, |t| t.source.tax),
        number_series("TotalAmount", transactions, |t| t.source.total_amount),
        number_series(NET_REVENUE, transactions, |t| t.net_revenue),
        Series::new(PROFIT_MARGIN, margin),
        Series::new(ORDER_TIMESTAMP, timestamps),
        Series::new(ORDER_DAY, days).cast(&DataType::Date)?,
    ])?;
    Ok(frame)
}

/// Float view of an aggregated column; nulls read as NaN
pub(crate) fn f64_values(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

pub(crate) fn u64_values(df: &DataFrame, name: &str) -> crate::Result<Vec<u64>> {
    let series = df.column(name)?.cast(&DataType::UInt64)?;
    let values = series
        .u64()?
        .into_iter()
        .map(|value| value.unwrap_or(0))
        .collect();
    Ok(values)
}

pub(crate) fn i64_values(df: &DataFrame, name: &str) -> crate::Result<Vec<i64>> {
    let series = df.column(name)?.cast(&DataType::Int64)?;
    let values = series
        .i64()?
        .into_iter()
        .map(|value| value.unwrap_or(0))
        .collect();
    Ok(values)
}

pub(crate) fn str_values(df: &DataFrame, name: &str) -> crate::Result<Vec<String>> {
    let series = df.column(name)?.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect();
    Ok(values)
}

/// Calendar days of a `Date` column
pub(crate) fn date_values(df: &DataFrame, name: &str) -> crate::Result<Vec<NaiveDate>> {
    i64_values(df, name)?
        .into_iter()
        .map(|days| {
            DateTime::from_timestamp(days * 86_400, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| AnalyticsError::Schema(format!("column {name}: day {days} out of range")))
        })
        .collect()
}

pub(crate) fn datetime_from_millis(ms: i64) -> crate::Result<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| AnalyticsError::Schema(format!("order timestamp {ms} out of range")))
}

/// Descending sort that keeps the incoming order of ties and puts nulls last
pub(crate) fn descending_stable() -> SortMultipleOptions {
    SortMultipleOptions::default()
        .with_order_descending(true)
        .with_nulls_last(true)
        .with_maintain_order(true)
}
