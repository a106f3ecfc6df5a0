//! Transaction loading and schema validation using Polars

use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Serialize, Serializer};

use crate::error::AnalyticsError;

/// Columns every input dataset must carry.
pub const REQUIRED_COLUMNS: [&str; 20] = [
    "OrderID",
    "CustomerID",
    "CustomerName",
    "ProductID",
    "ProductName",
    "Category",
    "Brand",
    "UnitPrice",
    "Quantity",
    "Discount",
    "ShippingCost",
    "Tax",
    "TotalAmount",
    "OrderStatus",
    "PaymentMethod",
    "Country",
    "State",
    "City",
    "SellerID",
    "OrderDate",
];

/// Fulfilment state of an order line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Delivered,
    Cancelled,
    Returned,
    Pending,
    Shipped,
    Other(String),
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Delivered" => OrderStatus::Delivered,
            "Cancelled" => OrderStatus::Cancelled,
            "Returned" => OrderStatus::Returned,
            "Pending" => OrderStatus::Pending,
            "Shipped" => OrderStatus::Shipped,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Returned => "Returned",
            OrderStatus::Pending => "Pending",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Other(raw) => raw,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One order line, exactly as supplied by the data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    #[serde(rename = "OrderID")]
    pub order_id: String,
    #[serde(rename = "CustomerID")]
    pub customer_id: String,
    pub customer_name: String,
    #[serde(rename = "ProductID")]
    pub product_id: String,
    pub product_name: String,
    pub category: String,
    pub brand: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub discount: f64,
    pub shipping_cost: f64,
    pub tax: f64,
    pub total_amount: f64,
    pub order_status: OrderStatus,
    pub payment_method: String,
    pub country: String,
    pub state: String,
    pub city: String,
    #[serde(rename = "SellerID")]
    pub seller_id: String,
    pub order_date: NaiveDateTime,
}

/// Load a CSV file and validate it into typed transactions
///
/// # Arguments
/// * `file_path` - Path to a CSV file with a header row carrying [`REQUIRED_COLUMNS`]
///
/// # Returns
/// * One [`Transaction`] per CSV row, in file order
pub fn load_transactions(file_path: impl AsRef<Path>) -> crate::Result<Vec<Transaction>> {
    let path = file_path.as_ref();
    log::debug!("Reading transactions from {}", path.display());

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let transactions = transactions_from_frame(&df)?;
    log::info!(
        "Loaded {} transactions from {}",
        transactions.len(),
        path.display()
    );
    Ok(transactions)
}

/// Convert a DataFrame into typed transactions, validating the schema
///
/// Fails with [`AnalyticsError::Schema`] when a required column is absent, a numeric column
/// holds non-numeric or null values, or an order date cannot be parsed.
pub fn transactions_from_frame(df: &DataFrame) -> crate::Result<Vec<Transaction>> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| df.column(name).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(AnalyticsError::Schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let order_id = text_column(df, "OrderID")?;
    let customer_id = text_column(df, "CustomerID")?;
    let customer_name = text_column(df, "CustomerName")?;
    let product_id = text_column(df, "ProductID")?;
    let product_name = text_column(df, "ProductName")?;
    let category = text_column(df, "Category")?;
    let brand = text_column(df, "Brand")?;
    let unit_price = numeric_column(df, "UnitPrice")?;
    let quantity = numeric_column(df, "Quantity")?;
    let discount = numeric_column(df, "Discount")?;
    let shipping_cost = numeric_column(df, "ShippingCost")?;
    let tax = numeric_column(df, "Tax")?;
    let total_amount = numeric_column(df, "TotalAmount")?;
    let order_status = text_column(df, "OrderStatus")?;
    let payment_method = text_column(df, "PaymentMethod")?;
    let country = text_column(df, "Country")?;
    let state = text_column(df, "State")?;
    let city = text_column(df, "City")?;
    let seller_id = text_column(df, "SellerID")?;
    let order_date = text_column(df, "OrderDate")?;

    let mut transactions = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let qty = quantity[row];
        if qty < 0.0 || qty.fract() != 0.0 || qty > f64::from(u32::MAX) {
            return Err(AnalyticsError::Schema(format!(
                "column Quantity row {row}: expected a non-negative integer, got {qty}"
            )));
        }
        let date = parse_order_date(&order_date[row]).ok_or_else(|| {
            AnalyticsError::Schema(format!(
                "column OrderDate row {row}: unparseable date '{}'",
                order_date[row]
            ))
        })?;

        transactions.push(Transaction {
            order_id: order_id[row].clone(),
            customer_id: customer_id[row].clone(),
            customer_name: customer_name[row].clone(),
            product_id: product_id[row].clone(),
            product_name: product_name[row].clone(),
            category: category[row].clone(),
            brand: brand[row].clone(),
            unit_price: unit_price[row],
            quantity: qty as u32,
            discount: discount[row],
            shipping_cost: shipping_cost[row],
            tax: tax[row],
            total_amount: total_amount[row],
            order_status: OrderStatus::parse(&order_status[row]),
            payment_method: payment_method[row].clone(),
            country: country[row].clone(),
            state: state[row].clone(),
            city: city[row].clone(),
            seller_id: seller_id[row].clone(),
            order_date: date,
        });
    }

    Ok(transactions)
}

/// Parse an order timestamp in any of the accepted layouts.
pub fn parse_order_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|parsed| parsed.naive_utc())
        })
}

/// Read a column as strings; nulls become empty strings
fn text_column(df: &DataFrame, name: &str) -> crate::Result<Vec<String>> {
    let series = df
        .column(name)?
        .cast(&DataType::String)
        .map_err(|e| AnalyticsError::Schema(format!("column {name}: {e}")))?;
    let values = series.str()?;

    Ok(values
        .into_iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect())
}

/// Read a column as f64, rejecting nulls, non-numeric and non-finite cells
fn numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = df
        .column(name)?
        .cast(&DataType::Float64)
        .map_err(|e| AnalyticsError::Schema(format!("column {name}: {e}")))?;
    let values = series.f64()?;

    values
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(AnalyticsError::Schema(format!(
                "column {name} row {row}: expected a finite number, got {v}"
            ))),
            None => Err(AnalyticsError::Schema(format!(
                "column {name} row {row}: expected a number"
            ))),
        })
        .collect()
}
