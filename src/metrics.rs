//! Business KPIs, grouped summaries and calendar time series

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate};
use polars::prelude::{
    col, lit, ClosedWindow, DataFrame, DataType, Duration as Window, DynamicGroupOptions, Expr,
    IdxSize, IntoLazy, JoinArgs, JoinType, Label, NamedFrom, Series, StartBy,
};
use serde::{Deserialize, Serialize};

use crate::data::OrderStatus;
use crate::error::AnalyticsError;
use crate::frame::{
    date_values, descending_stable, enriched_frame, f64_values, str_values, u64_values,
    NET_REVENUE, ORDER_DAY, PROFIT_MARGIN,
};
use crate::preprocess::EnrichedTransaction;

/// Headline KPIs for a transaction set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub total_revenue: f64,
    pub total_orders: usize,
    pub avg_order_value: f64,
    pub total_customers: usize,
    pub total_products: usize,
    pub delivered_orders: usize,
    pub cancelled_orders: usize,
    pub returned_orders: usize,
    pub delivered_revenue: f64,
    /// Delivered orders as a percentage of all orders
    pub conversion_rate: f64,
    pub cancellation_rate: f64,
    pub return_rate: f64,
}

impl SummaryMetrics {
    /// Flat key/value view consumed by report exporters.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("total_revenue", self.total_revenue),
            ("total_orders", self.total_orders as f64),
            ("avg_order_value", self.avg_order_value),
            ("total_customers", self.total_customers as f64),
            ("total_products", self.total_products as f64),
            ("delivered_orders", self.delivered_orders as f64),
            ("cancelled_orders", self.cancelled_orders as f64),
            ("returned_orders", self.returned_orders as f64),
            ("delivered_revenue", self.delivered_revenue),
            ("conversion_rate", self.conversion_rate),
            ("cancellation_rate", self.cancellation_rate),
            ("return_rate", self.return_rate),
        ])
    }
}

/// Compute the headline KPIs.
///
/// Fails with [`AnalyticsError::EmptyDataset`] when there are no orders.
pub fn summary_metrics(transactions: &[EnrichedTransaction]) -> crate::Result<SummaryMetrics> {
    let total_orders = transactions.len();
    if total_orders == 0 {
        return Err(AnalyticsError::empty("summary metrics need at least one order"));
    }

    let total_revenue: f64 = transactions.iter().map(|t| t.source.total_amount).sum();
    let customers: HashSet<&str> = transactions
        .iter()
        .map(|t| t.source.customer_id.as_str())
        .collect();
    let products: HashSet<&str> = transactions
        .iter()
        .map(|t| t.source.product_id.as_str())
        .collect();

    let count_status = |status: OrderStatus| {
        transactions
            .iter()
            .filter(|t| t.source.order_status == status)
            .count()
    };
    let delivered_orders = count_status(OrderStatus::Delivered);
    let cancelled_orders = count_status(OrderStatus::Cancelled);
    let returned_orders = count_status(OrderStatus::Returned);
    let delivered_revenue = transactions
        .iter()
        .filter(|t| t.source.order_status == OrderStatus::Delivered)
        .map(|t| t.source.total_amount)
        .sum();

    let rate = |count: usize| count as f64 * 100.0 / total_orders as f64;

    Ok(SummaryMetrics {
        total_revenue,
        total_orders,
        avg_order_value: total_revenue / total_orders as f64,
        total_customers: customers.len(),
        total_products: products.len(),
        delivered_orders,
        cancelled_orders,
        returned_orders,
        delivered_revenue,
        conversion_rate: rate(delivered_orders),
        cancellation_rate: rate(cancelled_orders),
        return_rate: rate(returned_orders),
    })
}

/// Categorical column to group by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Category,
    Brand,
    Product,
    Customer,
    Country,
    State,
    City,
    PaymentMethod,
    Seller,
    OrderStatus,
}

impl Dimension {
    /// Column of the enriched frame holding this dimension
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Category => "Category",
            Dimension::Brand => "Brand",
            Dimension::Product => "ProductName",
            Dimension::Customer => "CustomerID",
            Dimension::Country => "Country",
            Dimension::State => "State",
            Dimension::City => "City",
            Dimension::PaymentMethod => "PaymentMethod",
            Dimension::Seller => "SellerID",
            Dimension::OrderStatus => "OrderStatus",
        }
    }
}

/// Numeric column to aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    TotalAmount,
    Quantity,
    NetRevenue,
    UnitPrice,
    Discount,
    ShippingCost,
    ProfitMargin,
}

impl Measure {
    pub fn column(&self) -> &'static str {
        match self {
            Measure::TotalAmount => "TotalAmount",
            Measure::Quantity => "Quantity",
            Measure::NetRevenue => NET_REVENUE,
            Measure::UnitPrice => "UnitPrice",
            Measure::Discount => "Discount",
            Measure::ShippingCost => "ShippingCost",
            Measure::ProfitMargin => PROFIT_MARGIN,
        }
    }
}

/// Aggregation applied per group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sum(Measure),
    /// Mean over the group, skipping undefined values
    Mean(Measure),
    Count,
}

impl Metric {
    pub fn expr(&self) -> Expr {
        match self {
            Metric::Sum(measure) => col(measure.column()).sum(),
            Metric::Mean(measure) => col(measure.column()).mean(),
            Metric::Count => col("OrderID").count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub key: String,
    pub value: f64,
}

/// Aggregate `metric` by `dimension` and keep the `top_n` largest groups.
///
/// Groups are ordered by value descending; ties keep first-seen input order.
pub fn group_summary(
    transactions: &[EnrichedTransaction],
    dimension: Dimension,
    metric: Metric,
    top_n: usize,
) -> crate::Result<Vec<GroupRow>> {
    group_summary_frame(&enriched_frame(transactions)?, dimension, metric, top_n)
}

/// [`group_summary`] over a frame built by [`enriched_frame`]
pub fn group_summary_frame(
    frame: &DataFrame,
    dimension: Dimension,
    metric: Metric,
    top_n: usize,
) -> crate::Result<Vec<GroupRow>> {
    if top_n == 0 {
        return Err(AnalyticsError::parameter("top_n must be positive"));
    }

    let summary = frame
        .clone()
        .lazy()
        .group_by_stable([col(dimension.column())])
        .agg([metric.expr().alias("Value")])
        .sort(["Value"], descending_stable())
        .limit(IdxSize::try_from(top_n).unwrap_or(IdxSize::MAX))
        .collect()?;

    let keys = str_values(&summary, dimension.column())?;
    let values = f64_values(&summary, "Value")?;
    Ok(keys
        .into_iter()
        .zip(values)
        .map(|(key, value)| GroupRow { key, value })
        .collect())
}

/// How products are ranked by [`top_products`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductRanking {
    Revenue,
    Quantity,
    Orders,
}

impl ProductRanking {
    fn metric(&self) -> Metric {
        match self {
            ProductRanking::Revenue => Metric::Sum(Measure::TotalAmount),
            ProductRanking::Quantity => Metric::Sum(Measure::Quantity),
            ProductRanking::Orders => Metric::Count,
        }
    }
}

pub fn top_products(
    transactions: &[EnrichedTransaction],
    n: usize,
    ranking: ProductRanking,
) -> crate::Result<Vec<GroupRow>> {
    group_summary(transactions, Dimension::Product, ranking.metric(), n)
}

/// Per-category performance table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPerformance {
    pub category: String,
    pub revenue: f64,
    pub quantity: u64,
    pub orders: usize,
    pub avg_price: f64,
    pub avg_discount: f64,
    pub net_revenue: f64,
    pub avg_margin: f64,
}

/// Revenue, volume, pricing and margin per category, sorted by revenue descending.
pub fn category_performance(
    transactions: &[EnrichedTransaction],
) -> crate::Result<Vec<CategoryPerformance>> {
    category_performance_frame(&enriched_frame(transactions)?)
}

pub fn category_performance_frame(frame: &DataFrame) -> crate::Result<Vec<CategoryPerformance>> {
    let table = frame
        .clone()
        .lazy()
        .group_by_stable([col("Category")])
        .agg([
            col("TotalAmount").sum().alias("Revenue"),
            col("Quantity").sum().alias("Units"),
            col("OrderID").count().alias("Orders"),
            col("UnitPrice").mean().alias("AvgPrice"),
            col("Discount").mean().alias("AvgDiscount"),
            col(NET_REVENUE).sum().alias("TotalNetRevenue"),
            col(PROFIT_MARGIN).mean().alias("AvgMargin"),
        ])
        .sort(["Revenue"], descending_stable())
        .collect()?;

    let categories = str_values(&table, "Category")?;
    let revenue = f64_values(&table, "Revenue")?;
    let units = u64_values(&table, "Units")?;
    let orders = u64_values(&table, "Orders")?;
    let avg_price = f64_values(&table, "AvgPrice")?;
    let avg_discount = f64_values(&table, "AvgDiscount")?;
    let net_revenue = f64_values(&table, "TotalNetRevenue")?;
    let avg_margin = f64_values(&table, "AvgMargin")?;

    Ok(categories
        .into_iter()
        .enumerate()
        .map(|(i, category)| CategoryPerformance {
            category,
            revenue: revenue[i],
            quantity: units[i],
            orders: orders[i] as usize,
            avg_price: avg_price[i],
            avg_discount: avg_discount[i],
            net_revenue: net_revenue[i],
            avg_margin: avg_margin[i],
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeographicSummary {
    pub country: String,
    pub revenue: f64,
    pub orders: usize,
    pub avg_shipping_cost: f64,
}

/// Revenue, orders and mean shipping cost per country, sorted by revenue descending.
pub fn geographic_summary(
    transactions: &[EnrichedTransaction],
) -> crate::Result<Vec<GeographicSummary>> {
    geographic_summary_frame(&enriched_frame(transactions)?)
}

pub fn geographic_summary_frame(frame: &DataFrame) -> crate::Result<Vec<GeographicSummary>> {
    let table = frame
        .clone()
        .lazy()
        .group_by_stable([col("Country")])
        .agg([
            col("TotalAmount").sum().alias("Revenue"),
            col("OrderID").count().alias("Orders"),
            col("ShippingCost").mean().alias("AvgShipping"),
        ])
        .sort(["Revenue"], descending_stable())
        .collect()?;

    let countries = str_values(&table, "Country")?;
    let revenue = f64_values(&table, "Revenue")?;
    let orders = u64_values(&table, "Orders")?;
    let avg_shipping = f64_values(&table, "AvgShipping")?;

    Ok(countries
        .into_iter()
        .enumerate()
        .map(|(i, country)| GeographicSummary {
            country,
            revenue: revenue[i],
            orders: orders[i] as usize,
            avg_shipping_cost: avg_shipping[i],
        })
        .collect())
}

/// Calendar bucket for [`time_series`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Day,
    /// ISO week, labelled by its Monday
    Week,
    /// Calendar month, labelled by its first day
    Month,
}

impl TimeBucket {
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeBucket::Day => date,
            TimeBucket::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            TimeBucket::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn next(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            TimeBucket::Day => start.succ_opt(),
            TimeBucket::Week => start.checked_add_signed(Duration::days(7)),
            TimeBucket::Month => start.checked_add_months(Months::new(1)),
        }
    }

    /// Tumbling windows over the order day, each labelled by its start
    fn window(&self) -> DynamicGroupOptions {
        let (every, start_by) = match self {
            TimeBucket::Day => ("1d", StartBy::WindowBound),
            TimeBucket::Week => ("1w", StartBy::Monday),
            TimeBucket::Month => ("1mo", StartBy::WindowBound),
        };
        DynamicGroupOptions {
            every: Window::parse(every),
            period: Window::parse(every),
            offset: Window::parse("0d"),
            label: Label::Left,
            closed_window: ClosedWindow::Left,
            start_by,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucketRow {
    pub period_start: NaiveDate,
    pub revenue: f64,
    pub orders: usize,
    pub quantity: u64,
}

/// Resample into contiguous calendar buckets spanning the full date range.
///
/// Buckets without transactions are present with zero values.
pub fn time_series(
    transactions: &[EnrichedTransaction],
    bucket: TimeBucket,
) -> crate::Result<Vec<TimeBucketRow>> {
    time_series_frame(&enriched_frame(transactions)?, bucket)
}

pub fn time_series_frame(frame: &DataFrame, bucket: TimeBucket) -> crate::Result<Vec<TimeBucketRow>> {
    if frame.height() == 0 {
        return Ok(Vec::new());
    }

    let windows = frame
        .clone()
        .lazy()
        .sort([ORDER_DAY], Default::default())
        .group_by_dynamic(col(ORDER_DAY), Vec::<Expr>::new(), bucket.window())
        .agg([
            col("TotalAmount").sum().alias("Revenue"),
            col("OrderID").count().alias("Orders"),
            col("Quantity").sum().alias("Units"),
        ])
        .collect()?;

    let starts = date_values(&windows, ORDER_DAY)?;
    let (Some(&first), Some(&last)) = (starts.first(), starts.last()) else {
        return Ok(Vec::new());
    };

    let mut calendar = Vec::new();
    let mut cursor = Some(first);
    while let Some(start) = cursor.filter(|start| *start <= last) {
        calendar.push(days_since_epoch(start));
        cursor = bucket.next(start);
    }
    let calendar = DataFrame::new(vec![Series::new(ORDER_DAY, calendar).cast(&DataType::Date)?])?;

    let series = calendar
        .lazy()
        .join(
            windows.lazy(),
            [col(ORDER_DAY)],
            [col(ORDER_DAY)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            col("Revenue").fill_null(lit(0.0)),
            col("Orders").fill_null(lit(0).cast(DataType::UInt32)),
            col("Units").fill_null(lit(0)),
        ])
        .sort([ORDER_DAY], Default::default())
        .collect()?;

    let period_start = date_values(&series, ORDER_DAY)?;
    let revenue = f64_values(&series, "Revenue")?;
    let orders = u64_values(&series, "Orders")?;
    let units = u64_values(&series, "Units")?;

    Ok(period_start
        .into_iter()
        .enumerate()
        .map(|(i, period_start)| TimeBucketRow {
            period_start,
            revenue: revenue[i],
            orders: orders[i] as usize,
            quantity: units[i],
        })
        .collect())
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - DateTime::UNIX_EPOCH.date_naive()).num_days() as i32
}

/// Row restrictions applied before analysis; empty lists do not restrict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Inclusive order-date range
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub categories: Vec<String>,
    pub countries: Vec<String>,
    pub statuses: Vec<OrderStatus>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &EnrichedTransaction) -> bool {
        let source = &tx.source;
        let date = source.order_date.date();
        self.date_range
            .map_or(true, |(from, to)| from <= date && date <= to)
            && (self.categories.is_empty() || self.categories.contains(&source.category))
            && (self.countries.is_empty() || self.countries.contains(&source.country))
            && (self.statuses.is_empty() || self.statuses.contains(&source.order_status))
    }
}

pub fn filter_transactions(
    transactions: &[EnrichedTransaction],
    filter: &TransactionFilter,
) -> Vec<EnrichedTransaction> {
    transactions
        .iter()
        .filter(|tx| filter.matches(tx))
        .cloned()
        .collect()
}

/// Co-purchase product recommendations ranked by revenue.
///
/// With a customer: products bought by customers who share at least one product with them,
/// excluding products the customer already owns. Without one: the best sellers overall.
pub fn recommend_products(
    transactions: &[EnrichedTransaction],
    customer_id: Option<&str>,
    top_n: usize,
) -> crate::Result<Vec<GroupRow>> {
    let Some(customer_id) = customer_id else {
        return top_products(transactions, top_n, ProductRanking::Revenue);
    };

    let owned: HashSet<&str> = transactions
        .iter()
        .filter(|t| t.source.customer_id == customer_id)
        .map(|t| t.source.product_id.as_str())
        .collect();
    let similar: HashSet<&str> = transactions
        .iter()
        .filter(|t| owned.contains(t.source.product_id.as_str()))
        .map(|t| t.source.customer_id.as_str())
        .collect();

    let candidates: Vec<EnrichedTransaction> = transactions
        .iter()
        .filter(|t| {
            similar.contains(t.source.customer_id.as_str())
                && !owned.contains(t.source.product_id.as_str())
        })
        .cloned()
        .collect();

    group_summary(
        &candidates,
        Dimension::Product,
        Metric::Sum(Measure::TotalAmount),
        top_n,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{enriched, transaction};
    use pretty_assertions::assert_eq;

    fn status_dataset() -> Vec<EnrichedTransaction> {
        let mut rows = Vec::new();
        for i in 0..1000 {
            let mut tx = transaction(&format!("C{}", i % 50), 10.0, "2024-05-01");
            tx.order_status = match i {
                0..=699 => OrderStatus::Delivered,
                700..=899 => OrderStatus::Cancelled,
                _ => OrderStatus::Returned,
            };
            rows.push(tx);
        }
        enriched(rows)
    }

    #[test]
    fn test_status_rates_are_exact() {
        let metrics = summary_metrics(&status_dataset()).unwrap();
        assert_eq!(metrics.total_orders, 1000);
        assert_eq!(metrics.conversion_rate, 70.0);
        assert_eq!(metrics.cancellation_rate, 20.0);
        assert_eq!(metrics.return_rate, 10.0);
        assert_eq!(metrics.total_customers, 50);
        assert_eq!(metrics.delivered_revenue, 7000.0);
        assert_eq!(metrics.avg_order_value, 10.0);
    }

    #[test]
    fn test_status_counts_bounded_by_total() {
        let mut rows = vec![
            transaction("C1", 5.0, "2024-01-01"),
            transaction("C2", 15.0, "2024-01-02"),
            transaction("C3", 25.0, "2024-01-03"),
        ];
        rows[1].order_status = OrderStatus::Pending;
        rows[2].order_status = OrderStatus::Other("Lost".to_string());

        let metrics = summary_metrics(&enriched(rows)).unwrap();
        assert!(
            metrics.delivered_orders + metrics.cancelled_orders + metrics.returned_orders
                <= metrics.total_orders
        );
        assert_eq!(metrics.delivered_orders, 1);
        assert_eq!(metrics.to_map()["total_revenue"], 45.0);
    }

    #[test]
    fn test_summary_on_empty_set_fails() {
        assert!(matches!(
            summary_metrics(&[]),
            Err(AnalyticsError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_group_summary_orders_desc_with_stable_ties() {
        let mut rows = vec![
            transaction("C1", 100.0, "2024-01-01"),
            transaction("C2", 50.0, "2024-01-01"),
            transaction("C3", 50.0, "2024-01-01"),
            transaction("C4", 300.0, "2024-01-01"),
        ];
        rows[0].category = "Books".to_string();
        rows[1].category = "Toys".to_string();
        rows[2].category = "Garden".to_string();
        rows[3].category = "Books".to_string();

        let summary = group_summary(
            &enriched(rows),
            Dimension::Category,
            Metric::Sum(Measure::TotalAmount),
            3,
        )
        .unwrap();
        let keys: Vec<&str> = summary.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["Books", "Toys", "Garden"]);
        assert_eq!(summary[0].value, 400.0);

        let top_one =
            group_summary(&status_dataset(), Dimension::OrderStatus, Metric::Count, 1).unwrap();
        assert_eq!(
            top_one,
            vec![GroupRow {
                key: "Delivered".to_string(),
                value: 700.0
            }]
        );
    }

    #[test]
    fn test_group_summary_rejects_zero_top_n() {
        assert!(group_summary(&[], Dimension::Country, Metric::Count, 0).is_err());
    }

    #[test]
    fn test_time_series_fills_gaps() {
        let rows = enriched(vec![
            transaction("C1", 10.0, "2024-01-01"),
            transaction("C1", 20.0, "2024-01-01 18:00:00"),
            transaction("C2", 5.0, "2024-01-04"),
        ]);

        let daily = time_series(&rows, TimeBucket::Day).unwrap();
        assert_eq!(daily.len(), 4);
        assert_eq!(daily[0].revenue, 30.0);
        assert_eq!(daily[0].orders, 2);
        assert_eq!(daily[1].orders, 0);
        assert_eq!(daily[2].revenue, 0.0);
        assert_eq!(daily[3].period_start, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    }

    #[test]
    fn test_time_series_weeks_and_months() {
        let rows = enriched(vec![
            transaction("C1", 10.0, "2024-01-03"),
            transaction("C2", 5.0, "2024-03-20"),
        ]);

        let monthly = time_series(&rows, TimeBucket::Month).unwrap();
        let starts: Vec<NaiveDate> = monthly.iter().map(|r| r.period_start).collect();
        assert_eq!(
            starts,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ]
        );
        assert_eq!(monthly[1].orders, 0);

        let weekly = time_series(&rows, TimeBucket::Week).unwrap();
        // 2024-01-01 is a Monday; 2024-03-18 is the Monday of the last week
        assert_eq!(weekly.first().unwrap().period_start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(weekly.last().unwrap().period_start, NaiveDate::from_ymd_opt(2024, 3, 18).unwrap());
        assert_eq!(weekly.len(), 12);
        assert!(time_series(&[], TimeBucket::Day).unwrap().is_empty());
    }

    #[test]
    fn test_filter_transactions() {
        let mut rows = vec![
            transaction("C1", 10.0, "2024-01-01"),
            transaction("C2", 10.0, "2024-02-01"),
            transaction("C3", 10.0, "2024-03-01"),
        ];
        rows[2].country = "Chile".to_string();
        let rows = enriched(rows);

        let filter = TransactionFilter {
            date_range: Some((
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            )),
            countries: vec!["Brazil".to_string()],
            ..TransactionFilter::default()
        };
        let kept = filter_transactions(&rows, &filter);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source.customer_id, "C2");
        assert_eq!(filter_transactions(&rows, &TransactionFilter::default()).len(), 3);
    }

    #[test]
    fn test_category_and_geographic_tables() {
        let mut rows = vec![
            transaction("C1", 100.0, "2024-01-01"),
            transaction("C2", 0.0, "2024-01-01"),
            transaction("C3", 500.0, "2024-01-01"),
        ];
        rows[0].tax = 10.0;
        rows[1].shipping_cost = 4.0;
        rows[2].category = "Books".to_string();
        rows[2].country = "Chile".to_string();
        let rows = enriched(rows);

        let categories = category_performance(&rows).unwrap();
        assert_eq!(categories[0].category, "Books");
        let electronics = &categories[1];
        assert_eq!(electronics.orders, 2);
        assert_eq!(electronics.net_revenue, 86.0);
        // the zero-total order has a NaN margin and is skipped
        assert_eq!(electronics.avg_margin, 90.0);

        let geo = geographic_summary(&rows).unwrap();
        assert_eq!(geo[0].country, "Chile");
        assert_eq!(geo[1].avg_shipping_cost, 2.0);
    }

    #[test]
    fn test_recommend_products_from_similar_customers() {
        let mut rows = vec![
            transaction("C1", 10.0, "2024-01-01"),
            transaction("C2", 10.0, "2024-01-01"),
            transaction("C2", 90.0, "2024-01-02"),
            transaction("C3", 500.0, "2024-01-02"),
        ];
        rows[2].product_id = "P2".to_string();
        rows[2].product_name = "Kindle".to_string();
        rows[3].product_id = "P3".to_string();
        rows[3].product_name = "Fire TV".to_string();
        let rows = enriched(rows);

        let recs = recommend_products(&rows, Some("C1"), 5).unwrap();
        assert_eq!(
            recs,
            vec![GroupRow {
                key: "Kindle".to_string(),
                value: 90.0
            }]
        );

        let overall = recommend_products(&rows, None, 1).unwrap();
        assert_eq!(overall[0].key, "Fire TV");
    }

    #[test]
    fn test_top_products_by_ranking() {
        let mut rows = vec![
            transaction("C1", 300.0, "2024-01-01"),
            transaction("C2", 20.0, "2024-01-01"),
            transaction("C3", 20.0, "2024-01-02"),
        ];
        rows[0].product_name = "Kindle".to_string();
        rows[1].quantity = 4;
        let rows = enriched(rows);

        let by_revenue = top_products(&rows, 2, ProductRanking::Revenue).unwrap();
        assert_eq!(by_revenue[0].key, "Kindle");

        let by_quantity = top_products(&rows, 2, ProductRanking::Quantity).unwrap();
        assert_eq!(by_quantity[0].key, "Echo Dot");
        assert_eq!(by_quantity[0].value, 5.0);

        let by_orders = top_products(&rows, 1, ProductRanking::Orders).unwrap();
        assert_eq!(
            by_orders,
            vec![GroupRow {
                key: "Echo Dot".to_string(),
                value: 2.0
            }]
        );
    }
}
