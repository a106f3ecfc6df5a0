//! Shared builders for unit tests

use crate::data::{parse_order_date, OrderStatus, Transaction};
use crate::preprocess::{preprocess, EnrichedTransaction};

/// A delivered single-unit order for `customer_id`.
pub fn transaction(customer_id: &str, total_amount: f64, date: &str) -> Transaction {
    Transaction {
        order_id: format!("ORD-{customer_id}-{date}-{total_amount}"),
        customer_id: customer_id.to_string(),
        customer_name: format!("Customer {customer_id}"),
        product_id: "P1".to_string(),
        product_name: "Echo Dot".to_string(),
        category: "Electronics".to_string(),
        brand: "Amazon".to_string(),
        unit_price: total_amount,
        quantity: 1,
        discount: 0.0,
        shipping_cost: 0.0,
        tax: 0.0,
        total_amount,
        order_status: OrderStatus::Delivered,
        payment_method: "Credit Card".to_string(),
        country: "Brazil".to_string(),
        state: "SP".to_string(),
        city: "Sao Paulo".to_string(),
        seller_id: "S1".to_string(),
        order_date: parse_order_date(date).expect("fixture date"),
    }
}

pub fn enriched(transactions: Vec<Transaction>) -> Vec<EnrichedTransaction> {
    preprocess(&transactions)
}

/// `n` customers with distinct spend, order counts and recency.
pub fn population(n: usize) -> Vec<EnrichedTransaction> {
    let mut rows = Vec::new();
    for c in 0..n {
        let id = format!("C{c:03}");
        for order in 0..=(c % 4) {
            let day = 1 + (c * 3 + order) % 27;
            let amount = 20.0 + (c * 37 % 101) as f64 * 5.0 + order as f64;
            let mut tx = transaction(&id, amount, &format!("2024-03-{day:02}"));
            tx.quantity = 1 + (c % 3) as u32;
            tx.discount = (c % 5) as f64 * 0.05;
            tx.shipping_cost = (c % 7) as f64;
            tx.order_id = format!("ORD-{id}-{order}");
            rows.push(tx);
        }
    }
    preprocess(&rows)
}
