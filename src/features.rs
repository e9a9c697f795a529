use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{ChurnError, Result};
use crate::models::{Customer, CustomerFeature, Transaction};

/// Fixed date that customer terms are measured against.
pub const REFERENCE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2025, 8, 1) {
    Some(date) => date,
    None => panic!("reference date out of range"),
};

#[derive(Debug, Default, Clone, Copy)]
struct SpendAggregate {
    total: f64,
    count: i64,
}

pub fn build_features(
    customers: &[Customer],
    transactions: &[Transaction],
) -> Result<Vec<CustomerFeature>> {
    build_features_at(customers, transactions, REFERENCE_DATE)
}

/// One feature row per customer, in customer order. Customers without
/// transactions get zeroed spend columns; orphaned transactions are ignored.
pub fn build_features_at(
    customers: &[Customer],
    transactions: &[Transaction],
    reference_date: NaiveDate,
) -> Result<Vec<CustomerFeature>> {
    let mut spend: HashMap<i64, SpendAggregate> = HashMap::new();
    for transaction in transactions {
        let entry = spend.entry(transaction.customer_id).or_default();
        entry.total += transaction.transaction_amount;
        entry.count += 1;
    }

    let mut features = Vec::with_capacity(customers.len());
    for customer in customers {
        let signup = parse_signup_date(&customer.signup_date).ok_or_else(|| {
            ChurnError::DateParse {
                customer_id: customer.customer_id,
                value: customer.signup_date.clone(),
            }
        })?;

        let aggregate = spend.get(&customer.customer_id).copied().unwrap_or_default();
        let average = if aggregate.count == 0 {
            0.0
        } else {
            aggregate.total / aggregate.count as f64
        };

        features.push(CustomerFeature {
            customer_id: customer.customer_id,
            is_active: customer.is_active,
            total_spending: round_to(aggregate.total, 2),
            avg_transaction_amount: round_to(average, 2),
            transaction_count: aggregate.count,
            term_days: (reference_date - signup).num_days(),
        });
    }

    tracing::info!(customers = features.len(), "built customer features");
    Ok(features)
}

/// Accepts a bare date or a date with a time of day; the time is dropped.
pub fn parse_signup_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|timestamp| timestamp.date())
}

/// Rounds halves to the nearest even digit.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}
