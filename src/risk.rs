use std::cmp::Ordering;

use crate::features::round_to;
use crate::models::{CustomerFeature, RiskScore};

pub const MAX_RISK: f64 = 1.0;

const FEW_TRANSACTIONS: i64 = 3;
const SHORT_TERM_DAYS: i64 = 100;

/// The three partial contributions that make up a churn risk score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskComponents {
    pub low_transactions: f64,
    pub low_spending: f64,
    pub short_term: f64,
}

impl RiskComponents {
    /// Sum of the components, capped at [`MAX_RISK`] and rounded to 3 places.
    ///
    /// With the current tiers the raw sum peaks at 0.9, so the cap only
    /// matters if a tier is raised.
    pub fn total(&self) -> f64 {
        let raw = self.low_transactions + self.low_spending + self.short_term;
        round_to(raw.min(MAX_RISK), 3)
    }
}

/// Scores every row against the median spend of the whole batch.
pub fn score_risk(features: &[CustomerFeature]) -> Vec<RiskScore> {
    let threshold = spending_threshold(features);
    let scores: Vec<RiskScore> = features
        .iter()
        .map(|feature| RiskScore {
            customer_id: feature.customer_id,
            is_active: feature.is_active,
            churn_risk_score: score_customer(feature, threshold).total(),
        })
        .collect();

    tracing::info!(
        customers = scores.len(),
        spending_threshold = threshold.unwrap_or(f64::NAN),
        "scored churn risk"
    );
    scores
}

/// Median total spend across the batch, `None` for an empty batch.
pub fn spending_threshold(features: &[CustomerFeature]) -> Option<f64> {
    let spend: Vec<f64> = features.iter().map(|f| f.total_spending).collect();
    median(&spend)
}

/// Risk components for one customer given the batch spending threshold.
/// Without a threshold nobody counts as a low spender.
pub fn score_customer(
    feature: &CustomerFeature,
    spending_threshold: Option<f64>,
) -> RiskComponents {
    let below_median = spending_threshold.is_some_and(|median| feature.total_spending < median);

    RiskComponents {
        low_transactions: transaction_risk(feature.transaction_count),
        low_spending: if below_median { 0.3 } else { 0.1 },
        short_term: term_risk(feature.term_days),
    }
}

pub fn transaction_risk(transaction_count: i64) -> f64 {
    if transaction_count < FEW_TRANSACTIONS {
        0.4
    } else {
        0.1
    }
}

pub fn term_risk(term_days: i64) -> f64 {
    if term_days < SHORT_TERM_DAYS {
        0.2
    } else {
        0.05
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
