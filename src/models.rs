use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub customer_id: i64,
    pub signup_date: String,
    pub region: String,
    pub plan_type: String,
    #[serde(serialize_with = "serialize_flag")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: i64,
    pub customer_id: i64,
    pub transaction_date: String,
    pub transaction_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFeature {
    pub customer_id: i64,
    #[serde(serialize_with = "serialize_flag")]
    pub is_active: bool,
    pub total_spending: f64,
    pub avg_transaction_amount: f64,
    pub transaction_count: i64,
    pub term_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub customer_id: i64,
    #[serde(serialize_with = "serialize_flag")]
    pub is_active: bool,
    pub churn_risk_score: f64,
}

/// Per-label averages of churn risk. Means are NaN when a label has no rows.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub active_customers: usize,
    pub churned_customers: usize,
    pub avg_risk_active: f64,
    pub avg_risk_churned: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChurnOverview {
    pub total_customers: i64,
    pub churned_customers: i64,
    pub churn_rate_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionChurn {
    pub region: String,
    pub total_customers: i64,
    pub churned_customers: i64,
    pub churn_rate_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpendingByStatus {
    #[serde(serialize_with = "serialize_flag")]
    pub is_active: bool,
    pub num_customers: i64,
    pub total_transactions: i64,
    pub total_spending: Option<f64>,
    pub avg_transaction_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerActivity {
    pub customer_id: i64,
    #[serde(serialize_with = "serialize_flag")]
    pub is_active: bool,
    pub transaction_count: i64,
}

/// Maps the stored 1/0 activity flag; anything else is not a flag.
pub fn parse_flag(value: i64) -> Option<bool> {
    match value {
        1 => Some(true),
        0 => Some(false),
        _ => None,
    }
}

pub fn status_label(is_active: bool) -> &'static str {
    if is_active {
        "Active"
    } else {
        "Churned"
    }
}

fn serialize_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_only_accept_zero_and_one() {
        assert_eq!(parse_flag(1), Some(true));
        assert_eq!(parse_flag(0), Some(false));
        assert_eq!(parse_flag(2), None);
        assert_eq!(parse_flag(-1), None);
    }

    #[test]
    fn activity_flag_serializes_as_integer() {
        let score = RiskScore {
            customer_id: 7,
            is_active: true,
            churn_risk_score: 0.25,
        };
        let json = serde_json::to_string(&score).unwrap();
        assert_eq!(
            json,
            r#"{"customer_id":7,"is_active":1,"churn_risk_score":0.25}"#
        );
    }
}
