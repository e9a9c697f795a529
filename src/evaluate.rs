use crate::models::{EvaluationSummary, RiskScore};

/// Compares mean risk of active and churned customers. A label with no rows
/// gets a NaN mean, which also makes the difference NaN.
pub fn evaluate(scores: &[RiskScore]) -> EvaluationSummary {
    let (active, churned): (Vec<&RiskScore>, Vec<&RiskScore>) =
        scores.iter().partition(|score| score.is_active);

    let avg_risk_active = mean_risk(&active);
    let avg_risk_churned = mean_risk(&churned);

    if active.is_empty() || churned.is_empty() {
        tracing::warn!(
            active = active.len(),
            churned = churned.len(),
            "churn label partition is empty; averages are undefined"
        );
    }

    EvaluationSummary {
        active_customers: active.len(),
        churned_customers: churned.len(),
        avg_risk_active,
        avg_risk_churned,
        difference: (avg_risk_churned - avg_risk_active).abs(),
    }
}

fn mean_risk(scores: &[&RiskScore]) -> f64 {
    if scores.is_empty() {
        return f64::NAN;
    }
    scores.iter().map(|s| s.churn_risk_score).sum::<f64>() / scores.len() as f64
}
