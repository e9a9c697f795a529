use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{
    status_label, ChurnOverview, EvaluationSummary, RegionChurn, RiskScore, SpendingByStatus,
};

pub struct ReportInput<'a> {
    pub reference_date: NaiveDate,
    pub overview: &'a ChurnOverview,
    pub regions: &'a [RegionChurn],
    pub spending: &'a [SpendingByStatus],
    pub scores: &'a [RiskScore],
    pub summary: &'a EvaluationSummary,
}

/// Highest scores first; equal scores keep customer_id order.
pub fn top_risk(scores: &[RiskScore], limit: usize) -> Vec<RiskScore> {
    let mut ranked = scores.to_vec();
    ranked.sort_by(|a, b| {
        b.churn_risk_score
            .partial_cmp(&a.churn_risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.customer_id.cmp(&b.customer_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Two decimals, or "n/a" for an undefined value.
pub fn format_metric(value: f64) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{value:.2}")
    }
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Customer Churn Risk Report");
    let _ = writeln!(
        output,
        "Terms measured against {} across {} customers",
        input.reference_date, input.overview.total_customers
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall Churn");
    match input.overview.churn_rate_percent {
        Some(rate) => {
            let _ = writeln!(
                output,
                "- {} of {} customers churned ({:.2}%)",
                input.overview.churned_customers, input.overview.total_customers, rate
            );
        }
        None => {
            let _ = writeln!(output, "No customers recorded.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Churn by Region");
    if input.regions.is_empty() {
        let _ = writeln!(output, "No regions recorded.");
    } else {
        for region in input.regions {
            let _ = writeln!(
                output,
                "- {}: {:.1}% ({} of {} churned)",
                region.region,
                region.churn_rate_percent,
                region.churned_customers,
                region.total_customers
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Spending by Churn Status");
    if input.spending.is_empty() {
        let _ = writeln!(output, "No spending recorded.");
    } else {
        for group in input.spending {
            let _ = writeln!(
                output,
                "- {}: {} customers, {} transactions, total {}, average {}",
                status_label(group.is_active),
                group.num_customers,
                group.total_transactions,
                group.total_spending.map_or_else(|| "n/a".to_string(), |v| format!("${v:.2}")),
                group
                    .avg_transaction_amount
                    .map_or_else(|| "n/a".to_string(), |v| format!("${v:.2}"))
            );
        }
    }

    let summary = input.summary;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Model Evaluation");
    let _ = writeln!(
        output,
        "- Average risk score for active customers: {}",
        format_metric(summary.avg_risk_active)
    );
    let _ = writeln!(
        output,
        "- Average risk score for churned customers: {}",
        format_metric(summary.avg_risk_churned)
    );
    let _ = writeln!(output, "- Difference: {}", format_metric(summary.difference));
    let _ = writeln!(
        output,
        "- Active customers: {}, churned customers: {}",
        summary.active_customers, summary.churned_customers
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Customers");
    let top = top_risk(input.scores, 10);
    if top.is_empty() {
        let _ = writeln!(output, "No customers scored.");
    } else {
        for score in top.iter() {
            let _ = writeln!(
                output,
                "- customer {} ({}) score {:.3}",
                score.customer_id,
                status_label(score.is_active),
                score.churn_risk_score
            );
        }
    }

    output
}
