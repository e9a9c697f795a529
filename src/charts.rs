//! Tables backing the churn charts. Rendering happens elsewhere; these are
//! the finished series a plotting tool reads.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::models::{status_label, CustomerFeature, RegionChurn, RiskScore};

pub const DEFAULT_BINS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct StatusAverage {
    pub status: &'static str,
    pub customers: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub active: usize,
    pub churned: usize,
}

pub fn spending_by_status(features: &[CustomerFeature]) -> Vec<StatusAverage> {
    average_by_status(features, |f| f.total_spending)
}

pub fn transactions_by_status(features: &[CustomerFeature]) -> Vec<StatusAverage> {
    average_by_status(features, |f| f.transaction_count as f64)
}

/// Churned first, then active. Empty groups average to NaN.
fn average_by_status(
    features: &[CustomerFeature],
    value: impl Fn(&CustomerFeature) -> f64,
) -> Vec<StatusAverage> {
    [false, true]
        .into_iter()
        .map(|is_active| {
            let values: Vec<f64> = features
                .iter()
                .filter(|f| f.is_active == is_active)
                .map(&value)
                .collect();
            let mean = if values.is_empty() {
                f64::NAN
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            StatusAverage {
                status: status_label(is_active),
                customers: values.len(),
                value: mean,
            }
        })
        .collect()
}

/// Equal-width bins over the combined score range; the last bin is closed.
pub fn risk_histogram(scores: &[RiskScore], bins: usize) -> Vec<HistogramBin> {
    if scores.is_empty() || bins == 0 {
        return Vec::new();
    }

    let mut low = scores.iter().map(|s| s.churn_risk_score).fold(f64::INFINITY, f64::min);
    let mut high = scores
        .iter()
        .map(|s| s.churn_risk_score)
        .fold(f64::NEG_INFINITY, f64::max);
    if low == high {
        low -= 0.5;
        high += 0.5;
    }
    let width = (high - low) / bins as f64;

    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: low + width * i as f64,
            upper: if i + 1 == bins { high } else { low + width * (i + 1) as f64 },
            active: 0,
            churned: 0,
        })
        .collect();

    for score in scores {
        let index = (((score.churn_risk_score - low) / width) as usize).min(bins - 1);
        let bin = &mut histogram[index];
        if score.is_active {
            bin.active += 1;
        } else {
            bin.churned += 1;
        }
    }

    histogram
}

pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes every chart table into `dir`, creating it when missing.
pub fn write_chart_tables(
    dir: &Path,
    features: &[CustomerFeature],
    scores: &[RiskScore],
    regions: &[RegionChurn],
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let spending = dir.join("spending_vs_churn.csv");
    write_table(&spending, &spending_by_status(features))?;

    let transactions = dir.join("transactions_vs_churn.csv");
    write_table(&transactions, &transactions_by_status(features))?;

    let region_path = dir.join("churn_by_region.csv");
    write_table(&region_path, regions)?;

    let distribution = dir.join("risk_distribution.csv");
    write_table(&distribution, &risk_histogram(scores, DEFAULT_BINS))?;

    let written = vec![spending, transactions, region_path, distribution];
    for path in &written {
        tracing::debug!(path = %path.display(), "wrote chart table");
    }
    Ok(written)
}
