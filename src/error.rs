use thiserror::Error;

/// Faults raised by the churn pipeline and its store boundary.
#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("table `{table}` is missing required column `{column}`")]
    MissingColumn { table: &'static str, column: String },

    #[error("invalid value in `{table}.{column}`: {reason}")]
    InvalidValue {
        table: &'static str,
        column: String,
        reason: String,
    },

    #[error("customer {customer_id} has unparseable signup_date {value:?}")]
    DateParse { customer_id: i64, value: String },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChurnError>;
