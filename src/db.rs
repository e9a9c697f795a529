use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, ValueRef};

use crate::error::{ChurnError, Result};
use crate::models::{
    parse_flag, ChurnOverview, Customer, CustomerActivity, RegionChurn, SpendingByStatus,
    Transaction,
};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://database/churn.db";

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    // Orphaned transactions are dropped by the feature builder, not rejected here.
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(false);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Every connection to an in-memory database is its own database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| ChurnError::Store(err.into()))?;
    Ok(())
}

/// Clears both tables so the next import starts from an empty store.
pub async fn reset(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM transactions").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM customers").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn seed(pool: &SqlitePool) -> Result<()> {
    let customers = vec![
        (1, "2023-02-14", "North", "Premium", 1),
        (2, "2025-06-20", "South", "Basic", 0),
        (3, "2024-11-03", "East", "Standard", 1),
        (4, "2025-07-05", "West", "Basic", 0),
        (5, "2022-09-30", "North", "Standard", 1),
        (6, "2025-05-18", "East", "Basic", 0),
    ];

    let transactions = vec![
        (1001, 1, "2025-01-10", 120.50),
        (1002, 1, "2025-03-02", 89.99),
        (1003, 1, "2025-06-21", 140.00),
        (1004, 1, "2025-07-28", 64.25),
        (1005, 2, "2025-07-01", 19.99),
        (1006, 3, "2025-01-15", 45.00),
        (1007, 3, "2025-04-09", 52.75),
        (1008, 3, "2025-07-19", 38.40),
        (1009, 5, "2024-12-01", 210.00),
        (1010, 5, "2025-02-11", 175.30),
        (1011, 5, "2025-05-27", 199.95),
        (1012, 6, "2025-06-02", 24.50),
    ];

    let mut tx = pool.begin().await?;
    for (customer_id, signup_date, region, plan_type, is_active) in customers {
        sqlx::query(UPSERT_CUSTOMER)
            .bind(customer_id as i64)
            .bind(signup_date)
            .bind(region)
            .bind(plan_type)
            .bind(is_active as i64)
            .execute(&mut *tx)
            .await?;
    }
    for (transaction_id, customer_id, transaction_date, amount) in transactions {
        sqlx::query(UPSERT_TRANSACTION)
            .bind(transaction_id as i64)
            .bind(customer_id as i64)
            .bind(transaction_date)
            .bind(amount)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(())
}

const UPSERT_CUSTOMER: &str = r#"
    INSERT INTO customers (customer_id, signup_date, region, plan_type, is_active)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (customer_id) DO UPDATE
    SET signup_date = EXCLUDED.signup_date,
        region = EXCLUDED.region,
        plan_type = EXCLUDED.plan_type,
        is_active = EXCLUDED.is_active
"#;

const UPSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (transaction_id, customer_id, transaction_date, transaction_amount)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (transaction_id) DO UPDATE
    SET customer_id = EXCLUDED.customer_id,
        transaction_date = EXCLUDED.transaction_date,
        transaction_amount = EXCLUDED.transaction_amount
"#;

pub async fn import_customers_csv(pool: &SqlitePool, csv_path: &Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        customer_id: i64,
        signup_date: String,
        region: String,
        plan_type: String,
        is_active: i64,
    }

    let mut reader = csv_reader(csv_path)?;
    require_headers(
        &mut reader,
        "customers",
        &["customer_id", "signup_date", "region", "plan_type", "is_active"],
    )?;

    let mut tx = pool.begin().await?;
    let mut written = 0usize;
    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if parse_flag(row.is_active).is_none() {
            return Err(ChurnError::InvalidValue {
                table: "customers",
                column: "is_active".to_string(),
                reason: format!("customer {} has flag {}", row.customer_id, row.is_active),
            });
        }

        let result = sqlx::query(UPSERT_CUSTOMER)
            .bind(row.customer_id)
            .bind(&row.signup_date)
            .bind(&row.region)
            .bind(&row.plan_type)
            .bind(row.is_active)
            .execute(&mut *tx)
            .await?;
        written += result.rows_affected() as usize;
    }
    tx.commit().await?;

    tracing::info!(rows = written, path = %csv_path.display(), "imported customers");
    Ok(written)
}

pub async fn import_transactions_csv(pool: &SqlitePool, csv_path: &Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        transaction_id: i64,
        customer_id: i64,
        transaction_date: String,
        transaction_amount: f64,
    }

    let mut reader = csv_reader(csv_path)?;
    require_headers(
        &mut reader,
        "transactions",
        &["transaction_id", "customer_id", "transaction_date", "transaction_amount"],
    )?;

    let mut tx = pool.begin().await?;
    let mut written = 0usize;
    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if !row.transaction_amount.is_finite() || row.transaction_amount < 0.0 {
            return Err(ChurnError::InvalidValue {
                table: "transactions",
                column: "transaction_amount".to_string(),
                reason: format!(
                    "transaction {} has amount {}",
                    row.transaction_id, row.transaction_amount
                ),
            });
        }

        let result = sqlx::query(UPSERT_TRANSACTION)
            .bind(row.transaction_id)
            .bind(row.customer_id)
            .bind(&row.transaction_date)
            .bind(row.transaction_amount)
            .execute(&mut *tx)
            .await?;
        written += result.rows_affected() as usize;
    }
    tx.commit().await?;

    tracing::info!(rows = written, path = %csv_path.display(), "imported transactions");
    Ok(written)
}

fn csv_reader(csv_path: &Path) -> Result<csv::Reader<std::fs::File>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(csv_path)?;
    Ok(reader)
}

fn require_headers<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    table: &'static str,
    required: &[&str],
) -> Result<()> {
    let headers = reader.headers()?;
    for column in required {
        if !headers.iter().any(|header| header == *column) {
            return Err(ChurnError::MissingColumn {
                table,
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

pub async fn fetch_customers(pool: &SqlitePool) -> Result<Vec<Customer>> {
    let records = sqlx::query("SELECT * FROM customers ORDER BY customer_id")
        .fetch_all(pool)
        .await?;

    let mut customers = Vec::with_capacity(records.len());
    for row in records {
        let customer_id: i64 = column(&row, "customers", "customer_id")?;
        let flag: i64 = column(&row, "customers", "is_active")?;
        let is_active = parse_flag(flag).ok_or_else(|| ChurnError::InvalidValue {
            table: "customers",
            column: "is_active".to_string(),
            reason: format!("customer {customer_id} has flag {flag}"),
        })?;

        customers.push(Customer {
            customer_id,
            signup_date: column(&row, "customers", "signup_date")?,
            region: column(&row, "customers", "region")?,
            plan_type: column(&row, "customers", "plan_type")?,
            is_active,
        });
    }

    tracing::info!(rows = customers.len(), "loaded customers");
    Ok(customers)
}

pub async fn fetch_transactions(pool: &SqlitePool) -> Result<Vec<Transaction>> {
    let records = sqlx::query("SELECT * FROM transactions ORDER BY transaction_id")
        .fetch_all(pool)
        .await?;

    let mut transactions = Vec::with_capacity(records.len());
    for row in records {
        transactions.push(Transaction {
            transaction_id: column(&row, "transactions", "transaction_id")?,
            customer_id: column(&row, "transactions", "customer_id")?,
            transaction_date: column(&row, "transactions", "transaction_date")?,
            transaction_amount: column(&row, "transactions", "transaction_amount")?,
        });
    }

    tracing::info!(rows = transactions.len(), "loaded transactions");
    Ok(transactions)
}

/// Reads a required column by name. NULL is rejected here because the
/// SQLite decoders would otherwise turn it into a zero or empty value.
fn column<'r, T>(row: &'r SqliteRow, table: &'static str, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    let invalid = |reason: String| ChurnError::InvalidValue {
        table,
        column: name.to_string(),
        reason,
    };

    let raw = row.try_get_raw(name).map_err(|err| match err {
        sqlx::Error::ColumnNotFound(_) => ChurnError::MissingColumn {
            table,
            column: name.to_string(),
        },
        other => invalid(other.to_string()),
    })?;
    if raw.is_null() {
        return Err(invalid("unexpected NULL".to_string()));
    }

    row.try_get::<T, _>(name).map_err(|err| invalid(err.to_string()))
}

pub async fn overall_churn(pool: &SqlitePool) -> Result<ChurnOverview> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_customers,
            COALESCE(SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END), 0) AS churned_customers,
            ROUND(100.0 * SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END) / COUNT(*), 2)
                AS churn_rate_percent
        FROM customers
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(ChurnOverview {
        total_customers: row.try_get("total_customers")?,
        churned_customers: row.try_get("churned_customers")?,
        churn_rate_percent: row.try_get("churn_rate_percent")?,
    })
}

pub async fn churn_by_region(pool: &SqlitePool) -> Result<Vec<RegionChurn>> {
    let records = sqlx::query(
        r#"
        SELECT
            region,
            COUNT(*) AS total_customers,
            SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END) AS churned_customers,
            ROUND(100.0 * SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END) / COUNT(*), 2)
                AS churn_rate_percent
        FROM customers
        GROUP BY region
        ORDER BY churn_rate_percent DESC, region
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut regions = Vec::with_capacity(records.len());
    for row in records {
        regions.push(RegionChurn {
            region: row.try_get("region")?,
            total_customers: row.try_get("total_customers")?,
            churned_customers: row.try_get("churned_customers")?,
            churn_rate_percent: row.try_get("churn_rate_percent")?,
        });
    }
    Ok(regions)
}

pub async fn spending_by_churn(pool: &SqlitePool) -> Result<Vec<SpendingByStatus>> {
    let records = sqlx::query(
        r#"
        SELECT
            c.is_active,
            COUNT(DISTINCT c.customer_id) AS num_customers,
            COUNT(t.transaction_id) AS total_transactions,
            ROUND(SUM(t.transaction_amount), 2) AS total_spending,
            ROUND(AVG(t.transaction_amount), 2) AS avg_transaction_amount
        FROM customers c
        LEFT JOIN transactions t ON c.customer_id = t.customer_id
        GROUP BY c.is_active
        ORDER BY c.is_active
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut groups = Vec::with_capacity(records.len());
    for row in records {
        let flag: i64 = row.try_get("is_active")?;
        groups.push(SpendingByStatus {
            is_active: flag == 1,
            num_customers: row.try_get("num_customers")?,
            total_transactions: row.try_get("total_transactions")?,
            total_spending: row.try_get("total_spending")?,
            avg_transaction_amount: row.try_get("avg_transaction_amount")?,
        });
    }
    Ok(groups)
}

pub async fn transactions_per_customer(pool: &SqlitePool) -> Result<Vec<CustomerActivity>> {
    let records = sqlx::query(
        r#"
        SELECT
            c.customer_id,
            c.is_active,
            COUNT(t.transaction_id) AS transaction_count
        FROM customers c
        LEFT JOIN transactions t ON c.customer_id = t.customer_id
        GROUP BY c.customer_id, c.is_active
        ORDER BY c.customer_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut activity = Vec::with_capacity(records.len());
    for row in records {
        let flag: i64 = row.try_get("is_active")?;
        activity.push(CustomerActivity {
            customer_id: row.try_get("customer_id")?,
            is_active: flag == 1,
            transaction_count: row.try_get("transaction_count")?,
        });
    }
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    fn csv_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = memory_pool().await;
        seed(&pool).await.unwrap();
        seed(&pool).await.unwrap();

        let customers = fetch_customers(&pool).await.unwrap();
        let transactions = fetch_transactions(&pool).await.unwrap();
        assert_eq!(customers.len(), 6);
        assert_eq!(transactions.len(), 12);
        assert_eq!(customers[0].customer_id, 1);
        assert!(customers[0].is_active);
    }

    #[tokio::test]
    async fn imports_csv_into_fetchable_records() {
        let pool = memory_pool().await;
        let customers = csv_file(&[
            "customer_id,signup_date,region,plan_type,is_active",
            "1,2025-01-01,North,Basic,1",
            "2,2025-07-15,South,Premium,0",
        ]);
        let transactions = csv_file(&[
            "transaction_id,customer_id,transaction_date,transaction_amount",
            "10,1,2025-02-01,25.5",
            "11,1,2025-03-01,14.5",
        ]);

        assert_eq!(import_customers_csv(&pool, customers.path()).await.unwrap(), 2);
        assert_eq!(import_transactions_csv(&pool, transactions.path()).await.unwrap(), 2);

        let loaded = fetch_customers(&pool).await.unwrap();
        assert_eq!(
            loaded[1],
            Customer {
                customer_id: 2,
                signup_date: "2025-07-15".to_string(),
                region: "South".to_string(),
                plan_type: "Premium".to_string(),
                is_active: false,
            }
        );
        let purchases = fetch_transactions(&pool).await.unwrap();
        assert_eq!(purchases.len(), 2);
        assert_eq!(purchases[0].transaction_amount, 25.5);
    }

    #[tokio::test]
    async fn import_rejects_missing_header() {
        let pool = memory_pool().await;
        let customers = csv_file(&["customer_id,signup_date,region,plan_type", "1,2025-01-01,North,Basic"]);
        let err = import_customers_csv(&pool, customers.path()).await.unwrap_err();
        assert!(matches!(
            err,
            ChurnError::MissingColumn { table: "customers", ref column } if column == "is_active"
        ));
    }

    #[tokio::test]
    async fn import_rejects_negative_amounts() {
        let pool = memory_pool().await;
        let transactions = csv_file(&[
            "transaction_id,customer_id,transaction_date,transaction_amount",
            "10,1,2025-02-01,-3.0",
        ]);
        let err = import_transactions_csv(&pool, transactions.path()).await.unwrap_err();
        assert!(matches!(err, ChurnError::InvalidValue { table: "transactions", .. }));
    }

    #[tokio::test]
    async fn missing_store_column_is_invalid_input() {
        let pool = connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE customers (customer_id INTEGER PRIMARY KEY, signup_date TEXT, region TEXT, plan_type TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO customers VALUES (1, '2025-01-01', 'North', 'Basic')")
            .execute(&pool)
            .await
            .unwrap();

        let err = fetch_customers(&pool).await.unwrap_err();
        match err {
            ChurnError::MissingColumn { table, column } => {
                assert_eq!(table, "customers");
                assert_eq!(column, "is_active");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    async fn loose_customers_table(rows: &[&str]) -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE customers (customer_id INTEGER PRIMARY KEY, signup_date TEXT, region TEXT, plan_type TEXT, is_active INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for row in rows {
            sqlx::query(&format!("INSERT INTO customers VALUES {row}"))
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    fn assert_bad_flag(err: ChurnError) {
        match err {
            ChurnError::InvalidValue { table, column, .. } => {
                assert_eq!(table, "customers");
                assert_eq!(column, "is_active");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stored_flag_outside_zero_one_is_invalid() {
        let pool = loose_customers_table(&["(1, '2025-01-01', 'North', 'Basic', 2)"]).await;
        let err = fetch_customers(&pool).await.unwrap_err();
        assert_bad_flag(err);
    }

    #[tokio::test]
    async fn stored_null_flag_is_invalid() {
        let pool = loose_customers_table(&["(1, '2025-01-01', 'North', 'Basic', NULL)"]).await;
        let err = fetch_customers(&pool).await.unwrap_err();
        assert_bad_flag(err);
    }

    #[tokio::test]
    async fn import_rejects_flag_outside_zero_one() {
        let pool = memory_pool().await;
        let customers = csv_file(&[
            "customer_id,signup_date,region,plan_type,is_active",
            "1,2025-01-01,North,Basic,2",
        ]);
        let err = import_customers_csv(&pool, customers.path()).await.unwrap_err();
        assert_bad_flag(err);
        assert!(fetch_customers(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_accepts_padded_headers() {
        let pool = memory_pool().await;
        let customers = csv_file(&[
            "customer_id, signup_date ,region,plan_type, is_active",
            "1,2025-01-01,North,Basic,1",
        ]);
        assert_eq!(import_customers_csv(&pool, customers.path()).await.unwrap(), 1);
        let loaded = fetch_customers(&pool).await.unwrap();
        assert_eq!(loaded[0].signup_date, "2025-01-01");
        assert!(loaded[0].is_active);
    }

    #[tokio::test]
    async fn reset_empties_both_tables() {
        let pool = memory_pool().await;
        seed(&pool).await.unwrap();
        reset(&pool).await.unwrap();
        assert!(fetch_customers(&pool).await.unwrap().is_empty());
        assert!(fetch_transactions(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregates_match_seed_data() {
        let pool = memory_pool().await;
        seed(&pool).await.unwrap();

        let overview = overall_churn(&pool).await.unwrap();
        assert_eq!(overview.total_customers, 6);
        assert_eq!(overview.churned_customers, 3);
        assert_eq!(overview.churn_rate_percent, Some(50.0));

        let regions = churn_by_region(&pool).await.unwrap();
        let labels: Vec<&str> = regions.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(labels, vec!["South", "West", "East", "North"]);
        assert_eq!(regions[2].churn_rate_percent, 50.0);
        assert_eq!(regions[3].churn_rate_percent, 0.0);

        let spending = spending_by_churn(&pool).await.unwrap();
        assert_eq!(spending.len(), 2);
        let churned = &spending[0];
        assert!(!churned.is_active);
        assert_eq!(churned.num_customers, 3);
        assert_eq!(churned.total_transactions, 2);
        assert_eq!(churned.total_spending, Some(44.49));

        let activity = transactions_per_customer(&pool).await.unwrap();
        assert_eq!(activity.len(), 6);
        assert_eq!(activity[3].customer_id, 4);
        assert_eq!(activity[3].transaction_count, 0);
    }

    #[tokio::test]
    async fn empty_store_has_no_churn_rate() {
        let pool = memory_pool().await;
        let overview = overall_churn(&pool).await.unwrap();
        assert_eq!(overview.total_customers, 0);
        assert_eq!(overview.churned_customers, 0);
        assert_eq!(overview.churn_rate_percent, None);
    }
}
