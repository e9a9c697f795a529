use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

mod charts;
mod db;
mod error;
mod evaluate;
mod features;
mod models;
mod report;
mod risk;

use models::{CustomerFeature, EvaluationSummary, RiskScore};

#[derive(Parser)]
#[command(name = "churn-risk")]
#[command(about = "Rule-based customer churn risk scoring", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small sample dataset
    Seed,
    /// Import customers and transactions from CSV files
    Import {
        #[arg(long)]
        customers: PathBuf,
        #[arg(long)]
        transactions: PathBuf,
        /// Clear both tables before importing
        #[arg(long)]
        replace: bool,
    },
    /// Print churn rate, churn by region and spending by churn status
    Analyze,
    /// Score churn risk for every customer
    Score {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = features::REFERENCE_DATE)]
        reference_date: NaiveDate,
        /// Print every score as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare average risk of active and churned customers
    Evaluate {
        #[arg(long, default_value_t = features::REFERENCE_DATE)]
        reference_date: NaiveDate,
        #[arg(long)]
        json: bool,
    },
    /// Write a markdown report and chart tables
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value = "outputs")]
        charts_dir: PathBuf,
        #[arg(long, default_value_t = features::REFERENCE_DATE)]
        reference_date: NaiveDate,
    },
    /// Rebuild the store from CSV files and run every step
    Pipeline {
        #[arg(long, default_value = "data/customers.csv")]
        customers: PathBuf,
        #[arg(long, default_value = "data/transactions.csv")]
        transactions: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value = "outputs")]
        charts_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| db::DEFAULT_DATABASE_URL.to_string());
    let pool = db::connect(&database_url)
        .await
        .with_context(|| format!("failed to open database at {database_url}"))?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import {
            customers,
            transactions,
            replace,
        } => {
            if replace {
                db::reset(&pool).await?;
            }
            let (customer_rows, transaction_rows) =
                import(&pool, &customers, &transactions).await?;
            println!(
                "Imported {customer_rows} customers from {} and {transaction_rows} transactions from {}.",
                customers.display(),
                transactions.display()
            );
        }
        Commands::Analyze => {
            print_analysis(&pool).await?;
        }
        Commands::Score {
            limit,
            reference_date,
            json,
        } => {
            let (_, scores) = score_store(&pool, reference_date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
                return Ok(());
            }
            if scores.is_empty() {
                println!("No customers found.");
                return Ok(());
            }

            println!("Highest churn risk customers:");
            for score in report::top_risk(&scores, limit) {
                println!(
                    "- customer {} ({}) score {:.3}",
                    score.customer_id,
                    models::status_label(score.is_active),
                    score.churn_risk_score
                );
            }
        }
        Commands::Evaluate {
            reference_date,
            json,
        } => {
            let (_, scores) = score_store(&pool, reference_date).await?;
            let summary = evaluate::evaluate(&scores);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_evaluation(&summary);
            }
        }
        Commands::Report {
            out,
            charts_dir,
            reference_date,
        } => {
            write_report(&pool, reference_date, &out, &charts_dir).await?;
        }
        Commands::Pipeline {
            customers,
            transactions,
            out,
            charts_dir,
        } => {
            println!("[Step 1/6] Setting up database...");
            db::init_db(&pool).await?;
            db::reset(&pool).await?;

            println!("[Step 2/6] Loading data...");
            let (customer_rows, transaction_rows) =
                import(&pool, &customers, &transactions).await?;
            println!("Loaded {customer_rows} customers and {transaction_rows} transactions.");

            println!("\n[Step 3/6] Running SQL analysis...");
            print_analysis(&pool).await?;

            println!("\n[Step 4/6] Building customer features...");
            let customers = db::fetch_customers(&pool).await?;
            let transactions = db::fetch_transactions(&pool).await?;
            let features =
                features::build_features(&customers, &transactions).context("feature build failed")?;
            println!("Created features for {} customers.", features.len());

            println!("\n[Step 5/6] Calculating churn risk scores...");
            let scores = risk::score_risk(&features);
            println!("Calculated churn risk for {} customers.", scores.len());
            print_evaluation(&evaluate::evaluate(&scores));

            println!("\n[Step 6/6] Writing report and chart tables...");
            render(&pool, features::REFERENCE_DATE, &features, &scores, &out, &charts_dir).await?;
            println!("\nPipeline complete.");
        }
    }

    Ok(())
}

async fn import(
    pool: &SqlitePool,
    customers: &Path,
    transactions: &Path,
) -> anyhow::Result<(usize, usize)> {
    let customer_rows = db::import_customers_csv(pool, customers)
        .await
        .with_context(|| format!("failed to import {}", customers.display()))?;
    let transaction_rows = db::import_transactions_csv(pool, transactions)
        .await
        .with_context(|| format!("failed to import {}", transactions.display()))?;
    Ok((customer_rows, transaction_rows))
}

async fn score_store(
    pool: &SqlitePool,
    reference_date: NaiveDate,
) -> anyhow::Result<(Vec<CustomerFeature>, Vec<RiskScore>)> {
    let customers = db::fetch_customers(pool).await?;
    let transactions = db::fetch_transactions(pool).await?;
    let features = features::build_features_at(&customers, &transactions, reference_date)
        .context("feature build failed")?;
    let scores = risk::score_risk(&features);
    Ok((features, scores))
}

async fn write_report(
    pool: &SqlitePool,
    reference_date: NaiveDate,
    out: &Path,
    charts_dir: &Path,
) -> anyhow::Result<()> {
    let (features, scores) = score_store(pool, reference_date).await?;
    render(pool, reference_date, &features, &scores, out, charts_dir).await
}

async fn render(
    pool: &SqlitePool,
    reference_date: NaiveDate,
    features: &[CustomerFeature],
    scores: &[RiskScore],
    out: &Path,
    charts_dir: &Path,
) -> anyhow::Result<()> {
    let overview = db::overall_churn(pool).await?;
    let regions = db::churn_by_region(pool).await?;
    let spending = db::spending_by_churn(pool).await?;
    let summary = evaluate::evaluate(scores);

    let markdown = report::build_report(&report::ReportInput {
        reference_date,
        overview: &overview,
        regions: &regions,
        spending: &spending,
        scores,
        summary: &summary,
    });
    std::fs::write(out, markdown)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("Report written to {}.", out.display());

    let written = charts::write_chart_tables(charts_dir, features, scores, &regions)
        .with_context(|| format!("failed to write chart tables to {}", charts_dir.display()))?;
    for path in written {
        println!("Saved: {}", path.display());
    }
    Ok(())
}

async fn print_analysis(pool: &SqlitePool) -> anyhow::Result<()> {
    let overview = db::overall_churn(pool).await?;
    println!("----- Overall Churn Rate -----");
    println!(
        "{} customers, {} churned ({})",
        overview.total_customers,
        overview.churned_customers,
        overview
            .churn_rate_percent
            .map_or_else(|| "n/a".to_string(), |rate| format!("{rate:.2}%"))
    );

    println!("\n----- Churn Rate by Region -----");
    for region in db::churn_by_region(pool).await? {
        println!(
            "{:<12} {:>5} customers {:>5} churned {:>7.2}%",
            region.region,
            region.total_customers,
            region.churned_customers,
            region.churn_rate_percent
        );
    }

    println!("\n----- Spending by Churn Status -----");
    for group in db::spending_by_churn(pool).await? {
        println!(
            "{:<8} {:>5} customers {:>6} transactions total {} avg {}",
            models::status_label(group.is_active),
            group.num_customers,
            group.total_transactions,
            group.total_spending.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}")),
            group
                .avg_transaction_amount
                .map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
        );
    }

    let activity = db::transactions_per_customer(pool).await?;
    if !activity.is_empty() {
        let total: i64 = activity.iter().map(|a| a.transaction_count).sum();
        println!(
            "\nAverage transactions per customer: {:.2}",
            total as f64 / activity.len() as f64
        );
    }
    Ok(())
}

fn print_evaluation(summary: &EvaluationSummary) {
    println!("\n=== Churn Risk Model Evaluation ===");
    println!(
        "Average risk score for active customers: {}",
        report::format_metric(summary.avg_risk_active)
    );
    println!(
        "Average risk score for churned customers: {}",
        report::format_metric(summary.avg_risk_churned)
    );
    println!("Difference: {}", report::format_metric(summary.difference));
    println!("\nActive customers: {}", summary.active_customers);
    println!("Churned customers: {}", summary.churned_customers);
}
