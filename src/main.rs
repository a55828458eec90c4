use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod eligibility;
mod engine;
mod error;
mod grade_scale;
mod models;
mod policy;
mod reconcile;
mod report;
mod rollup;
mod store;
mod telemetry;

use crate::config::AppConfig;
use crate::db::PgStore;
use crate::store::TermStore;

#[derive(Parser)]
#[command(name = "term-reporting")]
#[command(about = "Term reporting aggregation engine: course results and student term reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo school and print its reporting cycle id
    Seed,
    /// Import task outcomes from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recalculate course term results for a reporting cycle
    Recalculate {
        #[arg(long)]
        cycle: Uuid,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate student term reports from course term results
    Generate {
        #[arg(long)]
        cycle: Uuid,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Finalize every draft student term report in a reporting cycle
    Finalize {
        #[arg(long)]
        cycle: Uuid,
    },
    /// Write a markdown diagnostic summary of a cycle's course term results
    Diagnostics {
        #[arg(long)]
        cycle: Uuid,
        #[arg(long, default_value = "diagnostics.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.log_level)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let cycle = db::seed(&pool).await?;
            println!("Seed data inserted. Reporting cycle: {cycle}");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} outcomes from {}.", csv.display());
        }
        Commands::Recalculate { cycle, json } => {
            let summary =
                engine::recalculate_course_term_results(&store, cycle, &config.actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} buckets: {} created, {} updated ({} cleared), {} outcomes without enrollment.",
                    summary.buckets,
                    summary.created,
                    summary.updated,
                    summary.cleared,
                    summary.dropped
                );
            }
        }
        Commands::Generate { cycle, json } => {
            let summary =
                engine::generate_student_term_reports(&store, cycle, &config.actor).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if summary.reports == 0 {
                println!("No course term results found; run recalculate first.");
            } else {
                println!("Generated {} student term reports.", summary.reports);
            }
        }
        Commands::Finalize { cycle } => {
            let finalized =
                engine::finalize_student_term_reports(&store, cycle, &config.actor).await?;
            println!("Finalized {finalized} student term reports.");
        }
        Commands::Diagnostics { cycle, out } => {
            let reporting_cycle = engine::load_cycle(&store, cycle, false).await?;
            let results = store.course_term_results(cycle).await?;
            let markdown = report::build_diagnostics(&reporting_cycle, &results);
            std::fs::write(&out, markdown)?;
            println!("Diagnostics written to {}.", out.display());
        }
    }

    Ok(())
}
