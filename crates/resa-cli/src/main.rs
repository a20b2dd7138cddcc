use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use resa_adapters::ExtractWindow;
use resa_sync::{Pipeline, PipelineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "resa-cli")]
#[command(about = "Retail store analytics sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync the sales register into the analytics table.
    Sales {
        /// First sale date to extract (inclusive).
        #[arg(long)]
        since: Option<NaiveDate>,
        /// First sale date to leave out (exclusive).
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Upsert from --since instead of replacing the whole table.
        #[arg(long, requires = "since", conflicts_with = "until")]
        incremental: bool,
    },
    /// Replace one day's inventory snapshot.
    Inventory {
        /// Snapshot date, today when omitted.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Upsert daily visitor counts.
    Visitors {
        /// First visit date to extract, configured default when omitted.
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Build the Excel sales workbook without writing to the sink.
    Report {
        #[arg(long)]
        since: Option<NaiveDate>,
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Output path, configured default when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let pipeline = Pipeline::connect(PipelineConfig::from_env()).await?;

    match cli.command {
        Commands::Sales {
            since,
            until,
            incremental,
        } => {
            let summary = if incremental {
                let since = since.context("--incremental requires --since")?;
                pipeline.run_sales_incremental(since).await?
            } else {
                pipeline.run_sales_full(ExtractWindow { since, until }).await?
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Inventory { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let summary = pipeline.run_inventory(date).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Visitors { since } => {
            let since = since.unwrap_or(pipeline.config().visitors_since);
            let summary = pipeline.run_visitors(since).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Report { since, until, out } => {
            let out = out.unwrap_or_else(|| pipeline.config().report_path.clone());
            let summary = pipeline
                .build_report(ExtractWindow { since, until }, &out)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
