//! twstock CLI: fetch, range and backfill commands.
//!
//! Commands:
//! - `fetch-all`: fetch the lookback window for every target symbol
//! - `fetch-one`: fetch the lookback window for one symbol
//! - `update`: gap-fill the most recent days for every target symbol
//! - `range-all` / `range-one`: write an isolated date-range snapshot
//! - `backward`: gap-fill the last N days of one symbol
//! - `test-connection`: probe both exchanges

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use twstock_core::domain::SymbolSeries;
use twstock_core::{BatchSummary, FetchConfig, UnifiedFetcher};

#[derive(Parser)]
#[command(
    name = "twstock",
    about = "Daily quotes from TWSE and TPEx, merged into per-symbol CSV files"
)]
struct Cli {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory; overrides the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Symbol registry file; overrides the config.
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the lookback window for every target symbol.
    FetchAll,
    /// Fetch the lookback window for one symbol.
    FetchOne {
        /// Stock code (e.g., 2330). Codes missing from the registry are auto-detected.
        code: String,
    },
    /// Gap-fill the most recent days for every target symbol.
    Update {
        /// Window in days. Defaults to the configured update window.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Snapshot a date range for every target symbol.
    RangeAll {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,
    },
    /// Snapshot a date range for one symbol.
    RangeOne {
        code: String,
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,
    },
    /// Gap-fill the last N days of one symbol.
    Backward {
        code: String,
        #[arg(default_value_t = 30)]
        days: u32,
    },
    /// Probe both exchange endpoints.
    TestConnection,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let fetcher = UnifiedFetcher::from_config(&config)
        .with_context(|| format!("failed to initialise from {}", config.registry_path.display()))?;

    match cli.command {
        Commands::FetchAll => {
            print_targets(&fetcher);
            let report = fetcher.fetch_all();
            for series in report.results.values() {
                print_series(series);
            }
            finish(&report.summary)
        }
        Commands::FetchOne { code } => {
            print_series(&fetcher.fetch_one(&code)?);
            Ok(())
        }
        Commands::Update { days } => {
            print_targets(&fetcher);
            let report = fetcher.update_all(days);
            finish(&report.summary)
        }
        Commands::RangeAll { start, end } => {
            let (start, end) = (parse_date(&start)?, parse_date(&end)?);
            print_targets(&fetcher);
            let report = fetcher.fetch_all_by_date_range(start, end)?;
            println!(
                "Snapshots written to {}",
                fetcher.store().snapshot_dir(start, end).display()
            );
            finish(&report.summary)
        }
        Commands::RangeOne { code, start, end } => {
            let (start, end) = (parse_date(&start)?, parse_date(&end)?);
            let snapshot = fetcher.fetch_one_by_date_range(&code, start, end)?;
            print_series(&snapshot.series);
            println!(
                "Snapshot written to {}",
                fetcher.store().snapshot_dir(start, end).display()
            );
            Ok(())
        }
        Commands::Backward { code, days } => {
            print_series(&fetcher.fetch_backward_days(&code, days)?);
            Ok(())
        }
        Commands::TestConnection => {
            let status = fetcher.test_connection();
            println!("TWSE (listed): {}", if status.listed_ok { "ok" } else { "FAILED" });
            println!("TPEx (OTC):    {}", if status.otc_ok { "ok" } else { "FAILED" });
            if !status.all_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<FetchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = FetchConfig::from_file(path)?;
            info!(path = %path.display(), "loaded config");
            config
        }
        None => FetchConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(path) = &cli.registry {
        config.registry_path = path.clone();
    }
    Ok(config)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn print_targets(fetcher: &UnifiedFetcher) {
    for (market, codes) in fetcher.registry().targets_by_market() {
        let label = market.map_or_else(|| "auto-detect".to_string(), |m| m.to_string());
        println!("{label:<12} {:>4} symbols: {}", codes.len(), codes.join(" "));
    }
}

fn print_series(series: &SymbolSeries) {
    match (series.first_date(), series.last_date()) {
        (Some(first), Some(last)) => {
            println!("{:<8} {:>6} rows  {first} .. {last}", series.code(), series.len())
        }
        _ => println!("{:<8} no rows", series.code()),
    }
}

fn finish(summary: &BatchSummary) -> Result<()> {
    println!();
    println!("Total:     {}", summary.total);
    println!("Succeeded: {}", summary.succeeded);
    println!("Skipped:   {}", summary.skipped);
    println!("Failed:    {}", summary.failed);
    if summary.cancelled {
        println!("(cancelled before completion)");
    }

    if !summary.all_succeeded() {
        for (code, err) in &summary.errors {
            eprintln!("Error for {code}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}
