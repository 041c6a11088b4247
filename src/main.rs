// src/main.rs
mod config;
mod edgar;
mod extractors;
mod pipeline;
mod storage;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use config::Config;
use edgar::models::normalize_cik;
use edgar::{EdgarClient, Fetch, RateLimited};
use pipeline::Pipeline;
use storage::{CheckpointTracker, Database, IdentifierRegistry};
use utils::AppError;

/// Ingests EDGAR daily filing indices into a relational store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (flags override its values)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, e.g. sqlite:edgar.db
    #[arg(long, global = true, env = "DATABASE")]
    database_url: Option<String>,

    /// Directory for checkpoint logs and the run summary
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// User-Agent sent to EDGAR (name and contact email)
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Debug-level logging for this crate (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest daily indices for a date range
    Ingest(IngestArgs),
    /// Print the identifier registered for a ticker symbol or CIK
    #[command(group(clap::ArgGroup::new("key").required(true).args(["ticker", "cik"])))]
    Lookup {
        /// Ticker symbol of the company
        #[arg(short, long)]
        ticker: Option<String>,

        /// Central Index Key, with or without zero padding
        #[arg(long)]
        cik: Option<String>,
    },
    /// Refresh the identifier registry from the ticker feed
    RefreshTickers,
    /// Show the checkpoint and registry state
    Status {
        /// Also list the filings stored for this date
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// First date to ingest (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last date to ingest, inclusive (defaults to the start date)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Outbound requests per second across all workers
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Rows per insert transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent detail-page workers
    #[arg(long)]
    workers: Option<usize>,

    /// Reprocess dates already in the completion log
    #[arg(long)]
    no_resume: bool,

    /// Do not refresh tickers from the feed before ingesting
    #[arg(long)]
    skip_ticker_refresh: bool,
}

fn load_config(args: &Args) -> Result<Config, AppError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }
    if let Some(dir) = &args.state_dir {
        config.state_dir = dir.clone();
    }
    if let Some(agent) = &args.user_agent {
        config.user_agent = agent.clone();
    }

    if let Command::Ingest(ingest) = &args.command {
        if ingest.start_date.is_some() {
            config.start_date = ingest.start_date;
        }
        if ingest.end_date.is_some() {
            config.end_date = ingest.end_date;
        }
        if let Some(rate) = ingest.rate_limit {
            config.rate_limit = rate;
        }
        if let Some(size) = ingest.batch_size {
            config.batch_size = size;
        }
        if let Some(workers) = ingest.workers {
            config.worker_pool_size = workers;
        }
        if ingest.no_resume {
            config.resume = false;
        }
        if ingest.skip_ticker_refresh {
            config.refresh_tickers = false;
        }
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI Arguments and setup logging (reads RUST_LOG env var)
    let args = Args::parse();
    utils::logging::setup_logging(args.verbose);

    // 2. Resolve configuration; errors here exit non-zero
    let config = load_config(&args)?;
    tracing::debug!("Effective configuration: {:?}", config);

    // 3. Connect to storage and build the EDGAR client behind the shared limiter
    let db = Database::connect(&config.database_url).await?;
    db.health_check().await?;
    let client = EdgarClient::new(&config.user_agent, config.request_timeout())?;
    let fetcher: Arc<dyn Fetch> = Arc::new(RateLimited::new(Arc::new(client), config.rate_limit()?));

    match args.command {
        Command::Ingest(_) => ingest(&config, fetcher, db).await,
        Command::Lookup { ticker, cik } => {
            let registry = IdentifierRegistry::new(db, fetcher, config.ticker_feed_url.clone());
            registry.load().await?;
            if let Some(ticker) = ticker {
                let cik = registry
                    .resolve_ticker(&ticker)
                    .await
                    .ok_or_else(|| AppError::Processing(format!("No CIK known for ticker {}", ticker)))?;
                println!("{}\t{}", ticker.to_uppercase(), cik);
            } else if let Some(raw) = cik {
                let cik = normalize_cik(&raw).map_err(|e| AppError::Processing(e.to_string()))?;
                let entry = registry
                    .get(&cik)
                    .await
                    .ok_or_else(|| AppError::Processing(format!("CIK {} is not registered", cik)))?;
                println!(
                    "{}\t{}\tkey={}",
                    entry.ticker.as_deref().unwrap_or("-"),
                    entry.cik,
                    entry.key
                );
            }
            Ok(())
        }
        Command::RefreshTickers => {
            let registry = IdentifierRegistry::new(db, fetcher, config.ticker_feed_url.clone());
            registry.load().await?;
            let changed = registry.refresh().await?;
            let (identifiers, tickers) = registry.counts().await;
            tracing::info!(changed, identifiers, tickers, "Ticker refresh finished");
            Ok(())
        }
        Command::Status { date } => {
            let checkpoints = CheckpointTracker::open(&config.state_dir)?;
            let registry = IdentifierRegistry::new(db.clone(), fetcher, config.ticker_feed_url.clone());
            registry.load().await?;
            let (identifiers, tickers) = registry.counts().await;
            let last = checkpoints
                .last_completed()
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!("last completed date: {}", last);
            println!("identifiers: {} ({} with tickers)", identifiers, tickers);
            println!("filings: {}", db.count_filings().await?);

            if let Some(date) = date {
                let filings = db.filings_on(&date.format("%Y-%m-%d").to_string()).await?;
                println!("filings on {}: {}", date, filings.len());
                for f in filings {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        f.cik,
                        f.ticker.as_deref().unwrap_or("-"),
                        f.form_type,
                        f.filing_date,
                        f.index_page_url,
                        f.document_url
                    );
                }
            }
            Ok(())
        }
    }
}

async fn ingest(config: &Config, fetcher: Arc<dyn Fetch>, db: Database) -> Result<(), AppError> {
    let (start, end) = config.date_range()?;
    let checkpoints = CheckpointTracker::open(&config.state_dir)?;

    let mut pipeline = Pipeline::new(config, fetcher, db, checkpoints);
    pipeline.prepare(config.refresh_tickers).await?;

    // Ctrl-C stops new detail requests; the current date is not checkpointed.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    tracing::info!(%start, %end, resume = config.resume, "Starting ingestion");
    let summary = pipeline.run(start, end, &cancel).await;

    if let Err(e) = pipeline.checkpoints().save_run_summary(&summary) {
        tracing::warn!("Failed to save run summary: {}", e);
    }

    tracing::info!(
        checkpointed = summary.dates_checkpointed,
        skipped = summary.dates_skipped,
        already_done = summary.dates_already_done,
        failed = summary.failed_dates.len(),
        rows = summary.rows_inserted,
        dropped = summary.filings_dropped,
        "Processing finished"
    );
    if !summary.failed_dates.is_empty() {
        tracing::warn!("Dates to retry: {:?}", summary.failed_dates);
    }

    Ok(())
}
