//! Zero Dividend - valuation history pipeline for a dividend watchlist.
//!
//! ```text
//! zero-dividend backfill [--symbol 600036]   # rebuild N years of daily metrics
//! zero-dividend update [--symbol 600036]     # latest day + latest quarterly report
//! zero-dividend seed                         # default watchlist into an empty store
//! zero-dividend status                       # row counts
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use zero_dividend::config::Config;
use zero_dividend::data::{default_watchlist, MetricsStore, TushareProvider};
use zero_dividend::error::ConfigError;
use zero_dividend::logging::init_logging;
use zero_dividend::pipeline::PipelineSettings;
use zero_dividend::{BackfillOrchestrator, FreshMetricsUpdater};

#[derive(Parser, Debug)]
#[command(name = "zero-dividend")]
#[command(author = "theonlyhennygod")]
#[command(version)]
#[command(about = "Valuation percentiles and quarterly financials for an A-share dividend watchlist", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.codecoder/dividend.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Backfill historical daily metrics with point-in-time percentiles
    Backfill {
        /// Only this ticker (e.g. 600036); defaults to all active watchlist entries
        #[arg(long)]
        symbol: Option<String>,
    },

    /// Write the latest daily metrics and refresh quarterly financials
    Update {
        /// Only this ticker (e.g. 600036); defaults to all active watchlist entries
        #[arg(long)]
        symbol: Option<String>,
    },

    /// Seed the default watchlist when the store is empty
    Seed,

    /// Show store statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Zero Dividend v{}", env!("CARGO_PKG_VERSION"));

    let store = MetricsStore::new(config.storage.storage_config())?;
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Backfill { symbol } => {
            let provider = build_provider(&config)?;
            let orchestrator =
                BackfillOrchestrator::new(provider, store, PipelineSettings::backfill(&config));
            let report = orchestrator.run(symbol.as_deref(), today).await?;
            println!("{}", report);
        }
        Commands::Update { symbol } => {
            let provider = build_provider(&config)?;
            let updater =
                FreshMetricsUpdater::new(provider, store, PipelineSettings::update(&config));
            let report = updater.run(symbol.as_deref(), today).await?;
            println!("{}", report);
        }
        Commands::Seed => {
            let inserted = store.seed_watchlist(&default_watchlist()).await?;
            println!("Seeded {} watchlist entries", inserted);
        }
        Commands::Status => {
            println!("Database: {}", store.db_path().display());
            println!("{}", store.stats().await?);
        }
    }

    Ok(())
}

fn build_provider(config: &Config) -> Result<Arc<TushareProvider>> {
    config.validate()?;
    let provider = TushareProvider::from_config(&config.provider).ok_or(ConfigError::MissingToken)?;
    Ok(Arc::new(provider))
}
