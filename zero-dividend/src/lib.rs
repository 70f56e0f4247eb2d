//! Zero Dividend - valuation history pipeline for a dividend watchlist.
//!
//! Pulls daily valuation snapshots (price, market cap, P/E, P/B, dividend
//! yield) and quarterly financial indicators for a small set of A-shares
//! from Tushare Pro, ranks the current valuation against its own history,
//! and persists everything into a local SQLite store.
//!
//! # Pipeline
//!
//! ```text
//! watchlist -> symbol mapping -> retrying fetch -> smoothing -> percentile -> upsert
//! ```
//!
//! Two drivers sit on top of the pipeline:
//! - [`pipeline::BackfillOrchestrator`] rebuilds N years of history with
//!   point-in-time percentiles.
//! - [`pipeline::FreshMetricsUpdater`] writes the newest trading day and
//!   refreshes the latest quarterly report.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod symbol;

pub use analysis::{MetricKind, PercentileRanker, RankDirection, SeriesSmoother};
pub use config::Config;
pub use data::{
    DailyBasicRow, DailyMetricsRecord, MarketDataProvider, MetricsStore, QuarterlyFinancial,
    QuarterlySaveOutcome, RetryPolicy, Sleeper, TokioSleeper, TushareProvider, WatchlistEntry,
};
pub use error::{ConfigError, ProviderError};
pub use pipeline::{BackfillOrchestrator, FreshMetricsUpdater, RunReport};
