//! Historical backfill.
//!
//! For every symbol: fetch N years of `daily_basic`, smooth it, give each
//! day a percentile computed only from the days before it, and upsert the
//! whole series in one transaction.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use tracing::{error, info, warn};

use super::{resolve_targets, PipelineSettings, RunReport, SymbolOutcome};
use crate::analysis::SeriesSmoother;
use crate::data::{
    DailyBasicRow, DailyMetricsRecord, MarketDataProvider, MetricsStore, Sleeper, TokioSleeper,
    WatchlistEntry,
};
use crate::symbol::to_ts_code;

/// Rebuilds the daily metrics history for the watchlist.
pub struct BackfillOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    store: MetricsStore,
    settings: PipelineSettings,
    sleeper: Arc<dyn Sleeper>,
    smoother: SeriesSmoother,
}

impl BackfillOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: MetricsStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
            sleeper: Arc::new(TokioSleeper),
            smoother: SeriesSmoother::default(),
        }
    }

    /// Replace the sleeper used for retry and rate-limit pauses.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Backfill one symbol, or every active symbol when `symbol` is `None`.
    ///
    /// The history window ends at `as_of`.
    pub async fn run(&self, symbol: Option<&str>, as_of: NaiveDate) -> Result<RunReport> {
        let targets = resolve_targets(&self.store, symbol)
            .await
            .context("Failed to load watchlist")?;

        if targets.is_empty() {
            warn!("No active symbols to backfill");
            return Ok(RunReport::default());
        }

        info!(
            symbols = targets.len(),
            history_years = self.settings.history_years,
            %as_of,
            "Starting backfill"
        );

        let mut report = RunReport::default();
        for (i, entry) in targets.iter().enumerate() {
            let result = self.backfill_symbol(entry, as_of).await;
            match &result {
                Ok(SymbolOutcome::Written { rows }) => {
                    info!(symbol = %entry.symbol, name = %entry.name, rows, "Backfill complete")
                }
                Ok(SymbolOutcome::Skipped { reason }) => {
                    info!(symbol = %entry.symbol, reason = %reason, "Backfill skipped")
                }
                Err(e) => error!(symbol = %entry.symbol, error = %format!("{:#}", e), "Backfill failed"),
            }
            report.record(&entry.symbol, result);

            if i + 1 < targets.len() {
                self.sleeper.sleep(self.settings.request_delay).await;
            }
        }

        info!(
            succeeded = report.success_count(),
            skipped = report.skip_count(),
            failed = report.failure_count(),
            rows = report.rows_written,
            "Backfill finished"
        );
        Ok(report)
    }

    /// Fetch, smooth, rank and store the history of one symbol.
    pub async fn backfill_symbol(
        &self,
        entry: &WatchlistEntry,
        as_of: NaiveDate,
    ) -> Result<SymbolOutcome> {
        let ts_code = to_ts_code(&entry.symbol);
        let start = as_of - Duration::days(self.settings.history_days());

        info!(symbol = %entry.symbol, %ts_code, %start, end = %as_of, "Fetching history");

        let rows = self
            .settings
            .retry
            .run(self.sleeper.as_ref(), "daily_basic", || {
                self.provider.daily_basic(&ts_code, start, as_of)
            })
            .await
            .with_context(|| format!("Failed to fetch daily_basic for {}", ts_code))?;

        if rows.is_empty() {
            return Ok(SymbolOutcome::skipped("no historical data"));
        }

        let records = self.build_records(&entry.symbol, &rows);
        let written = self
            .store
            .upsert_daily_metrics_batch(&records)
            .await
            .with_context(|| format!("Failed to store history for {}", entry.symbol))?;

        Ok(SymbolOutcome::Written { rows: written })
    }

    /// One record per trading day with point-in-time percentiles.
    ///
    /// P/E and dividend yield are the smoothed values; close, P/B and market
    /// cap are as fetched.
    pub fn build_records(&self, symbol: &str, rows: &[DailyBasicRow]) -> Vec<DailyMetricsRecord> {
        let smoothed = self.smoother.smooth(rows);

        let yields: Vec<Option<f64>> = smoothed.iter().map(|r| r.dv_ttm).collect();
        let pes: Vec<Option<f64>> = smoothed.iter().map(|r| r.pe_ttm).collect();
        let yield_ranks = self.settings.yield_ranker().rank_series(&yields);
        let pe_ranks = self.settings.pe_ranker().rank_series(&pes);

        smoothed
            .iter()
            .zip(yield_ranks)
            .zip(pe_ranks)
            .map(|((row, yield_percentile), pe_percentile)| DailyMetricsRecord {
                symbol: symbol.to_string(),
                trade_date: row.trade_date,
                close_price: row.close,
                market_cap: row.market_cap(),
                pe_ttm: row.pe_ttm,
                pb_ttm: row.pb,
                dividend_yield_ttm: row.dv_ttm,
                pe_percentile,
                pb_percentile: None,
                yield_percentile,
            })
            .collect()
    }
}
