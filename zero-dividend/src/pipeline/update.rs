//! Daily refresh of the latest valuation snapshot and quarterly report.

use std::cmp::Reverse;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use tracing::{debug, error, info, warn};

use super::{resolve_targets, PipelineSettings, RunReport, SymbolOutcome};
use crate::analysis::SeriesSmoother;
use crate::data::{
    finite, report_period_label, DailyBasicRow, DailyMetricsRecord, FinancialIndicatorRow,
    IncomeRow, MarketDataProvider, MetricsStore, QuarterlyFinancial, QuarterlySaveOutcome,
    Sleeper, TokioSleeper, WatchlistEntry,
};
use crate::symbol::to_ts_code;

/// Writes today's metrics row and the newest quarterly report per symbol.
pub struct FreshMetricsUpdater {
    provider: Arc<dyn MarketDataProvider>,
    store: MetricsStore,
    settings: PipelineSettings,
    sleeper: Arc<dyn Sleeper>,
    smoother: SeriesSmoother,
}

impl FreshMetricsUpdater {
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

    /// Update one symbol, or every active symbol when `symbol` is `None`.
    pub async fn run(&self, symbol: Option<&str>, as_of: NaiveDate) -> Result<RunReport> {
        let targets = resolve_targets(&self.store, symbol)
            .await
            .context("Failed to load watchlist")?;

        if targets.is_empty() {
            warn!("No active symbols to update");
            return Ok(RunReport::default());
        }

        info!(symbols = targets.len(), %as_of, "Starting update");

        let mut report = RunReport::default();
        for (i, entry) in targets.iter().enumerate() {
            let result = self.update_symbol(entry, as_of).await;
            match &result {
                Ok(SymbolOutcome::Written { .. }) => {
                    info!(symbol = %entry.symbol, name = %entry.name, "Update complete")
                }
                Ok(SymbolOutcome::Skipped { reason }) => {
                    info!(symbol = %entry.symbol, reason = %reason, "Update skipped")
                }
                Err(e) => error!(symbol = %entry.symbol, error = %format!("{:#}", e), "Update failed"),
            }
            report.record(&entry.symbol, result);

            if i + 1 < targets.len() {
                self.pause().await;
            }
        }

        info!(
            succeeded = report.success_count(),
            skipped = report.skip_count(),
            failed = report.failure_count(),
            "Update finished"
        );
        Ok(report)
    }

    /// Refresh one symbol.
    ///
    /// Skips without writing when the latest quote has no positive dividend
    /// yield. A failed quarterly refresh is logged and does not fail the
    /// symbol once the daily row is stored.
    pub async fn update_symbol(
        &self,
        entry: &WatchlistEntry,
        as_of: NaiveDate,
    ) -> Result<SymbolOutcome> {
        let ts_code = to_ts_code(&entry.symbol);

        let quote = self
            .settings
            .retry
            .run(self.sleeper.as_ref(), "daily_basic", || {
                self.provider.latest_daily_basic(&ts_code, as_of)
            })
            .await
            .with_context(|| format!("Failed to fetch latest quote for {}", ts_code))?;

        let Some(quote) = quote else {
            return Ok(SymbolOutcome::skipped("no recent quote"));
        };

        let Some(dividend_yield) = finite(quote.dv_ttm).filter(|v| *v > 0.0) else {
            info!(symbol = %entry.symbol, trade_date = %quote.trade_date, "No dividend yield, skipping");
            return Ok(SymbolOutcome::skipped("no dividend yield"));
        };

        debug!(
            symbol = %entry.symbol,
            trade_date = %quote.trade_date,
            close = ?quote.close,
            pe_ttm = ?quote.pe_ttm,
            dv_ttm = dividend_yield,
            "Latest quote"
        );

        self.pause().await;
        let start = as_of - Duration::days(self.settings.history_days());
        let history = self
            .settings
            .retry
            .run(self.sleeper.as_ref(), "daily_basic", || {
                self.provider.daily_basic(&ts_code, start, as_of)
            })
            .await
            .with_context(|| format!("Failed to fetch history for {}", ts_code))?;

        let record = self.build_record(&entry.symbol, &quote, dividend_yield, &history);
        self.store
            .upsert_daily_metrics(&record)
            .await
            .with_context(|| format!("Failed to store daily metrics for {}", entry.symbol))?;

        info!(
            symbol = %entry.symbol,
            trade_date = %record.trade_date,
            yield_percentile = ?record.yield_percentile,
            pe_percentile = ?record.pe_percentile,
            "Daily metrics saved"
        );

        if let Err(e) = self.refresh_quarterly(&entry.symbol, &ts_code, &quote, as_of).await {
            warn!(symbol = %entry.symbol, error = %format!("{:#}", e), "Quarterly refresh failed");
        }

        Ok(SymbolOutcome::Written { rows: 1 })
    }

    /// Today's row, ranked against the smoothed history window.
    pub fn build_record(
        &self,
        symbol: &str,
        quote: &DailyBasicRow,
        dividend_yield: f64,
        history: &[DailyBasicRow],
    ) -> DailyMetricsRecord {
        let smoothed = self.smoother.smooth(history);
        let yields: Vec<Option<f64>> = smoothed.iter().map(|r| r.dv_ttm).collect();
        let pes: Vec<Option<f64>> = smoothed.iter().map(|r| r.pe_ttm).collect();

        DailyMetricsRecord {
            symbol: symbol.to_string(),
            trade_date: quote.trade_date,
            close_price: quote.close,
            market_cap: quote.market_cap(),
            pe_ttm: quote.pe_ttm,
            pb_ttm: quote.pb,
            dividend_yield_ttm: Some(dividend_yield),
            pe_percentile: self.settings.pe_ranker().rank_against_all(quote.pe_ttm, &pes),
            pb_percentile: None,
            yield_percentile: self
                .settings
                .yield_ranker()
                .rank_against_all(Some(dividend_yield), &yields),
        }
    }

    /// Fetch and store the newest quarterly report.
    ///
    /// Returns `None` when the provider has no indicator rows.
    pub async fn refresh_quarterly(
        &self,
        symbol: &str,
        ts_code: &str,
        quote: &DailyBasicRow,
        as_of: NaiveDate,
    ) -> Result<Option<QuarterlySaveOutcome>> {
        self.pause().await;
        let indicators = self
            .settings
            .retry
            .run(self.sleeper.as_ref(), "fina_indicator", || {
                self.provider.financial_indicators(ts_code)
            })
            .await
            .with_context(|| format!("Failed to fetch financial indicators for {}", ts_code))?;

        let Some((end_date, latest)) = latest_indicator(indicators) else {
            info!(symbol, "No quarterly indicators available");
            return Ok(None);
        };

        let mut financial = QuarterlyFinancial {
            symbol: symbol.to_string(),
            report_period: report_period_label(end_date),
            publish_date: latest.ann_date.unwrap_or(as_of),
            free_cash_flow: None,
            debt_to_asset_ratio: percent(latest.debt_to_assets),
            dividend_payout_ratio: payout_ratio(quote),
            roe_ttm: percent(latest.roe),
            gross_margin: percent(latest.grossprofit_margin),
            revenue_growth_yoy: percent(latest.or_yoy),
            net_profit_growth_yoy: percent(latest.netprofit_yoy),
        };

        self.pause().await;
        match self
            .settings
            .retry
            .run(self.sleeper.as_ref(), "cashflow", || self.provider.cash_flow(ts_code))
            .await
        {
            Ok(rows) => {
                financial.free_cash_flow = rows
                    .iter()
                    .find(|r| r.end_date == Some(end_date))
                    .and_then(|r| r.free_cash_flow());
            }
            Err(e) => warn!(symbol, error = %e, "Cash flow unavailable"),
        }

        if financial.revenue_growth_yoy.is_none() || financial.net_profit_growth_yoy.is_none() {
            self.pause().await;
            match self
                .settings
                .retry
                .run(self.sleeper.as_ref(), "income", || self.provider.income(ts_code))
                .await
            {
                Ok(rows) => {
                    let (revenue, profit) = yoy_growth(&rows, end_date);
                    financial.revenue_growth_yoy = financial.revenue_growth_yoy.or(revenue);
                    financial.net_profit_growth_yoy = financial.net_profit_growth_yoy.or(profit);
                }
                Err(e) => warn!(symbol, error = %e, "Income statement unavailable"),
            }
        }

        let outcome = self
            .store
            .save_quarterly_financials(&financial)
            .await
            .with_context(|| format!("Failed to store quarterly financials for {}", symbol))?;
        Ok(Some(outcome))
    }

    async fn pause(&self) {
        self.sleeper.sleep(self.settings.request_delay).await;
    }
}

/// Newest indicator row that carries an end date.
///
/// Restated periods are listed newest revision first, so ties keep the
/// earlier row.
fn latest_indicator(rows: Vec<FinancialIndicatorRow>) -> Option<(NaiveDate, FinancialIndicatorRow)> {
    rows.into_iter()
        .filter_map(|row| row.end_date.map(|d| (d, row)))
        .min_by_key(|(d, _)| Reverse(*d))
}

/// Percentage to decimal.
fn percent(value: Option<f64>) -> Option<f64> {
    finite(value).map(|v| v / 100.0)
}

/// Payout ratio implied by the quote: yield × P/E = dividend / earnings.
fn payout_ratio(quote: &DailyBasicRow) -> Option<f64> {
    let dv = finite(quote.dv_ttm).filter(|v| *v > 0.0)?;
    let pe = finite(quote.pe_ttm).filter(|v| *v > 0.0)?;
    Some(dv / 100.0 * pe)
}

/// Year-over-year revenue and net income growth for the period ending
/// `end_date`, compared with the same period a year earlier.
fn yoy_growth(rows: &[IncomeRow], end_date: NaiveDate) -> (Option<f64>, Option<f64>) {
    let Some(prev_end) = end_date.with_year(end_date.year() - 1) else {
        return (None, None);
    };
    let current = rows.iter().find(|r| r.end_date == Some(end_date));
    let previous = rows.iter().find(|r| r.end_date == Some(prev_end));

    match (current, previous) {
        (Some(cur), Some(prev)) => (
            growth(cur.total_revenue, prev.total_revenue),
            growth(cur.n_income, prev.n_income),
        ),
        _ => (None, None),
    }
}

fn growth(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let current = finite(current)?;
    let previous = finite(previous).filter(|v| *v != 0.0)?;
    Some((current - previous) / previous.abs())
}
