//! Market data provider abstraction.
//!
//! The pipeline only talks to [`MarketDataProvider`]; the Tushare adapter is
//! one implementation and tests plug in in-memory ones.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use super::{CashFlowRow, DailyBasicRow, FinancialIndicatorRow, IncomeRow};
use crate::error::ProviderError;

/// How far back to look for the most recent trading day.
pub const LATEST_QUOTE_LOOKBACK_DAYS: i64 = 10;

/// Source of daily valuation and quarterly statement data.
///
/// All lookups are keyed by exchange-qualified code (`600036.SH`). An empty
/// vector means the provider has no data for the request.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Daily valuation snapshots in `[start, end]`, in provider order.
    async fn daily_basic(
        &self,
        ts_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBasicRow>, ProviderError>;

    /// Quarterly financial indicators, newest period first.
    async fn financial_indicators(
        &self,
        ts_code: &str,
    ) -> Result<Vec<FinancialIndicatorRow>, ProviderError>;

    /// Cash flow statements, newest period first.
    async fn cash_flow(&self, ts_code: &str) -> Result<Vec<CashFlowRow>, ProviderError>;

    /// Income statements, newest period first.
    async fn income(&self, ts_code: &str) -> Result<Vec<IncomeRow>, ProviderError>;

    /// Most recent daily snapshot on or before `as_of`.
    ///
    /// Looks back a few days so weekends and holidays still resolve to the
    /// last trading session.
    async fn latest_daily_basic(
        &self,
        ts_code: &str,
        as_of: NaiveDate,
    ) -> Result<Option<DailyBasicRow>, ProviderError> {
        let start = as_of - Duration::days(LATEST_QUOTE_LOOKBACK_DAYS);
        let rows = self.daily_basic(ts_code, start, as_of).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.trade_date <= as_of)
            .max_by_key(|row| row.trade_date))
    }
}
