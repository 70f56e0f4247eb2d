//! Data layer: provider abstraction, retry policy, Tushare adapter and the
//! SQLite store.

pub mod provider;
pub mod retry;
pub mod storage;
pub mod tushare;

pub use provider::MarketDataProvider;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use storage::{MetricsStore, QuarterlySaveOutcome, StorageConfig, StorageStats};
pub use tushare::TushareProvider;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider rows
// ============================================================================

/// One `daily_basic` row as returned by the provider.
///
/// Values are optional because the provider leaves gaps (suspended days,
/// loss-making periods without a P/E, non-payers without a yield).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBasicRow {
    pub ts_code: String,
    pub trade_date: NaiveDate,
    pub close: Option<f64>,
    pub pe_ttm: Option<f64>,
    pub pb: Option<f64>,
    /// Trailing dividend yield in percent
    pub dv_ttm: Option<f64>,
    /// Total market value in 10k CNY
    pub total_mv: Option<f64>,
}

impl DailyBasicRow {
    /// Market cap in 100M CNY (亿元).
    pub fn market_cap(&self) -> Option<f64> {
        self.total_mv.map(|mv| mv / 10_000.0)
    }
}

/// Quarterly indicators from `fina_indicator`. Ratios are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialIndicatorRow {
    pub end_date: Option<NaiveDate>,
    pub ann_date: Option<NaiveDate>,
    pub roe: Option<f64>,
    pub grossprofit_margin: Option<f64>,
    pub debt_to_assets: Option<f64>,
    pub or_yoy: Option<f64>,
    pub netprofit_yoy: Option<f64>,
}

/// Cash flow statement row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CashFlowRow {
    pub end_date: Option<NaiveDate>,
    /// Net operating cash flow
    pub n_cashflow_act: Option<f64>,
    /// Cash paid for fixed, intangible and long-term assets
    pub capex: Option<f64>,
}

impl CashFlowRow {
    /// Operating cash flow less capital expenditure, when capex is reported.
    pub fn free_cash_flow(&self) -> Option<f64> {
        let operating = finite(self.n_cashflow_act)?;
        Some(match finite(self.capex) {
            Some(capex) => operating - capex.abs(),
            None => operating,
        })
    }
}

/// Income statement row used for the growth fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeRow {
    pub end_date: Option<NaiveDate>,
    pub total_revenue: Option<f64>,
    pub n_income: Option<f64>,
}

// ============================================================================
// Persisted records
// ============================================================================

/// A `daily_metrics` row: one valuation observation plus its percentiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricsRecord {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub close_price: Option<f64>,
    /// 100M CNY
    pub market_cap: Option<f64>,
    pub pe_ttm: Option<f64>,
    pub pb_ttm: Option<f64>,
    pub dividend_yield_ttm: Option<f64>,
    pub pe_percentile: Option<f64>,
    pub pb_percentile: Option<f64>,
    pub yield_percentile: Option<f64>,
}

/// A `quarterly_financials` row. Ratios are decimals, not percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterlyFinancial {
    pub symbol: String,
    /// `YYYYQn`
    pub report_period: String,
    pub publish_date: NaiveDate,
    pub free_cash_flow: Option<f64>,
    pub debt_to_asset_ratio: Option<f64>,
    pub dividend_payout_ratio: Option<f64>,
    pub roe_ttm: Option<f64>,
    pub gross_margin: Option<f64>,
    pub revenue_growth_yoy: Option<f64>,
    pub net_profit_growth_yoy: Option<f64>,
}

/// A `stock_meta` row. The watchlist decides which symbols get processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub is_active: bool,
}

impl WatchlistEntry {
    pub fn new(symbol: &str, name: &str, sector: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            sector: Some(sector.to_string()),
            is_active: true,
        }
    }
}

/// Default high-dividend watchlist seeded into an empty store.
pub fn default_watchlist() -> Vec<WatchlistEntry> {
    vec![
        WatchlistEntry::new("601088", "中国神华", "煤炭"),
        WatchlistEntry::new("600036", "招商银行", "银行"),
        WatchlistEntry::new("600900", "长江电力", "公用事业"),
    ]
}

// ============================================================================
// Helpers
// ============================================================================

/// Report period label (`2024Q3`) for a period end date.
pub fn report_period_label(end_date: NaiveDate) -> String {
    let quarter = (end_date.month() - 1) / 3 + 1;
    format!("{}Q{}", end_date.year(), quarter)
}

/// Year component of a `YYYYQn` label.
pub fn report_period_year(period: &str) -> Option<i32> {
    let (year, quarter) = period.split_once('Q')?;
    if year.len() != 4 || !matches!(quarter, "1" | "2" | "3" | "4") {
        return None;
    }
    year.parse().ok()
}

/// Drop NaN and infinities.
pub(crate) fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
