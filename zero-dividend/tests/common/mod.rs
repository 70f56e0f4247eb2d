//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use zero_dividend::data::{
    CashFlowRow, FinancialIndicatorRow, IncomeRow, MetricsStore, StorageConfig, WatchlistEntry,
};
use zero_dividend::{DailyBasicRow, MarketDataProvider, ProviderError, Sleeper};

// ============================================================================
// Mock provider
// ============================================================================

/// In-memory provider keyed by `ts_code`.
///
/// Codes listed in `failing` always answer with a network error; codes in
/// `flaky` fail the given number of times before answering normally.
#[derive(Default)]
pub struct MockProvider {
    daily: HashMap<String, Vec<DailyBasicRow>>,
    indicators: HashMap<String, Vec<FinancialIndicatorRow>>,
    cash_flows: HashMap<String, Vec<CashFlowRow>>,
    incomes: HashMap<String, Vec<IncomeRow>>,
    failing: Vec<String>,
    failing_indicators: Vec<String>,
    flaky: Mutex<HashMap<String, u32>>,
    pub daily_calls: AtomicU32,
    pub indicator_calls: AtomicU32,
    pub cash_flow_calls: AtomicU32,
    pub income_calls: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_daily(mut self, ts_code: &str, rows: Vec<DailyBasicRow>) -> Self {
        self.daily.insert(ts_code.to_string(), rows);
        self
    }

    pub fn with_indicators(mut self, ts_code: &str, rows: Vec<FinancialIndicatorRow>) -> Self {
        self.indicators.insert(ts_code.to_string(), rows);
        self
    }

    pub fn with_cash_flow(mut self, ts_code: &str, rows: Vec<CashFlowRow>) -> Self {
        self.cash_flows.insert(ts_code.to_string(), rows);
        self
    }

    pub fn with_income(mut self, ts_code: &str, rows: Vec<IncomeRow>) -> Self {
        self.incomes.insert(ts_code.to_string(), rows);
        self
    }

    pub fn failing(mut self, ts_code: &str) -> Self {
        self.failing.push(ts_code.to_string());
        self
    }

    pub fn failing_indicators(mut self, ts_code: &str) -> Self {
        self.failing_indicators.push(ts_code.to_string());
        self
    }

    pub fn flaky(self, ts_code: &str, failures: u32) -> Self {
        self.flaky.lock().unwrap().insert(ts_code.to_string(), failures);
        self
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    fn check(&self, ts_code: &str) -> Result<(), ProviderError> {
        if self.failing.iter().any(|c| c == ts_code) {
            return Err(ProviderError::Network(format!("connection reset ({})", ts_code)));
        }
        let mut flaky = self.flaky.lock().unwrap();
        if let Some(remaining) = flaky.get_mut(ts_code) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::RateLimited("40203".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn daily_basic(
        &self,
        ts_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBasicRow>, ProviderError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        self.check(ts_code)?;
        Ok(self
            .daily
            .get(ts_code)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.trade_date >= start && r.trade_date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn financial_indicators(
        &self,
        ts_code: &str,
    ) -> Result<Vec<FinancialIndicatorRow>, ProviderError> {
        self.indicator_calls.fetch_add(1, Ordering::SeqCst);
        self.check(ts_code)?;
        if self.failing_indicators.iter().any(|c| c == ts_code) {
            return Err(ProviderError::Network("fina_indicator timeout".to_string()));
        }
        Ok(self.indicators.get(ts_code).cloned().unwrap_or_default())
    }

    async fn cash_flow(&self, ts_code: &str) -> Result<Vec<CashFlowRow>, ProviderError> {
        self.cash_flow_calls.fetch_add(1, Ordering::SeqCst);
        self.check(ts_code)?;
        Ok(self.cash_flows.get(ts_code).cloned().unwrap_or_default())
    }

    async fn income(&self, ts_code: &str) -> Result<Vec<IncomeRow>, ProviderError> {
        self.income_calls.fetch_add(1, Ordering::SeqCst);
        self.check(ts_code)?;
        Ok(self.incomes.get(ts_code).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Sleeper
// ============================================================================

/// Records requested pauses instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    naps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn naps(&self) -> Vec<Duration> {
        self.naps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.naps.lock().unwrap().push(duration);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn create_test_store() -> (MetricsStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = MetricsStore::new(StorageConfig {
        db_path: dir.path().join("pipeline.db"),
    })
    .unwrap();
    (store, dir)
}

pub async fn add_to_watchlist(store: &MetricsStore, symbol: &str, active: bool) {
    let mut entry = WatchlistEntry::new(symbol, symbol, "test");
    entry.is_active = active;
    store.upsert_watchlist_entry(&entry).await.unwrap();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Run date used across the pipeline tests.
pub fn as_of() -> NaiveDate {
    date(2024, 6, 28)
}

pub fn daily_row(ts_code: &str, trade_date: NaiveDate, dv: Option<f64>, pe: Option<f64>) -> DailyBasicRow {
    DailyBasicRow {
        ts_code: ts_code.to_string(),
        trade_date,
        close: Some(30.0),
        pe_ttm: pe,
        pb: Some(0.9),
        dv_ttm: dv,
        total_mv: Some(75_000_000.0),
    }
}

/// Consecutive daily rows ending at `end`, one per value pair.
pub fn series(ts_code: &str, end: NaiveDate, values: &[(Option<f64>, Option<f64>)]) -> Vec<DailyBasicRow> {
    let n = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, (dv, pe))| {
            let day = end - chrono::Duration::days(n - 1 - i as i64);
            daily_row(ts_code, day, *dv, *pe)
        })
        .collect()
}

pub fn shared(provider: MockProvider) -> Arc<MockProvider> {
    Arc::new(provider)
}
