//! SQLite persistence for valuation metrics, quarterly financials and the
//! watchlist.
//!
//! Writes are last-write-wins upserts on the natural keys
//! `(symbol, trade_date)` and `(symbol, report_period)`. Every non-key
//! column is replaced by the incoming value, null included.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{finite, report_period_year, DailyMetricsRecord, QuarterlyFinancial, WatchlistEntry};

/// Quarterly reports before this year are never stored.
pub const MIN_REPORT_YEAR: i32 = 2020;

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Watchlist
CREATE TABLE IF NOT EXISTS stock_meta (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    sector TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Daily valuation snapshot with percentiles
CREATE TABLE IF NOT EXISTS daily_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    trade_date TEXT NOT NULL,
    close_price REAL,
    market_cap REAL,
    pe_ttm REAL,
    pb_ttm REAL,
    dividend_yield_ttm REAL,
    pe_percentile REAL,
    pb_percentile REAL,
    yield_percentile REAL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_daily_metrics_symbol_date
ON daily_metrics(symbol, trade_date DESC);

-- Quarterly financial indicators
CREATE TABLE IF NOT EXISTS quarterly_financials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    report_period TEXT NOT NULL,
    publish_date TEXT,
    free_cash_flow REAL,
    debt_to_asset_ratio REAL,
    dividend_payout_ratio REAL,
    roe_ttm REAL,
    gross_margin REAL,
    revenue_growth_yoy REAL,
    net_profit_growth_yoy REAL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, report_period)
);

CREATE INDEX IF NOT EXISTS idx_quarterly_symbol_period
ON quarterly_financials(symbol, report_period DESC);
"#;

const UPSERT_DAILY_SQL: &str = r#"
INSERT INTO daily_metrics (
    symbol, trade_date, close_price, market_cap,
    pe_ttm, pb_ttm, dividend_yield_ttm,
    pe_percentile, pb_percentile, yield_percentile
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(symbol, trade_date) DO UPDATE SET
    close_price = excluded.close_price,
    market_cap = excluded.market_cap,
    pe_ttm = excluded.pe_ttm,
    pb_ttm = excluded.pb_ttm,
    dividend_yield_ttm = excluded.dividend_yield_ttm,
    pe_percentile = excluded.pe_percentile,
    pb_percentile = excluded.pb_percentile,
    yield_percentile = excluded.yield_percentile,
    updated_at = CURRENT_TIMESTAMP
"#;

const UPSERT_QUARTERLY_SQL: &str = r#"
INSERT INTO quarterly_financials (
    symbol, report_period, publish_date,
    free_cash_flow, debt_to_asset_ratio, dividend_payout_ratio,
    roe_ttm, gross_margin, revenue_growth_yoy, net_profit_growth_yoy
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(symbol, report_period) DO UPDATE SET
    publish_date = excluded.publish_date,
    free_cash_flow = excluded.free_cash_flow,
    debt_to_asset_ratio = excluded.debt_to_asset_ratio,
    dividend_payout_ratio = excluded.dividend_payout_ratio,
    roe_ttm = excluded.roe_ttm,
    gross_margin = excluded.gross_margin,
    revenue_growth_yoy = excluded.revenue_growth_yoy,
    net_profit_growth_yoy = excluded.net_profit_growth_yoy,
    updated_at = CURRENT_TIMESTAMP
"#;

const DAILY_COLUMNS: &str = "symbol, trade_date, close_price, market_cap, pe_ttm, pb_ttm, \
     dividend_yield_ttm, pe_percentile, pb_percentile, yield_percentile";

const QUARTERLY_COLUMNS: &str = "symbol, report_period, publish_date, free_cash_flow, \
     debt_to_asset_ratio, dividend_payout_ratio, roe_ttm, gross_margin, \
     revenue_growth_yoy, net_profit_growth_yoy";

// ============================================================================
// Configuration
// ============================================================================

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite database file
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: crate::config::config_dir().join("dividend.db"),
        }
    }
}

/// Result of a quarterly write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarterlySaveOutcome {
    /// Row inserted or overwritten
    Saved,
    /// Report period older than [`MIN_REPORT_YEAR`] or unparsable
    SkippedOutdated { report_period: String },
    /// Neither ROE nor the cash flow proxy carries a value
    SkippedNoKeyMetrics { report_period: String },
}

impl QuarterlySaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

/// Row counts across the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub watchlist_count: usize,
    pub active_count: usize,
    pub daily_metrics_count: usize,
    pub quarterly_count: usize,
    pub latest_trade_date: Option<String>,
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Watchlist:            {} ({} active)", self.watchlist_count, self.active_count)?;
        writeln!(f, "Daily metrics rows:   {}", self.daily_metrics_count)?;
        writeln!(f, "Quarterly rows:       {}", self.quarterly_count)?;
        write!(
            f,
            "Latest trade date:    {}",
            self.latest_trade_date.as_deref().unwrap_or("-")
        )
    }
}

// ============================================================================
// Store
// ============================================================================

/// SQLite-backed metrics store.
#[derive(Clone)]
pub struct MetricsStore {
    db: Arc<Mutex<Connection>>,
    config: StorageConfig,
}

impl MetricsStore {
    /// Open (or create) the database and make sure the schema exists.
    pub fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(&config.db_path).with_context(|| {
            format!("Failed to open database at {}", config.db_path.display())
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("Failed to set database pragmas")?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(path = %config.db_path.display(), "Metrics store initialized");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Database file path
    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    // ------------------------------------------------------------------------
    // Daily metrics
    // ------------------------------------------------------------------------

    /// Insert or overwrite one daily row.
    pub async fn upsert_daily_metrics(&self, record: &DailyMetricsRecord) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(UPSERT_DAILY_SQL, params_from_iter(daily_params(record).iter()))
            .with_context(|| {
                format!(
                    "Failed to upsert daily metrics for {} on {}",
                    record.symbol, record.trade_date
                )
            })?;
        debug!(symbol = %record.symbol, trade_date = %record.trade_date, "Daily metrics upserted");
        Ok(())
    }

    /// Insert or overwrite many daily rows in one transaction.
    ///
    /// Either all rows land or none do.
    pub async fn upsert_daily_metrics_batch(&self, records: &[DailyMetricsRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction().context("Failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare_cached(UPSERT_DAILY_SQL)
                .context("Failed to prepare daily upsert")?;
            for record in records {
                stmt.execute(params_from_iter(daily_params(record).iter())).with_context(|| {
                    format!(
                        "Failed to upsert daily metrics for {} on {}",
                        record.symbol, record.trade_date
                    )
                })?;
            }
        }
        tx.commit().context("Failed to commit daily metrics batch")?;

        debug!(count = records.len(), "Daily metrics batch committed");
        Ok(records.len())
    }

    /// One daily row by key.
    pub async fn get_daily_metrics(
        &self,
        symbol: &str,
        trade_date: NaiveDate,
    ) -> Result<Option<DailyMetricsRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM daily_metrics WHERE symbol = ?1 AND trade_date = ?2",
            DAILY_COLUMNS
        );
        db.query_row(
            &sql,
            params![symbol, trade_date.format(DATE_FORMAT).to_string()],
            row_to_daily,
        )
        .optional()
        .context("Failed to query daily metrics")
    }

    /// All daily rows for a symbol, oldest first.
    pub async fn list_daily_metrics(&self, symbol: &str) -> Result<Vec<DailyMetricsRecord>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM daily_metrics WHERE symbol = ?1 ORDER BY trade_date ASC",
            DAILY_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(params![symbol], row_to_daily)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read daily metrics")?;
        Ok(rows)
    }

    /// Number of daily rows for a symbol.
    pub async fn count_daily_metrics(&self, symbol: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM daily_metrics WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .context("Failed to count daily metrics")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------------
    // Quarterly financials
    // ------------------------------------------------------------------------

    /// Validate and upsert one quarterly row.
    ///
    /// Reports older than [`MIN_REPORT_YEAR`] and reports without ROE or a
    /// cash flow figure are skipped, not raised.
    pub async fn save_quarterly_financials(
        &self,
        financial: &QuarterlyFinancial,
    ) -> Result<QuarterlySaveOutcome> {
        let period = financial.report_period.clone();

        match report_period_year(&period) {
            Some(year) if year >= MIN_REPORT_YEAR => {}
            _ => {
                info!(
                    symbol = %financial.symbol,
                    report_period = %period,
                    "Skipping quarterly report: outdated period"
                );
                return Ok(QuarterlySaveOutcome::SkippedOutdated { report_period: period });
            }
        }

        if finite(financial.roe_ttm).is_none() && finite(financial.free_cash_flow).is_none() {
            info!(
                symbol = %financial.symbol,
                report_period = %period,
                "Skipping quarterly report: no ROE or cash flow"
            );
            return Ok(QuarterlySaveOutcome::SkippedNoKeyMetrics { report_period: period });
        }

        let db = self.db.lock().await;
        db.execute(
            UPSERT_QUARTERLY_SQL,
            params![
                financial.symbol,
                period,
                financial.publish_date.format(DATE_FORMAT).to_string(),
                finite(financial.free_cash_flow),
                finite(financial.debt_to_asset_ratio),
                finite(financial.dividend_payout_ratio),
                finite(financial.roe_ttm),
                finite(financial.gross_margin),
                finite(financial.revenue_growth_yoy),
                finite(financial.net_profit_growth_yoy),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to upsert quarterly financials for {} ({})",
                financial.symbol, period
            )
        })?;

        info!(symbol = %financial.symbol, report_period = %period, "Quarterly financials saved");
        Ok(QuarterlySaveOutcome::Saved)
    }

    /// One quarterly row by key.
    pub async fn get_quarterly_financials(
        &self,
        symbol: &str,
        report_period: &str,
    ) -> Result<Option<QuarterlyFinancial>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM quarterly_financials WHERE symbol = ?1 AND report_period = ?2",
            QUARTERLY_COLUMNS
        );
        db.query_row(&sql, params![symbol, report_period], row_to_quarterly)
            .optional()
            .context("Failed to query quarterly financials")
    }

    /// Number of quarterly rows for a symbol.
    pub async fn count_quarterly_financials(&self, symbol: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let count: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM quarterly_financials WHERE symbol = ?1",
                params![symbol],
                |row| row.get(0),
            )
            .context("Failed to count quarterly financials")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------------
    // Watchlist
    // ------------------------------------------------------------------------

    /// Active watchlist entries ordered by symbol.
    pub async fn active_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT symbol, name, sector, is_active FROM stock_meta
             WHERE is_active = 1 ORDER BY symbol",
        )?;
        let entries = stmt
            .query_map([], row_to_watchlist)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read watchlist")?;
        Ok(entries)
    }

    /// Watchlist entry by symbol, active or not.
    pub async fn watchlist_entry(&self, symbol: &str) -> Result<Option<WatchlistEntry>> {
        let db = self.db.lock().await;
        db.query_row(
            "SELECT symbol, name, sector, is_active FROM stock_meta WHERE symbol = ?1",
            params![symbol],
            row_to_watchlist,
        )
        .optional()
        .context("Failed to query watchlist entry")
    }

    /// Insert or update a watchlist entry.
    pub async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO stock_meta (symbol, name, sector, is_active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                sector = excluded.sector,
                is_active = excluded.is_active",
            params![entry.symbol, entry.name, entry.sector, entry.is_active],
        )
        .with_context(|| format!("Failed to upsert watchlist entry {}", entry.symbol))?;
        Ok(())
    }

    /// Seed the watchlist when it is empty. Returns the number inserted.
    pub async fn seed_watchlist(&self, entries: &[WatchlistEntry]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let existing: i64 = db.query_row("SELECT COUNT(*) FROM stock_meta", [], |row| row.get(0))?;
        if existing > 0 {
            info!(existing, "Watchlist already populated, skipping seed");
            return Ok(0);
        }

        let tx = db.transaction()?;
        for entry in entries {
            tx.execute(
                "INSERT INTO stock_meta (symbol, name, sector, is_active) VALUES (?1, ?2, ?3, ?4)",
                params![entry.symbol, entry.name, entry.sector, entry.is_active],
            )
            .with_context(|| format!("Failed to seed watchlist entry {}", entry.symbol))?;
        }
        tx.commit().context("Failed to commit watchlist seed")?;

        info!(count = entries.len(), "Watchlist seeded");
        Ok(entries.len())
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// Row counts across all tables.
    pub async fn stats(&self) -> Result<StorageStats> {
        let db = self.db.lock().await;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = db.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StorageStats {
            watchlist_count: count("SELECT COUNT(*) FROM stock_meta")?,
            active_count: count("SELECT COUNT(*) FROM stock_meta WHERE is_active = 1")?,
            daily_metrics_count: count("SELECT COUNT(*) FROM daily_metrics")?,
            quarterly_count: count("SELECT COUNT(*) FROM quarterly_financials")?,
            latest_trade_date: db
                .query_row("SELECT MAX(trade_date) FROM daily_metrics", [], |row| row.get(0))
                .context("Failed to query latest trade date")?,
        })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn daily_params(record: &DailyMetricsRecord) -> [Box<dyn rusqlite::ToSql + '_>; 10] {
    [
        Box::new(record.symbol.as_str()),
        Box::new(record.trade_date.format(DATE_FORMAT).to_string()),
        Box::new(finite(record.close_price)),
        Box::new(finite(record.market_cap)),
        Box::new(finite(record.pe_ttm)),
        Box::new(finite(record.pb_ttm)),
        Box::new(finite(record.dividend_yield_ttm)),
        Box::new(finite(record.pe_percentile)),
        Box::new(finite(record.pb_percentile)),
        Box::new(finite(record.yield_percentile)),
    ]
}

fn parse_date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_daily(row: &Row<'_>) -> rusqlite::Result<DailyMetricsRecord> {
    Ok(DailyMetricsRecord {
        symbol: row.get(0)?,
        trade_date: parse_date_column(row, 1)?,
        close_price: row.get(2)?,
        market_cap: row.get(3)?,
        pe_ttm: row.get(4)?,
        pb_ttm: row.get(5)?,
        dividend_yield_ttm: row.get(6)?,
        pe_percentile: row.get(7)?,
        pb_percentile: row.get(8)?,
        yield_percentile: row.get(9)?,
    })
}

fn row_to_quarterly(row: &Row<'_>) -> rusqlite::Result<QuarterlyFinancial> {
    Ok(QuarterlyFinancial {
        symbol: row.get(0)?,
        report_period: row.get(1)?,
        publish_date: parse_date_column(row, 2)?,
        free_cash_flow: row.get(3)?,
        debt_to_asset_ratio: row.get(4)?,
        dividend_payout_ratio: row.get(5)?,
        roe_ttm: row.get(6)?,
        gross_margin: row.get(7)?,
        revenue_growth_yoy: row.get(8)?,
        net_profit_growth_yoy: row.get(9)?,
    })
}

fn row_to_watchlist(row: &Row<'_>) -> rusqlite::Result<WatchlistEntry> {
    Ok(WatchlistEntry {
        symbol: row.get(0)?,
        name: row.get(1)?,
        sector: row.get(2)?,
        is_active: row.get(3)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
