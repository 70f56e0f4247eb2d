//! Run drivers: historical backfill and daily refresh.
//!
//! Both process the watchlist one symbol at a time. A failing symbol is
//! logged and counted; it never stops the run. Only store-level problems
//! (watchlist unreadable) abort a run.

pub mod backfill;
pub mod update;

pub use backfill::BackfillOrchestrator;
pub use update::FreshMetricsUpdater;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::analysis::{MetricKind, PercentileRanker, RankDirection};
use crate::config::Config;
use crate::data::{MetricsStore, RetryPolicy, WatchlistEntry};

/// Settings shared by both drivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    /// Percentile window, 365 days per year
    pub history_years: u32,
    /// Fixed pause between symbols (and between requests during update)
    pub request_delay: Duration,
    pub yield_direction: RankDirection,
    pub pe_direction: RankDirection,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            history_years: 5,
            request_delay: Duration::from_millis(500),
            yield_direction: RankDirection::AtOrBelow,
            pe_direction: RankDirection::AtOrBelow,
        }
    }
}

impl PipelineSettings {
    /// Settings for a backfill run.
    pub fn backfill(config: &Config) -> Self {
        Self::from_config(config, config.pipeline.backfill_delay())
    }

    /// Settings for a daily update run.
    pub fn update(config: &Config) -> Self {
        Self::from_config(config, config.pipeline.update_delay())
    }

    fn from_config(config: &Config, request_delay: Duration) -> Self {
        Self {
            retry: config.retry.policy(),
            history_years: config.pipeline.history_years.max(1),
            request_delay,
            yield_direction: config.pipeline.yield_direction,
            pe_direction: config.pipeline.pe_direction,
        }
    }

    pub fn history_days(&self) -> i64 {
        i64::from(self.history_years) * 365
    }

    pub fn yield_ranker(&self) -> PercentileRanker {
        PercentileRanker::new(MetricKind::DividendYield, self.yield_direction)
    }

    pub fn pe_ranker(&self) -> PercentileRanker {
        PercentileRanker::new(MetricKind::PeTtm, self.pe_direction)
    }
}

/// What happened to one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    /// Rows were upserted
    Written { rows: usize },
    /// Nothing to write (no data, no dividend)
    Skipped { reason: String },
}

impl SymbolOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: Vec<String>,
    pub skipped: Vec<String>,
    /// Symbol and error chain
    pub failed: Vec<(String, String)>,
    pub rows_written: usize,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn skip_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total(&self) -> usize {
        self.success_count() + self.skip_count() + self.failure_count()
    }

    pub(crate) fn record(&mut self, symbol: &str, result: Result<SymbolOutcome>) {
        match result {
            Ok(SymbolOutcome::Written { rows }) => {
                self.rows_written += rows;
                self.succeeded.push(symbol.to_string());
            }
            Ok(SymbolOutcome::Skipped { .. }) => self.skipped.push(symbol.to_string()),
            Err(e) => self.failed.push((symbol.to_string(), format!("{:#}", e))),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Report ===")?;
        writeln!(f, "Symbols processed: {}", self.total())?;
        writeln!(f, "Succeeded: {}", self.success_count())?;
        writeln!(f, "Skipped: {}", self.skip_count())?;
        writeln!(f, "Failed: {}", self.failure_count())?;
        write!(f, "Rows written: {}", self.rows_written)?;
        for (symbol, error) in &self.failed {
            write!(f, "\n  {}: {}", symbol, error)?;
        }
        Ok(())
    }
}

/// Symbols to process: the one requested, or every active watchlist entry.
pub(crate) async fn resolve_targets(
    store: &MetricsStore,
    symbol: Option<&str>,
) -> Result<Vec<WatchlistEntry>> {
    match symbol {
        Some(symbol) => {
            let entry = store.watchlist_entry(symbol).await?;
            Ok(vec![entry.unwrap_or_else(|| {
                debug!(symbol, "Symbol not on watchlist, processing anyway");
                WatchlistEntry {
                    symbol: symbol.to_string(),
                    name: symbol.to_string(),
                    sector: None,
                    is_active: true,
                }
            })])
        }
        None => store.active_watchlist().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = RunReport::default();
        report.record("600036", Ok(SymbolOutcome::Written { rows: 1200 }));
        report.record("600900", Ok(SymbolOutcome::skipped("no data")));
        report.record("601088", Err(anyhow::anyhow!("Network error: reset")));
        report.record("000001", Ok(SymbolOutcome::Written { rows: 3 }));

        assert_eq!(report.success_count(), 2);
        assert_eq!(report.skip_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.total(), 4);
        assert_eq!(report.rows_written, 1203);

        let text = report.to_string();
        assert!(text.contains("Failed: 1"));
        assert!(text.contains("601088: Network error: reset"));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.pipeline.history_years = 3;
        config.pipeline.pe_direction = RankDirection::AtOrAbove;

        let backfill = PipelineSettings::backfill(&config);
        assert_eq!(backfill.history_days(), 1095);
        assert_eq!(backfill.request_delay, Duration::from_millis(500));
        assert_eq!(backfill.pe_ranker().direction(), RankDirection::AtOrAbove);

        let update = PipelineSettings::update(&config);
        assert_eq!(update.request_delay, Duration::from_secs(1));
        assert_eq!(update.yield_ranker().metric(), MetricKind::DividendYield);
    }
}
