//! Historical percentile ranking of valuation metrics.
//!
//! A percentile is the share of valid historical observations that sit on
//! the same side of the current value, scaled to 0-100 and rounded to two
//! decimals. Invalid observations (negative P/E, yields above 100%) are
//! dropped before counting.
//!
//! Two modes:
//! - [`PercentileRanker::rank_against_all`]: one value against a full window.
//! - [`PercentileRanker::rank_as_of`]: position `i` of a dated series against
//!   `series[0..=i]` only, so a backfilled row never sees its future.

use serde::{Deserialize, Serialize};

/// Ranked valuation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Trailing dividend yield, percent
    DividendYield,
    /// Trailing P/E
    PeTtm,
}

impl MetricKind {
    /// Open interval of values kept in the history.
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            Self::DividendYield => (0.0, 100.0),
            Self::PeTtm => (0.0, 1000.0),
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        let (low, high) = self.valid_range();
        value.is_finite() && value > low && value < high
    }
}

/// Which side of the current value counts toward the percentile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankDirection {
    /// Share of history `<=` current
    #[default]
    AtOrBelow,
    /// Share of history `>=` current
    AtOrAbove,
}

/// Percentile ranker for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentileRanker {
    metric: MetricKind,
    direction: RankDirection,
}

impl PercentileRanker {
    pub fn new(metric: MetricKind, direction: RankDirection) -> Self {
        Self { metric, direction }
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn direction(&self) -> RankDirection {
        self.direction
    }

    /// Rank `current` against every valid value in `history`.
    ///
    /// `None` when `current` is missing or not positive, or when nothing in
    /// `history` survives filtering.
    pub fn rank_against_all(&self, current: Option<f64>, history: &[Option<f64>]) -> Option<f64> {
        let current = current.filter(|v| v.is_finite() && *v > 0.0)?;

        let valid: Vec<f64> = history
            .iter()
            .flatten()
            .copied()
            .filter(|v| self.metric.accepts(*v))
            .collect();
        if valid.is_empty() {
            return None;
        }

        let hits = valid
            .iter()
            .filter(|v| match self.direction {
                RankDirection::AtOrBelow => **v <= current,
                RankDirection::AtOrAbove => **v >= current,
            })
            .count();

        Some(round2(hits as f64 / valid.len() as f64 * 100.0))
    }

    /// Rank `series[index]` against `series[0..=index]`.
    ///
    /// The series must already be in chronological order. Index 0 and
    /// out-of-range indexes yield `None`.
    pub fn rank_as_of(&self, series: &[Option<f64>], index: usize) -> Option<f64> {
        if index == 0 || index >= series.len() {
            return None;
        }
        self.rank_against_all(series[index], &series[..=index])
    }

    /// [`rank_as_of`](Self::rank_as_of) for every position.
    pub fn rank_series(&self, series: &[Option<f64>]) -> Vec<Option<f64>> {
        (0..series.len()).map(|i| self.rank_as_of(series, i)).collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Tests
// ============================================================================
