//! Forward-fill smoothing for noisy daily valuation series.
//!
//! Tushare reports `dv_ttm = 0` or leaves it empty around ex-dividend dates
//! and report refreshes; P/E drops out the same way. A zero there means
//! "unknown", not "no dividend", so it is carried forward from the last
//! known value. Values are only ever filled from earlier dates.

use crate::data::DailyBasicRow;

/// Columns of a [`DailyBasicRow`] the smoother can repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmoothedColumn {
    DividendYield,
    PeTtm,
}

impl SmoothedColumn {
    fn get(&self, row: &DailyBasicRow) -> Option<f64> {
        match self {
            Self::DividendYield => row.dv_ttm,
            Self::PeTtm => row.pe_ttm,
        }
    }

    fn set(&self, row: &mut DailyBasicRow, value: Option<f64>) {
        match self {
            Self::DividendYield => row.dv_ttm = value,
            Self::PeTtm => row.pe_ttm = value,
        }
    }
}

/// Sorts rows by date and forward-fills the tracked columns.
#[derive(Debug, Clone)]
pub struct SeriesSmoother {
    columns: Vec<SmoothedColumn>,
}

impl Default for SeriesSmoother {
    /// Dividend yield and P/E, the two ranked metrics.
    fn default() -> Self {
        Self::new(vec![SmoothedColumn::DividendYield, SmoothedColumn::PeTtm])
    }
}

impl SeriesSmoother {
    pub fn new(columns: Vec<SmoothedColumn>) -> Self {
        Self { columns }
    }

    /// Smoothed copy of `rows`, sorted ascending by trade date.
    ///
    /// The input slice is left untouched. Each tracked column is filled
    /// independently; values before the first valid one stay `None`.
    pub fn smooth(&self, rows: &[DailyBasicRow]) -> Vec<DailyBasicRow> {
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|row| row.trade_date);

        for column in &self.columns {
            let raw: Vec<Option<f64>> = sorted.iter().map(|row| column.get(row)).collect();
            for (row, value) in sorted.iter_mut().zip(forward_fill(&raw)) {
                column.set(row, value);
            }
        }

        sorted
    }
}

/// Forward-fill a series, treating zero and non-finite values as missing.
pub fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last_valid = None;
    values
        .iter()
        .map(|value| {
            if let Some(v) = value.filter(|v| v.is_finite() && *v != 0.0) {
                last_valid = Some(v);
            }
            last_valid
        })
        .collect()
}
