//! Exchange code mapping for A-share tickers.
//!
//! Tushare addresses instruments by `ts_code` (`600036.SH`), while the
//! watchlist and the store key everything by the bare six-digit ticker.

use std::fmt;

use tracing::debug;

/// Exchange an A-share ticker is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// Shanghai Stock Exchange
    Shanghai,
    /// Shenzhen Stock Exchange (main board and ChiNext)
    Shenzhen,
}

impl Exchange {
    /// Resolve the exchange from the ticker prefix.
    ///
    /// `6xxxxx` is Shanghai, `0xxxxx` / `3xxxxx` are Shenzhen. Anything else
    /// falls back to Shanghai.
    pub fn from_ticker(ticker: &str) -> Self {
        match ticker.chars().next() {
            Some('6') => Self::Shanghai,
            Some('0') | Some('3') => Self::Shenzhen,
            _ => {
                debug!(ticker, "Unrecognized ticker prefix, defaulting to Shanghai");
                Self::Shanghai
            }
        }
    }

    /// Suffix used by Tushare.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Shanghai => "SH",
            Self::Shenzhen => "SZ",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Map a bare ticker to its Tushare `ts_code`.
pub fn to_ts_code(ticker: &str) -> String {
    format!("{}.{}", ticker, Exchange::from_ticker(ticker))
}

// ============================================================================
// Tests
// ============================================================================
