//! Series sanitization and percentile ranking.

pub mod percentile;
pub mod smoothing;

pub use percentile::{MetricKind, PercentileRanker, RankDirection};
pub use smoothing::{forward_fill, SeriesSmoother, SmoothedColumn};
