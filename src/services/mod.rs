// Services that span several entities

pub mod bnnb_comparison;
pub mod debt_analysis;
pub mod exchange_rate;
pub mod goal_progress;

pub use bnnb_comparison::BnnbComparison;
pub use debt_analysis::{DebtAnalysis, PayoffStep, PayoffStrategies};
pub use exchange_rate::{ExchangeRates, HttpRateSource, Quote, RateOrigin, RateSource, RetryPolicy};
