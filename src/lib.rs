// Kwacha Ledger - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod dashboard;
pub mod db;
pub mod entities;
pub mod error;
pub mod import;
pub mod jobs;
pub mod logging;
pub mod money;
pub mod period;
pub mod services;
pub mod validation;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{
    get_events_for_entity, insert_event, open_database, record_event, setup_database, shared, Event,
    SharedDb,
};
pub use error::{AppError, NotFound, ValidationFailed};
pub use import::{export_payments, import_payments, ImportReport, PaymentRecord};
pub use jobs::{Job, JobOutcome};
pub use period::DateRange;
pub use services::{BnnbComparison, DebtAnalysis, ExchangeRates};
pub use validation::FieldError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
