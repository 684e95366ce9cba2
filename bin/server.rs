// Kwacha Ledger - Web Server
// JSON API plus the in-process job scheduler

use anyhow::{Context, Result};
use kwacha_ledger::api::{self, AppState};
use kwacha_ledger::{db, jobs, logging, AppConfig, ExchangeRates};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    logging::init(&config.logging.filter);

    let conn = db::open_database(&config.database.path)?;
    info!(path = %config.database.path.display(), "Database opened");

    let state = AppState {
        db: db::shared(conn),
        rates: Arc::new(ExchangeRates::from_config(&config.exchange_rate)?),
    };

    let scheduled = jobs::spawn_scheduler(Arc::clone(&state.db), Arc::clone(&state.rates), &config.jobs);
    info!(jobs = scheduled.len(), "Scheduler started");

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind))?;
    info!(bind = %config.server.bind, "Server running");

    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}
