// Periodic jobs and the in-process scheduler
//
// Each job is a plain function over a connection (or the shared handle when
// it has to await the network), so the CLI can run one on demand and the
// server can run them on intervals.

use crate::config::JobsConfig;
use crate::db::{self, record_event, Event, SharedDb};
use crate::entities::budget;
use crate::entities::economic::{self, EconomicIndicator, NewBasket, DEFAULT_LOCATION};
use crate::entities::recurring;
use crate::period;
use crate::services::exchange_rate::{self, ExchangeRates};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SEED_SOURCE: &str = "Manual seed - 2026 forecast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Job {
    AdjustBudgetsForInflation,
    UpdateExchangeRates,
    SeedEconomicData,
    FetchBnnbData,
    ProcessRecurringTransactions,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::AdjustBudgetsForInflation => "adjust_budgets_for_inflation",
            Job::UpdateExchangeRates => "update_exchange_rates",
            Job::SeedEconomicData => "seed_economic_data",
            Job::FetchBnnbData => "fetch_bnnb_data",
            Job::ProcessRecurringTransactions => "process_recurring_transactions",
        }
    }
}

/// What a job run did, for the CLI and logs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    InflationAdjusted(InflationReport),
    ExchangeRateUpdated { rate: Option<f64> },
    Seeded(SeedReport),
    RecurringProcessed { processed: usize },
}

// ============================================================================
// INFLATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InflationReport {
    /// Monthly rate applied; none when there was no inflation figure
    pub monthly_rate: Option<f64>,
    pub adjusted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Raise every inflation-adjusted budget by one month of the latest annual inflation
pub fn adjust_budgets_for_inflation(conn: &Connection) -> Result<InflationReport> {
    let Some(annual) = economic::latest_inflation(conn)? else {
        warn!("No inflation data available for budget adjustment");
        return Ok(InflationReport::default());
    };
    let monthly_rate = annual / 12.0;

    let mut report = InflationReport {
        monthly_rate: Some(monthly_rate),
        ..Default::default()
    };
    for mut budget in budget::list_inflation_adjusted(conn)? {
        let previous = budget.monthly_limit;
        match budget::adjust_for_inflation(conn, &mut budget, monthly_rate) {
            Ok(true) => {
                report.adjusted += 1;
                record_event(
                    conn,
                    Event::new(
                        "budget_inflation_adjusted",
                        "budget",
                        &budget.id.to_string(),
                        serde_json::json!({
                            "previous_limit": previous,
                            "monthly_limit": budget.monthly_limit,
                            "rate": monthly_rate,
                        }),
                        "inflation_adjuster",
                    ),
                );
            }
            Ok(false) => report.unchanged += 1,
            Err(e) => {
                report.failed += 1;
                warn!(budget_id = budget.id, error = %e, "Failed to adjust budget");
            }
        }
    }

    info!(
        adjusted = report.adjusted,
        failed = report.failed,
        monthly_rate,
        "Adjusted budgets for inflation"
    );
    Ok(report)
}

// ============================================================================
// EXCHANGE RATES
// ============================================================================

/// Store today's live USD/ZMW rate. Fallback rates are not persisted.
pub async fn update_exchange_rates(
    db: &SharedDb,
    rates: &ExchangeRates,
    today: NaiveDate,
) -> Result<Option<EconomicIndicator>> {
    let Some(rate) = rates.fetch_live().await else {
        return Ok(None);
    };
    let conn = db::lock(db)?;
    match economic::upsert_exchange_rate(&conn, today, rate, exchange_rate::SOURCE_NAME) {
        Ok(indicator) => {
            info!(rate, "Updated USD/ZMW rate");
            Ok(Some(indicator))
        }
        Err(e) => {
            error!(rate, error = %e, "Failed to save exchange rate");
            Err(e)
        }
    }
}

// ============================================================================
// SEEDING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub indicators_created: usize,
    pub baskets_created: usize,
}

fn breakdown(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
    items.iter().map(|(name, amount)| (name.to_string(), *amount)).collect()
}

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or_default()
}

fn january_basket() -> NewBasket {
    NewBasket {
        month: month(2026, 1),
        location: DEFAULT_LOCATION.to_string(),
        total_basket: 11_365.09,
        food_basket: Some(4_900.00),
        non_food_basket: 6_465.09,
        item_breakdown: breakdown(&[
            ("charcoal", 650.00),
            ("kapenta", 150.00),
            ("vegetables", 200.00),
            ("mealie_meal", 180.00),
            ("beef", 120.00),
            ("beans", 80.00),
            ("rent", 2_500.00),
            ("transport", 800.00),
            ("electricity", 300.00),
        ]),
    }
}

fn february_basket() -> NewBasket {
    NewBasket {
        month: month(2026, 2),
        location: DEFAULT_LOCATION.to_string(),
        total_basket: 11_500.00,
        food_basket: Some(4_950.00),
        non_food_basket: 6_550.00,
        item_breakdown: breakdown(&[
            ("charcoal", 680.00),
            ("kapenta", 160.00),
            ("vegetables", 210.00),
            ("mealie_meal", 185.00),
            ("beef", 125.00),
            ("beans", 85.00),
            ("rent", 2_500.00),
            ("transport", 820.00),
            ("electricity", 310.00),
        ]),
    }
}

/// January and February 2026 indicators and Lusaka baskets; safe to rerun
pub fn seed_economic_data(conn: &Connection) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for (date, inflation, rate) in [(month(2026, 1), 9.4, 19.0), (month(2026, 2), 8.5, 18.91)] {
        let (_, created) =
            economic::find_or_create_indicator(conn, date, Some(inflation), Some(rate), SEED_SOURCE)?;
        report.indicators_created += usize::from(created);
    }
    for basket in [january_basket(), february_basket()] {
        let (_, created) = economic::find_or_create_bnnb(conn, &basket)?;
        report.baskets_created += usize::from(created);
    }
    info!(
        indicators = report.indicators_created,
        baskets = report.baskets_created,
        "Economic data seeded"
    );
    Ok(report)
}

/// Only the current published basket; there is no live source to scrape
pub fn fetch_bnnb_data(conn: &Connection) -> Result<SeedReport> {
    info!("BNNB data fetch scheduled - seeding 2026 data");
    let (_, created) = economic::find_or_create_bnnb(conn, &january_basket())?;
    Ok(SeedReport {
        indicators_created: 0,
        baskets_created: usize::from(created),
    })
}

// ============================================================================
// RECURRING
// ============================================================================

pub fn process_recurring_transactions(conn: &Connection, today: NaiveDate) -> Result<usize> {
    let processed = recurring::process_all_due(conn, today)?;
    if processed > 0 {
        info!(processed, "Processed due recurring transactions");
    }
    Ok(processed)
}

// ============================================================================
// DISPATCH & SCHEDULER
// ============================================================================

pub async fn run(job: Job, db: &SharedDb, rates: &ExchangeRates) -> Result<JobOutcome> {
    let today = period::today();
    if job == Job::UpdateExchangeRates {
        let indicator = update_exchange_rates(db, rates, today).await?;
        return Ok(JobOutcome::ExchangeRateUpdated {
            rate: indicator.and_then(|i| i.usd_zmw_rate),
        });
    }
    let conn = db::lock(db)?;
    run_local(job, &conn, today)
}

/// Jobs that only touch the database
fn run_local(job: Job, conn: &Connection, today: NaiveDate) -> Result<JobOutcome> {
    let outcome = match job {
        Job::AdjustBudgetsForInflation => JobOutcome::InflationAdjusted(adjust_budgets_for_inflation(conn)?),
        Job::SeedEconomicData => JobOutcome::Seeded(seed_economic_data(conn)?),
        Job::FetchBnnbData => JobOutcome::Seeded(fetch_bnnb_data(conn)?),
        Job::ProcessRecurringTransactions => JobOutcome::RecurringProcessed {
            processed: process_recurring_transactions(conn, today)?,
        },
        Job::UpdateExchangeRates => return Err(anyhow!("{} needs the rate client", job.as_str())),
    };
    Ok(outcome)
}

/// Spawn one interval loop per enabled job
pub fn spawn_scheduler(db: SharedDb, rates: Arc<ExchangeRates>, config: &JobsConfig) -> Vec<JoinHandle<()>> {
    if !config.enabled {
        info!("Job scheduler disabled");
        return Vec::new();
    }

    let schedule = [
        (Job::ProcessRecurringTransactions, config.recurring_interval_secs),
        (Job::UpdateExchangeRates, config.exchange_rate_interval_secs),
        (Job::AdjustBudgetsForInflation, config.inflation_interval_secs),
    ];

    schedule
        .into_iter()
        .filter(|(_, secs)| *secs > 0)
        .map(|(job, secs)| {
            let db = Arc::clone(&db);
            let rates = Arc::clone(&rates);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs));
                // The first tick fires immediately; skip it so start-up stays quiet
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if let Err(e) = run(job, &db, &rates).await {
                        error!(job = job.as_str(), error = %e, "scheduled job failed");
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::budget::BudgetParams;
    use crate::entities::category::{self, CategoryParams};
    use crate::entities::user::{self, Role, UserParams};
    use crate::services::exchange_rate::{RateSource, RetryPolicy};
    use async_trait::async_trait;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    struct FixedRate(Option<f64>);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn fetch_usd_zmw(&self) -> Result<f64> {
            self.0.ok_or_else(|| anyhow::anyhow!("offline"))
        }
    }

    fn rates(rate: Option<f64>) -> ExchangeRates {
        ExchangeRates::new(
            Arc::new(FixedRate(rate)),
            RetryPolicy {
                max_attempts: 1,
                base_backoff_ms: 0,
            },
        )
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let conn = setup();
        let first = seed_economic_data(&conn).unwrap();
        assert_eq!(first, SeedReport { indicators_created: 2, baskets_created: 2 });
        let second = seed_economic_data(&conn).unwrap();
        assert_eq!(second, SeedReport::default());

        assert_eq!(economic::latest_inflation(&conn).unwrap(), Some(8.5));
        let january = economic::find_bnnb(&conn, month(2026, 1), DEFAULT_LOCATION).unwrap().unwrap();
        assert_eq!(january.item_breakdown.len(), 9);
        assert_eq!(fetch_bnnb_data(&conn).unwrap().baskets_created, 0);
    }

    #[test]
    fn test_inflation_without_data_does_nothing() {
        let conn = setup();
        let report = adjust_budgets_for_inflation(&conn).unwrap();
        assert_eq!(report, InflationReport::default());
    }

    #[test]
    fn test_inflation_adjusts_opted_in_budgets() {
        let conn = setup();
        let owner = user::create(
            &conn,
            UserParams {
                name: Some("Mutale".into()),
                email: Some("mutale@zm.com".into()),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        let food = category::create(
            &conn,
            &owner,
            CategoryParams {
                name: Some("Food".into()),
                icon: Some("🍲".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let rent = category::create(
            &conn,
            &owner,
            CategoryParams {
                name: Some("Rent".into()),
                icon: Some("🏠".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let adjusted = budget::create(
            &conn,
            &owner,
            BudgetParams {
                category_id: Some(food.id),
                monthly_limit: Some(1200.0),
                inflation_adjusted: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let fixed = budget::create(
            &conn,
            &owner,
            BudgetParams {
                category_id: Some(rent.id),
                monthly_limit: Some(3000.0),
                ..Default::default()
            },
        )
        .unwrap();
        economic::find_or_create_indicator(&conn, month(2026, 2), Some(12.0), None, "test").unwrap();

        let report = adjust_budgets_for_inflation(&conn).unwrap();
        assert_eq!(report.monthly_rate, Some(1.0));
        assert_eq!(report.adjusted, 1);

        let stored = budget::find(&conn, owner.id, adjusted.id).unwrap();
        assert!((stored.monthly_limit - 1212.0).abs() < 1e-9);
        assert_eq!(budget::find(&conn, owner.id, fixed.id).unwrap().monthly_limit, 3000.0);

        let events = db::get_events_for_entity(&conn, "budget", &adjusted.id.to_string()).unwrap();
        assert_eq!(events[0].event_type, "budget_inflation_adjusted");
    }

    #[tokio::test]
    async fn test_exchange_rate_job_persists_live_rate_only() {
        let shared = db::shared(setup());
        let today = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();

        assert!(update_exchange_rates(&shared, &rates(None), today).await.unwrap().is_none());
        let stored = update_exchange_rates(&shared, &rates(Some(26.1)), today).await.unwrap().unwrap();
        assert_eq!(stored.usd_zmw_rate, Some(26.1));
        assert_eq!(stored.source.as_deref(), Some("exchangerate-api.com"));

        let conn = db::lock(&shared).unwrap();
        assert_eq!(economic::latest_exchange_rate(&conn).unwrap(), Some(26.1));
    }

    #[tokio::test]
    async fn test_run_dispatches() {
        let shared = db::shared(setup());
        let outcome = run(Job::SeedEconomicData, &shared, &rates(None)).await.unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Seeded(SeedReport { indicators_created: 2, baskets_created: 2 })
        );
        let outcome = run(Job::ProcessRecurringTransactions, &shared, &rates(None)).await.unwrap();
        assert_eq!(outcome, JobOutcome::RecurringProcessed { processed: 0 });
    }
}
