// 🇿🇲 Economic reference data: inflation, USD/ZMW rate, and the basic needs basket
//
// Not user-scoped. Indicators are keyed by date, baskets by (month, location).

use crate::db::json_column;
use crate::error::ValidationFailed;
use crate::money::round2;
use crate::period::{self, DateRange};
use crate::validation::Validator;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_LOCATION: &str = "Lusaka";

/// How many rows the `recent` listings return
const RECENT_LIMIT: i64 = 12;

// ============================================================================
// ECONOMIC INDICATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndicator {
    pub id: i64,
    pub date: NaiveDate,
    /// Annual, percent
    pub inflation_rate: Option<f64>,
    /// Kwacha per US dollar
    pub usd_zmw_rate: Option<f64>,
    pub source: Option<String>,
    pub created_at: NaiveDateTime,
}

const INDICATOR_COLUMNS: &str = "id, date, inflation_rate, usd_zmw_rate, source, created_at";

fn indicator_from_row(row: &Row<'_>) -> rusqlite::Result<EconomicIndicator> {
    Ok(EconomicIndicator {
        id: row.get(0)?,
        date: row.get(1)?,
        inflation_rate: row.get(2)?,
        usd_zmw_rate: row.get(3)?,
        source: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn validate_indicator(inflation_rate: Option<f64>, usd_zmw_rate: Option<f64>) -> Result<()> {
    let mut v = Validator::new();
    if let Some(rate) = inflation_rate {
        v.at_least("inflation_rate", rate, 0.0);
    }
    if let Some(rate) = usd_zmw_rate {
        v.greater_than("usd_zmw_rate", rate, 0.0);
    }
    v.finish().map_err(ValidationFailed)?;
    Ok(())
}

pub fn find_indicator(conn: &Connection, date: NaiveDate) -> Result<Option<EconomicIndicator>> {
    let indicator = conn
        .query_row(
            &format!("SELECT {} FROM economic_indicators WHERE date = ?1", INDICATOR_COLUMNS),
            [date],
            indicator_from_row,
        )
        .optional()?;
    Ok(indicator)
}

/// Insert the indicator for `date` unless one exists; returns it and whether it was created
pub fn find_or_create_indicator(
    conn: &Connection,
    date: NaiveDate,
    inflation_rate: Option<f64>,
    usd_zmw_rate: Option<f64>,
    source: &str,
) -> Result<(EconomicIndicator, bool)> {
    validate_indicator(inflation_rate, usd_zmw_rate)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO economic_indicators (date, inflation_rate, usd_zmw_rate, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![date, inflation_rate, usd_zmw_rate, source, period::now()],
    )?;
    let indicator = find_indicator(conn, date)?
        .with_context(|| format!("economic indicator for {} vanished", date))?;
    Ok((indicator, inserted > 0))
}

/// Set the exchange rate for `date`, keeping any inflation figure already stored
pub fn upsert_exchange_rate(
    conn: &Connection,
    date: NaiveDate,
    usd_zmw_rate: f64,
    source: &str,
) -> Result<EconomicIndicator> {
    validate_indicator(None, Some(usd_zmw_rate))?;
    conn.execute(
        "INSERT INTO economic_indicators (date, usd_zmw_rate, source, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(date) DO UPDATE SET usd_zmw_rate = excluded.usd_zmw_rate,
                                         source = excluded.source",
        params![date, usd_zmw_rate, source, period::now()],
    )
    .context("Failed to store exchange rate")?;
    find_indicator(conn, date)?
        .with_context(|| format!("economic indicator for {} vanished", date))
}

pub fn latest_indicator(conn: &Connection) -> Result<Option<EconomicIndicator>> {
    let indicator = conn
        .query_row(
            &format!(
                "SELECT {} FROM economic_indicators ORDER BY date DESC LIMIT 1",
                INDICATOR_COLUMNS
            ),
            [],
            indicator_from_row,
        )
        .optional()?;
    Ok(indicator)
}

/// Inflation on the newest indicator row (which may not carry one)
pub fn latest_inflation(conn: &Connection) -> Result<Option<f64>> {
    Ok(latest_indicator(conn)?.and_then(|i| i.inflation_rate))
}

pub fn latest_exchange_rate(conn: &Connection) -> Result<Option<f64>> {
    Ok(latest_indicator(conn)?.and_then(|i| i.usd_zmw_rate))
}

pub fn recent_indicators(conn: &Connection) -> Result<Vec<EconomicIndicator>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM economic_indicators ORDER BY date DESC LIMIT ?1",
        INDICATOR_COLUMNS
    ))?;
    let rows = stmt
        .query_map([RECENT_LIMIT], indicator_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// BASIC NEEDS AND NUTRITION BASKET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BnnbData {
    pub id: i64,
    /// First day of the month
    pub month: NaiveDate,
    pub location: String,
    pub total_basket: f64,
    pub food_basket: Option<f64>,
    pub non_food_basket: f64,
    pub item_breakdown: BTreeMap<String, f64>,
    pub created_at: NaiveDateTime,
}

/// Values for a basket that may not exist yet
#[derive(Debug, Clone)]
pub struct NewBasket {
    pub month: NaiveDate,
    pub location: String,
    pub total_basket: f64,
    pub food_basket: Option<f64>,
    pub non_food_basket: f64,
    pub item_breakdown: BTreeMap<String, f64>,
}

const BNNB_COLUMNS: &str =
    "id, month, location, total_basket, food_basket, non_food_basket, item_breakdown, created_at";

fn bnnb_from_row(row: &Row<'_>) -> rusqlite::Result<BnnbData> {
    Ok(BnnbData {
        id: row.get(0)?,
        month: row.get(1)?,
        location: row.get(2)?,
        total_basket: row.get(3)?,
        food_basket: row.get(4)?,
        non_food_basket: row.get(5)?,
        item_breakdown: json_column(6, row.get(6)?)?,
        created_at: row.get(7)?,
    })
}

pub fn find_bnnb(conn: &Connection, month: NaiveDate, location: &str) -> Result<Option<BnnbData>> {
    let basket = conn
        .query_row(
            &format!(
                "SELECT {} FROM bnnb_data WHERE month = ?1 AND location = ?2",
                BNNB_COLUMNS
            ),
            params![period::month_start(month), location],
            bnnb_from_row,
        )
        .optional()?;
    Ok(basket)
}

/// Insert the basket unless (month, location) exists; returns it and whether it was created
pub fn find_or_create_bnnb(conn: &Connection, basket: &NewBasket) -> Result<(BnnbData, bool)> {
    let mut v = Validator::new();
    v.presence("location", &basket.location);
    v.greater_than("total_basket", basket.total_basket, 0.0);
    if let Some(food) = basket.food_basket {
        v.greater_than("food_basket", food, 0.0);
    }
    v.greater_than("non_food_basket", basket.non_food_basket, 0.0);
    v.finish().map_err(ValidationFailed)?;

    let month = period::month_start(basket.month);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO bnnb_data (month, location, total_basket, food_basket,
                                         non_food_basket, item_breakdown, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            month,
            basket.location,
            basket.total_basket,
            basket.food_basket,
            basket.non_food_basket,
            serde_json::to_string(&basket.item_breakdown)?,
            period::now(),
        ],
    )?;
    let stored = find_bnnb(conn, month, &basket.location)?
        .with_context(|| format!("basket for {} {} vanished", basket.location, month))?;
    Ok((stored, inserted > 0))
}

pub fn latest_bnnb(conn: &Connection, location: &str) -> Result<Option<BnnbData>> {
    let basket = conn
        .query_row(
            &format!(
                "SELECT {} FROM bnnb_data WHERE location = ?1 ORDER BY month DESC LIMIT 1",
                BNNB_COLUMNS
            ),
            [location],
            bnnb_from_row,
        )
        .optional()?;
    Ok(basket)
}

pub fn recent_bnnb(conn: &Connection) -> Result<Vec<BnnbData>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bnnb_data ORDER BY month DESC, id DESC LIMIT ?1",
        BNNB_COLUMNS
    ))?;
    let rows = stmt
        .query_map([RECENT_LIMIT], bnnb_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Payments in categories whose name mentions food
pub fn food_spending(conn: &Connection, user_id: i64, range: DateRange) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(p.amount), 0) FROM payments p
         JOIN categories c ON c.id = p.category_id
         WHERE p.user_id = ?1 AND LOWER(c.name) LIKE '%food%'
           AND date(p.created_at) BETWEEN ?2 AND ?3",
        params![user_id, range.start, range.end],
        |row| row.get(0),
    )?;
    Ok(total)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodComparison {
    pub bnnb_food: f64,
    pub user_food: f64,
    pub difference: f64,
    pub percentage: f64,
}

/// User food spending against the month's food basket; none without a food figure
pub fn compare_user_spending(
    conn: &Connection,
    user_id: i64,
    month: NaiveDate,
) -> Result<Option<FoodComparison>> {
    let basket = conn
        .query_row(
            &format!(
                "SELECT {} FROM bnnb_data WHERE month = ?1 ORDER BY id LIMIT 1",
                BNNB_COLUMNS
            ),
            [period::month_start(month)],
            bnnb_from_row,
        )
        .optional()?;
    let Some(bnnb_food) = basket.and_then(|b| b.food_basket) else {
        return Ok(None);
    };

    let user_food = food_spending(conn, user_id, DateRange::month_of(month))?;
    let percentage = if bnnb_food == 0.0 {
        0.0
    } else {
        round2(user_food / bnnb_food * 100.0)
    };
    Ok(Some(FoodComparison {
        bnnb_food,
        user_food,
        difference: user_food - bnnb_food,
        percentage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn basket(month: NaiveDate, total: f64, food: Option<f64>) -> NewBasket {
        NewBasket {
            month,
            location: DEFAULT_LOCATION.to_string(),
            total_basket: total,
            food_basket: food,
            non_food_basket: total - food.unwrap_or(0.0),
            item_breakdown: BTreeMap::from([("rent".to_string(), 2500.0)]),
        }
    }

    #[test]
    fn test_indicators_latest_and_upsert() {
        let conn = setup();
        assert_eq!(latest_inflation(&conn).unwrap(), None);

        let (_, created) =
            find_or_create_indicator(&conn, date(2026, 1, 1), Some(9.4), Some(19.0), "seed").unwrap();
        assert!(created);
        let (again, created) =
            find_or_create_indicator(&conn, date(2026, 1, 1), Some(1.0), Some(1.0), "seed").unwrap();
        assert!(!created);
        assert_eq!(again.inflation_rate, Some(9.4));

        find_or_create_indicator(&conn, date(2026, 2, 1), Some(8.5), Some(18.91), "seed").unwrap();
        assert_eq!(latest_inflation(&conn).unwrap(), Some(8.5));

        let updated = upsert_exchange_rate(&conn, date(2026, 2, 1), 20.5, "exchangerate-api.com").unwrap();
        assert_eq!(updated.inflation_rate, Some(8.5));
        assert_eq!(updated.usd_zmw_rate, Some(20.5));

        // A rate-only row becomes the newest and carries no inflation
        upsert_exchange_rate(&conn, date(2026, 3, 1), 21.0, "exchangerate-api.com").unwrap();
        assert_eq!(latest_exchange_rate(&conn).unwrap(), Some(21.0));
        assert_eq!(latest_inflation(&conn).unwrap(), None);
        assert_eq!(recent_indicators(&conn).unwrap().len(), 3);

        assert!(upsert_exchange_rate(&conn, date(2026, 3, 2), 0.0, "x").is_err());
        assert!(find_or_create_indicator(&conn, date(2026, 3, 2), Some(-1.0), None, "x").is_err());
    }

    #[test]
    fn test_bnnb_find_or_create() {
        let conn = setup();
        let (stored, created) = find_or_create_bnnb(&conn, &basket(date(2026, 1, 15), 11365.09, Some(4900.0))).unwrap();
        assert!(created);
        assert_eq!(stored.month, date(2026, 1, 1));
        assert_eq!(stored.item_breakdown["rent"], 2500.0);

        let (_, created) = find_or_create_bnnb(&conn, &basket(date(2026, 1, 1), 1.0, None)).unwrap();
        assert!(!created);

        find_or_create_bnnb(&conn, &basket(date(2026, 2, 1), 11500.0, Some(4950.0))).unwrap();
        assert_eq!(latest_bnnb(&conn, DEFAULT_LOCATION).unwrap().unwrap().total_basket, 11500.0);
        assert!(latest_bnnb(&conn, "Ndola").unwrap().is_none());
        assert_eq!(recent_bnnb(&conn).unwrap().len(), 2);

        assert!(find_or_create_bnnb(&conn, &basket(date(2026, 3, 1), 0.0, None)).is_err());
    }

    #[test]
    fn test_compare_user_spending() {
        let conn = setup();
        conn.execute_batch(
            "INSERT INTO users (id, name, email, created_at) VALUES (1, 'Zulu', 'z@zm.com', '2026-01-01 00:00:00');
             INSERT INTO categories (id, user_id, name, icon, created_at) VALUES (1, 1, 'Food & Groceries', 'x', '2026-01-01 00:00:00');
             INSERT INTO categories (id, user_id, name, icon, created_at) VALUES (2, 1, 'Rent', 'x', '2026-01-01 00:00:00');
             INSERT INTO payments (user_id, category_id, name, amount, created_at) VALUES (1, 1, 'Mealie meal', 2450, '2026-01-10 10:00:00');
             INSERT INTO payments (user_id, category_id, name, amount, created_at) VALUES (1, 2, 'Rent', 3000, '2026-01-01 10:00:00');",
        )
        .unwrap();

        assert!(compare_user_spending(&conn, 1, date(2026, 1, 1)).unwrap().is_none());

        find_or_create_bnnb(&conn, &basket(date(2026, 1, 1), 11365.09, Some(4900.0))).unwrap();
        let comparison = compare_user_spending(&conn, 1, date(2026, 1, 20)).unwrap().unwrap();
        assert_eq!(comparison.user_food, 2450.0);
        assert_eq!(comparison.difference, -2450.0);
        assert_eq!(comparison.percentage, 50.0);

        find_or_create_bnnb(&conn, &basket(date(2026, 2, 1), 11500.0, None)).unwrap();
        assert!(compare_user_spending(&conn, 1, date(2026, 2, 1)).unwrap().is_none());
    }
}
