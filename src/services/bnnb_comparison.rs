// Monthly spending against the JCTR basic needs basket

use crate::entities::economic::{self, BnnbData};
use crate::entities::user::{self, User};
use crate::money::round2;
use crate::period::{self, DateRange};
use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Food spending this far from the basket (in percent) earns an insight
const FOOD_DEVIATION_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BnnbComparison {
    pub month: NaiveDate,
    pub bnnb_total: f64,
    pub user_total: f64,
    pub bnnb_food: Option<f64>,
    pub user_food: f64,
    pub bnnb_non_food: f64,
    pub user_non_food: f64,
    pub insights: Vec<String>,
}

/// Compare the owner's spending in `month` with that month's basket; none without a basket
pub fn compare(conn: &Connection, owner: &User, month: NaiveDate) -> Result<Option<BnnbComparison>> {
    let month = period::month_start(month);
    let Some(basket) = basket_for_month(conn, month)? else {
        return Ok(None);
    };

    let range = DateRange::month_of(month);
    let user_total = user::total_spending(conn, owner.id, range)?;
    let user_food = economic::food_spending(conn, owner.id, range)?;

    Ok(Some(BnnbComparison {
        month,
        bnnb_total: basket.total_basket,
        user_total,
        bnnb_food: basket.food_basket,
        user_food,
        bnnb_non_food: basket.non_food_basket,
        user_non_food: user_total - user_food,
        insights: insights(owner, &basket, user_food),
    }))
}

fn basket_for_month(conn: &Connection, month: NaiveDate) -> Result<Option<BnnbData>> {
    let location: Option<String> = conn
        .query_row(
            "SELECT location FROM bnnb_data WHERE month = ?1 ORDER BY id LIMIT 1",
            [month],
            |row| row.get(0),
        )
        .optional()?;
    match location {
        Some(location) => economic::find_bnnb(conn, month, &location),
        None => Ok(None),
    }
}

fn insights(owner: &User, basket: &BnnbData, user_food: f64) -> Vec<String> {
    let mut insights = Vec::new();

    let food_basket = match basket.food_basket {
        Some(food) if food != 0.0 => food,
        _ => return insights,
    };

    let food_diff = round2((user_food / food_basket - 1.0) * 100.0);
    if food_diff < -FOOD_DEVIATION_THRESHOLD {
        insights.push(format!(
            "✅ Your food spending is {}% below JCTR average - great budgeting!",
            food_diff.abs()
        ));
    } else if food_diff > FOOD_DEVIATION_THRESHOLD {
        insights.push(format!(
            "⚠️ Your food spending is {}% above JCTR average. Consider meal planning.",
            food_diff
        ));
    }

    if let Some(income) = owner.monthly_income {
        if income < basket.total_basket {
            insights.push(format!(
                "🚨 Your income (K{}) is below JCTR basic needs (K{}). Seek support.",
                income, basket.total_basket
            ));
        }
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::economic::{NewBasket, DEFAULT_LOCATION};
    use crate::entities::user::{Role, UserParams};
    use rusqlite::params;
    use std::collections::BTreeMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(income: f64) -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let owner = user::create(
            &conn,
            UserParams {
                name: Some("Chanda Mulenga".to_string()),
                email: Some("chanda@example.zm".to_string()),
                monthly_income: Some(income),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        economic::find_or_create_bnnb(
            &conn,
            &NewBasket {
                month: date(2026, 1, 1),
                location: DEFAULT_LOCATION.to_string(),
                total_basket: 11365.09,
                food_basket: Some(5000.0),
                non_food_basket: 6365.09,
                item_breakdown: BTreeMap::new(),
            },
        )
        .unwrap();
        (conn, owner)
    }

    fn spend(conn: &Connection, owner: &User, category: &str, amount: f64) {
        conn.execute(
            "INSERT OR IGNORE INTO categories (user_id, name, icon, created_at)
             VALUES (?1, ?2, 'x', '2026-01-01 00:00:00')",
            params![owner.id, category],
        )
        .unwrap();
        let category_id: i64 = conn
            .query_row(
                "SELECT id FROM categories WHERE user_id = ?1 AND name = ?2",
                params![owner.id, category],
                |row| row.get(0),
            )
            .unwrap();
        conn.execute(
            "INSERT INTO payments (user_id, category_id, name, amount, created_at)
             VALUES (?1, ?2, 'Item', ?3, '2026-01-12 09:30:00')",
            params![owner.id, category_id, amount],
        )
        .unwrap();
    }

    #[test]
    fn test_no_basket_for_month() {
        let (conn, owner) = setup(20000.0);
        assert!(compare(&conn, &owner, date(2026, 3, 1)).unwrap().is_none());
    }

    #[test]
    fn test_food_below_average() {
        let (conn, owner) = setup(20000.0);
        spend(&conn, &owner, "Food", 4000.0);
        spend(&conn, &owner, "Transport", 1000.0);

        let result = compare(&conn, &owner, date(2026, 1, 20)).unwrap().unwrap();
        assert_eq!(result.month, date(2026, 1, 1));
        assert_eq!(result.user_total, 5000.0);
        assert_eq!(result.user_food, 4000.0);
        assert_eq!(result.user_non_food, 1000.0);
        assert_eq!(result.insights.len(), 1);
        assert!(result.insights[0].contains("20% below"));
    }

    #[test]
    fn test_food_above_average_and_low_income() {
        let (conn, owner) = setup(8000.0);
        spend(&conn, &owner, "food & groceries", 6000.0);

        let result = compare(&conn, &owner, date(2026, 1, 1)).unwrap().unwrap();
        assert_eq!(result.insights.len(), 2);
        assert!(result.insights[0].contains("20% above"));
        assert!(result.insights[1].contains("K8000"));
    }

    #[test]
    fn test_close_to_average_is_quiet() {
        let (conn, owner) = setup(20000.0);
        spend(&conn, &owner, "Food", 5200.0);
        let result = compare(&conn, &owner, date(2026, 1, 1)).unwrap().unwrap();
        assert!(result.insights.is_empty());
    }
}
