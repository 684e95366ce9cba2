// 📊 Budget - a monthly spending limit on one category
//
// Two budgets of the same user and category may not cover overlapping
// periods. A budget without an end date runs until OPEN_END_DATE.

use crate::db::OPEN_END_DATE;
use crate::entities::user::{self, User};
use crate::error::{NotFound, ValidationFailed};
use crate::money::{percentage, round2};
use crate::period::{self, DateRange};
use crate::validation::Validator;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub monthly_limit: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub inflation_adjusted: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BudgetParams {
    pub category_id: Option<i64>,
    pub monthly_limit: Option<f64>,
    /// `YYYY-MM-DD`; an empty string clears the date
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub inflation_adjusted: Option<bool>,
}

/// A budget together with its spending for one month
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    #[serde(flatten)]
    pub budget: Budget,
    pub category_name: String,
    pub current_spending: f64,
    pub remaining_budget: f64,
    pub percentage_used: f64,
    pub is_overspent: bool,
}

fn apply_date(v: &mut Validator, field: &str, raw: String, target: &mut Option<NaiveDate>) {
    if raw.trim().is_empty() {
        *target = None;
        return;
    }
    match period::parse_date(&raw) {
        Some(date) => *target = Some(date),
        None => v.add(field, "is not a valid date"),
    }
}

impl Budget {
    fn apply(&mut self, params: BudgetParams, v: &mut Validator) {
        if let Some(category_id) = params.category_id {
            self.category_id = category_id;
        }
        if let Some(limit) = params.monthly_limit {
            self.monthly_limit = limit;
        }
        if let Some(raw) = params.start_date {
            apply_date(v, "start_date", raw, &mut self.start_date);
        }
        if let Some(raw) = params.end_date {
            apply_date(v, "end_date", raw, &mut self.end_date);
        }
        if let Some(flag) = params.inflation_adjusted {
            self.inflation_adjusted = flag;
        }
    }

    pub fn remaining(&self, spending: f64) -> f64 {
        self.monthly_limit - spending
    }

    pub fn percentage_used_for(&self, spending: f64) -> f64 {
        if self.monthly_limit == 0.0 {
            return 0.0;
        }
        round2(percentage(spending, self.monthly_limit))
    }

    pub fn is_overspent_for(&self, spending: f64) -> bool {
        spending > self.monthly_limit
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

fn validate(conn: &Connection, budget: &Budget, v: &mut Validator) -> Result<()> {
    v.greater_than("monthly_limit", budget.monthly_limit, 0.0);

    let owner: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM categories WHERE id = ?1",
            [budget.category_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        None => v.add("category", "must exist"),
        Some(owner) if owner != budget.user_id => v.add("category", "must belong to you"),
        Some(_) => {}
    }

    if let (Some(start), Some(end)) = (budget.start_date, budget.end_date) {
        if end < start {
            v.add("end_date", "must be after start date");
        }
    }

    if overlaps_existing(conn, budget)? {
        v.add("category_id", "already has a budget for this period");
    }
    Ok(())
}

/// Standard interval overlap against the user's other budgets for the category
fn overlaps_existing(conn: &Connection, budget: &Budget) -> Result<bool> {
    let overlap: bool = match budget.start_date {
        Some(start) => {
            let this_end = budget
                .end_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| OPEN_END_DATE.to_string());
            conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM budgets
                    WHERE user_id = ?1 AND category_id = ?2 AND id != ?3
                      AND start_date <= ?4 AND COALESCE(end_date, ?5) >= ?6)",
                params![budget.user_id, budget.category_id, budget.id, this_end, OPEN_END_DATE, start],
                |row| row.get(0),
            )?
        }
        None => conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM budgets WHERE user_id = ?1 AND category_id = ?2 AND id != ?3)",
            params![budget.user_id, budget.category_id, budget.id],
            |row| row.get(0),
        )?,
    };
    Ok(overlap)
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str =
    "id, user_id, category_id, monthly_limit, start_date, end_date, inflation_adjusted, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        monthly_limit: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        inflation_adjusted: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn count_for_user(conn: &Connection, user_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM budgets WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn create(conn: &Connection, owner: &User, params: BudgetParams) -> Result<Budget> {
    let mut v = Validator::new();
    let mut budget = Budget {
        id: 0,
        user_id: owner.id,
        category_id: 0,
        monthly_limit: 0.0,
        start_date: None,
        end_date: None,
        inflation_adjusted: false,
        created_at: period::now(),
    };
    if params.category_id.is_none() {
        v.add("category", "must exist");
    }
    budget.apply(params, &mut v);
    validate(conn, &budget, &mut v)?;

    if let Some(max) = user::max_budgets(conn, owner)? {
        if count_for_user(conn, owner.id)? >= max {
            v.add(
                "base",
                format!("You have reached the maximum of {} budgets for your plan", max),
            );
        }
    }
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "INSERT INTO budgets (user_id, category_id, monthly_limit, start_date, end_date,
                              inflation_adjusted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            budget.user_id,
            budget.category_id,
            budget.monthly_limit,
            budget.start_date,
            budget.end_date,
            budget.inflation_adjusted,
            budget.created_at,
        ],
    )
    .context("Failed to insert budget")?;
    budget.id = conn.last_insert_rowid();
    Ok(budget)
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<Budget> {
    conn.query_row(
        &format!("SELECT {} FROM budgets WHERE id = ?1 AND user_id = ?2", COLUMNS),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Budget").into())
}

/// Newest first
pub fn list(conn: &Connection, user_id: i64) -> Result<Vec<Budget>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM budgets WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        COLUMNS
    ))?;
    let budgets = stmt
        .query_map([user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(budgets)
}

/// Every inflation-adjusted budget, across users
pub fn list_inflation_adjusted(conn: &Connection) -> Result<Vec<Budget>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM budgets WHERE inflation_adjusted = 1 ORDER BY id",
        COLUMNS
    ))?;
    let budgets = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(budgets)
}

pub fn update(conn: &Connection, budget: &mut Budget, params: BudgetParams) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = budget.clone();
    updated.apply(params, &mut v);
    validate(conn, &updated, &mut v)?;
    v.finish().map_err(ValidationFailed)?;

    save(conn, &updated)?;
    *budget = updated;
    Ok(())
}

fn save(conn: &Connection, budget: &Budget) -> Result<()> {
    conn.execute(
        "UPDATE budgets SET category_id = ?1, monthly_limit = ?2, start_date = ?3, end_date = ?4,
                inflation_adjusted = ?5
         WHERE id = ?6",
        params![
            budget.category_id,
            budget.monthly_limit,
            budget.start_date,
            budget.end_date,
            budget.inflation_adjusted,
            budget.id,
        ],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM budgets WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Budget").into());
    }
    Ok(())
}

// ============================================================================
// SPENDING
// ============================================================================

/// Payments by the owner in the budget's category during the month containing `month`
pub fn current_spending(conn: &Connection, budget: &Budget, month: NaiveDate) -> Result<f64> {
    let range = DateRange::month_of(month);
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE user_id = ?1 AND category_id = ?2 AND date(created_at) BETWEEN ?3 AND ?4",
        params![budget.user_id, budget.category_id, range.start, range.end],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn remaining_budget(conn: &Connection, budget: &Budget, month: NaiveDate) -> Result<f64> {
    Ok(budget.remaining(current_spending(conn, budget, month)?))
}

pub fn percentage_used(conn: &Connection, budget: &Budget, month: NaiveDate) -> Result<f64> {
    Ok(budget.percentage_used_for(current_spending(conn, budget, month)?))
}

pub fn is_overspent(conn: &Connection, budget: &Budget, month: NaiveDate) -> Result<bool> {
    Ok(budget.is_overspent_for(current_spending(conn, budget, month)?))
}

pub fn status(conn: &Connection, budget: Budget, month: NaiveDate) -> Result<BudgetStatus> {
    let spending = current_spending(conn, &budget, month)?;
    let category_name: String = conn.query_row(
        "SELECT name FROM categories WHERE id = ?1",
        [budget.category_id],
        |row| row.get(0),
    )?;
    Ok(BudgetStatus {
        category_name,
        current_spending: round2(spending),
        remaining_budget: round2(budget.remaining(spending)),
        percentage_used: budget.percentage_used_for(spending),
        is_overspent: budget.is_overspent_for(spending),
        budget,
    })
}

/// Raise the limit by `rate` percent; false when the budget opts out or the rate is 0
pub fn adjust_for_inflation(conn: &Connection, budget: &mut Budget, rate: f64) -> Result<bool> {
    if !budget.inflation_adjusted || rate == 0.0 || !rate.is_finite() {
        return Ok(false);
    }
    budget.monthly_limit *= 1.0 + rate / 100.0;
    save(conn, budget)?;
    Ok(true)
}
