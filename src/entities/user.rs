// 👤 User - owner of every other record
//
// Users carry the income figure all ratio calculations divide by, and the
// subscription that caps how many categories and budgets they may create.

use crate::db::{enum_column, is_constraint_violation};
use crate::entities::subscription::{self, quota, Plan};
use crate::error::{NotFound, ValidationFailed};
use crate::money::round2;
use crate::period::{self, DateRange};
use crate::validation::{FieldError, Validator};
use anyhow::Result;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Debt payments above this share of income mark a user as over-indebted
pub const DEBT_TO_INCOME_THRESHOLD: f64 = 40.0;

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?260\d{9}$").expect("phone pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Default,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Default => "default",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "default" => Some(Role::Default),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub monthly_income: Option<f64>,
    pub currency: String,
    pub phone_number: Option<String>,
    pub mtn_momo_number: Option<String>,
    pub airtel_money_number: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Writable profile fields; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserParams {
    pub name: Option<String>,
    pub email: Option<String>,
    pub monthly_income: Option<f64>,
    pub currency: Option<String>,
    pub phone_number: Option<String>,
    pub mtn_momo_number: Option<String>,
    pub airtel_money_number: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn apply(&mut self, params: UserParams) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = params.email {
            self.email = email.trim().to_lowercase();
        }
        if params.monthly_income.is_some() {
            self.monthly_income = params.monthly_income;
        }
        if let Some(currency) = params.currency {
            self.currency = currency.trim().to_uppercase();
        }
        if params.phone_number.is_some() {
            self.phone_number = params.phone_number;
        }
        if params.mtn_momo_number.is_some() {
            self.mtn_momo_number = params.mtn_momo_number;
        }
        if params.airtel_money_number.is_some() {
            self.airtel_money_number = params.airtel_money_number;
        }
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut v = Validator::new();
        v.presence("name", &self.name);
        v.min_length("name", self.name.trim(), 2);
        v.max_length("name", &self.name, 50);
        v.presence("email", &self.email);
        if !self.email.is_empty() && !self.email.contains('@') {
            v.add("email", "is invalid");
        }
        if let Some(income) = self.monthly_income {
            v.greater_than("monthly_income", income, 0.0);
        }
        if let Some(phone) = &self.phone_number {
            if !PHONE_PATTERN.is_match(phone) {
                v.add("phone_number", "is invalid");
            }
        }
        v.finish().err().unwrap_or_default()
    }

    /// Monthly debt payments as a percentage of income (0 without income)
    pub fn debt_to_income_for(&self, total_debt_payments: f64) -> f64 {
        match self.monthly_income {
            Some(income) if income > 0.0 => round2(total_debt_payments / income * 100.0),
            _ => 0.0,
        }
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, name, email, role, monthly_income, currency, phone_number, \
                       mtn_momo_number, airtel_money_number, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: enum_column(3, row.get(3)?, Role::parse)?,
        monthly_income: row.get(4)?,
        currency: row.get(5)?,
        phone_number: row.get(6)?,
        mtn_momo_number: row.get(7)?,
        airtel_money_number: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn email_taken(conn: &Connection, email: &str, except_id: i64) -> Result<bool> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND id != ?2)",
        params![email, except_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// Register a user and give them the free plan
pub fn create(conn: &Connection, params: UserParams, role: Role) -> Result<User> {
    let now = period::now();
    let mut user = User {
        id: 0,
        name: String::new(),
        email: String::new(),
        role,
        monthly_income: None,
        currency: "ZMW".to_string(),
        phone_number: None,
        mtn_momo_number: None,
        airtel_money_number: None,
        created_at: now,
    };
    user.apply(params);

    let mut errors = user.validate();
    if errors.is_empty() && email_taken(conn, &user.email, 0)? {
        errors.push(FieldError::new("email", "has already been taken"));
    }
    if !errors.is_empty() {
        return Err(ValidationFailed(errors).into());
    }

    let result = conn.execute(
        "INSERT INTO users (name, email, role, monthly_income, currency, phone_number,
                            mtn_momo_number, airtel_money_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.name,
            user.email,
            user.role.as_str(),
            user.monthly_income,
            user.currency,
            user.phone_number,
            user.mtn_momo_number,
            user.airtel_money_number,
            user.created_at,
        ],
    );
    if let Err(e) = result {
        let err = anyhow::Error::from(e);
        if is_constraint_violation(&err) {
            return Err(
                ValidationFailed(vec![FieldError::new("email", "has already been taken")]).into(),
            );
        }
        return Err(err);
    }
    user.id = conn.last_insert_rowid();

    subscription::create_free(conn, user.id, now)?;
    tracing::info!(user_id = user.id, "user registered");
    Ok(user)
}

pub fn find_optional(conn: &Connection, id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", COLUMNS),
            [id],
            from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find(conn: &Connection, id: i64) -> Result<User> {
    find_optional(conn, id)?.ok_or_else(|| NotFound::new("User").into())
}

pub fn list(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY id", COLUMNS))?;
    let users = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn update(conn: &Connection, user: &mut User, params: UserParams) -> Result<()> {
    let mut updated = user.clone();
    updated.apply(params);

    let mut errors = updated.validate();
    if errors.is_empty() && email_taken(conn, &updated.email, updated.id)? {
        errors.push(FieldError::new("email", "has already been taken"));
    }
    if !errors.is_empty() {
        return Err(ValidationFailed(errors).into());
    }

    conn.execute(
        "UPDATE users SET name = ?1, email = ?2, monthly_income = ?3, currency = ?4,
                phone_number = ?5, mtn_momo_number = ?6, airtel_money_number = ?7
         WHERE id = ?8",
        params![
            updated.name,
            updated.email,
            updated.monthly_income,
            updated.currency,
            updated.phone_number,
            updated.mtn_momo_number,
            updated.airtel_money_number,
            updated.id,
        ],
    )?;
    *user = updated;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    let removed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    if removed == 0 {
        return Err(NotFound::new("User").into());
    }
    Ok(())
}

// ============================================================================
// FINANCIAL ACCESSORS
// ============================================================================

/// Sum of monthly payments over active debts that have one
pub fn total_debt_payments(conn: &Connection, user_id: i64) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(monthly_payment), 0) FROM debts
         WHERE user_id = ?1 AND status = 'active' AND monthly_payment IS NOT NULL",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn debt_to_income_ratio(conn: &Connection, user: &User) -> Result<f64> {
    Ok(user.debt_to_income_for(total_debt_payments(conn, user.id)?))
}

pub fn is_over_indebted(conn: &Connection, user: &User) -> Result<bool> {
    Ok(debt_to_income_ratio(conn, user)? > DEBT_TO_INCOME_THRESHOLD)
}

/// Total spent with a payment date inside the range
pub fn total_spending(conn: &Connection, user_id: i64, range: DateRange) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE user_id = ?1 AND date(created_at) BETWEEN ?2 AND ?3",
        params![user_id, range.start, range.end],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Spending inside the range, keyed by category name
pub fn spending_by_category(
    conn: &Connection,
    user_id: i64,
    range: DateRange,
) -> Result<BTreeMap<String, f64>> {
    let mut stmt = conn.prepare(
        "SELECT c.name, SUM(p.amount) FROM payments p
         JOIN categories c ON c.id = p.category_id
         WHERE p.user_id = ?1 AND date(p.created_at) BETWEEN ?2 AND ?3
         GROUP BY c.name",
    )?;
    let rows = stmt
        .query_map(params![user_id, range.start, range.end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

/// Average daily spending over the last `days` days
pub fn burn_rate(conn: &Connection, user_id: i64, days: u32, today: NaiveDate) -> Result<f64> {
    if days == 0 {
        return Ok(0.0);
    }
    let start = today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    let total = total_spending(conn, user_id, DateRange::new(start, today))?;
    Ok(total / f64::from(days))
}

/// Income left at month end if the month-to-date burn rate continues
pub fn projected_month_end_balance(conn: &Connection, user: &User, today: NaiveDate) -> Result<f64> {
    let Some(income) = user.monthly_income else {
        return Ok(0.0);
    };
    let days_elapsed = today.day();
    if days_elapsed == 0 {
        return Ok(0.0);
    }
    let daily_burn = burn_rate(conn, user.id, days_elapsed, today)?;
    Ok(income - daily_burn * f64::from(period::days_in_month(today)))
}

// ============================================================================
// PLAN LIMITS
// ============================================================================

/// Category quota (`None` = unlimited)
pub fn max_categories(conn: &Connection, user: &User) -> Result<Option<usize>> {
    if user.is_admin() {
        return Ok(None);
    }
    let features = subscription::find_for_user(conn, user.id)?
        .map(|s| s.features)
        .unwrap_or_else(|| Plan::Free.features());
    Ok(quota(features.max_categories))
}

/// Budget quota (`None` = unlimited)
pub fn max_budgets(conn: &Connection, user: &User) -> Result<Option<usize>> {
    if user.is_admin() {
        return Ok(None);
    }
    let features = subscription::find_for_user(conn, user.id)?
        .map(|s| s.features)
        .unwrap_or_else(|| Plan::Free.features());
    Ok(quota(features.max_budgets))
}

pub fn can_access_feature(conn: &Connection, user: &User, feature: &str) -> Result<bool> {
    if user.is_admin() {
        return Ok(true);
    }
    Ok(subscription::find_for_user(conn, user.id)?
        .map_or(false, |s| s.can_access_feature(feature, period::now())))
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

    fn params(name: &str, email: &str, income: Option<f64>) -> UserParams {
        UserParams {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            monthly_income: income,
            ..Default::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn add_payment(conn: &Connection, user_id: i64, category_id: i64, amount: f64, day: &str) {
        conn.execute(
            "INSERT INTO payments (user_id, category_id, name, amount, created_at)
             VALUES (?1, ?2, 'Item', ?3, ?4)",
            params![user_id, category_id, amount, format!("{} 10:00:00", day)],
        )
        .unwrap();
    }

    fn add_category(conn: &Connection, user_id: i64, name: &str) -> i64 {
        conn.execute(
            "INSERT INTO categories (user_id, name, icon, created_at) VALUES (?1, ?2, 'x', '2026-01-01 00:00:00')",
            params![user_id, name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_create_validates_and_subscribes() {
        let conn = setup();
        let user = create(&conn, params("Mwila", "Mwila@Example.com", Some(8000.0)), Role::Default)
            .unwrap();
        assert_eq!(user.email, "mwila@example.com");
        assert!(subscription::find_for_user(&conn, user.id).unwrap().is_some());

        let err = create(&conn, params("M", "mwila@example.com", Some(-1.0)), Role::Default)
            .unwrap_err();
        let failed = err.downcast::<ValidationFailed>().unwrap();
        let fields: Vec<_> = failed.0.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"monthly_income"));
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let conn = setup();
        create(&conn, params("Mwila", "a@b.zm", None), Role::Default).unwrap();
        let err = create(&conn, params("Other", "a@b.zm", None), Role::Default).unwrap_err();
        let failed = err.downcast::<ValidationFailed>().unwrap();
        assert_eq!(failed.0[0].message, "has already been taken");
    }

    #[test]
    fn test_phone_format() {
        let mut user = User {
            id: 0,
            name: "Chanda".into(),
            email: "c@zm.com".into(),
            role: Role::Default,
            monthly_income: None,
            currency: "ZMW".into(),
            phone_number: Some("+260971234567".into()),
            mtn_momo_number: None,
            airtel_money_number: None,
            created_at: period::now(),
        };
        assert!(user.validate().is_empty());
        user.phone_number = Some("0971234567".into());
        assert_eq!(user.validate()[0].field, "phone_number");
    }

    #[test]
    fn test_debt_to_income_ratio() {
        let conn = setup();
        let user = create(&conn, params("Mwila", "m@zm.com", Some(5000.0)), Role::Default).unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO debts (user_id, lender_name, principal_amount, monthly_payment, status, created_at)
             VALUES ({id}, 'Bank', 10000, 1500, 'active', '2026-01-01 00:00:00'),
                    ({id}, 'Shop', 2000, 700, 'active', '2026-01-01 00:00:00'),
                    ({id}, 'Old', 2000, 900, 'paid_off', '2026-01-01 00:00:00'),
                    ({id}, 'Friend', 500, NULL, 'active', '2026-01-01 00:00:00');",
            id = user.id
        ))
        .unwrap();

        assert_eq!(total_debt_payments(&conn, user.id).unwrap(), 2200.0);
        assert_eq!(debt_to_income_ratio(&conn, &user).unwrap(), 44.0);
        assert!(is_over_indebted(&conn, &user).unwrap());

        let mut no_income = user.clone();
        no_income.monthly_income = None;
        assert_eq!(debt_to_income_ratio(&conn, &no_income).unwrap(), 0.0);
    }

    #[test]
    fn test_spending_aggregates() {
        let conn = setup();
        let user = create(&conn, params("Mwila", "m@zm.com", Some(9000.0)), Role::Default).unwrap();
        let food = add_category(&conn, user.id, "Food");
        let rent = add_category(&conn, user.id, "Rent");
        add_payment(&conn, user.id, food, 100.0, "2026-03-02");
        add_payment(&conn, user.id, food, 50.0, "2026-03-09");
        add_payment(&conn, user.id, rent, 3000.0, "2026-03-01");
        add_payment(&conn, user.id, rent, 3000.0, "2026-02-01");

        let march = DateRange::month_of(date(2026, 3, 15));
        assert_eq!(total_spending(&conn, user.id, march).unwrap(), 3150.0);

        let by_category = spending_by_category(&conn, user.id, march).unwrap();
        assert_eq!(by_category["Food"], 150.0);
        assert_eq!(by_category["Rent"], 3000.0);

        // 7-day window ending on the 9th covers the 2nd and the 9th
        assert_eq!(burn_rate(&conn, user.id, 7, date(2026, 3, 9)).unwrap(), 150.0 / 7.0);
        assert_eq!(burn_rate(&conn, user.id, 0, date(2026, 3, 9)).unwrap(), 0.0);

        // 10 days elapsed: window 2026-02-28..2026-03-10 holds 3150 => 315/day over 31 days
        let projected = projected_month_end_balance(&conn, &user, date(2026, 3, 10)).unwrap();
        assert!((projected - (9000.0 - 315.0 * 31.0)).abs() < 1e-9);
    }

    #[test]
    fn test_plan_limits() {
        let conn = setup();
        let user = create(&conn, params("Mwila", "m@zm.com", None), Role::Default).unwrap();
        assert_eq!(max_categories(&conn, &user).unwrap(), Some(10));
        assert_eq!(max_budgets(&conn, &user).unwrap(), Some(5));
        assert!(!can_access_feature(&conn, &user, "export_reports").unwrap());

        let admin = create(&conn, params("Admin", "admin@zm.com", None), Role::Admin).unwrap();
        assert_eq!(max_categories(&conn, &admin).unwrap(), None);
        assert!(can_access_feature(&conn, &admin, "ai_insights").unwrap());
    }
}
