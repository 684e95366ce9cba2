// 💸 Payment - one spending record inside a category

use crate::db::enum_column;
use crate::entities::category::Category;
use crate::error::{NotFound, ValidationFailed};
use crate::period;
use crate::validation::{parse_choice, Validator};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub const MAX_AMOUNT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MtnMomo,
    AirtelMoney,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MtnMomo => "mtn_momo",
            PaymentMethod::AirtelMoney => "airtel_money",
            PaymentMethod::Bank => "bank",
        }
    }

    pub fn parse(raw: &str) -> Option<PaymentMethod> {
        match raw {
            "cash" => Some(PaymentMethod::Cash),
            "mtn_momo" => Some(PaymentMethod::MtnMomo),
            "airtel_money" => Some(PaymentMethod::AirtelMoney),
            "bank" => Some(PaymentMethod::Bank),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: f64,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_reference: Option<String>,
    pub is_essential: bool,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentParams {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub payment_method: Option<String>,
    pub transaction_reference: Option<String>,
    pub is_essential: Option<bool>,
    pub notes: Option<String>,
    /// Back-dated entries: a date or timestamp
    pub created_at: Option<String>,
}

impl Payment {
    fn apply(&mut self, params: PaymentParams, v: &mut Validator) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if let Some(amount) = params.amount {
            self.amount = amount;
        }
        if let Some(raw) = params.payment_method {
            self.payment_method = if raw.trim().is_empty() {
                None
            } else {
                parse_choice(v, "payment_method", &raw, PaymentMethod::parse)
            };
        }
        if params.transaction_reference.is_some() {
            self.transaction_reference = params.transaction_reference;
        }
        if let Some(essential) = params.is_essential {
            self.is_essential = essential;
        }
        if params.notes.is_some() {
            self.notes = params.notes;
        }
        if let Some(raw) = params.created_at {
            match period::parse_timestamp(&raw) {
                Some(at) => self.created_at = at,
                None => v.add("created_at", "is not a valid date"),
            }
        }
    }

    fn validate(&self, v: &mut Validator) {
        v.presence("name", &self.name);
        v.max_length("name", &self.name, 50);
        v.greater_than("amount", self.amount, 0.0);
        v.less_than("amount", self.amount, MAX_AMOUNT);
    }

    pub fn date(&self) -> NaiveDate {
        self.created_at.date()
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, user_id, category_id, name, amount, payment_method, \
                       transaction_reference, is_essential, notes, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let method: Option<String> = row.get(5)?;
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        amount: row.get(4)?,
        payment_method: method
            .map(|raw| enum_column(5, raw, PaymentMethod::parse))
            .transpose()?,
        transaction_reference: row.get(6)?,
        is_essential: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Insert an already-validated payment and return its id
pub fn insert(conn: &Connection, payment: &Payment) -> Result<i64> {
    conn.execute(
        "INSERT INTO payments (user_id, category_id, name, amount, payment_method,
                               transaction_reference, is_essential, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            payment.user_id,
            payment.category_id,
            payment.name,
            payment.amount,
            payment.payment_method.map(|m| m.as_str()),
            payment.transaction_reference,
            payment.is_essential,
            payment.notes,
            payment.created_at,
        ],
    )
    .context("Failed to insert payment")?;
    Ok(conn.last_insert_rowid())
}

pub fn create(
    conn: &Connection,
    user_id: i64,
    category: &Category,
    params: PaymentParams,
) -> Result<Payment> {
    let mut v = Validator::new();
    let mut payment = Payment {
        id: 0,
        user_id,
        category_id: category.id,
        name: String::new(),
        amount: 0.0,
        payment_method: None,
        transaction_reference: None,
        is_essential: true,
        notes: None,
        created_at: period::now(),
    };
    payment.apply(params, &mut v);
    payment.validate(&mut v);
    if category.user_id != user_id {
        v.add("category", "must belong to you");
    }
    v.finish().map_err(ValidationFailed)?;

    payment.id = insert(conn, &payment)?;
    Ok(payment)
}

pub fn find(conn: &Connection, user_id: i64, category_id: i64, id: i64) -> Result<Payment> {
    conn.query_row(
        &format!(
            "SELECT {} FROM payments WHERE id = ?1 AND category_id = ?2 AND user_id = ?3",
            COLUMNS
        ),
        params![id, category_id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Payment").into())
}

/// Payments of one category, newest first
pub fn list_for_category(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
    limit: Option<usize>,
) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments WHERE user_id = ?1 AND category_id = ?2
         ORDER BY created_at DESC, id DESC LIMIT ?3",
        COLUMNS
    ))?;
    let limit = limit.map_or(-1, |l| l as i64);
    let payments = stmt
        .query_map(params![user_id, category_id, limit], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

pub fn update(conn: &Connection, payment: &mut Payment, params: PaymentParams) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = payment.clone();
    updated.apply(params, &mut v);
    updated.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "UPDATE payments SET name = ?1, amount = ?2, payment_method = ?3, transaction_reference = ?4,
                is_essential = ?5, notes = ?6, created_at = ?7
         WHERE id = ?8 AND user_id = ?9",
        params![
            updated.name,
            updated.amount,
            updated.payment_method.map(|m| m.as_str()),
            updated.transaction_reference,
            updated.is_essential,
            updated.notes,
            updated.created_at,
            updated.id,
            updated.user_id,
        ],
    )?;
    *payment = updated;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, category_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM payments WHERE id = ?1 AND category_id = ?2 AND user_id = ?3",
        params![id, category_id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Payment").into());
    }
    Ok(())
}

pub fn find_by_reference(
    conn: &Connection,
    user_id: i64,
    reference: &str,
) -> Result<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!(
                "SELECT {} FROM payments WHERE user_id = ?1 AND transaction_reference = ?2",
                COLUMNS
            ),
            params![user_id, reference],
            from_row,
        )
        .optional()?;
    Ok(payment)
}

/// A payment entered on `day` with the same name and amount in the category
pub fn find_same_entry(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
    name: &str,
    amount: f64,
    day: NaiveDate,
) -> Result<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!(
                "SELECT {} FROM payments
                 WHERE user_id = ?1 AND category_id = ?2 AND name = ?3
                   AND amount = ?4 AND date(created_at) = ?5
                 ORDER BY id LIMIT 1",
                COLUMNS
            ),
            params![user_id, category_id, name, amount, day],
            from_row,
        )
        .optional()?;
    Ok(payment)
}

// ============================================================================
// SCOPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scope {
    /// Everything, newest first
    Recent,
    /// Created on or after the first of `today`'s month
    ThisMonth(NaiveDate),
    Essential,
    Discretionary,
    ByMethod(PaymentMethod),
    /// Inclusive range of creation dates
    Between(NaiveDate, NaiveDate),
}

impl Scope {
    fn clause(&self) -> (&'static str, Vec<Value>) {
        match self {
            Scope::Recent => ("1 = 1", vec![]),
            Scope::ThisMonth(today) => (
                "date(created_at) >= ?2",
                vec![Value::Text(period::month_start(*today).to_string())],
            ),
            Scope::Essential => ("is_essential = 1", vec![]),
            Scope::Discretionary => ("is_essential = 0", vec![]),
            Scope::ByMethod(method) => {
                ("payment_method = ?2", vec![Value::Text(method.as_str().to_string())])
            }
            Scope::Between(start, end) => (
                "date(created_at) BETWEEN ?2 AND ?3",
                vec![Value::Text(start.to_string()), Value::Text(end.to_string())],
            ),
        }
    }
}

/// A user's payments across all categories, newest first
pub fn list_for_user(
    conn: &Connection,
    user_id: i64,
    scope: Scope,
    limit: Option<usize>,
) -> Result<Vec<Payment>> {
    let (clause, extra) = scope.clause();
    let mut values = vec![Value::Integer(user_id)];
    values.extend(extra);
    let sql = format!(
        "SELECT {} FROM payments WHERE user_id = ?1 AND {} ORDER BY created_at DESC, id DESC LIMIT {}",
        COLUMNS,
        clause,
        limit.map_or(-1, |l| l as i64)
    );
    let mut stmt = conn.prepare(&sql)?;
    let payments = stmt
        .query_map(params_from_iter(values), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

/// Payments of one category since a date whose name contains `pattern` (case-insensitive)
pub fn list_matching(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
    pattern: Option<&str>,
    since: Option<NaiveDate>,
    limit: usize,
) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments
         WHERE user_id = ?1 AND category_id = ?2
           AND (?3 IS NULL OR LOWER(name) LIKE '%' || LOWER(?3) || '%' ESCAPE '\\')
           AND (?4 IS NULL OR date(created_at) >= ?4)
         ORDER BY created_at DESC, id DESC LIMIT ?5",
        COLUMNS
    ))?;
    let pattern = pattern.map(escape_like);
    let payments = stmt
        .query_map(
            params![user_id, category_id, pattern, since, limit as i64],
            from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub fn total(payments: &[Payment]) -> f64 {
    payments.iter().map(|p| p.amount).sum()
}
