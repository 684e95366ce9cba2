// 🔁 Recurring transaction - a payment template that repeats on a schedule
//
// Processing turns a due template into a real payment and advances the
// schedule by one period. Both writes happen in one IMMEDIATE transaction
// that re-reads the row, so two concurrent runs cannot book the same
// occurrence twice.

use crate::db::{enum_column, record_event, Event};
use crate::entities::payment::{self, Payment, PaymentMethod};
use crate::error::{NotFound, ValidationFailed};
use crate::period;
use crate::validation::{parse_choice, Validator};
use anyhow::{Context, Result};
use chrono::{Days, Months, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FREQUENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Yearly => "yearly",
        }
    }

    pub fn parse(raw: &str) -> Option<Frequency> {
        match raw {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "biweekly" => Some(Frequency::Biweekly),
            "monthly" => Some(Frequency::Monthly),
            "quarterly" => Some(Frequency::Quarterly),
            "yearly" => Some(Frequency::Yearly),
            _ => None,
        }
    }

    /// One period after `date`; month arithmetic clamps to the month's last day
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => date.checked_add_days(Days::new(1)),
            Frequency::Weekly => date.checked_add_days(Days::new(7)),
            Frequency::Biweekly => date.checked_add_days(Days::new(14)),
            Frequency::Monthly => date.checked_add_months(Months::new(1)),
            Frequency::Quarterly => date.checked_add_months(Months::new(3)),
            Frequency::Yearly => date.checked_add_months(Months::new(12)),
        }
    }

    pub fn in_days(&self) -> u32 {
        match self {
            Frequency::Daily => 1,
            Frequency::Weekly => 7,
            Frequency::Biweekly => 14,
            Frequency::Monthly => 30,
            Frequency::Quarterly => 90,
            Frequency::Yearly => 365,
        }
    }

    /// Approximate monthly cost of an amount paid at this frequency
    pub fn monthly_impact(&self, amount: f64) -> f64 {
        match self {
            Frequency::Daily => amount * 30.0,
            Frequency::Weekly => amount * 4.33,
            Frequency::Biweekly => amount * 2.17,
            Frequency::Monthly => amount,
            Frequency::Quarterly => amount / 3.0,
            Frequency::Yearly => amount / 12.0,
        }
    }

    pub fn human_readable(&self) -> &'static str {
        match self {
            Frequency::Daily => "Every day",
            Frequency::Weekly => "Every week",
            Frequency::Biweekly => "Every two weeks",
            Frequency::Monthly => "Every month",
            Frequency::Quarterly => "Every 3 months",
            Frequency::Yearly => "Every year",
        }
    }
}

// ============================================================================
// RECURRING TRANSACTION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTransaction {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: f64,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub next_occurrence: Option<NaiveDate>,
    pub last_occurrence: Option<NaiveDate>,
    pub active: bool,
    pub payment_method: Option<PaymentMethod>,
    pub is_essential: bool,
    pub notes: Option<String>,
    pub occurrences_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecurringParams {
    pub name: Option<String>,
    pub amount: Option<f64>,
    pub frequency: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category_id: Option<i64>,
    pub payment_method: Option<String>,
    pub is_essential: Option<bool>,
    pub notes: Option<String>,
    pub active: Option<bool>,
}

impl RecurringTransaction {
    /// The occurrence after the current one; none while paused
    pub fn calculate_next_occurrence(&self) -> Option<NaiveDate> {
        if !self.active {
            return None;
        }
        self.frequency
            .advance(self.next_occurrence.unwrap_or(self.start_date))
    }

    pub fn estimated_monthly_impact(&self) -> f64 {
        self.frequency.monthly_impact(self.amount)
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.active && self.next_occurrence.map_or(false, |next| next <= today)
    }

    fn apply(&mut self, params: RecurringParams, v: &mut Validator) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if let Some(amount) = params.amount {
            self.amount = amount;
        }
        if let Some(raw) = params.frequency {
            if let Some(frequency) = parse_choice(v, "frequency", &raw, Frequency::parse) {
                self.frequency = frequency;
            }
        }
        if let Some(raw) = params.start_date {
            match period::parse_date(&raw) {
                Some(date) => self.start_date = date,
                None => v.add("start_date", "can't be blank"),
            }
        }
        if let Some(raw) = params.end_date {
            if raw.trim().is_empty() {
                self.end_date = None;
            } else {
                match period::parse_date(&raw) {
                    Some(date) => self.end_date = Some(date),
                    None => v.add("end_date", "is not a valid date"),
                }
            }
        }
        if let Some(category_id) = params.category_id {
            self.category_id = category_id;
        }
        if let Some(raw) = params.payment_method {
            self.payment_method = if raw.trim().is_empty() {
                None
            } else {
                parse_choice(v, "payment_method", &raw, PaymentMethod::parse)
            };
        }
        if let Some(essential) = params.is_essential {
            self.is_essential = essential;
        }
        if params.notes.is_some() {
            self.notes = params.notes;
        }
        if let Some(active) = params.active {
            self.active = active;
        }
    }

    fn validate(&self, conn: &Connection, v: &mut Validator) -> Result<()> {
        v.presence("name", &self.name);
        v.greater_than("amount", self.amount, 0.0);
        if let Some(end) = self.end_date {
            if end < self.start_date {
                v.add("end_date", "must be after start date");
            }
        }
        let owner: Option<i64> = conn
            .query_row(
                "SELECT user_id FROM categories WHERE id = ?1",
                [self.category_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner != Some(self.user_id) {
            v.add("category", "must belong to you");
        }
        Ok(())
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, user_id, category_id, name, amount, frequency, start_date, end_date, \
                       next_occurrence, last_occurrence, active, payment_method, is_essential, notes, \
                       occurrences_count, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<RecurringTransaction> {
    let method: Option<String> = row.get(11)?;
    Ok(RecurringTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        amount: row.get(4)?,
        frequency: enum_column(5, row.get(5)?, Frequency::parse)?,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        next_occurrence: row.get(8)?,
        last_occurrence: row.get(9)?,
        active: row.get(10)?,
        payment_method: method
            .map(|raw| enum_column(11, raw, PaymentMethod::parse))
            .transpose()?,
        is_essential: row.get(12)?,
        notes: row.get(13)?,
        occurrences_count: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

pub fn create(conn: &Connection, user_id: i64, params: RecurringParams) -> Result<RecurringTransaction> {
    let mut v = Validator::new();
    v.required("frequency", params.frequency.as_ref());
    v.required("start_date", params.start_date.as_ref());
    v.required("category", params.category_id);

    let now = period::now();
    let mut recurring = RecurringTransaction {
        id: 0,
        user_id,
        category_id: 0,
        name: String::new(),
        amount: 0.0,
        frequency: Frequency::Monthly,
        start_date: now.date(),
        end_date: None,
        next_occurrence: None,
        last_occurrence: None,
        active: true,
        payment_method: None,
        is_essential: true,
        notes: None,
        occurrences_count: 0,
        created_at: now,
        updated_at: now,
    };
    recurring.apply(params, &mut v);
    if v.is_empty() {
        recurring.validate(conn, &mut v)?;
    }
    v.finish().map_err(ValidationFailed)?;
    recurring.next_occurrence = Some(recurring.start_date);

    conn.execute(
        "INSERT INTO recurring_transactions (user_id, category_id, name, amount, frequency,
                start_date, end_date, next_occurrence, last_occurrence, active, payment_method,
                is_essential, notes, occurrences_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            recurring.user_id,
            recurring.category_id,
            recurring.name,
            recurring.amount,
            recurring.frequency.as_str(),
            recurring.start_date,
            recurring.end_date,
            recurring.next_occurrence,
            recurring.last_occurrence,
            recurring.active,
            recurring.payment_method.map(|m| m.as_str()),
            recurring.is_essential,
            recurring.notes,
            recurring.occurrences_count,
            recurring.created_at,
            recurring.updated_at,
        ],
    )
    .context("Failed to insert recurring transaction")?;
    recurring.id = conn.last_insert_rowid();
    Ok(recurring)
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<RecurringTransaction> {
    conn.query_row(
        &format!(
            "SELECT {} FROM recurring_transactions WHERE id = ?1 AND user_id = ?2",
            COLUMNS
        ),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Recurring transaction").into())
}

fn save(conn: &Connection, recurring: &RecurringTransaction) -> Result<()> {
    conn.execute(
        "UPDATE recurring_transactions SET category_id = ?1, name = ?2, amount = ?3,
                frequency = ?4, start_date = ?5, end_date = ?6, next_occurrence = ?7,
                last_occurrence = ?8, active = ?9, payment_method = ?10, is_essential = ?11,
                notes = ?12, occurrences_count = ?13, updated_at = ?14
         WHERE id = ?15",
        params![
            recurring.category_id,
            recurring.name,
            recurring.amount,
            recurring.frequency.as_str(),
            recurring.start_date,
            recurring.end_date,
            recurring.next_occurrence,
            recurring.last_occurrence,
            recurring.active,
            recurring.payment_method.map(|m| m.as_str()),
            recurring.is_essential,
            recurring.notes,
            recurring.occurrences_count,
            recurring.updated_at,
            recurring.id,
        ],
    )?;
    Ok(())
}

pub fn update(
    conn: &Connection,
    recurring: &mut RecurringTransaction,
    params: RecurringParams,
) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = recurring.clone();
    updated.apply(params, &mut v);
    updated.validate(conn, &mut v)?;
    v.finish().map_err(ValidationFailed)?;

    if updated.next_occurrence.is_none() {
        updated.next_occurrence = Some(updated.start_date);
    }
    updated.updated_at = period::now();
    save(conn, &updated)?;
    *recurring = updated;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM recurring_transactions WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Recurring transaction").into());
    }
    Ok(())
}

/// Pause or resume; returns the new state
pub fn toggle_active(conn: &Connection, recurring: &mut RecurringTransaction) -> Result<bool> {
    recurring.active = !recurring.active;
    if recurring.active && recurring.next_occurrence.is_none() {
        recurring.next_occurrence = Some(recurring.start_date);
    }
    recurring.updated_at = period::now();
    save(conn, recurring)?;
    Ok(recurring.active)
}

fn list_where(
    conn: &Connection,
    clause: &str,
    order: &str,
    values: &[&dyn rusqlite::ToSql],
) -> Result<Vec<RecurringTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recurring_transactions WHERE {} ORDER BY {}",
        COLUMNS, clause, order
    ))?;
    let rows = stmt
        .query_map(values, from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Active templates, soonest first
pub fn list_active(conn: &Connection, user_id: i64) -> Result<Vec<RecurringTransaction>> {
    list_where(
        conn,
        "user_id = ?1 AND active = 1",
        "next_occurrence ASC, id ASC",
        &[&user_id],
    )
}

/// Paused templates, most recently changed first
pub fn list_inactive(conn: &Connection, user_id: i64) -> Result<Vec<RecurringTransaction>> {
    list_where(
        conn,
        "user_id = ?1 AND active = 0",
        "updated_at DESC, id DESC",
        &[&user_id],
    )
}

/// Active templates due within `days` of today, soonest first
pub fn upcoming(
    conn: &Connection,
    user_id: i64,
    today: NaiveDate,
    days: u64,
    limit: usize,
) -> Result<Vec<RecurringTransaction>> {
    let horizon = today.checked_add_days(Days::new(days)).unwrap_or(today);
    let mut rows = list_where(
        conn,
        "user_id = ?1 AND active = 1 AND next_occurrence <= ?2",
        "next_occurrence ASC, id ASC",
        &[&user_id, &horizon],
    )?;
    rows.truncate(limit);
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringSummary {
    pub active_transactions: Vec<RecurringTransaction>,
    pub inactive_transactions: Vec<RecurringTransaction>,
    pub monthly_impact: f64,
    pub transactions_by_frequency: BTreeMap<Frequency, Vec<RecurringTransaction>>,
}

pub fn summary(conn: &Connection, user_id: i64) -> Result<RecurringSummary> {
    let active_transactions = list_active(conn, user_id)?;
    let inactive_transactions = list_inactive(conn, user_id)?;
    let monthly_impact = active_transactions
        .iter()
        .map(|r| r.estimated_monthly_impact())
        .sum();
    let mut transactions_by_frequency: BTreeMap<Frequency, Vec<RecurringTransaction>> =
        BTreeMap::new();
    for recurring in &active_transactions {
        transactions_by_frequency
            .entry(recurring.frequency)
            .or_default()
            .push(recurring.clone());
    }
    Ok(RecurringSummary {
        active_transactions,
        inactive_transactions,
        monthly_impact,
        transactions_by_frequency,
    })
}

/// Newest ten payments in the same category whose name contains the template's name
pub fn payment_history(conn: &Connection, recurring: &RecurringTransaction) -> Result<Vec<Payment>> {
    payment::list_matching(
        conn,
        recurring.user_id,
        recurring.category_id,
        Some(&recurring.name),
        None,
        10,
    )
}

// ============================================================================
// PROCESSING
// ============================================================================

/// Book one occurrence if the template is due; returns the payment created
pub fn process_transaction(conn: &Connection, id: i64, today: NaiveDate) -> Result<Option<Payment>> {
    // IMMEDIATE takes the write lock up front; the re-read below sees the committed state
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .context("Failed to start recurring transaction processing")?;

    let current = tx
        .query_row(
            &format!("SELECT {} FROM recurring_transactions WHERE id = ?1", COLUMNS),
            [id],
            from_row,
        )
        .optional()?;
    let Some(mut recurring) = current else {
        return Ok(None);
    };
    if !recurring.is_due(today) {
        return Ok(None);
    }

    let now = period::now();
    let mut booked = Payment {
        id: 0,
        user_id: recurring.user_id,
        category_id: recurring.category_id,
        name: recurring.name.clone(),
        amount: recurring.amount,
        payment_method: recurring.payment_method,
        transaction_reference: None,
        is_essential: recurring.is_essential,
        notes: Some(format!(
            "Auto-generated from recurring transaction: {}",
            recurring.name
        )),
        created_at: today.and_time(now.time()),
    };
    booked.id = payment::insert(&tx, &booked)?;

    let next = recurring.calculate_next_occurrence();
    recurring.last_occurrence = Some(today);
    recurring.next_occurrence = next;
    recurring.occurrences_count += 1;
    recurring.updated_at = now;
    if let (Some(next), Some(end)) = (next, recurring.end_date) {
        if next > end {
            recurring.active = false;
        }
    }
    save(&tx, &recurring)?;

    record_event(
        &tx,
        Event::new(
            "recurring_processed",
            "recurring_transaction",
            &recurring.id.to_string(),
            serde_json::json!({
                "payment_id": booked.id,
                "amount": booked.amount,
                "next_occurrence": recurring.next_occurrence,
                "active": recurring.active,
            }),
            "recurring_processor",
        ),
    );
    tx.commit()?;

    tracing::debug!(
        recurring_id = recurring.id,
        payment_id = booked.id,
        "recurring transaction processed"
    );
    Ok(Some(booked))
}

fn due_ids(conn: &Connection, user_id: Option<i64>, today: NaiveDate) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM recurring_transactions
         WHERE active = 1 AND next_occurrence <= ?1 AND (?2 IS NULL OR user_id = ?2)
         ORDER BY next_occurrence, id",
    )?;
    let ids = stmt
        .query_map(params![today, user_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Process every due template of one user; returns how many were booked
pub fn process_due(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<usize> {
    process_ids(conn, due_ids(conn, Some(user_id), today)?, today)
}

/// Process every due template across all users
pub fn process_all_due(conn: &Connection, today: NaiveDate) -> Result<usize> {
    process_ids(conn, due_ids(conn, None, today)?, today)
}

fn process_ids(conn: &Connection, ids: Vec<i64>, today: NaiveDate) -> Result<usize> {
    let mut processed = 0;
    for id in ids {
        if process_transaction(conn, id, today)?.is_some() {
            processed += 1;
        }
    }
    Ok(processed)
}
