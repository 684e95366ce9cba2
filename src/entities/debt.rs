// 🧾 Debt - money owed to a lender

use crate::db::enum_column;
use crate::entities::user::User;
use crate::error::{NotFound, ValidationFailed};
use crate::period;
use crate::validation::{parse_choice, Validator};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebtStatus {
    Active,
    PaidOff,
}

impl DebtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebtStatus::Active => "active",
            DebtStatus::PaidOff => "paid_off",
        }
    }

    pub fn parse(raw: &str) -> Option<DebtStatus> {
        match raw {
            "active" => Some(DebtStatus::Active),
            "paid_off" => Some(DebtStatus::PaidOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    pub id: i64,
    pub user_id: i64,
    pub lender_name: String,
    pub principal_amount: f64,
    pub interest_rate: Option<f64>,
    pub monthly_payment: Option<f64>,
    /// Months
    pub term: Option<i64>,
    pub status: DebtStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebtParams {
    pub lender_name: Option<String>,
    pub principal_amount: Option<f64>,
    pub interest_rate: Option<f64>,
    pub monthly_payment: Option<f64>,
    pub term: Option<i64>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl Debt {
    fn apply(&mut self, params: DebtParams, v: &mut Validator) {
        if let Some(lender) = params.lender_name {
            self.lender_name = lender.trim().to_string();
        }
        if let Some(principal) = params.principal_amount {
            self.principal_amount = principal;
        }
        if params.interest_rate.is_some() {
            self.interest_rate = params.interest_rate;
        }
        if params.monthly_payment.is_some() {
            self.monthly_payment = params.monthly_payment;
        }
        if params.term.is_some() {
            self.term = params.term;
        }
        if let Some(raw) = params.status {
            if let Some(status) = parse_choice(v, "status", &raw, DebtStatus::parse) {
                self.status = status;
            }
        }
        for (field, raw, target) in [
            ("start_date", params.start_date, &mut self.start_date),
            ("end_date", params.end_date, &mut self.end_date),
        ] {
            let Some(raw) = raw else { continue };
            if raw.trim().is_empty() {
                *target = None;
            } else {
                match period::parse_date(&raw) {
                    Some(date) => *target = Some(date),
                    None => v.add(field, "is not a valid date"),
                }
            }
        }
    }

    fn validate(&self, v: &mut Validator) {
        v.presence("lender_name", &self.lender_name);
        v.greater_than("principal_amount", self.principal_amount, 0.0);
        if let Some(rate) = self.interest_rate {
            v.at_least("interest_rate", rate, 0.0);
        }
        if let Some(payment) = self.monthly_payment {
            v.greater_than("monthly_payment", payment, 0.0);
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DebtStatus::Active
    }

    /// Principal is tracked as the outstanding balance
    pub fn remaining_balance(&self) -> f64 {
        self.principal_amount
    }

    /// Payments over the loan's life minus the principal, with 30-day months
    pub fn total_interest_cost(&self) -> f64 {
        let (Some(payment), Some(start), Some(end)) =
            (self.monthly_payment, self.start_date, self.end_date)
        else {
            return 0.0;
        };
        let months = (end - start).num_days() / 30;
        payment * months as f64 - self.principal_amount
    }

    /// This debt's monthly payment as a share of the owner's income
    pub fn debt_to_income_ratio(&self, owner: &User) -> f64 {
        owner.debt_to_income_for(self.monthly_payment.unwrap_or(0.0))
    }
}

const COLUMNS: &str = "id, user_id, lender_name, principal_amount, interest_rate, monthly_payment, \
                       term, status, start_date, end_date, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Debt> {
    Ok(Debt {
        id: row.get(0)?,
        user_id: row.get(1)?,
        lender_name: row.get(2)?,
        principal_amount: row.get(3)?,
        interest_rate: row.get(4)?,
        monthly_payment: row.get(5)?,
        term: row.get(6)?,
        status: enum_column(7, row.get(7)?, DebtStatus::parse)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub fn create(conn: &Connection, user_id: i64, params: DebtParams) -> Result<Debt> {
    let mut v = Validator::new();
    let mut debt = Debt {
        id: 0,
        user_id,
        lender_name: String::new(),
        principal_amount: 0.0,
        interest_rate: None,
        monthly_payment: None,
        term: None,
        status: DebtStatus::Active,
        start_date: None,
        end_date: None,
        created_at: period::now(),
    };
    debt.apply(params, &mut v);
    debt.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "INSERT INTO debts (user_id, lender_name, principal_amount, interest_rate, monthly_payment,
                            term, status, start_date, end_date, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            debt.user_id,
            debt.lender_name,
            debt.principal_amount,
            debt.interest_rate,
            debt.monthly_payment,
            debt.term,
            debt.status.as_str(),
            debt.start_date,
            debt.end_date,
            debt.created_at,
        ],
    )
    .context("Failed to insert debt")?;
    debt.id = conn.last_insert_rowid();
    Ok(debt)
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<Debt> {
    conn.query_row(
        &format!("SELECT {} FROM debts WHERE id = ?1 AND user_id = ?2", COLUMNS),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Debt").into())
}

/// All debts, newest first
pub fn list(conn: &Connection, user_id: i64) -> Result<Vec<Debt>> {
    list_where(conn, user_id, "1 = 1")
}

pub fn list_active(conn: &Connection, user_id: i64) -> Result<Vec<Debt>> {
    list_where(conn, user_id, "status = 'active'")
}

pub fn list_paid_off(conn: &Connection, user_id: i64) -> Result<Vec<Debt>> {
    list_where(conn, user_id, "status = 'paid_off'")
}

fn list_where(conn: &Connection, user_id: i64, clause: &str) -> Result<Vec<Debt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM debts WHERE user_id = ?1 AND {} ORDER BY created_at DESC, id DESC",
        COLUMNS, clause
    ))?;
    let debts = stmt
        .query_map([user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(debts)
}

pub fn update(conn: &Connection, debt: &mut Debt, params: DebtParams) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = debt.clone();
    updated.apply(params, &mut v);
    updated.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "UPDATE debts SET lender_name = ?1, principal_amount = ?2, interest_rate = ?3,
                monthly_payment = ?4, term = ?5, status = ?6, start_date = ?7, end_date = ?8
         WHERE id = ?9 AND user_id = ?10",
        params![
            updated.lender_name,
            updated.principal_amount,
            updated.interest_rate,
            updated.monthly_payment,
            updated.term,
            updated.status.as_str(),
            updated.start_date,
            updated.end_date,
            updated.id,
            updated.user_id,
        ],
    )?;
    *debt = updated;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM debts WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Debt").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::user::{self, Role, UserParams};

    fn setup() -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let user = user::create(
            &conn,
            UserParams {
                name: Some("Kabwe".into()),
                email: Some("kabwe@zm.com".into()),
                monthly_income: Some(6000.0),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        (conn, user)
    }

    fn loan(lender: &str, principal: f64, payment: Option<f64>) -> DebtParams {
        DebtParams {
            lender_name: Some(lender.into()),
            principal_amount: Some(principal),
            monthly_payment: payment,
            ..Default::default()
        }
    }

    #[test]
    fn test_validations() {
        let (conn, user) = setup();
        let mut params = loan("", -5.0, Some(0.0));
        params.interest_rate = Some(-1.0);
        params.status = Some("defaulted".into());
        let failed = create(&conn, user.id, params)
            .unwrap_err()
            .downcast::<ValidationFailed>()
            .unwrap();
        let fields: Vec<_> = failed.0.iter().map(|e| e.field.as_str()).collect();
        for field in ["status", "lender_name", "principal_amount", "interest_rate", "monthly_payment"] {
            assert!(fields.contains(&field), "missing {}", field);
        }

        let mut zero_rate = loan("Family", 300.0, None);
        zero_rate.interest_rate = Some(0.0);
        assert!(create(&conn, user.id, zero_rate).is_ok());
    }

    #[test]
    fn test_total_interest_cost() {
        let (conn, user) = setup();
        let mut params = loan("Zanaco", 10_000.0, Some(1_000.0));
        params.start_date = Some("2026-01-01".into());
        params.end_date = Some("2026-12-31".into());
        let debt = create(&conn, user.id, params).unwrap();
        // 364 days => 12 months of 30 days
        assert_eq!(debt.total_interest_cost(), 2_000.0);
        assert_eq!(debt.remaining_balance(), 10_000.0);

        let open = create(&conn, user.id, loan("Shop", 500.0, Some(50.0))).unwrap();
        assert_eq!(open.total_interest_cost(), 0.0);
    }

    #[test]
    fn test_per_debt_ratio_and_status_scopes() {
        let (conn, user) = setup();
        let mut debt = create(&conn, user.id, loan("Bank", 20_000.0, Some(1_500.0))).unwrap();
        assert_eq!(debt.debt_to_income_ratio(&user), 25.0);

        update(
            &conn,
            &mut debt,
            DebtParams {
                status: Some("paid_off".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(list_active(&conn, user.id).unwrap().is_empty());
        assert_eq!(list_paid_off(&conn, user.id).unwrap().len(), 1);
        assert!(find(&conn, user.id + 1, debt.id).is_err());
        delete(&conn, user.id, debt.id).unwrap();
        assert!(list(&conn, user.id).unwrap().is_empty());
    }
}
