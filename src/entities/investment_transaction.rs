// 💱 Investment transaction - money moving in or out of a holding
//
// Every write moves the parent's current_value by the transaction's signed
// amount (never below zero) inside the same SQLite transaction.

use crate::db::enum_column;
use crate::entities::investment::Investment;
use crate::error::{NotFound, ValidationFailed};
use crate::period::{self, month_label, month_start};
use crate::validation::{parse_choice, Validator};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Contribution,
    Withdrawal,
    Dividend,
    Interest,
    Fee,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Contribution => "contribution",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Dividend => "dividend",
            TransactionType::Interest => "interest",
            TransactionType::Fee => "fee",
        }
    }

    pub fn parse(raw: &str) -> Option<TransactionType> {
        match raw {
            "contribution" => Some(TransactionType::Contribution),
            "withdrawal" => Some(TransactionType::Withdrawal),
            "dividend" => Some(TransactionType::Dividend),
            "interest" => Some(TransactionType::Interest),
            "fee" => Some(TransactionType::Fee),
            _ => None,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            TransactionType::Contribution => "Contribution",
            TransactionType::Withdrawal => "Withdrawal",
            TransactionType::Dividend => "Dividend",
            TransactionType::Interest => "Interest",
            TransactionType::Fee => "Fee",
        }
    }

    /// Signed effect on the holding's value
    pub fn value_delta(&self, amount: f64) -> f64 {
        match self {
            TransactionType::Contribution | TransactionType::Dividend | TransactionType::Interest => {
                amount
            }
            TransactionType::Withdrawal | TransactionType::Fee => -amount,
        }
    }

    pub fn is_income(&self) -> bool {
        matches!(self, TransactionType::Dividend | TransactionType::Interest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentTransaction {
    pub id: i64,
    pub investment_id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub transaction_date: NaiveDate,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvestmentTransactionParams {
    pub amount: Option<f64>,
    pub transaction_date: Option<String>,
    pub transaction_type: Option<String>,
    pub description: Option<String>,
    pub reference_number: Option<String>,
}

impl InvestmentTransaction {
    fn apply(&mut self, params: InvestmentTransactionParams, v: &mut Validator) {
        if let Some(amount) = params.amount {
            self.amount = amount;
        }
        if let Some(raw) = params.transaction_date {
            match period::parse_date(&raw) {
                Some(date) => self.transaction_date = date,
                None => v.add("transaction_date", "can't be blank"),
            }
        }
        if let Some(raw) = params.transaction_type {
            if let Some(kind) = parse_choice(v, "transaction_type", &raw, TransactionType::parse) {
                self.transaction_type = kind;
            }
        }
        if params.description.is_some() {
            self.description = params.description;
        }
        if params.reference_number.is_some() {
            self.reference_number = params.reference_number;
        }
    }

    pub fn value_delta(&self) -> f64 {
        self.transaction_type.value_delta(self.amount)
    }
}

const COLUMNS: &str = "id, investment_id, user_id, amount, transaction_date, transaction_type, \
                       description, reference_number, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<InvestmentTransaction> {
    Ok(InvestmentTransaction {
        id: row.get(0)?,
        investment_id: row.get(1)?,
        user_id: row.get(2)?,
        amount: row.get(3)?,
        transaction_date: row.get(4)?,
        transaction_type: enum_column(5, row.get(5)?, TransactionType::parse)?,
        description: row.get(6)?,
        reference_number: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Move the parent's value, flooring at zero
fn shift_value(conn: &Connection, investment_id: i64, delta: f64) -> Result<()> {
    conn.execute(
        "UPDATE investments SET current_value = MAX(current_value + ?1, 0) WHERE id = ?2",
        params![delta, investment_id],
    )?;
    Ok(())
}

pub fn create(
    conn: &Connection,
    investment: &Investment,
    params: InvestmentTransactionParams,
) -> Result<InvestmentTransaction> {
    let mut v = Validator::new();
    v.required("amount", params.amount);
    v.required("transaction_type", params.transaction_type.as_ref());
    let mut record = InvestmentTransaction {
        id: 0,
        investment_id: investment.id,
        user_id: investment.user_id,
        amount: 0.0,
        transaction_date: period::today(),
        transaction_type: TransactionType::Contribution,
        description: None,
        reference_number: None,
        created_at: period::now(),
    };
    record.apply(params, &mut v);
    if v.is_empty() {
        v.greater_than("amount", record.amount, 0.0);
    }
    v.finish().map_err(ValidationFailed)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO investment_transactions (investment_id, user_id, amount, transaction_date,
                transaction_type, description, reference_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.investment_id,
            record.user_id,
            record.amount,
            record.transaction_date,
            record.transaction_type.as_str(),
            record.description,
            record.reference_number,
            record.created_at,
        ],
    )
    .context("Failed to insert investment transaction")?;
    record.id = tx.last_insert_rowid();
    shift_value(&tx, record.investment_id, record.value_delta())?;
    tx.commit()?;
    Ok(record)
}

pub fn find(conn: &Connection, investment: &Investment, id: i64) -> Result<InvestmentTransaction> {
    conn.query_row(
        &format!(
            "SELECT {} FROM investment_transactions WHERE id = ?1 AND investment_id = ?2 AND user_id = ?3",
            COLUMNS
        ),
        params![id, investment.id, investment.user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Transaction").into())
}

/// Replace a transaction; the old effect on the value is undone first
pub fn update(
    conn: &Connection,
    record: &mut InvestmentTransaction,
    params: InvestmentTransactionParams,
) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = record.clone();
    updated.apply(params, &mut v);
    v.greater_than("amount", updated.amount, 0.0);
    v.finish().map_err(ValidationFailed)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute(
        "UPDATE investment_transactions SET amount = ?1, transaction_date = ?2,
                transaction_type = ?3, description = ?4, reference_number = ?5
         WHERE id = ?6",
        params![
            updated.amount,
            updated.transaction_date,
            updated.transaction_type.as_str(),
            updated.description,
            updated.reference_number,
            updated.id,
        ],
    )?;
    shift_value(&tx, updated.investment_id, -record.value_delta())?;
    shift_value(&tx, updated.investment_id, updated.value_delta())?;
    tx.commit()?;
    *record = updated;
    Ok(())
}

pub fn delete(conn: &Connection, investment: &Investment, id: i64) -> Result<()> {
    let record = find(conn, investment, id)?;
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM investment_transactions WHERE id = ?1", [record.id])?;
    shift_value(&tx, record.investment_id, -record.value_delta())?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// LISTING
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    /// Applied only when both ends are present
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransactionTotals {
    pub total_contributions: f64,
    pub total_withdrawals: f64,
    pub total_income: f64,
    pub total_fees: f64,
}

impl TransactionTotals {
    pub fn of(records: &[InvestmentTransaction]) -> Self {
        let mut totals = TransactionTotals::default();
        for record in records {
            match record.transaction_type {
                TransactionType::Contribution => totals.total_contributions += record.amount,
                TransactionType::Withdrawal => totals.total_withdrawals += record.amount,
                TransactionType::Dividend | TransactionType::Interest => {
                    totals.total_income += record.amount
                }
                TransactionType::Fee => totals.total_fees += record.amount,
            }
        }
        totals
    }
}

/// Transactions of one investment, newest first
pub fn list(
    conn: &Connection,
    investment: &Investment,
    filter: TransactionFilter,
    limit: Option<usize>,
) -> Result<Vec<InvestmentTransaction>> {
    let (start, end) = match (filter.start_date, filter.end_date) {
        (Some(start), Some(end)) => (Some(start), Some(end)),
        _ => (None, None),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM investment_transactions
         WHERE investment_id = ?1 AND user_id = ?2
           AND (?3 IS NULL OR transaction_type = ?3)
           AND (?4 IS NULL OR transaction_date BETWEEN ?4 AND ?5)
         ORDER BY transaction_date DESC, id DESC LIMIT ?6",
        COLUMNS
    ))?;
    let records = stmt
        .query_map(
            params![
                investment.id,
                investment.user_id,
                filter.transaction_type.map(|t| t.as_str()),
                start,
                end,
                limit.map_or(-1, |l| l as i64),
            ],
            from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyActivity {
    pub month: String,
    pub contributions: f64,
    pub withdrawals: f64,
    pub income: f64,
    pub fees: f64,
}

/// Per-month totals, oldest month first
pub fn monthly_history(conn: &Connection, investment: &Investment) -> Result<Vec<MonthlyActivity>> {
    let mut records = list(conn, investment, TransactionFilter::default(), None)?;
    records.reverse();

    let mut months: Vec<(NaiveDate, TransactionTotals)> = Vec::new();
    for record in records {
        let month = month_start(record.transaction_date);
        match months.last_mut() {
            Some((current, totals)) if *current == month => {
                *totals = add(*totals, &record);
            }
            _ => months.push((month, add(TransactionTotals::default(), &record))),
        }
    }
    Ok(months
        .into_iter()
        .map(|(month, totals)| MonthlyActivity {
            month: month_label(month),
            contributions: totals.total_contributions,
            withdrawals: totals.total_withdrawals,
            income: totals.total_income,
            fees: totals.total_fees,
        })
        .collect())
}

fn add(totals: TransactionTotals, record: &InvestmentTransaction) -> TransactionTotals {
    let single = TransactionTotals::of(std::slice::from_ref(record));
    TransactionTotals {
        total_contributions: totals.total_contributions + single.total_contributions,
        total_withdrawals: totals.total_withdrawals + single.total_withdrawals,
        total_income: totals.total_income + single.total_income,
        total_fees: totals.total_fees + single.total_fees,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::investment::{self, InvestmentParams};
    use crate::entities::user::{self, Role, UserParams};

    fn setup() -> (Connection, Investment) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let user = user::create(
            &conn,
            UserParams {
                name: Some("Phiri".into()),
                email: Some("phiri@zm.com".into()),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        let holding = investment::create(
            &conn,
            user.id,
            InvestmentParams {
                name: Some("Pension".into()),
                investment_type: Some("pension".into()),
                initial_amount: Some(1000.0),
                ..Default::default()
            },
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        )
        .unwrap();
        (conn, holding)
    }

    fn entry(kind: &str, amount: f64, on: &str) -> InvestmentTransactionParams {
        InvestmentTransactionParams {
            amount: Some(amount),
            transaction_date: Some(on.into()),
            transaction_type: Some(kind.into()),
            ..Default::default()
        }
    }

    fn value(conn: &Connection, holding: &Investment) -> f64 {
        investment::find(conn, holding.user_id, holding.id)
            .unwrap()
            .current_value
    }

    #[test]
    fn test_value_moves_with_transactions() {
        let (conn, holding) = setup();
        create(&conn, &holding, entry("contribution", 500.0, "2026-01-10")).unwrap();
        assert_eq!(value(&conn, &holding), 1500.0);
        create(&conn, &holding, entry("fee", 20.0, "2026-01-31")).unwrap();
        create(&conn, &holding, entry("dividend", 70.0, "2026-02-15")).unwrap();
        assert_eq!(value(&conn, &holding), 1550.0);

        // Floored at zero
        create(&conn, &holding, entry("withdrawal", 5000.0, "2026-03-01")).unwrap();
        assert_eq!(value(&conn, &holding), 0.0);

        let sums = investment::transaction_sums(&conn, holding.id).unwrap();
        assert_eq!(sums.contribution, 500.0);
        assert_eq!(sums.withdrawal, 5000.0);
        assert_eq!(sums.fee, 20.0);
    }

    #[test]
    fn test_update_and_delete_reverse_effect() {
        let (conn, holding) = setup();
        let mut record = create(&conn, &holding, entry("contribution", 300.0, "2026-01-10")).unwrap();
        update(
            &conn,
            &mut record,
            InvestmentTransactionParams {
                transaction_type: Some("withdrawal".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(value(&conn, &holding), 700.0);

        delete(&conn, &holding, record.id).unwrap();
        assert_eq!(value(&conn, &holding), 1000.0);
        assert!(find(&conn, &holding, record.id).is_err());
    }

    #[test]
    fn test_validation() {
        let (conn, holding) = setup();
        let failed = create(&conn, &holding, InvestmentTransactionParams::default())
            .unwrap_err()
            .downcast::<ValidationFailed>()
            .unwrap();
        assert_eq!(failed.0.len(), 2);

        let failed = create(&conn, &holding, entry("gift", 10.0, "2026-01-01"))
            .unwrap_err()
            .downcast::<ValidationFailed>()
            .unwrap();
        assert_eq!(failed.0[0].field, "transaction_type");

        assert!(create(&conn, &holding, entry("interest", 0.0, "2026-01-01")).is_err());
        assert_eq!(value(&conn, &holding), 1000.0);
    }

    #[test]
    fn test_filters_totals_and_history() {
        let (conn, holding) = setup();
        create(&conn, &holding, entry("contribution", 100.0, "2026-01-05")).unwrap();
        create(&conn, &holding, entry("interest", 12.0, "2026-01-31")).unwrap();
        create(&conn, &holding, entry("contribution", 100.0, "2026-02-05")).unwrap();
        create(&conn, &holding, entry("fee", 5.0, "2026-02-06")).unwrap();

        let all = list(&conn, &holding, TransactionFilter::default(), None).unwrap();
        assert_eq!(all[0].transaction_type, TransactionType::Fee);
        let totals = TransactionTotals::of(&all);
        assert_eq!(totals.total_contributions, 200.0);
        assert_eq!(totals.total_income, 12.0);
        assert_eq!(totals.total_fees, 5.0);

        let contributions = list(
            &conn,
            &holding,
            TransactionFilter {
                transaction_type: Some(TransactionType::Contribution),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(contributions.len(), 2);

        let january = list(
            &conn,
            &holding,
            TransactionFilter {
                transaction_type: None,
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1),
                end_date: NaiveDate::from_ymd_opt(2026, 1, 31),
            },
            None,
        )
        .unwrap();
        assert_eq!(january.len(), 2);

        let history = monthly_history(&conn, &holding).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].month, "Jan 2026");
        assert_eq!(history[0].income, 12.0);
        assert_eq!(history[1].fees, 5.0);
    }
}
