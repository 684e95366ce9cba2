// 📈 Investment - a holding whose value is tracked over time
//
// Returns are measured against net contributions: the initial amount plus
// contribution transactions, minus withdrawals.

use crate::db::json_column;
use crate::entities::investment_transaction;
use crate::error::{NotFound, ValidationFailed};
use crate::money::{percentage, round1, round2};
use crate::period;
use crate::validation::Validator;
use anyhow::{Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Days of value history kept
pub const VALUE_HISTORY_DAYS: u64 = 365;

/// Investments younger than this (in years) report no annualized return
const MIN_CAGR_YEARS: f64 = 0.1;

pub const KNOWN_TYPES: [&str; 10] = [
    "stocks",
    "bonds",
    "mutual_funds",
    "etfs",
    "real_estate",
    "crypto",
    "savings",
    "fixed_deposit",
    "pension",
    "other",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investment {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub investment_type: String,
    pub initial_amount: f64,
    pub current_value: f64,
    pub target_value: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub last_updated: Option<NaiveDate>,
    pub risk_level: Option<i64>,
    pub institution: Option<String>,
    pub account_number: Option<String>,
    pub active: bool,
    pub notes: Option<String>,
    pub value_history: Vec<ValueEntry>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvestmentParams {
    pub name: Option<String>,
    pub investment_type: Option<String>,
    pub initial_amount: Option<f64>,
    pub current_value: Option<f64>,
    pub target_value: Option<f64>,
    pub start_date: Option<String>,
    pub target_date: Option<String>,
    pub risk_level: Option<i64>,
    pub institution: Option<String>,
    pub account_number: Option<String>,
    pub active: Option<bool>,
    pub notes: Option<String>,
}

/// Per-type sums of an investment's transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransactionSums {
    pub contribution: f64,
    pub withdrawal: f64,
    pub dividend: f64,
    pub interest: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Performance {
    pub total_contributions: f64,
    pub total_withdrawals: f64,
    pub net_contributions: f64,
    pub total_return: f64,
    pub return_percentage: f64,
    pub annualized_return: f64,
}

/// "mutual_funds" => "Mutual Funds"
fn titleize(raw: &str) -> String {
    raw.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn investment_type_text(investment_type: &str) -> String {
    match investment_type {
        "stocks" => "Stocks".to_string(),
        "bonds" => "Bonds".to_string(),
        "mutual_funds" => "Mutual Funds".to_string(),
        "etfs" => "ETFs".to_string(),
        "real_estate" => "Real Estate".to_string(),
        "crypto" => "Cryptocurrency".to_string(),
        "savings" => "Savings Account".to_string(),
        "fixed_deposit" => "Fixed Deposit".to_string(),
        "pension" => "Pension Fund".to_string(),
        "other" => "Other".to_string(),
        other => titleize(other),
    }
}

impl Investment {
    pub fn total_contributions(&self, sums: &TransactionSums) -> f64 {
        self.initial_amount + sums.contribution
    }

    pub fn net_contributions(&self, sums: &TransactionSums) -> f64 {
        self.total_contributions(sums) - sums.withdrawal
    }

    pub fn total_return(&self, sums: &TransactionSums) -> f64 {
        self.current_value - self.net_contributions(sums)
    }

    pub fn return_percentage(&self, sums: &TransactionSums) -> f64 {
        let net = self.net_contributions(sums);
        if net <= 0.0 {
            return 0.0;
        }
        round2(self.total_return(sums) / net * 100.0)
    }

    /// Compound annual growth rate since the record was created
    pub fn annualized_return(&self, sums: &TransactionSums, today: NaiveDate) -> f64 {
        let net = self.net_contributions(sums);
        if net <= 0.0 || self.current_value <= 0.0 {
            return 0.0;
        }
        let years = (today - self.created_at.date()).num_days() as f64 / 365.0;
        if years < MIN_CAGR_YEARS {
            return 0.0;
        }
        let cagr = ((self.current_value / net).powf(1.0 / years) - 1.0) * 100.0;
        if cagr.is_finite() {
            round2(cagr)
        } else {
            0.0
        }
    }

    pub fn performance(&self, sums: &TransactionSums, today: NaiveDate) -> Performance {
        Performance {
            total_contributions: self.total_contributions(sums),
            total_withdrawals: sums.withdrawal,
            net_contributions: self.net_contributions(sums),
            total_return: self.total_return(sums),
            return_percentage: self.return_percentage(sums),
            annualized_return: self.annualized_return(sums, today),
        }
    }

    pub fn risk_level_text(&self) -> &'static str {
        match self.risk_level {
            Some(1) => "Very Low",
            Some(2) => "Low",
            Some(3) => "Moderate",
            Some(4) => "High",
            Some(5) => "Very High",
            _ => "Not Specified",
        }
    }

    pub fn investment_type_text(&self) -> String {
        investment_type_text(&self.investment_type)
    }

    /// Direction of the last move in the value history
    pub fn performance_trend(&self) -> Trend {
        let mut history: Vec<&ValueEntry> = self.value_history.iter().collect();
        if history.len() < 2 {
            return Trend::Neutral;
        }
        history.sort_by_key(|entry| entry.date);
        let last = history[history.len() - 1].value;
        let previous = history[history.len() - 2].value;
        if last > previous {
            Trend::Positive
        } else if last < previous {
            Trend::Negative
        } else {
            Trend::Neutral
        }
    }

    /// History ordered oldest first
    pub fn sorted_history(&self) -> Vec<ValueEntry> {
        let mut history = self.value_history.clone();
        history.sort_by_key(|entry| entry.date);
        history
    }

    fn apply(&mut self, params: InvestmentParams, v: &mut Validator) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if let Some(kind) = params.investment_type {
            self.investment_type = kind.trim().to_string();
        }
        if let Some(initial) = params.initial_amount {
            self.initial_amount = initial;
        }
        if let Some(current) = params.current_value {
            self.current_value = current;
        }
        if params.target_value.is_some() {
            self.target_value = params.target_value;
        }
        for (field, raw, target) in [
            ("start_date", params.start_date, &mut self.start_date),
            ("target_date", params.target_date, &mut self.target_date),
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
        if params.risk_level.is_some() {
            self.risk_level = params.risk_level;
        }
        if params.institution.is_some() {
            self.institution = params.institution;
        }
        if params.account_number.is_some() {
            self.account_number = params.account_number;
        }
        if let Some(active) = params.active {
            self.active = active;
        }
        if params.notes.is_some() {
            self.notes = params.notes;
        }
    }

    fn validate(&self, v: &mut Validator) {
        v.presence("name", &self.name);
        v.max_length("name", &self.name, 100);
        v.presence("investment_type", &self.investment_type);
        v.at_least("initial_amount", self.initial_amount, 0.0);
        v.at_least("current_value", self.current_value, 0.0);
        if let Some(level) = self.risk_level {
            if !(1..=5).contains(&level) {
                v.add("risk_level", "must be between 1 and 5");
            }
        }
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, user_id, name, investment_type, initial_amount, current_value, \
                       target_value, start_date, target_date, last_updated, risk_level, \
                       institution, account_number, active, notes, value_history, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Investment> {
    Ok(Investment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        investment_type: row.get(3)?,
        initial_amount: row.get(4)?,
        current_value: row.get(5)?,
        target_value: row.get(6)?,
        start_date: row.get(7)?,
        target_date: row.get(8)?,
        last_updated: row.get(9)?,
        risk_level: row.get(10)?,
        institution: row.get(11)?,
        account_number: row.get(12)?,
        active: row.get(13)?,
        notes: row.get(14)?,
        value_history: json_column(15, row.get(15)?)?,
        created_at: row.get(16)?,
    })
}

pub fn create(
    conn: &Connection,
    user_id: i64,
    params: InvestmentParams,
    today: NaiveDate,
) -> Result<Investment> {
    let mut v = Validator::new();
    let explicit_value = params.current_value.is_some();
    let mut investment = Investment {
        id: 0,
        user_id,
        name: String::new(),
        investment_type: String::new(),
        initial_amount: 0.0,
        current_value: 0.0,
        target_value: None,
        start_date: None,
        target_date: None,
        last_updated: None,
        risk_level: None,
        institution: None,
        account_number: None,
        active: true,
        notes: None,
        value_history: Vec::new(),
        created_at: period::now(),
    };
    investment.apply(params, &mut v);
    if !explicit_value {
        investment.current_value = investment.initial_amount;
    }
    if investment.initial_amount > 0.0 {
        investment.value_history.push(ValueEntry {
            date: today,
            value: investment.initial_amount,
        });
    }
    investment.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "INSERT INTO investments (user_id, name, investment_type, initial_amount, current_value,
                target_value, start_date, target_date, last_updated, risk_level, institution,
                account_number, active, notes, value_history, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            investment.user_id,
            investment.name,
            investment.investment_type,
            investment.initial_amount,
            investment.current_value,
            investment.target_value,
            investment.start_date,
            investment.target_date,
            investment.last_updated,
            investment.risk_level,
            investment.institution,
            investment.account_number,
            investment.active,
            investment.notes,
            serde_json::to_string(&investment.value_history)?,
            investment.created_at,
        ],
    )
    .context("Failed to insert investment")?;
    investment.id = conn.last_insert_rowid();
    Ok(investment)
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<Investment> {
    conn.query_row(
        &format!("SELECT {} FROM investments WHERE id = ?1 AND user_id = ?2", COLUMNS),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Investment").into())
}

/// Newest first
pub fn list(conn: &Connection, user_id: i64) -> Result<Vec<Investment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM investments WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        COLUMNS
    ))?;
    let investments = stmt
        .query_map([user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(investments)
}

/// Active holdings, largest first
pub fn list_active_by_value(conn: &Connection, user_id: i64, limit: usize) -> Result<Vec<Investment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM investments WHERE user_id = ?1 AND active = 1
         ORDER BY current_value DESC, id ASC LIMIT ?2",
        COLUMNS
    ))?;
    let investments = stmt
        .query_map(params![user_id, limit as i64], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(investments)
}

fn save(conn: &Connection, investment: &Investment) -> Result<()> {
    conn.execute(
        "UPDATE investments SET name = ?1, investment_type = ?2, initial_amount = ?3,
                current_value = ?4, target_value = ?5, start_date = ?6, target_date = ?7,
                last_updated = ?8, risk_level = ?9, institution = ?10, account_number = ?11,
                active = ?12, notes = ?13, value_history = ?14
         WHERE id = ?15",
        params![
            investment.name,
            investment.investment_type,
            investment.initial_amount,
            investment.current_value,
            investment.target_value,
            investment.start_date,
            investment.target_date,
            investment.last_updated,
            investment.risk_level,
            investment.institution,
            investment.account_number,
            investment.active,
            investment.notes,
            serde_json::to_string(&investment.value_history)?,
            investment.id,
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, investment: &mut Investment, params: InvestmentParams) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = investment.clone();
    updated.apply(params, &mut v);
    updated.validate(&mut v);
    v.finish().map_err(ValidationFailed)?;

    save(conn, &updated)?;
    *investment = updated;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM investments WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Investment").into());
    }
    Ok(())
}

/// Record a new valuation, dropping history older than a year
pub fn update_current_value(
    conn: &Connection,
    investment: &mut Investment,
    value: f64,
    today: NaiveDate,
) -> Result<()> {
    let mut v = Validator::new();
    v.at_least("current_value", value, 0.0);
    v.finish().map_err(ValidationFailed)?;

    let cutoff = today
        .checked_sub_days(Days::new(VALUE_HISTORY_DAYS))
        .unwrap_or(NaiveDate::MIN);
    investment.value_history.push(ValueEntry { date: today, value });
    investment.value_history.retain(|entry| entry.date >= cutoff);
    investment.current_value = value;
    investment.last_updated = Some(today);
    save(conn, investment)
}

pub fn transaction_sums(conn: &Connection, investment_id: i64) -> Result<TransactionSums> {
    let mut stmt = conn.prepare(
        "SELECT transaction_type, COALESCE(SUM(amount), 0) FROM investment_transactions
         WHERE investment_id = ?1 GROUP BY transaction_type",
    )?;
    let rows = stmt.query_map([investment_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut sums = TransactionSums::default();
    for row in rows {
        let (kind, total) = row?;
        match investment_transaction::TransactionType::parse(&kind) {
            Some(investment_transaction::TransactionType::Contribution) => sums.contribution = total,
            Some(investment_transaction::TransactionType::Withdrawal) => sums.withdrawal = total,
            Some(investment_transaction::TransactionType::Dividend) => sums.dividend = total,
            Some(investment_transaction::TransactionType::Interest) => sums.interest = total,
            Some(investment_transaction::TransactionType::Fee) => sums.fee = total,
            None => tracing::warn!(investment_id, kind = %kind, "unknown investment transaction type"),
        }
    }
    Ok(sums)
}

// ============================================================================
// PORTFOLIO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Allocation {
    pub total: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub investments: Vec<Investment>,
    pub total_invested: f64,
    pub total_initial: f64,
    pub total_return: f64,
    pub return_percentage: f64,
    pub allocation: BTreeMap<String, Allocation>,
}

/// Share of current value held in each investment type
pub fn allocation(investments: &[Investment]) -> BTreeMap<String, Allocation> {
    let total: f64 = investments.iter().map(|i| i.current_value).sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    let mut by_type: BTreeMap<String, f64> = BTreeMap::new();
    for investment in investments {
        *by_type.entry(investment.investment_type.clone()).or_default() += investment.current_value;
    }
    by_type
        .into_iter()
        .map(|(kind, type_total)| {
            let share = Allocation {
                total: type_total,
                percentage: round1(percentage(type_total, total)),
            };
            (kind, share)
        })
        .collect()
}

pub fn portfolio(conn: &Connection, user_id: i64) -> Result<Portfolio> {
    let investments = list(conn, user_id)?;
    let total_invested: f64 = investments.iter().map(|i| i.current_value).sum();
    let total_initial: f64 = investments.iter().map(|i| i.initial_amount).sum();
    let total_return = total_invested - total_initial;
    let return_percentage = if total_initial > 0.0 {
        round2(total_return / total_initial * 100.0)
    } else {
        0.0
    };
    let allocation = allocation(&investments);
    Ok(Portfolio {
        investments,
        total_invested,
        total_initial,
        total_return,
        return_percentage,
        allocation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::user::{self, Role, UserParams};

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let user = user::create(
            &conn,
            UserParams {
                name: Some("Lungu".into()),
                email: Some("lungu@zm.com".into()),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        (conn, user.id)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn holding(name: &str, kind: &str, initial: f64) -> InvestmentParams {
        InvestmentParams {
            name: Some(name.into()),
            investment_type: Some(kind.into()),
            initial_amount: Some(initial),
            ..Default::default()
        }
    }

    fn sample(initial: f64, current: f64, created: NaiveDate) -> Investment {
        Investment {
            id: 1,
            user_id: 1,
            name: "LuSE".into(),
            investment_type: "stocks".into(),
            initial_amount: initial,
            current_value: current,
            target_value: None,
            start_date: None,
            target_date: None,
            last_updated: None,
            risk_level: Some(4),
            institution: None,
            account_number: None,
            active: true,
            notes: None,
            value_history: Vec::new(),
            created_at: created.and_hms_opt(9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_return_math() {
        let investment = sample(1000.0, 1500.0, date(2024, 1, 1));
        let sums = TransactionSums {
            contribution: 500.0,
            withdrawal: 250.0,
            ..Default::default()
        };
        assert_eq!(investment.total_contributions(&sums), 1500.0);
        assert_eq!(investment.net_contributions(&sums), 1250.0);
        assert_eq!(investment.total_return(&sums), 250.0);
        assert_eq!(investment.return_percentage(&sums), 20.0);

        // Doubling over exactly two 365-day years
        let doubled = sample(1000.0, 2000.0, date(2024, 1, 1));
        let cagr = doubled.annualized_return(&TransactionSums::default(), date(2025, 12, 31));
        assert_eq!(cagr, 41.42);

        // Too young to annualize
        assert_eq!(doubled.annualized_return(&TransactionSums::default(), date(2024, 1, 20)), 0.0);

        let withdrawn = TransactionSums {
            withdrawal: 1000.0,
            ..Default::default()
        };
        assert_eq!(doubled.return_percentage(&withdrawn), 0.0);
        assert_eq!(doubled.annualized_return(&withdrawn, date(2026, 1, 1)), 0.0);
    }

    #[test]
    fn test_texts() {
        let investment = sample(0.0, 0.0, date(2026, 1, 1));
        assert_eq!(investment.risk_level_text(), "High");
        assert_eq!(investment.investment_type_text(), "Stocks");
        assert_eq!(investment_type_text("etfs"), "ETFs");
        assert_eq!(investment_type_text("treasury_bills"), "Treasury Bills");
        let mut unrated = investment.clone();
        unrated.risk_level = None;
        assert_eq!(unrated.risk_level_text(), "Not Specified");
    }

    #[test]
    fn test_create_defaults_value_and_history() {
        let (conn, user_id) = setup();
        let today = date(2026, 2, 1);
        let investment = create(&conn, user_id, holding("T-Bills", "bonds", 5000.0), today).unwrap();
        assert_eq!(investment.current_value, 5000.0);
        assert_eq!(investment.value_history, vec![ValueEntry { date: today, value: 5000.0 }]);

        let empty = create(&conn, user_id, holding("Piggy", "savings", 0.0), today).unwrap();
        assert!(empty.value_history.is_empty());

        let mut bad = holding("", "", -1.0);
        bad.risk_level = Some(9);
        let failed = create(&conn, user_id, bad, today)
            .unwrap_err()
            .downcast::<ValidationFailed>()
            .unwrap();
        let fields: Vec<_> = failed.0.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "investment_type", "initial_amount", "current_value", "risk_level"]);
    }

    #[test]
    fn test_update_current_value_and_trend() {
        let (conn, user_id) = setup();
        let mut investment =
            create(&conn, user_id, holding("Fund", "mutual_funds", 1000.0), date(2025, 1, 1)).unwrap();
        assert_eq!(investment.performance_trend(), Trend::Neutral);

        update_current_value(&conn, &mut investment, 1200.0, date(2025, 6, 1)).unwrap();
        assert_eq!(investment.performance_trend(), Trend::Positive);

        // The 2025-01-01 entry falls out of the one-year window
        update_current_value(&conn, &mut investment, 900.0, date(2026, 3, 1)).unwrap();
        let stored = find(&conn, user_id, investment.id).unwrap();
        assert_eq!(stored.value_history.len(), 2);
        assert_eq!(stored.current_value, 900.0);
        assert_eq!(stored.last_updated, Some(date(2026, 3, 1)));
        assert_eq!(stored.performance_trend(), Trend::Negative);

        assert!(update_current_value(&conn, &mut investment, -5.0, date(2026, 3, 2)).is_err());
    }

    #[test]
    fn test_portfolio_allocation() {
        let (conn, user_id) = setup();
        let today = date(2026, 1, 1);
        create(&conn, user_id, holding("A", "stocks", 3000.0), today).unwrap();
        create(&conn, user_id, holding("B", "stocks", 1000.0), today).unwrap();
        let mut bond = create(&conn, user_id, holding("C", "bonds", 2000.0), today).unwrap();
        update_current_value(&conn, &mut bond, 2500.0, today).unwrap();

        let portfolio = portfolio(&conn, user_id).unwrap();
        assert_eq!(portfolio.total_invested, 6500.0);
        assert_eq!(portfolio.total_initial, 6000.0);
        assert_eq!(portfolio.return_percentage, 8.33);
        assert_eq!(portfolio.allocation["stocks"].percentage, 61.5);
        assert_eq!(portfolio.allocation["bonds"].total, 2500.0);

        let top = list_active_by_value(&conn, user_id, 2).unwrap();
        assert_eq!(top[0].name, "A");
        assert_eq!(top[1].name, "C");
    }
}
