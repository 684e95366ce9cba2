// Debt analysis: totals, debt-to-income, and payoff ordering over active debts

use crate::entities::debt::{self, Debt};
use crate::entities::user::{self, User, DEBT_TO_INCOME_THRESHOLD};
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebtAnalysis {
    pub total_debt: f64,
    pub monthly_payments: f64,
    pub debt_to_income: f64,
    pub is_over_indebted: bool,
    pub recommendations: Vec<String>,
    pub payoff_strategies: PayoffStrategies,
}

/// Lender name paired with the figure the strategy orders by
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoffStep {
    pub lender_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoffStrategies {
    /// Highest interest rate first; debts without a rate are left out
    pub avalanche: Vec<PayoffStep>,
    /// Smallest principal first
    pub snowball: Vec<PayoffStep>,
}

pub fn analyze(conn: &Connection, owner: &User) -> Result<DebtAnalysis> {
    let active = debt::list_active(conn, owner.id)?;
    let debt_to_income = user::debt_to_income_ratio(conn, owner)?;
    Ok(analyze_debts(&active, debt_to_income))
}

/// Pure half of `analyze`, over already-loaded active debts
pub fn analyze_debts(active: &[Debt], debt_to_income: f64) -> DebtAnalysis {
    let is_over_indebted = debt_to_income > DEBT_TO_INCOME_THRESHOLD;

    let recommendations = if is_over_indebted {
        vec![
            format!(
                "Your debt payments ({}%) exceed the safe {}% threshold.",
                debt_to_income, DEBT_TO_INCOME_THRESHOLD
            ),
            "Consider debt consolidation to reduce interest rates.".to_string(),
            "Prioritize high-interest debts first (avalanche method).".to_string(),
            "Seek financial counseling if stress is overwhelming.".to_string(),
        ]
    } else {
        Vec::new()
    };

    DebtAnalysis {
        total_debt: active.iter().map(|d| d.principal_amount).sum(),
        monthly_payments: active.iter().filter_map(|d| d.monthly_payment).sum(),
        debt_to_income,
        is_over_indebted,
        recommendations,
        payoff_strategies: payoff_strategies(active),
    }
}

fn payoff_strategies(active: &[Debt]) -> PayoffStrategies {
    let mut avalanche: Vec<PayoffStep> = active
        .iter()
        .filter_map(|d| {
            d.interest_rate.map(|rate| PayoffStep {
                lender_name: d.lender_name.clone(),
                value: rate,
            })
        })
        .collect();
    avalanche.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal));

    let mut snowball: Vec<PayoffStep> = active
        .iter()
        .map(|d| PayoffStep {
            lender_name: d.lender_name.clone(),
            value: d.principal_amount,
        })
        .collect();
    snowball.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal));

    PayoffStrategies { avalanche, snowball }
}
