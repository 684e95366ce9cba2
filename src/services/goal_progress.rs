// Atomic goal progress update: amount, completion, and history in one transaction

use crate::db::{record_event, Event};
use crate::entities::financial_goal::{self, FinancialGoal, ProgressEntry};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Newest history entries kept on a goal
pub const HISTORY_RETENTION_LIMIT: usize = 365;

/// Set the goal's current amount. Returns false (and leaves the goal untouched) on failure.
pub fn update_progress(conn: &Connection, goal: &mut FinancialGoal, new_amount: f64, today: NaiveDate) -> bool {
    match apply(conn, goal, new_amount, today) {
        Ok(updated) => {
            *goal = updated;
            true
        }
        Err(e) => {
            tracing::error!(goal_id = goal.id, error = %e, "goal progress update failed");
            false
        }
    }
}

fn apply(conn: &Connection, goal: &FinancialGoal, new_amount: f64, today: NaiveDate) -> Result<FinancialGoal> {
    if !new_amount.is_finite() || new_amount < 0.0 {
        return Err(anyhow!("invalid progress amount {}", new_amount));
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut updated = goal.clone();
    updated.current_amount = new_amount;
    updated.progress_history.push(ProgressEntry {
        date: today,
        amount: new_amount,
    });
    let overflow = updated
        .progress_history
        .len()
        .saturating_sub(HISTORY_RETENTION_LIMIT);
    updated.progress_history.drain(..overflow);

    financial_goal::save(&tx, &updated)?;
    let completed = financial_goal::check_completion(&tx, &mut updated, today)?;

    record_event(
        &tx,
        Event::new(
            "goal_progress_updated",
            "financial_goal",
            &updated.id.to_string(),
            serde_json::json!({
                "amount": new_amount,
                "completed": completed,
                "history_length": updated.progress_history.len(),
            }),
            "goal_progress",
        ),
    );
    tx.commit()?;
    Ok(updated)
}
