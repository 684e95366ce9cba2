// 🎯 Financial goal - a target amount to reach by a date
//
// Progress snapshots accumulate in `progress_history`; the atomic update
// that appends them lives in services::goal_progress.

use crate::db::{enum_column, json_column};
use crate::entities::payment::{self, Payment};
use crate::error::{NotFound, ValidationFailed};
use crate::money::{percentage, round1, round2};
use crate::period;
use crate::validation::{parse_choice, Validator};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Large savings targets get an investing nudge
const LARGE_SAVING_TARGET: f64 = 5000.0;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Saving,
    DebtPayment,
    Investment,
    ExpenseReduction,
}

impl GoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalType::Saving => "saving",
            GoalType::DebtPayment => "debt_payment",
            GoalType::Investment => "investment",
            GoalType::ExpenseReduction => "expense_reduction",
        }
    }

    pub fn parse(raw: &str) -> Option<GoalType> {
        match raw {
            "saving" => Some(GoalType::Saving),
            "debt_payment" => Some(GoalType::DebtPayment),
            "investment" => Some(GoalType::Investment),
            "expense_reduction" => Some(GoalType::ExpenseReduction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Priority> {
        match raw {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

// ============================================================================
// GOAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialGoal {
    pub id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub target_amount: f64,
    pub current_amount: f64,
    pub start_date: NaiveDate,
    pub target_date: NaiveDate,
    pub completion_date: Option<NaiveDate>,
    pub goal_type: GoalType,
    pub completed: bool,
    pub priority: Priority,
    pub progress_history: Vec<ProgressEntry>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalParams {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_amount: Option<f64>,
    pub current_amount: Option<f64>,
    pub start_date: Option<String>,
    pub target_date: Option<String>,
    pub goal_type: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<String>,
}

impl FinancialGoal {
    pub fn progress_percentage(&self) -> f64 {
        if self.current_amount <= 0.0 {
            return 0.0;
        }
        if self.current_amount >= self.target_amount {
            return 100.0;
        }
        round1(percentage(self.current_amount, self.target_amount))
    }

    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        if self.completed || self.target_date < today {
            return 0;
        }
        (self.target_date - today).num_days()
    }

    /// Amount to put aside per day to finish on time
    pub fn daily_target(&self, today: NaiveDate) -> f64 {
        let days = self.days_remaining(today);
        if self.completed || days <= 0 {
            return 0.0;
        }
        round2((self.target_amount - self.current_amount) / days as f64)
    }

    pub fn is_reached(&self) -> bool {
        self.current_amount >= self.target_amount
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.target_date < today
    }

    pub fn trend_data(&self) -> Vec<TrendPoint> {
        self.progress_history
            .iter()
            .map(|entry| TrendPoint {
                date: entry.date,
                amount: entry.amount,
                percentage: round1(percentage(entry.amount, self.target_amount)),
            })
            .collect()
    }

    pub fn recommendations(&self, today: NaiveDate) -> Vec<String> {
        let mut recommendations = Vec::new();
        match self.goal_type {
            GoalType::Saving => {
                let progress = self.progress_percentage();
                let days_left = self.days_remaining(today);
                let daily = self.daily_target(today);
                if progress < 25.0 && days_left < 30 {
                    recommendations.push(format!(
                        "You're behind on your savings goal. Consider increasing your daily savings by {:.2} to catch up.",
                        daily * 1.5
                    ));
                } else if progress < 50.0 && days_left < 60 {
                    recommendations.push(format!(
                        "You're halfway to your target. Try setting aside an extra {:.2} each week to stay on track.",
                        daily
                    ));
                }
                if self.target_amount > LARGE_SAVING_TARGET {
                    recommendations.push(
                        "Consider investing part of your savings to earn interest and reach your goal faster."
                            .to_string(),
                    );
                }
            }
            GoalType::DebtPayment => recommendations.push(
                "Setting up automatic payments can help ensure consistent progress on your debt repayment goal."
                    .to_string(),
            ),
            GoalType::Investment | GoalType::ExpenseReduction => {}
        }
        recommendations
    }

    fn apply(&mut self, params: GoalParams, v: &mut Validator) {
        if let Some(name) = params.name {
            self.name = name.trim().to_string();
        }
        if params.description.is_some() {
            self.description = params.description;
        }
        if let Some(target) = params.target_amount {
            self.target_amount = target;
        }
        if let Some(current) = params.current_amount {
            self.current_amount = current;
        }
        if let Some(raw) = params.start_date {
            match period::parse_date(&raw) {
                Some(date) => self.start_date = date,
                None => v.add("start_date", "can't be blank"),
            }
        }
        if let Some(raw) = params.target_date {
            match period::parse_date(&raw) {
                Some(date) => self.target_date = date,
                None => v.add("target_date", "can't be blank"),
            }
        }
        if let Some(raw) = params.goal_type {
            if let Some(kind) = parse_choice(v, "goal_type", &raw, GoalType::parse) {
                self.goal_type = kind;
            }
        }
        if params.category_id.is_some() {
            self.category_id = params.category_id;
        }
        if let Some(raw) = params.priority {
            if let Some(priority) = parse_choice(v, "priority", &raw, Priority::parse) {
                self.priority = priority;
            }
        }
    }

    fn validate(&self, v: &mut Validator) {
        v.presence("name", &self.name);
        v.max_length("name", &self.name, 100);
        v.greater_than("target_amount", self.target_amount, 0.0);
        if self.target_date <= self.start_date {
            v.add("target_date", "must be after the start date");
        }
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, user_id, category_id, name, description, target_amount, current_amount, \
                       start_date, target_date, completion_date, goal_type, completed, priority, \
                       progress_history, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<FinancialGoal> {
    Ok(FinancialGoal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        target_amount: row.get(5)?,
        current_amount: row.get(6)?,
        start_date: row.get(7)?,
        target_date: row.get(8)?,
        completion_date: row.get(9)?,
        goal_type: enum_column(10, row.get(10)?, GoalType::parse)?,
        completed: row.get(11)?,
        priority: enum_column(12, row.get(12)?, Priority::parse)?,
        progress_history: json_column(13, row.get(13)?)?,
        created_at: row.get(14)?,
    })
}

fn check_category(conn: &Connection, goal: &FinancialGoal, v: &mut Validator) -> Result<()> {
    let Some(category_id) = goal.category_id else {
        return Ok(());
    };
    let owner: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM categories WHERE id = ?1",
            [category_id],
            |row| row.get(0),
        )
        .optional()?;
    if owner != Some(goal.user_id) {
        v.add("category", "must belong to you");
    }
    Ok(())
}

pub fn create(conn: &Connection, user_id: i64, params: GoalParams) -> Result<FinancialGoal> {
    let mut v = Validator::new();
    v.required("start_date", params.start_date.as_ref());
    v.required("target_date", params.target_date.as_ref());
    v.required("goal_type", params.goal_type.as_ref());

    let today = period::today();
    let mut goal = FinancialGoal {
        id: 0,
        user_id,
        category_id: None,
        name: String::new(),
        description: None,
        target_amount: 0.0,
        current_amount: 0.0,
        start_date: today,
        target_date: today,
        completion_date: None,
        goal_type: GoalType::Saving,
        completed: false,
        priority: Priority::Medium,
        progress_history: Vec::new(),
        created_at: period::now(),
    };
    goal.apply(params, &mut v);
    if v.is_empty() {
        goal.validate(&mut v);
    }
    check_category(conn, &goal, &mut v)?;
    v.finish().map_err(ValidationFailed)?;

    conn.execute(
        "INSERT INTO financial_goals (user_id, category_id, name, description, target_amount,
                current_amount, start_date, target_date, completion_date, goal_type, completed,
                priority, progress_history, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            goal.user_id,
            goal.category_id,
            goal.name,
            goal.description,
            goal.target_amount,
            goal.current_amount,
            goal.start_date,
            goal.target_date,
            goal.completion_date,
            goal.goal_type.as_str(),
            goal.completed,
            goal.priority.as_str(),
            serde_json::to_string(&goal.progress_history)?,
            goal.created_at,
        ],
    )
    .context("Failed to insert financial goal")?;
    goal.id = conn.last_insert_rowid();
    Ok(goal)
}

pub fn find(conn: &Connection, user_id: i64, id: i64) -> Result<FinancialGoal> {
    conn.query_row(
        &format!("SELECT {} FROM financial_goals WHERE id = ?1 AND user_id = ?2", COLUMNS),
        params![id, user_id],
        from_row,
    )
    .optional()?
    .ok_or_else(|| NotFound::new("Financial goal").into())
}

/// Persist every column of an existing goal
pub fn save(conn: &Connection, goal: &FinancialGoal) -> Result<()> {
    conn.execute(
        "UPDATE financial_goals SET category_id = ?1, name = ?2, description = ?3,
                target_amount = ?4, current_amount = ?5, start_date = ?6, target_date = ?7,
                completion_date = ?8, goal_type = ?9, completed = ?10, priority = ?11,
                progress_history = ?12
         WHERE id = ?13 AND user_id = ?14",
        params![
            goal.category_id,
            goal.name,
            goal.description,
            goal.target_amount,
            goal.current_amount,
            goal.start_date,
            goal.target_date,
            goal.completion_date,
            goal.goal_type.as_str(),
            goal.completed,
            goal.priority.as_str(),
            serde_json::to_string(&goal.progress_history)?,
            goal.id,
            goal.user_id,
        ],
    )?;
    Ok(())
}

/// Apply the edit, then mark completion if the target is now reached
pub fn update(
    conn: &Connection,
    goal: &mut FinancialGoal,
    params: GoalParams,
    today: NaiveDate,
) -> Result<()> {
    let mut v = Validator::new();
    let mut updated = goal.clone();
    updated.apply(params, &mut v);
    updated.validate(&mut v);
    check_category(conn, &updated, &mut v)?;
    v.finish().map_err(ValidationFailed)?;

    save(conn, &updated)?;
    *goal = updated;
    check_completion(conn, goal, today)?;
    Ok(())
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM financial_goals WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if removed == 0 {
        return Err(NotFound::new("Financial goal").into());
    }
    Ok(())
}

/// Mark the goal completed today once the target is reached
pub fn check_completion(conn: &Connection, goal: &mut FinancialGoal, today: NaiveDate) -> Result<bool> {
    if !goal.is_reached() {
        return Ok(false);
    }
    goal.completed = true;
    goal.completion_date = Some(today);
    conn.execute(
        "UPDATE financial_goals SET completed = 1, completion_date = ?1 WHERE id = ?2",
        params![today, goal.id],
    )?;
    Ok(true)
}

// ============================================================================
// SCOPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalScope {
    All,
    /// target_date on or after today
    Active,
    Completed,
    /// Active and not completed
    InProgress,
    /// Not completed and past target_date
    Overdue,
}

pub fn list(
    conn: &Connection,
    user_id: i64,
    scope: GoalScope,
    today: NaiveDate,
    limit: Option<usize>,
) -> Result<Vec<FinancialGoal>> {
    let (clause, order) = match scope {
        GoalScope::All => ("1 = 1", "created_at DESC, id DESC"),
        GoalScope::Active => ("target_date >= ?2", "target_date ASC, id ASC"),
        GoalScope::Completed => ("completed = 1", "completion_date DESC, id DESC"),
        GoalScope::InProgress => ("target_date >= ?2 AND completed = 0", "target_date ASC, id ASC"),
        GoalScope::Overdue => ("completed = 0 AND target_date < ?2", "target_date ASC, id ASC"),
    };
    let sql = format!(
        "SELECT {} FROM financial_goals WHERE user_id = ?1 AND {} ORDER BY {} LIMIT {}",
        COLUMNS,
        clause,
        order,
        limit.map_or(-1, |l| l as i64)
    );
    let mut stmt = conn.prepare(&sql)?;
    let goals = match scope {
        GoalScope::All | GoalScope::Completed => stmt
            .query_map([user_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        _ => stmt
            .query_map(params![user_id, today], from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(goals)
}

/// Goals index: the three lists plus the headline numbers
#[derive(Debug, Clone, Serialize)]
pub struct GoalSummary {
    pub active_goals: Vec<FinancialGoal>,
    pub completed_goals: Vec<FinancialGoal>,
    pub overdue_goals: Vec<FinancialGoal>,
    pub total_goals: usize,
    pub completion_rate: f64,
    pub total_saved: f64,
    pub total_debt_paid: f64,
}

pub fn summary(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<GoalSummary> {
    let active_goals = list(conn, user_id, GoalScope::Active, today, None)?;
    let completed_goals = list(conn, user_id, GoalScope::Completed, today, Some(5))?;
    let overdue_goals = list(conn, user_id, GoalScope::Overdue, today, None)?;

    let total_goals = active_goals.len() + completed_goals.len() + overdue_goals.len();
    let completion_rate = if total_goals > 0 {
        percentage(completed_goals.len() as f64, total_goals as f64).round()
    } else {
        0.0
    };
    let sum_of = |kind: GoalType| -> f64 {
        completed_goals
            .iter()
            .filter(|g| g.goal_type == kind)
            .map(|g| g.current_amount)
            .sum()
    };
    let total_saved = sum_of(GoalType::Saving);
    let total_debt_paid = sum_of(GoalType::DebtPayment);

    Ok(GoalSummary {
        active_goals,
        completed_goals,
        overdue_goals,
        total_goals,
        completion_rate,
        total_saved,
        total_debt_paid,
    })
}

/// Newest ten payments in the goal's category since it started
pub fn related_payments(conn: &Connection, goal: &FinancialGoal) -> Result<Vec<Payment>> {
    match goal.category_id {
        Some(category_id) => {
            payment::list_matching(conn, goal.user_id, category_id, None, Some(goal.start_date), 10)
        }
        None => Ok(Vec::new()),
    }
}
