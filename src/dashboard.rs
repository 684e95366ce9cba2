// Dashboard presenter
//
// Everything the dashboard shows, computed once per request over a date
// range (default: the current month).

use crate::entities::category;
use crate::entities::economic::{self, EconomicIndicator};
use crate::entities::financial_goal::{self, FinancialGoal, GoalScope};
use crate::entities::investment::{self, Allocation, Investment};
use crate::entities::payment::{self, Payment, Scope};
use crate::entities::recurring::{self, RecurringTransaction};
use crate::entities::user::{self, User};
use crate::money::round2;
use crate::period::{self, DateRange};
use crate::services::bnnb_comparison::{self, BnnbComparison};
use crate::services::debt_analysis::{self, DebtAnalysis};
use anyhow::Result;
use chrono::{Months, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const HIGH_CATEGORY_SPENDING_THRESHOLD: f64 = 40.0;
pub const UPCOMING_RECURRING_DAYS: u64 = 7;
pub const DASHBOARD_GOALS_LIMIT: usize = 3;
pub const DASHBOARD_INVEST_LIMIT: usize = 3;
pub const UPCOMING_RECURRING_LIMIT: usize = 3;
pub const RECENT_PAYMENTS_LIMIT: usize = 10;
pub const MONTHLY_TREND_MONTHS: u32 = 6;
const BURN_RATE_DAYS: u32 = 7;

/// Raw query parameters; unparseable dates fall back to the current month
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DashboardQuery {
    pub fn range(&self, today: NaiveDate) -> DateRange {
        let default = DateRange::month_of(today);
        let start = self
            .start_date
            .as_deref()
            .and_then(period::parse_date)
            .unwrap_or(default.start);
        let end = self
            .end_date
            .as_deref()
            .and_then(period::parse_date)
            .unwrap_or(default.end);
        if end < start {
            return default;
        }
        DateRange::new(start, end)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestmentReturn {
    pub value: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingTrend {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentPayment {
    #[serde(flatten)]
    pub payment: Payment,
    pub category_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_spending: f64,
    pub spending_by_category: BTreeMap<String, f64>,
    pub burn_rate: f64,
    pub projected_balance: f64,
    pub debt_analysis: DebtAnalysis,
    pub bnnb_comparison: Option<BnnbComparison>,
    pub active_goals: Vec<FinancialGoal>,
    pub goals_progress: f64,
    pub investments: Vec<Investment>,
    pub total_invested: f64,
    pub investment_return: InvestmentReturn,
    pub portfolio_allocation: BTreeMap<String, Allocation>,
    pub upcoming_recurring: Vec<RecurringTransaction>,
    pub recent_payments: Vec<RecentPayment>,
    pub latest_economic_data: Option<EconomicIndicator>,
    pub monthly_spending_trend: SpendingTrend,
    pub financial_insights: Vec<String>,
}

pub fn build(conn: &Connection, owner: &User, range: DateRange, today: NaiveDate) -> Result<Dashboard> {
    let total_spending = user::total_spending(conn, owner.id, range)?;
    let spending_by_category = user::spending_by_category(conn, owner.id, range)?;
    let burn_rate = round2(user::burn_rate(conn, owner.id, BURN_RATE_DAYS, today)?);
    let projected_balance = round2(user::projected_month_end_balance(conn, owner, today)?);

    let debt_analysis = debt_analysis::analyze(conn, owner)?;
    let bnnb_comparison = bnnb_comparison::compare(conn, owner, today)?;

    let active_goals = financial_goal::list(
        conn,
        owner.id,
        GoalScope::InProgress,
        today,
        Some(DASHBOARD_GOALS_LIMIT),
    )?;
    let goals_progress = goals_progress(conn, owner.id)?;

    let investments = investment::list_active_by_value(conn, owner.id, DASHBOARD_INVEST_LIMIT)?;
    let total_invested = investments.iter().map(|i| i.current_value).sum();
    let all_investments = investment::list(conn, owner.id)?;
    let investment_return = investment_return(&all_investments);
    let active: Vec<Investment> = all_investments.into_iter().filter(|i| i.active).collect();
    let portfolio_allocation = investment::allocation(&active);

    let upcoming_recurring = recurring::upcoming(
        conn,
        owner.id,
        today,
        UPCOMING_RECURRING_DAYS,
        UPCOMING_RECURRING_LIMIT,
    )?;
    let recent_payments = recent_payments(conn, owner.id)?;
    let latest_economic_data = economic::latest_indicator(conn)?;
    let monthly_spending_trend = monthly_spending_trend(conn, owner.id, today)?;

    let financial_insights = insights(
        total_spending,
        &spending_by_category,
        &debt_analysis,
        projected_balance,
        &active_goals,
        today,
    );

    Ok(Dashboard {
        start_date: range.start,
        end_date: range.end,
        total_spending,
        spending_by_category,
        burn_rate,
        projected_balance,
        debt_analysis,
        bnnb_comparison,
        active_goals,
        goals_progress,
        investments,
        total_invested,
        investment_return,
        portfolio_allocation,
        upcoming_recurring,
        recent_payments,
        latest_economic_data,
        monthly_spending_trend,
        financial_insights,
    })
}

/// Completed goals as a whole percentage of all goals
fn goals_progress(conn: &Connection, user_id: i64) -> Result<f64> {
    let (total, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM financial_goals WHERE user_id = ?1",
        [user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if total == 0 {
        return Ok(0.0);
    }
    Ok((completed as f64 / total as f64 * 100.0).round())
}

pub fn investment_return(investments: &[Investment]) -> InvestmentReturn {
    let total_initial: f64 = investments.iter().map(|i| i.initial_amount).sum();
    if total_initial <= 0.0 {
        return InvestmentReturn {
            value: 0.0,
            percentage: 0.0,
        };
    }
    let total_current: f64 = investments.iter().map(|i| i.current_value).sum();
    let value = total_current - total_initial;
    InvestmentReturn {
        value,
        percentage: round2(value / total_initial * 100.0),
    }
}

fn recent_payments(conn: &Connection, user_id: i64) -> Result<Vec<RecentPayment>> {
    let names: HashMap<i64, String> = category::list(conn, user_id)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let payments = payment::list_for_user(conn, user_id, Scope::Recent, Some(RECENT_PAYMENTS_LIMIT))?;
    Ok(payments
        .into_iter()
        .map(|payment| RecentPayment {
            category_name: names.get(&payment.category_id).cloned(),
            payment,
        })
        .collect())
}

/// Spending per calendar month over the last six months, oldest first
pub fn monthly_spending_trend(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<SpendingTrend> {
    let trend_end = period::month_end(today);
    let trend_start = period::month_start(today)
        .checked_sub_months(Months::new(MONTHLY_TREND_MONTHS - 1))
        .unwrap_or_else(|| period::month_start(today));

    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', created_at) AS month, SUM(amount) FROM payments
         WHERE user_id = ?1 AND date(created_at) BETWEEN ?2 AND ?3
         GROUP BY month",
    )?;
    let totals = stmt
        .query_map(params![user_id, trend_start, trend_end], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    let mut trend = SpendingTrend {
        labels: Vec::new(),
        values: Vec::new(),
    };
    let mut month = trend_start;
    while month <= trend_end {
        trend.labels.push(period::month_label(month));
        let key = month.format("%Y-%m").to_string();
        trend.values.push(totals.get(&key).copied().unwrap_or(0.0));
        match month.checked_add_months(Months::new(1)) {
            Some(next) => month = next,
            None => break,
        }
    }
    Ok(trend)
}

fn insights(
    total_spending: f64,
    spending_by_category: &BTreeMap<String, f64>,
    debt_analysis: &DebtAnalysis,
    projected_balance: f64,
    active_goals: &[FinancialGoal],
    today: NaiveDate,
) -> Vec<String> {
    let mut insights = Vec::new();

    if total_spending > 0.0 {
        let highest = spending_by_category
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((name, amount)) = highest {
            let share = (amount / total_spending * 100.0).round();
            if share > HIGH_CATEGORY_SPENDING_THRESHOLD {
                insights.push(format!(
                    "Your {} spending ({}%) is significantly higher than other categories.",
                    name, share
                ));
            }
        }
    }

    if debt_analysis.is_over_indebted {
        insights.push("Consider debt consolidation to reduce your debt-to-income ratio.".to_string());
    }

    if projected_balance < 0.0 {
        insights.push(
            "You're projected to overspend this month. Consider reducing non-essential expenses."
                .to_string(),
        );
    }

    let behind = active_goals
        .iter()
        .filter(|g| g.progress_percentage() < 25.0 && g.days_remaining(today) < 30)
        .count();
    if behind > 0 {
        insights.push(format!(
            "You're behind on {} financial goals that are due soon.",
            behind
        ));
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::debt::{self, DebtParams};
    use crate::entities::financial_goal::GoalParams;
    use crate::entities::recurring::RecurringParams;
    use crate::entities::user::{Role, UserParams};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(income: f64) -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let owner = user::create(
            &conn,
            UserParams {
                name: Some("Thandiwe Phiri".into()),
                email: Some("thandiwe@zm.com".into()),
                monthly_income: Some(income),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        (conn, owner)
    }

    fn add_category(conn: &Connection, user_id: i64, name: &str) -> i64 {
        conn.execute(
            "INSERT INTO categories (user_id, name, icon, created_at) VALUES (?1, ?2, 'x', '2026-01-01 00:00:00')",
            params![user_id, name],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn add_payment(conn: &Connection, user_id: i64, category_id: i64, amount: f64, at: &str) {
        conn.execute(
            "INSERT INTO payments (user_id, category_id, name, amount, created_at)
             VALUES (?1, ?2, 'Item', ?3, ?4)",
            params![user_id, category_id, amount, at],
        )
        .unwrap();
    }

    #[test]
    fn test_query_range_falls_back_to_current_month() {
        let today = date(2026, 3, 14);
        let query = DashboardQuery {
            start_date: Some("not-a-date".into()),
            end_date: None,
        };
        assert_eq!(query.range(today), DateRange::month_of(today));

        let query = DashboardQuery {
            start_date: Some("2026-01-01".into()),
            end_date: Some("2026-02-15".into()),
        };
        assert_eq!(query.range(today), DateRange::new(date(2026, 1, 1), date(2026, 2, 15)));
    }

    #[test]
    fn test_trend_has_six_labelled_months() {
        let (conn, owner) = setup(10000.0);
        let rent = add_category(&conn, owner.id, "Rent");
        add_payment(&conn, owner.id, rent, 3000.0, "2026-01-05 08:00:00");
        add_payment(&conn, owner.id, rent, 500.0, "2026-03-02 08:00:00");
        add_payment(&conn, owner.id, rent, 250.0, "2026-03-20 08:00:00");
        add_payment(&conn, owner.id, rent, 999.0, "2025-09-20 08:00:00");

        let trend = monthly_spending_trend(&conn, owner.id, date(2026, 3, 25)).unwrap();
        assert_eq!(
            trend.labels,
            vec!["Oct 2025", "Nov 2025", "Dec 2025", "Jan 2026", "Feb 2026", "Mar 2026"]
        );
        assert_eq!(trend.values, vec![0.0, 0.0, 0.0, 3000.0, 0.0, 750.0]);
    }

    #[test]
    fn test_dashboard_insights() {
        let (conn, owner) = setup(2000.0);
        let rent = add_category(&conn, owner.id, "Rent");
        let food = add_category(&conn, owner.id, "Food");
        add_payment(&conn, owner.id, rent, 1500.0, "2026-03-02 08:00:00");
        add_payment(&conn, owner.id, food, 500.0, "2026-03-05 08:00:00");
        debt::create(
            &conn,
            owner.id,
            DebtParams {
                lender_name: Some("Bayport".into()),
                principal_amount: Some(10000.0),
                monthly_payment: Some(1000.0),
                ..Default::default()
            },
        )
        .unwrap();
        financial_goal::create(
            &conn,
            owner.id,
            GoalParams {
                name: Some("Laptop".into()),
                target_amount: Some(8000.0),
                start_date: Some("2026-01-01".into()),
                target_date: Some("2026-03-31".into()),
                goal_type: Some("saving".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let today = date(2026, 3, 10);
        let dashboard = build(&conn, &owner, DateRange::month_of(today), today).unwrap();

        assert_eq!(dashboard.total_spending, 2000.0);
        assert_eq!(dashboard.spending_by_category["Rent"], 1500.0);
        assert_eq!(dashboard.recent_payments.len(), 2);
        assert_eq!(dashboard.recent_payments[0].category_name.as_deref(), Some("Food"));
        assert_eq!(dashboard.active_goals.len(), 1);
        assert_eq!(dashboard.goals_progress, 0.0);
        assert!(dashboard.bnnb_comparison.is_none());
        assert_eq!(dashboard.monthly_spending_trend.labels.len(), 6);

        let insights = &dashboard.financial_insights;
        assert!(insights.iter().any(|i| i.contains("Rent spending (75%)")));
        assert!(insights.iter().any(|i| i.contains("debt consolidation")));
        assert!(insights.iter().any(|i| i.contains("projected to overspend")));
        assert!(insights.iter().any(|i| i.contains("behind on 1 financial goals")));
    }

    #[test]
    fn test_burn_rate_covers_last_week_and_overdue_recurring_shows() {
        let (conn, owner) = setup(5000.0);
        let rent = add_category(&conn, owner.id, "Rent");
        add_payment(&conn, owner.id, rent, 3000.0, "2026-03-10 08:00:00");
        add_payment(&conn, owner.id, rent, 70.0, "2026-03-18 08:00:00");
        recurring::create(
            &conn,
            owner.id,
            RecurringParams {
                name: Some("Water bill".into()),
                amount: Some(120.0),
                frequency: Some("monthly".into()),
                start_date: Some("2026-03-18".into()),
                category_id: Some(rent),
                ..Default::default()
            },
        )
        .unwrap();

        let today = date(2026, 3, 20);
        let dashboard = build(&conn, &owner, DateRange::month_of(today), today).unwrap();

        assert_eq!(dashboard.burn_rate, 10.0);
        assert_eq!(dashboard.upcoming_recurring.len(), 1);
        assert_eq!(dashboard.upcoming_recurring[0].name, "Water bill");
    }

    #[test]
    fn test_investment_return_without_initial() {
        let result = investment_return(&[]);
        assert_eq!(result.value, 0.0);
        assert_eq!(result.percentage, 0.0);
    }
}
