use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::financial_goal::{self, FinancialGoal, GoalParams, GoalSummary, TrendPoint};
use crate::entities::payment::Payment;
use crate::error::AppError;
use crate::period;
use crate::services::goal_progress;
use crate::validation::FieldError;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct GoalDetail {
    #[serde(flatten)]
    goal: FinancialGoal,
    progress_percentage: f64,
    days_remaining: i64,
    daily_target: f64,
    related_payments: Vec<Payment>,
    trend_data: Vec<TrendPoint>,
    recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    current_amount: f64,
}

fn detail(conn: &rusqlite::Connection, goal: FinancialGoal) -> anyhow::Result<GoalDetail> {
    let today = period::today();
    Ok(GoalDetail {
        progress_percentage: goal.progress_percentage(),
        days_remaining: goal.days_remaining(today),
        daily_target: goal.daily_target(today),
        related_payments: financial_goal::related_payments(conn, &goal)?,
        trend_data: goal.trend_data(),
        recommendations: goal.recommendations(today),
        goal,
    })
}

/// GET /api/goals
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<GoalSummary> {
    let conn = db::lock(&state.db)?;
    ok(financial_goal::summary(&conn, me.id, period::today())?)
}

/// POST /api/goals
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<GoalParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(financial_goal::create(&conn, me.id, params)?)
}

/// GET /api/goals/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<GoalDetail> {
    let conn = db::lock(&state.db)?;
    let goal = financial_goal::find(&conn, me.id, id)?;
    ok(detail(&conn, goal)?)
}

/// PATCH /api/goals/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<GoalParams>,
) -> ApiResult<FinancialGoal> {
    let conn = db::lock(&state.db)?;
    let mut goal = financial_goal::find(&conn, me.id, id)?;
    financial_goal::update(&conn, &mut goal, params, period::today())?;
    ok(goal)
}

/// DELETE /api/goals/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    financial_goal::delete(&conn, me.id, id)?;
    deleted(id, "Financial goal")
}

/// PATCH /api/goals/:id/progress
pub async fn update_progress(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<GoalDetail> {
    let conn = db::lock(&state.db)?;
    let mut goal = financial_goal::find(&conn, me.id, id)?;
    if !goal_progress::update_progress(&conn, &mut goal, request.current_amount, period::today()) {
        return Err(AppError::Validation(vec![FieldError::new(
            "current_amount",
            "could not be updated",
        )]));
    }
    ok(detail(&conn, goal)?)
}
