use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::budget::{self, BudgetParams, BudgetStatus};
use crate::error::AppError;
use crate::period;
use crate::services::{bnnb_comparison, BnnbComparison};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BudgetIndex {
    budgets: Vec<BudgetStatus>,
    total_limit: f64,
    total_spending: f64,
    bnnb_comparison: Option<BnnbComparison>,
}

/// GET /api/budgets - every budget with this month's spending
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<BudgetIndex> {
    let today = period::today();
    let conn = db::lock(&state.db)?;
    let budgets = budget::list(&conn, me.id)?
        .into_iter()
        .map(|b| budget::status(&conn, b, today))
        .collect::<anyhow::Result<Vec<_>>>()?;
    ok(BudgetIndex {
        total_limit: budgets.iter().map(|s| s.budget.monthly_limit).sum(),
        total_spending: budgets.iter().map(|s| s.current_spending).sum(),
        bnnb_comparison: bnnb_comparison::compare(&conn, &me, today)?,
        budgets,
    })
}

/// POST /api/budgets
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<BudgetParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    let created_budget = budget::create(&conn, &me, params)?;
    created(budget::status(&conn, created_budget, period::today())?)
}

/// GET /api/budgets/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<BudgetStatus> {
    let conn = db::lock(&state.db)?;
    let found = budget::find(&conn, me.id, id)?;
    ok(budget::status(&conn, found, period::today())?)
}

/// PATCH /api/budgets/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<BudgetParams>,
) -> ApiResult<BudgetStatus> {
    let conn = db::lock(&state.db)?;
    let mut found = budget::find(&conn, me.id, id)?;
    budget::update(&conn, &mut found, params)?;
    ok(budget::status(&conn, found, period::today())?)
}

/// DELETE /api/budgets/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    budget::delete(&conn, me.id, id)?;
    deleted(id, "Budget")
}
