use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::debt::{self, Debt, DebtParams};
use crate::error::AppError;
use crate::services::{debt_analysis, DebtAnalysis};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DebtIndex {
    active_debts: Vec<Debt>,
    paid_off_debts: Vec<Debt>,
    analysis: DebtAnalysis,
}

#[derive(Debug, Serialize)]
pub struct DebtDetail {
    #[serde(flatten)]
    debt: Debt,
    remaining_balance: f64,
    total_interest_cost: f64,
    debt_to_income_ratio: f64,
}

/// GET /api/debts
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<DebtIndex> {
    let conn = db::lock(&state.db)?;
    ok(DebtIndex {
        active_debts: debt::list_active(&conn, me.id)?,
        paid_off_debts: debt::list_paid_off(&conn, me.id)?,
        analysis: debt_analysis::analyze(&conn, &me)?,
    })
}

/// POST /api/debts
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<DebtParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(debt::create(&conn, me.id, params)?)
}

/// GET /api/debts/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<DebtDetail> {
    let conn = db::lock(&state.db)?;
    let debt = debt::find(&conn, me.id, id)?;
    ok(DebtDetail {
        remaining_balance: debt.remaining_balance(),
        total_interest_cost: debt.total_interest_cost(),
        debt_to_income_ratio: debt.debt_to_income_ratio(&me),
        debt,
    })
}

/// PATCH /api/debts/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<DebtParams>,
) -> ApiResult<Debt> {
    let conn = db::lock(&state.db)?;
    let mut found = debt::find(&conn, me.id, id)?;
    debt::update(&conn, &mut found, params)?;
    ok(found)
}

/// DELETE /api/debts/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    debt::delete(&conn, me.id, id)?;
    deleted(id, "Debt")
}
