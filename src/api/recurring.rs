use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::payment::Payment;
use crate::entities::recurring::{self, RecurringParams, RecurringSummary, RecurringTransaction};
use crate::error::AppError;
use crate::period;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RecurringDetail {
    #[serde(flatten)]
    recurring: RecurringTransaction,
    frequency_text: &'static str,
    estimated_monthly_impact: f64,
    payment_history: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct Toggled {
    #[serde(flatten)]
    recurring: RecurringTransaction,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct Processed {
    processed: usize,
    message: String,
}

/// GET /api/recurring
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<RecurringSummary> {
    let conn = db::lock(&state.db)?;
    ok(recurring::summary(&conn, me.id)?)
}

/// POST /api/recurring
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<RecurringParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(recurring::create(&conn, me.id, params)?)
}

/// GET /api/recurring/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<RecurringDetail> {
    let conn = db::lock(&state.db)?;
    let found = recurring::find(&conn, me.id, id)?;
    ok(RecurringDetail {
        frequency_text: found.frequency.human_readable(),
        estimated_monthly_impact: found.estimated_monthly_impact(),
        payment_history: recurring::payment_history(&conn, &found)?,
        recurring: found,
    })
}

/// PATCH /api/recurring/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<RecurringParams>,
) -> ApiResult<RecurringTransaction> {
    let conn = db::lock(&state.db)?;
    let mut found = recurring::find(&conn, me.id, id)?;
    recurring::update(&conn, &mut found, params)?;
    ok(found)
}

/// DELETE /api/recurring/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    recurring::delete(&conn, me.id, id)?;
    deleted(id, "Recurring transaction")
}

/// PATCH /api/recurring/:id/toggle_active
pub async fn toggle_active(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Toggled> {
    let conn = db::lock(&state.db)?;
    let mut found = recurring::find(&conn, me.id, id)?;
    let active = recurring::toggle_active(&conn, &mut found)?;
    ok(Toggled {
        message: format!(
            "Recurring transaction was successfully {}.",
            if active { "activated" } else { "deactivated" }
        ),
        recurring: found,
    })
}

/// POST /api/recurring/process_due
pub async fn process_due(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<Processed> {
    let conn = db::lock(&state.db)?;
    let processed = recurring::process_due(&conn, me.id, period::today())?;
    ok(Processed {
        processed,
        message: format!("{} recurring transactions processed.", processed),
    })
}
