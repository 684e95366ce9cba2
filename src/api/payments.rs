use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::category;
use crate::entities::payment::{self, Payment, PaymentMethod, PaymentParams, Scope};
use crate::entities::user::{self, User};
use crate::error::AppError;
use crate::import::{self, ImportReport};
use crate::period;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const EXPORT_FEATURE: &str = "export_reports";

#[derive(Debug, Serialize)]
pub struct PaymentList {
    payments: Vec<Payment>,
    total_amount: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    /// recent | this_month | essential | discretionary | by_method | between
    scope: Option<String>,
    method: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<usize>,
}

impl ScopeQuery {
    fn scope(&self) -> Result<Scope, AppError> {
        let scope = match self.scope.as_deref().unwrap_or("recent") {
            "recent" => Scope::Recent,
            "this_month" => Scope::ThisMonth(period::today()),
            "essential" => Scope::Essential,
            "discretionary" => Scope::Discretionary,
            "by_method" => {
                let method = self
                    .method
                    .as_deref()
                    .and_then(PaymentMethod::parse)
                    .ok_or_else(|| AppError::BadRequest("unknown payment method".into()))?;
                Scope::ByMethod(method)
            }
            "between" => {
                let start = self.start_date.as_deref().and_then(period::parse_date);
                let end = self.end_date.as_deref().and_then(period::parse_date);
                match (start, end) {
                    (Some(start), Some(end)) if start <= end => Scope::Between(start, end),
                    _ => return Err(AppError::BadRequest("invalid date range".into())),
                }
            }
            other => return Err(AppError::BadRequest(format!("unknown scope {}", other))),
        };
        Ok(scope)
    }
}

/// GET /api/categories/:id/payments
pub async fn index(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(category_id): Path<i64>,
) -> ApiResult<PaymentList> {
    let conn = db::lock(&state.db)?;
    let category = category::find(&conn, me.id, category_id)?;
    let payments = payment::list_for_category(&conn, me.id, category.id, None)?;
    ok(PaymentList {
        total_amount: payment::total(&payments),
        payments,
    })
}

/// POST /api/categories/:id/payments
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(category_id): Path<i64>,
    Json(params): Json<PaymentParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    let category = category::find(&conn, me.id, category_id)?;
    created(payment::create(&conn, me.id, &category, params)?)
}

/// GET /api/categories/:id/payments/:payment_id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((category_id, id)): Path<(i64, i64)>,
) -> ApiResult<Payment> {
    let conn = db::lock(&state.db)?;
    ok(payment::find(&conn, me.id, category_id, id)?)
}

/// PATCH /api/categories/:id/payments/:payment_id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((category_id, id)): Path<(i64, i64)>,
    Json(params): Json<PaymentParams>,
) -> ApiResult<Payment> {
    let conn = db::lock(&state.db)?;
    let mut payment = payment::find(&conn, me.id, category_id, id)?;
    payment::update(&conn, &mut payment, params)?;
    ok(payment)
}

/// DELETE /api/categories/:id/payments/:payment_id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((category_id, id)): Path<(i64, i64)>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    payment::delete(&conn, me.id, category_id, id)?;
    deleted(id, "Payment")
}

/// GET /api/payments?scope=...
pub async fn scoped(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<PaymentList> {
    let scope = query.scope()?;
    let conn = db::lock(&state.db)?;
    let payments = payment::list_for_user(&conn, me.id, scope, query.limit)?;
    ok(PaymentList {
        total_amount: payment::total(&payments),
        payments,
    })
}

/// GET /api/payments/export - CSV download
pub async fn export(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    require_export(&conn, &me)?;
    let mut body = Vec::new();
    let rows = import::export_payments(&conn, me.id, &mut body)?;
    tracing::info!(user_id = me.id, rows, "Exported payments");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"payments.csv\""),
        ],
        body,
    ))
}

/// POST /api/payments/import - CSV body
pub async fn import(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    body: String,
) -> ApiResult<ImportReport> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("empty CSV body".into()));
    }
    let conn = db::lock(&state.db)?;
    require_export(&conn, &me)?;
    ok(import::import_payments(&conn, &me, body.as_bytes())?)
}

fn require_export(conn: &Connection, me: &User) -> Result<(), AppError> {
    if user::can_access_feature(conn, me, EXPORT_FEATURE)? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
