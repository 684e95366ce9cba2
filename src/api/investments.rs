use super::{created, deleted, ok, ApiResult, AppState, CurrentUser, Deleted};
use crate::db;
use crate::entities::investment::{self, Investment, InvestmentParams, Performance, Portfolio, Trend, ValueEntry};
use crate::entities::investment_transaction::{
    self, InvestmentTransaction, InvestmentTransactionParams, MonthlyActivity, TransactionFilter,
    TransactionTotals, TransactionType,
};
use crate::error::AppError;
use crate::period;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct InvestmentDetail {
    #[serde(flatten)]
    investment: Investment,
    investment_type_text: String,
    risk_level_text: &'static str,
    performance: Performance,
    performance_trend: Trend,
    transactions: Vec<InvestmentTransaction>,
    value_history: Vec<ValueEntry>,
    monthly_history: Vec<MonthlyActivity>,
}

#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    current_value: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    transaction_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl TransactionQuery {
    fn filter(&self) -> Result<TransactionFilter, AppError> {
        let transaction_type = match self.transaction_type.as_deref().filter(|t| !t.is_empty()) {
            Some(raw) => Some(
                TransactionType::parse(raw)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown transaction type {}", raw)))?,
            ),
            None => None,
        };
        Ok(TransactionFilter {
            transaction_type,
            start_date: self.start_date.as_deref().and_then(period::parse_date),
            end_date: self.end_date.as_deref().and_then(period::parse_date),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionIndex {
    investment: Investment,
    transactions: Vec<InvestmentTransaction>,
    #[serde(flatten)]
    totals: TransactionTotals,
}

fn detail(conn: &rusqlite::Connection, investment: Investment) -> anyhow::Result<InvestmentDetail> {
    let sums = investment::transaction_sums(conn, investment.id)?;
    Ok(InvestmentDetail {
        investment_type_text: investment.investment_type_text(),
        risk_level_text: investment.risk_level_text(),
        performance: investment.performance(&sums, period::today()),
        performance_trend: investment.performance_trend(),
        transactions: investment_transaction::list(conn, &investment, TransactionFilter::default(), Some(10))?,
        value_history: investment.sorted_history(),
        monthly_history: investment_transaction::monthly_history(conn, &investment)?,
        investment,
    })
}

/// GET /api/investments
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<Portfolio> {
    let conn = db::lock(&state.db)?;
    ok(investment::portfolio(&conn, me.id)?)
}

/// POST /api/investments
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<InvestmentParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(investment::create(&conn, me.id, params, period::today())?)
}

/// GET /api/investments/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<InvestmentDetail> {
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, id)?;
    ok(detail(&conn, found)?)
}

/// PATCH /api/investments/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<InvestmentParams>,
) -> ApiResult<Investment> {
    let conn = db::lock(&state.db)?;
    let mut found = investment::find(&conn, me.id, id)?;
    investment::update(&conn, &mut found, params)?;
    ok(found)
}

/// DELETE /api/investments/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    investment::delete(&conn, me.id, id)?;
    deleted(id, "Investment")
}

/// PATCH /api/investments/:id/value
pub async fn update_value(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(request): Json<ValueRequest>,
) -> ApiResult<InvestmentDetail> {
    let conn = db::lock(&state.db)?;
    let mut found = investment::find(&conn, me.id, id)?;
    investment::update_current_value(&conn, &mut found, request.current_value, period::today())?;
    ok(detail(&conn, found)?)
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// GET /api/investments/:id/transactions
pub async fn transactions_index(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(investment_id): Path<i64>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<TransactionIndex> {
    let filter = query.filter()?;
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, investment_id)?;
    let transactions = investment_transaction::list(&conn, &found, filter, None)?;
    ok(TransactionIndex {
        totals: TransactionTotals::of(&transactions),
        transactions,
        investment: found,
    })
}

/// POST /api/investments/:id/transactions
pub async fn transactions_create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(investment_id): Path<i64>,
    Json(params): Json<InvestmentTransactionParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, investment_id)?;
    created(investment_transaction::create(&conn, &found, params)?)
}

/// GET /api/investments/:id/transactions/:transaction_id
pub async fn transactions_show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((investment_id, id)): Path<(i64, i64)>,
) -> ApiResult<InvestmentTransaction> {
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, investment_id)?;
    ok(investment_transaction::find(&conn, &found, id)?)
}

/// PATCH /api/investments/:id/transactions/:transaction_id
pub async fn transactions_update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((investment_id, id)): Path<(i64, i64)>,
    Json(params): Json<InvestmentTransactionParams>,
) -> ApiResult<InvestmentTransaction> {
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, investment_id)?;
    let mut record = investment_transaction::find(&conn, &found, id)?;
    investment_transaction::update(&conn, &mut record, params)?;
    ok(record)
}

/// DELETE /api/investments/:id/transactions/:transaction_id
pub async fn transactions_destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path((investment_id, id)): Path<(i64, i64)>,
) -> ApiResult<Deleted> {
    let conn = db::lock(&state.db)?;
    let found = investment::find(&conn, me.id, investment_id)?;
    investment_transaction::delete(&conn, &found, id)?;
    deleted(id, "Transaction")
}
