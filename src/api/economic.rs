use super::{ok, ApiResult, AppState, CurrentUser};
use crate::db;
use crate::entities::economic::{self, BnnbData, EconomicIndicator, FoodComparison};
use crate::error::AppError;
use crate::period;
use crate::services::Quote;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct EconomicOverview {
    latest_indicator: Option<EconomicIndicator>,
    recent_indicators: Vec<EconomicIndicator>,
    latest_bnnb: Option<BnnbData>,
    recent_bnnb: Vec<BnnbData>,
    food_comparison: Option<FoodComparison>,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    amount: f64,
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
pub struct Conversion {
    amount: f64,
    from: String,
    to: String,
    /// `null` for an unsupported pair or when no rate is known
    converted: Option<f64>,
}

/// GET /api/economic
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<EconomicOverview> {
    let conn = db::lock(&state.db)?;
    ok(EconomicOverview {
        latest_indicator: economic::latest_indicator(&conn)?,
        recent_indicators: economic::recent_indicators(&conn)?,
        latest_bnnb: economic::latest_bnnb(&conn, economic::DEFAULT_LOCATION)?,
        recent_bnnb: economic::recent_bnnb(&conn)?,
        food_comparison: economic::compare_user_spending(&conn, me.id, period::today())?,
    })
}

/// GET /api/economic/exchange_rate
pub async fn exchange_rate(State(state): State<AppState>, _current: CurrentUser) -> ApiResult<Quote> {
    let quote = state
        .rates
        .quote(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Exchange rate not found".into()))?;
    ok(quote)
}

/// GET /api/economic/convert?amount=&from=&to=
pub async fn convert(
    State(state): State<AppState>,
    _current: CurrentUser,
    Query(query): Query<ConvertQuery>,
) -> ApiResult<Conversion> {
    if !query.amount.is_finite() {
        return Err(AppError::BadRequest("amount must be a number".into()));
    }
    let converted = state
        .rates
        .convert(&state.db, query.amount, &query.from, &query.to)
        .await?;
    ok(Conversion {
        amount: query.amount,
        from: query.from.to_ascii_uppercase(),
        to: query.to.to_ascii_uppercase(),
        converted,
    })
}
