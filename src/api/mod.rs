// JSON API
//
// Every route except health and sign-up runs as the user named by the
// `X-User-Id` header. Handlers lock the shared connection for the length of
// the request and never hold it across an await.

mod budgets;
mod categories;
mod dashboard;
mod debts;
mod economic;
mod goals;
mod investments;
mod payments;
mod recurring;
mod subscriptions;
mod users;

use crate::db::{self, SharedDb};
use crate::entities::user::{self, User};
use crate::error::AppError;
use crate::services::ExchangeRates;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const USER_HEADER: &str = "x-user-id";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub rates: Arc<ExchangeRates>,
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

fn created<T: Serialize>(data: T) -> Result<impl IntoResponse, AppError> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    id: i64,
    message: String,
}

fn deleted(id: i64, entity: &str) -> ApiResult<Deleted> {
    ok(Deleted {
        id,
        message: format!("{} was successfully deleted.", entity),
    })
}

/// The user making the request
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .ok_or(AppError::Unauthorized)?;
        let conn = db::lock(&state.db)?;
        let found = user::find_optional(&conn, id)?;
        found.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}

impl CurrentUser {
    fn require_admin(&self) -> Result<(), AppError> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

/// GET /api/health
async fn health_check() -> ApiResult<&'static str> {
    ok("OK")
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Users
        .route("/users", get(users::index).post(users::create))
        .route("/me", get(users::show).patch(users::update))
        // Categories & payments
        .route("/categories", get(categories::index).post(categories::create))
        .route("/categories/presets", get(categories::presets).post(categories::add_preset))
        .route(
            "/categories/:id",
            get(categories::show).patch(categories::update).delete(categories::destroy),
        )
        .route("/categories/:id/payments", get(payments::index).post(payments::create))
        .route(
            "/categories/:id/payments/:payment_id",
            get(payments::show).patch(payments::update).delete(payments::destroy),
        )
        .route("/payments", get(payments::scoped))
        .route("/payments/export", get(payments::export))
        .route("/payments/import", post(payments::import))
        // Budgets & debts
        .route("/budgets", get(budgets::index).post(budgets::create))
        .route(
            "/budgets/:id",
            get(budgets::show).patch(budgets::update).delete(budgets::destroy),
        )
        .route("/debts", get(debts::index).post(debts::create))
        .route(
            "/debts/:id",
            get(debts::show).patch(debts::update).delete(debts::destroy),
        )
        // Goals
        .route("/goals", get(goals::index).post(goals::create))
        .route(
            "/goals/:id",
            get(goals::show).patch(goals::update).delete(goals::destroy),
        )
        .route("/goals/:id/progress", patch(goals::update_progress))
        // Recurring transactions
        .route("/recurring", get(recurring::index).post(recurring::create))
        .route("/recurring/process_due", post(recurring::process_due))
        .route(
            "/recurring/:id",
            get(recurring::show).patch(recurring::update).delete(recurring::destroy),
        )
        .route("/recurring/:id/toggle_active", patch(recurring::toggle_active))
        // Investments
        .route("/investments", get(investments::index).post(investments::create))
        .route(
            "/investments/:id",
            get(investments::show).patch(investments::update).delete(investments::destroy),
        )
        .route("/investments/:id/value", patch(investments::update_value))
        .route(
            "/investments/:id/transactions",
            get(investments::transactions_index).post(investments::transactions_create),
        )
        .route(
            "/investments/:id/transactions/:transaction_id",
            get(investments::transactions_show)
                .patch(investments::transactions_update)
                .delete(investments::transactions_destroy),
        )
        // Subscription
        .route("/subscription", get(subscriptions::show))
        .route("/subscription/plans", get(subscriptions::plans))
        .route("/subscription/upgrade", post(subscriptions::upgrade))
        .route("/subscription/cancel", post(subscriptions::cancel))
        // Dashboard & reference data
        .route("/dashboard", get(dashboard::index))
        .route("/economic", get(economic::index))
        .route("/economic/exchange_rate", get(economic::exchange_rate))
        .route("/economic/convert", get(economic::convert))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
