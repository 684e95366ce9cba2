use super::{created, ok, ApiResult, AppState, CurrentUser};
use crate::db;
use crate::entities::subscription::{self, Subscription};
use crate::entities::user::{self, Role, User, UserParams};
use crate::error::AppError;
use crate::period;
use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    user: User,
    subscription: Subscription,
    debt_to_income_ratio: f64,
    over_indebted: bool,
    /// `null` = unlimited
    max_categories: Option<usize>,
    max_budgets: Option<usize>,
}

/// GET /api/users (admin)
pub async fn index(State(state): State<AppState>, current: CurrentUser) -> ApiResult<Vec<User>> {
    current.require_admin()?;
    let conn = db::lock(&state.db)?;
    ok(user::list(&conn)?)
}

/// POST /api/users - sign up
pub async fn create(
    State(state): State<AppState>,
    Json(params): Json<UserParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    let user = user::create(&conn, params, Role::Default)?;
    created(user)
}

/// GET /api/me
pub async fn show(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<Profile> {
    let conn = db::lock(&state.db)?;
    ok(profile(&conn, me)?)
}

/// PATCH /api/me
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(mut me): CurrentUser,
    Json(params): Json<UserParams>,
) -> ApiResult<Profile> {
    let conn = db::lock(&state.db)?;
    user::update(&conn, &mut me, params)?;
    ok(profile(&conn, me)?)
}

fn profile(conn: &rusqlite::Connection, user: User) -> anyhow::Result<Profile> {
    let subscription = subscription::ensure(conn, user.id, period::now())?;
    let debt_to_income_ratio = user::debt_to_income_ratio(conn, &user)?;
    Ok(Profile {
        subscription,
        debt_to_income_ratio,
        over_indebted: debt_to_income_ratio > user::DEBT_TO_INCOME_THRESHOLD,
        max_categories: user::max_categories(conn, &user)?,
        max_budgets: user::max_budgets(conn, &user)?,
        user,
    })
}
