use super::{ok, ApiResult, AppState, CurrentUser};
use crate::db;
use crate::entities::subscription::{self, Plan, PlanFeatures, Subscription};
use crate::error::AppError;
use crate::period;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SubscriptionDetail {
    #[serde(flatten)]
    subscription: Subscription,
    is_active: bool,
    /// `null` = never ends
    days_remaining: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PlanInfo {
    name: Plan,
    display_name: &'static str,
    price: f64,
    features: PlanFeatures,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    plan_name: String,
}

fn detail(subscription: Subscription) -> SubscriptionDetail {
    let now = period::now();
    SubscriptionDetail {
        is_active: subscription.is_active(now),
        days_remaining: subscription.days_remaining(now),
        subscription,
    }
}

/// GET /api/subscription
pub async fn show(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<SubscriptionDetail> {
    let conn = db::lock(&state.db)?;
    ok(detail(subscription::ensure(&conn, me.id, period::now())?))
}

/// GET /api/subscription/plans
pub async fn plans(_current: CurrentUser) -> ApiResult<Vec<PlanInfo>> {
    ok(Plan::all()
        .into_iter()
        .map(|plan| PlanInfo {
            name: plan,
            display_name: plan.display_name(),
            price: plan.price(),
            features: plan.features(),
        })
        .collect())
}

/// POST /api/subscription/upgrade
pub async fn upgrade(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(request): Json<UpgradeRequest>,
) -> ApiResult<SubscriptionDetail> {
    let plan = Plan::parse(request.plan_name.trim())
        .ok_or_else(|| AppError::BadRequest(format!("unknown plan {}", request.plan_name)))?;
    let now = period::now();
    let conn = db::lock(&state.db)?;
    let mut current = subscription::ensure(&conn, me.id, now)?;
    if !current.upgrade_to(plan, now) {
        return Err(AppError::BadRequest(format!(
            "cannot move from {} to {}",
            current.plan.display_name(),
            plan.display_name()
        )));
    }
    subscription::save(&conn, &current)?;
    tracing::info!(user_id = me.id, plan = plan.as_str(), "Subscription changed");
    ok(detail(current))
}

/// POST /api/subscription/cancel
pub async fn cancel(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<SubscriptionDetail> {
    let now = period::now();
    let conn = db::lock(&state.db)?;
    let mut current = subscription::ensure(&conn, me.id, now)?;
    if !current.cancel(now) {
        return Err(AppError::BadRequest("subscription is not active".into()));
    }
    subscription::save(&conn, &current)?;
    tracing::info!(user_id = me.id, "Subscription canceled");
    ok(detail(current))
}
