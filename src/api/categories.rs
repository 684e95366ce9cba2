use super::{created, deleted, ok, ApiResult, AppState, CurrentUser};
use crate::db;
use crate::entities::category::{self, Category, CategoryParams, CategoryPreset, PRESETS};
use crate::entities::payment::{self, Payment};
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct CategoryIndex {
    categories: Vec<Category>,
    grouped_categories: BTreeMap<&'static str, Vec<Category>>,
}

#[derive(Debug, Serialize)]
pub struct CategoryDetail {
    #[serde(flatten)]
    category: Category,
    payments: Vec<Payment>,
    total_amount: f64,
    monthly_average: f64,
    percentage_of_total: f64,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    preset_name: String,
}

/// GET /api/categories
pub async fn index(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> ApiResult<CategoryIndex> {
    let conn = db::lock(&state.db)?;
    let categories = category::list(&conn, me.id)?;
    let mut grouped_categories: BTreeMap<&'static str, Vec<Category>> = BTreeMap::new();
    for c in &categories {
        grouped_categories
            .entry(c.category_type.as_str())
            .or_default()
            .push(c.clone());
    }
    ok(CategoryIndex {
        categories,
        grouped_categories,
    })
}

/// POST /api/categories
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(params): Json<CategoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(category::create(&conn, &me, params)?)
}

/// GET /api/categories/:id
pub async fn show(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<CategoryDetail> {
    let conn = db::lock(&state.db)?;
    let category = category::find(&conn, me.id, id)?;
    ok(CategoryDetail {
        payments: payment::list_for_category(&conn, me.id, category.id, Some(10))?,
        total_amount: category::total_amount(&conn, category.id)?,
        monthly_average: category::monthly_average(&conn, category.id)?,
        percentage_of_total: category::percentage_of_total_spending(&conn, &category)?,
        category,
    })
}

/// PATCH /api/categories/:id
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
    Json(params): Json<CategoryParams>,
) -> ApiResult<Category> {
    let conn = db::lock(&state.db)?;
    let mut category = category::find(&conn, me.id, id)?;
    category::update(&conn, &mut category, params)?;
    ok(category)
}

/// DELETE /api/categories/:id
pub async fn destroy(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<super::Deleted> {
    let conn = db::lock(&state.db)?;
    category::delete(&conn, me.id, id)?;
    deleted(id, "Category")
}

/// GET /api/categories/presets
pub async fn presets(_current: CurrentUser) -> ApiResult<&'static [CategoryPreset]> {
    let presets: &'static [CategoryPreset] = &PRESETS;
    ok(presets)
}

/// POST /api/categories/presets
pub async fn add_preset(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(request): Json<PresetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let conn = db::lock(&state.db)?;
    created(category::add_preset(&conn, &me, &request.preset_name)?)
}
