use super::{ok, ApiResult, AppState, CurrentUser};
use crate::dashboard::{self, Dashboard, DashboardQuery};
use crate::db;
use crate::period;
use axum::extract::{Query, State};

/// GET /api/dashboard?start_date=&end_date=
pub async fn index(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<Dashboard> {
    let today = period::today();
    let range = query.range(today);
    let conn = db::lock(&state.db)?;
    ok(dashboard::build(&conn, &me, range, today)?)
}
