//! School Routes
//!
//! - GET /api/v1/schools - Schools visible to the caller
//! - POST /api/v1/schools - Create a school (super admin)
//! - GET /api/v1/schools/:id - Get a school
//! - PUT /api/v1/schools/:id - Update coin settings (admin)
//! - POST /api/v1/schools/:id/reconcile - Check (and optionally repair) ledger drift (admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{ListResponse, ReconcileParams};
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::store::{NewSchool, ReconcileReport, Role, School, SchoolUpdate};

/// GET /api/v1/schools
///
/// Super admins see every school, everyone else only their own.
pub async fn list_schools(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> ApiResult<Json<ListResponse<School>>> {
    let schools = match user.role() {
        Role::SuperAdmin => state.run(|store| store.list_schools()).await?,
        _ => {
            let id = user.school_id()?;
            vec![state.run(move |store| store.get_school(id)).await?]
        }
    };
    Ok(Json(schools.into()))
}

/// POST /api/v1/schools
pub async fn create_school(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<NewSchool>,
) -> ApiResult<(StatusCode, Json<School>)> {
    user.require_super_admin()?;
    let school = state.run(move |store| store.create_school(req)).await?;
    Ok((StatusCode::CREATED, Json(school)))
}

/// GET /api/v1/schools/:id
pub async fn get_school(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<School>> {
    user.require_member(id)?;
    let school = state.run(move |store| store.get_school(id)).await?;
    Ok(Json(school))
}

/// PUT /api/v1/schools/:id
pub async fn update_school(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<SchoolUpdate>,
) -> ApiResult<Json<School>> {
    user.require_admin(id)?;
    let school = state.run(move |store| store.update_school(id, req)).await?;
    tracing::info!(school_id = id, actor = user.id(), "Updated school");
    Ok(Json(school))
}

/// POST /api/v1/schools/:id/reconcile?repair=true
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<ReconcileParams>,
) -> ApiResult<Json<ReconcileReport>> {
    user.require_admin(id)?;
    let report = state
        .run(move |store| store.reconcile(id, params.repair))
        .await?;
    Ok(Json(report))
}
