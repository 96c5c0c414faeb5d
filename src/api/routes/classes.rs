//! Class Routes
//!
//! - GET /api/v1/schools/:id/classes - Classes of a school, optional `?teacher_id=`
//! - POST /api/v1/classes - Create a class (teachers for themselves, admins for anyone)
//! - GET /api/v1/classes/:id - Get a class
//! - DELETE /api/v1/classes/:id - Delete a class (owner or admin)
//! - GET /api/v1/classes/:id/students - Roster
//! - POST /api/v1/classes/:id/students - Enroll a student (owner or admin)
//! - DELETE /api/v1/classes/:id/students/:student_id - Unenroll (owner or admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::CurrentUser;
use crate::api::dto::{ClassListParams, CreateClassRequest, EnrollRequest, ListResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::store::{Class, ClassEnrollment, NewClass, Profile};

/// Load a class the caller owns or administers
async fn owned_class(state: &AppState, user: &CurrentUser, id: i64) -> ApiResult<Class> {
    let class = state.run(move |store| store.get_class(id)).await?;
    if class.teacher_id != user.id() {
        user.require_admin(class.school_id)?;
    }
    Ok(class)
}

/// GET /api/v1/schools/:id/classes
pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(school_id): Path<i64>,
    Query(params): Query<ClassListParams>,
) -> ApiResult<Json<ListResponse<Class>>> {
    user.require_member(school_id)?;
    let classes = state
        .run(move |store| store.list_classes(school_id, params.teacher_id))
        .await?;
    Ok(Json(classes.into()))
}

/// POST /api/v1/classes
pub async fn create_class(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateClassRequest>,
) -> ApiResult<(StatusCode, Json<Class>)> {
    let school_id = user.school_id()?;
    user.require_staff(school_id)?;

    let teacher_id = match req.teacher_id {
        Some(id) if id != user.id() => {
            user.require_admin(school_id)?;
            id
        }
        _ => user.id(),
    };
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Class name cannot be empty".to_string()));
    }

    let new = NewClass {
        school_id,
        teacher_id,
        name: req.name,
        description: req.description,
    };
    let class = state.run(move |store| store.create_class(new)).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

/// GET /api/v1/classes/:id
pub async fn get_class(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Class>> {
    let class = state.run(move |store| store.get_class(id)).await?;
    user.require_member(class.school_id)?;
    Ok(Json(class))
}

/// DELETE /api/v1/classes/:id
pub async fn delete_class(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    owned_class(&state, &user, id).await?;
    state.run(move |store| store.delete_class(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/classes/:id/students
pub async fn class_roster(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ListResponse<Profile>>> {
    let class = state.run(move |store| store.get_class(id)).await?;
    user.require_member(class.school_id)?;
    let students = state.run(move |store| store.class_roster(id)).await?;
    Ok(Json(students.into()))
}

/// POST /api/v1/classes/:id/students
pub async fn enroll_student(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<ClassEnrollment>)> {
    owned_class(&state, &user, id).await?;
    let enrollment = state
        .run(move |store| store.enroll_student(id, req.student_id))
        .await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// DELETE /api/v1/classes/:id/students/:student_id
pub async fn unenroll_student(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((id, student_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    owned_class(&state, &user, id).await?;
    state
        .run(move |store| store.unenroll_student(id, student_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
